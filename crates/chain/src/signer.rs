//! Liquidator wallet: key loading, signing and submission.

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{ChainError, ChainResult};
use crate::rpc::AccountsRpc;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Signing wallet of the liquidator.
pub struct Wallet {
    keypair: Keypair,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet").field("pubkey", &self.pubkey()).finish()
    }
}

impl Wallet {
    /// Load from a secret key stored as a JSON byte array (`[12, 34, ...]`).
    pub fn from_secret_json(secret: &str) -> ChainResult<Self> {
        let bytes: Vec<u8> = serde_json::from_str(secret.trim())
            .map_err(|e| ChainError::InvalidKey(format!("expected JSON byte array: {e}")))?;
        let keypair =
            Keypair::from_bytes(&bytes).map_err(|e| ChainError::InvalidKey(e.to_string()))?;

        info!(pubkey = %keypair.pubkey(), "Wallet loaded");
        Ok(Self { keypair })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Sign `instructions` against the latest blockhash and submit them.
    pub async fn send(
        &self,
        rpc: &dyn AccountsRpc,
        instructions: &[Instruction],
    ) -> ChainResult<Signature> {
        let start = Instant::now();
        let blockhash = rpc.get_latest_blockhash().await?;
        let tx = Transaction::new_signed_with_payer(
            instructions,
            Some(&self.pubkey()),
            &[&self.keypair],
            blockhash,
        );
        let signature = rpc.send_transaction(&tx).await?;

        debug!(
            signature = %signature,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Transaction submitted"
        );
        Ok(signature)
    }
}

/// Convert lamports to SOL for display.
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}
