//! Ledger-backed clearing house client.

use async_trait::async_trait;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::layout::{self, ProgramState};
use super::{
    AccountDecoder, AccountEnumerator, DiscoveredUser, LiquidationExecutor, PositionSet,
    UserAccount, UserPage,
};
use crate::error::{ChainError, ChainResult};
use crate::rpc::{AccountFilter, AccountsRpc, Commitment};
use crate::signer::Wallet;

/// Mainnet clearing house program.
pub const DEFAULT_PROGRAM_ID: &str = "dammHkt7jmytvbS3nHTxQNEcP59aE57nxwV21YdqEDN";

const TOKEN_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");

const STATE_SEED: &[u8] = b"clearing_house";
const USER_SEED: &[u8] = b"user";

/// Stateless decoder for clearing house accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearingHouseDecoder;

impl AccountDecoder for ClearingHouseDecoder {
    fn decode_user(&self, address: &Pubkey, data: &[u8]) -> ChainResult<UserAccount> {
        layout::decode_user(address, data)
    }

    fn decode_positions(&self, address: &Pubkey, data: &[u8]) -> ChainResult<PositionSet> {
        layout::decode_positions(address, data)
    }
}

/// Clearing house client bound to the liquidator wallet.
pub struct ClearingHouse {
    rpc: Arc<dyn AccountsRpc>,
    wallet: Arc<Wallet>,
    program_id: Pubkey,
    state_address: Pubkey,
    state: ProgramState,
    /// Liquidator's own user account, credited with the liquidation fee
    liquidator_user: Pubkey,
    commitment: Commitment,
}

impl ClearingHouse {
    /// Load program state and bind to `wallet`.
    #[instrument(skip(rpc, wallet), fields(program = %program_id))]
    pub async fn connect(
        rpc: Arc<dyn AccountsRpc>,
        wallet: Arc<Wallet>,
        program_id: Pubkey,
        commitment: Commitment,
    ) -> ChainResult<Self> {
        let state_address = Self::state_address(&program_id);
        let data = rpc
            .get_account(&state_address, commitment)
            .await?
            .ok_or(ChainError::AccountNotFound(state_address))?;
        let state = layout::decode_state(&state_address, &data)?;

        if state.exchange_paused {
            warn!("Exchange is paused, liquidations will fail until it resumes");
        }

        let liquidator_user = Self::user_address(&program_id, &wallet.pubkey());

        info!(
            state = %state_address,
            markets = %state.markets,
            liquidator_user = %liquidator_user,
            "Clearing house connected"
        );

        Ok(Self {
            rpc,
            wallet,
            program_id,
            state_address,
            state,
            liquidator_user,
            commitment,
        })
    }

    /// Address of the program state account.
    pub fn state_address(program_id: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[STATE_SEED], program_id).0
    }

    /// Address of the user account owned by `authority`.
    pub fn user_address(program_id: &Pubkey, authority: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[USER_SEED, authority.as_ref()], program_id).0
    }

    pub fn markets_address(&self) -> Pubkey {
        self.state.markets
    }

    fn liquidate_instruction(
        &self,
        user_account: &Pubkey,
        positions_account: &Pubkey,
    ) -> Instruction {
        let s = &self.state;
        Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new_readonly(self.state_address, false),
                AccountMeta::new_readonly(self.wallet.pubkey(), true),
                AccountMeta::new(self.liquidator_user, false),
                AccountMeta::new(*user_account, false),
                AccountMeta::new(s.collateral_vault, false),
                AccountMeta::new_readonly(s.collateral_vault_authority, false),
                AccountMeta::new(s.insurance_vault, false),
                AccountMeta::new_readonly(s.insurance_vault_authority, false),
                AccountMeta::new_readonly(TOKEN_PROGRAM_ID, false),
                AccountMeta::new(s.markets, false),
                AccountMeta::new(*positions_account, false),
                AccountMeta::new(s.trade_history, false),
                AccountMeta::new(s.liquidation_history, false),
                AccountMeta::new(s.funding_payment_history, false),
            ],
            data: layout::instruction_discriminator("liquidate").to_vec(),
        }
    }
}

#[async_trait]
impl AccountEnumerator for ClearingHouse {
    fn user_account_address(&self, authority: &Pubkey) -> Pubkey {
        Self::user_address(&self.program_id, authority)
    }

    async fn users_page(&self, cursor: Option<&str>, limit: usize) -> ChainResult<UserPage> {
        let filters = [AccountFilter::Memcmp {
            offset: 0,
            bytes: layout::account_discriminator("User").to_vec(),
        }];
        let page = self
            .rpc
            .get_program_accounts_page(&self.program_id, &filters, cursor, limit, self.commitment)
            .await?;

        let users = page
            .accounts
            .into_iter()
            .map(|(address, data)| {
                Ok(DiscoveredUser {
                    address,
                    user: layout::decode_user(&address, &data)?,
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;

        Ok(UserPage {
            users,
            next: page.next,
        })
    }
}

#[async_trait]
impl LiquidationExecutor for ClearingHouse {
    async fn liquidate(
        &self,
        user_account: &Pubkey,
        positions_account: &Pubkey,
    ) -> ChainResult<Signature> {
        let instruction = self.liquidate_instruction(user_account, positions_account);
        self.wallet.send(self.rpc.as_ref(), &[instruction]).await
    }
}
