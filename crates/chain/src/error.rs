//! Error types for ledger and exchange interaction.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Errors raised while talking to the ledger or decoding exchange accounts.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    MalformedResponse(String),

    #[error("rpc returned {got} accounts for {expected} requested")]
    LengthMismatch { expected: usize, got: usize },

    #[error("failed to decode {kind} account {address}: {reason}")]
    Decode {
        kind: &'static str,
        address: Pubkey,
        reason: String,
    },

    #[error("account {0} not found")]
    AccountNotFound(Pubkey),

    #[error("rpc call timed out after {0}ms")]
    Timeout(u64),

    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("transaction build failed: {0}")]
    Transaction(String),
}

impl ChainError {
    /// Whether the error should abort the process rather than be retried next tick.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidKey(_))
    }

    pub(crate) fn decode(kind: &'static str, address: Pubkey, reason: impl ToString) -> Self {
        Self::Decode {
            kind,
            address,
            reason: reason.to_string(),
        }
    }
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ChainError::InvalidKey("bad".into()).is_fatal());
        assert!(!ChainError::Timeout(100).is_fatal());
        assert!(!ChainError::Rpc {
            code: -32005,
            message: "node is behind".into()
        }
        .is_fatal());
        assert!(!ChainError::decode("user", Pubkey::default(), "short").is_fatal());
    }
}
