//! Monitor error taxonomy.

use liquidator_chain::{ChainError, Pubkey};
use thiserror::Error;

use crate::risk::RiskError;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// RPC, transport or signing failure
    #[error("chain error: {0}")]
    Chain(#[source] ChainError),

    /// A blob that should be well-formed did not decode
    #[error("decode error: {0}")]
    Decode(#[source] ChainError),

    #[error("risk evaluation failed for {authority}: {source}")]
    Risk { authority: Pubkey, source: RiskError },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitorError {
    /// Whether the process should exit instead of carrying on with stale or corrupt state.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Decode(_) => true,
            Self::Chain(e) => e.is_fatal(),
            Self::Risk { .. } => false,
        }
    }
}

impl From<ChainError> for MonitorError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Decode { .. } => Self::Decode(err),
            other => Self::Chain(other),
        }
    }
}
