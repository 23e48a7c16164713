use crate::chain::ChainId;

/// Error raised by a wallet adapter. Returned to the caller of the operation
/// that triggered it exactly as the adapter produced it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// The user declined the request in the wallet UI.
    #[error("request rejected by user: {0}")]
    Rejected(String),
    /// Wallet extension or device is not reachable.
    #[error("wallet unavailable: {0}")]
    Unavailable(String),
    #[error("provider error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The wallet does not know the requested chain yet; add it, then retry.
    #[error("chain {chain_id} is not configured in the wallet")]
    ChainNotConfigured { chain_id: ChainId },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("wallet request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    /// EIP-1193 / EIP-3326 provider error codes.
    pub fn from_rpc_code(code: i64, message: impl Into<String>, chain_id: Option<&ChainId>) -> Self {
        let message = message.into();
        match (code, chain_id) {
            (4001, _) => Self::Rejected(message),
            (4902, Some(chain_id)) => Self::ChainNotConfigured {
                chain_id: chain_id.clone(),
            },
            (4900 | 4901, _) => Self::Unavailable(message),
            _ => Self::Rpc { code, message },
        }
    }

    /// Errors a caller can act on without reconnecting (add the chain, ask
    /// the user again).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChainNotConfigured { .. } | Self::Rejected(_) | Self::Timeout
        )
    }

    /// Short classification string for logs and event payloads.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "rejected",
            Self::Unavailable(_) => "unavailable",
            Self::Rpc { .. } => "rpc",
            Self::ChainNotConfigured { .. } => "chain_not_configured",
            Self::Unsupported(_) => "unsupported",
            Self::Timeout => "timeout",
            Self::Other(_) => "other",
        }
    }
}

/// Error taxonomy of the session and connection lifecycle.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HingeError {
    /// Malformed session construction input.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Adapter failure, passed through untouched.
    #[error(transparent)]
    Connection(#[from] AdapterError),

    #[error("invalid transition for {wallet_id}: {from} -> {to}")]
    InvalidTransition {
        wallet_id: String,
        from: &'static str,
        to: &'static str,
    },

    /// Only ever stored on a state record or published; never returned to a caller.
    #[error("recovery exhausted for {wallet_id} after {attempts} attempts")]
    RecoveryExhausted { wallet_id: String, attempts: u32 },

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl HingeError {
    pub fn is_chain_not_configured(&self) -> bool {
        matches!(
            self,
            Self::Connection(AdapterError::ChainNotConfigured { .. })
        )
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Connection(e) => e.error_kind(),
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::RecoveryExhausted { .. } => "recovery_exhausted",
            Self::Persistence(_) => "persistence",
        }
    }
}

pub type Result<T, E = HingeError> = std::result::Result<T, E>;
