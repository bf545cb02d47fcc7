use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("settlement layer not configured: {0}")]
    NotConfigured(String),

    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("onchain integration error: {0}")]
    Onchain(String),

    #[error("settlement call timed out after {0}s")]
    Timeout(u64),
}

impl SettlementError {
    /// Transport and chain failures may succeed on a later attempt; request
    /// and configuration errors never will.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Onchain(_) | Self::Timeout(_))
    }
}
