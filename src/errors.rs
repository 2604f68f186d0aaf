/// Error types for the pricing kernel.
///
/// Two families live here:
/// - contract errors (`UnsupportedContractType`, `BarrierCountMismatch`,
///   `ExpiryBeforeStart`, `UnrecognizedPricedWith`) never escape the engine.
///   They turn into a fail-safe outcome: probability 1, markups 0.
/// - collaborator errors (`MarketData`, `Config`, `Parse`) propagate to the caller,
///   the kernel cannot price without market data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error("unsupported contract type: {0}")]
    UnsupportedContractType(String),

    #[error("barrier count mismatch: {0}")]
    BarrierCountMismatch(String),

    #[error("expiry before start: expiry {expiry} is before start {start}")]
    ExpiryBeforeStart { start: String, expiry: String },

    #[error("unrecognized priced_with: {0}")]
    UnrecognizedPricedWith(String),

    #[error("market data error: {0}")]
    MarketData(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl PricingError {
    /// True for the contract errors that map onto the fail-safe outcome.
    #[inline]
    pub fn is_fail_safe(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedContractType(_)
                | Self::BarrierCountMismatch(_)
                | Self::ExpiryBeforeStart { .. }
                | Self::UnrecognizedPricedWith(_)
        )
    }
}

impl From<serde_json::Error> for PricingError {
    fn from(e: serde_json::Error) -> Self {
        PricingError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for PricingError {
    fn from(e: std::io::Error) -> Self {
        PricingError::Config(e.to_string())
    }
}

pub type PricingResult<T> = Result<T, PricingError>;
