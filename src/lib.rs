//! Pricing kernel for European digital options: skew-adjusted Black-Scholes
//! probabilities with risk and commission markups.

pub mod config;
pub mod contract;
pub mod engine;
pub mod errors;
pub mod market;
pub mod models;
pub mod risk;
pub mod trace;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use contract::{ContractType, PricedWith, PricingRequest, VolInput};
pub use engine::{Priced, PricingEngine, PricingOutcome};
pub use errors::{PricingError, PricingResult};
pub use trace::DebugTrace;
