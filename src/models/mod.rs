pub mod black_scholes;

use crate::contract::Leg;
use crate::trace::DebugTrace;

/// Inputs to one closed-form evaluation. Stack-allocated, Copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormulaInputs {
    pub spot: f64,
    pub strike: f64,
    /// Time to expiry in years.
    pub t: f64,
    pub discount_rate: f64,
    /// Drift (cost of carry).
    pub mu: f64,
    pub vol: f64,
    /// true = payout at hit, false = payout at expiry.
    pub payout_at_hit: bool,
}

impl FormulaInputs {
    /// Parameter set recorded next to every formula amount in the debug trace.
    pub fn trace(&self) -> DebugTrace {
        DebugTrace::new()
            .with("spot", self.spot)
            .with("strike", self.strike)
            .with("t", self.t)
            .with("discount_rate", self.discount_rate)
            .with("mu", self.mu)
            .with("vol", self.vol)
            .with("payouttime_code", if self.payout_at_hit { 1.0 } else { 0.0 })
    }
}

/// Closed-form prices and greeks the engine builds on.
/// Every method must be a pure function of its inputs. Never panics.
pub trait PricingFormulaLibrary: Send + Sync {
    fn name(&self) -> &'static str;

    /// Discounted probability of finishing in the money.
    fn digital_price(&self, leg: Leg, inputs: &FormulaInputs) -> f64;

    fn vanilla_price(&self, leg: Leg, inputs: &FormulaInputs) -> f64;

    /// Vanilla vega. Identical for CALL and PUT.
    fn vanilla_vega(&self, inputs: &FormulaInputs) -> f64;

    fn digital_vega(&self, leg: Leg, inputs: &FormulaInputs) -> f64;

    fn digital_delta(&self, leg: Leg, inputs: &FormulaInputs) -> f64;
}
