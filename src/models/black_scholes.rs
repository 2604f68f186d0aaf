use crate::contract::Leg;
use crate::models::{FormulaInputs, PricingFormulaLibrary};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Black-Scholes-Merton with a separate cost of carry.
///
/// d1 = (ln(S/K) + (mu + sigma^2/2)*t) / (sigma * sqrt(t)),  d2 = d1 - sigma * sqrt(t)
///
/// Digital CALL = e^(-r*t) * N(d2), PUT = e^(-r*t) * N(-d2).
///
/// European digitals only pay at expiry, so `payout_at_hit` does not change any value
/// here; it is carried for libraries that also price touch payoffs.
pub struct BlackScholesMerton {
    /// Standard normal distribution (created once, reused)
    normal: Normal,
}

impl Default for BlackScholesMerton {
    fn default() -> Self {
        Self::new()
    }
}

/// Precomputed per-evaluation terms. Stack-allocated.
#[derive(Debug, Clone, Copy)]
struct Terms {
    d1: f64,
    d2: f64,
    sigma_sqrt_t: f64,
    discount: f64,
    /// e^((mu - r) * t)
    carry: f64,
}

impl BlackScholesMerton {
    pub fn new() -> Self {
        Self {
            normal: Normal::standard(),
        }
    }

    /// None when sigma * sqrt(t) is too small for d1/d2 to mean anything.
    #[inline]
    fn terms(&self, p: &FormulaInputs) -> Option<Terms> {
        let sigma_sqrt_t = p.vol * p.t.max(0.0).sqrt();
        if sigma_sqrt_t < 1e-12 || p.spot <= 0.0 || p.strike <= 0.0 {
            return None;
        }
        let d1 = ((p.spot / p.strike).ln() + (p.mu + 0.5 * p.vol * p.vol) * p.t) / sigma_sqrt_t;
        Some(Terms {
            d1,
            d2: d1 - sigma_sqrt_t,
            sigma_sqrt_t,
            discount: (-p.discount_rate * p.t).exp(),
            carry: ((p.mu - p.discount_rate) * p.t).exp(),
        })
    }
}

impl PricingFormulaLibrary for BlackScholesMerton {
    #[inline]
    fn name(&self) -> &'static str {
        "Black-Scholes-Merton"
    }

    #[inline]
    fn digital_price(&self, leg: Leg, p: &FormulaInputs) -> f64 {
        let Some(x) = self.terms(p) else {
            let discount = (-p.discount_rate * p.t.max(0.0)).exp();
            let in_the_money = match leg {
                Leg::Call => p.spot > p.strike,
                Leg::Put => p.spot < p.strike,
            };
            return if in_the_money { discount } else { 0.0 };
        };
        x.discount * self.normal.cdf(leg.sign() * x.d2)
    }

    #[inline]
    fn vanilla_price(&self, leg: Leg, p: &FormulaInputs) -> f64 {
        let Some(x) = self.terms(p) else {
            let t = p.t.max(0.0);
            let forward_leg = p.spot * ((p.mu - p.discount_rate) * t).exp();
            let strike_leg = p.strike * (-p.discount_rate * t).exp();
            return (leg.sign() * (forward_leg - strike_leg)).max(0.0);
        };
        let s = leg.sign();
        s * (p.spot * x.carry * self.normal.cdf(s * x.d1)
            - p.strike * x.discount * self.normal.cdf(s * x.d2))
    }

    #[inline]
    fn vanilla_vega(&self, p: &FormulaInputs) -> f64 {
        match self.terms(p) {
            Some(x) => p.spot * x.carry * p.t.sqrt() * self.normal.pdf(x.d1),
            None => 0.0,
        }
    }

    #[inline]
    fn digital_vega(&self, leg: Leg, p: &FormulaInputs) -> f64 {
        match self.terms(p) {
            Some(x) => -leg.sign() * x.discount * self.normal.pdf(x.d2) * x.d1 / p.vol,
            None => 0.0,
        }
    }

    #[inline]
    fn digital_delta(&self, leg: Leg, p: &FormulaInputs) -> f64 {
        match self.terms(p) {
            Some(x) => leg.sign() * x.discount * self.normal.pdf(x.d2) / (p.spot * x.sigma_sqrt_t),
            None => 0.0,
        }
    }
}
