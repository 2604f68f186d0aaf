use crate::errors::{PricingError, PricingResult};
use crate::market::surface::{SmileSurface, SurfaceTenor};
use crate::market::{Smile, ATM_DELTA};
use serde::{Deserialize, Serialize};

/// EWMA decay factor (lambda = 0.94 is standard for short-horizon)
const EWMA_LAMBDA: f64 = 0.94;

/// Minimum returns before a vol estimate is considered reliable
const MIN_SAMPLES: usize = 20;

/// Tenors of a generated surface, in days.
pub const SURFACE_TENORS: [f64; 6] = [1.0, 7.0, 30.0, 90.0, 180.0, 365.0];

/// Annualized EWMA volatility of a price series.
///
/// The variance is seeded with the sample variance of the first `MIN_SAMPLES` log
/// returns, then decayed forward through the rest.
pub fn realized_volatility(prices: &[f64], observations_per_year: f64) -> PricingResult<f64> {
    if prices.iter().any(|p| !(*p > 0.0) || !p.is_finite()) {
        return Err(PricingError::MarketData(
            "price series has a non-positive or non-finite price".into(),
        ));
    }
    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    if returns.len() < MIN_SAMPLES {
        return Err(PricingError::MarketData(format!(
            "need at least {MIN_SAMPLES} returns, got {}",
            returns.len()
        )));
    }

    let (seed, rest) = returns.split_at(MIN_SAMPLES);
    let mean = seed.iter().sum::<f64>() / seed.len() as f64;
    let mut variance =
        seed.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (seed.len() - 1) as f64;

    for r in rest {
        variance = EWMA_LAMBDA * variance + (1.0 - EWMA_LAMBDA) * r * r;
    }

    Ok(variance.sqrt() * observations_per_year.sqrt())
}

/// Multipliers that turn one base vol into a symmetric smile with term structure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmileShape {
    /// 10/90-delta factor.
    pub wings: f64,
    /// 25/75-delta factor.
    pub body: f64,
    pub term_slope: f64,
    /// ATM vol spread at every tenor.
    pub vol_spread: f64,
}

impl Default for SmileShape {
    fn default() -> Self {
        Self {
            wings: 1.06,
            body: 1.02,
            term_slope: 0.1,
            vol_spread: 0.01,
        }
    }
}

impl SmileShape {
    /// Scale applied to the base vol at `days`. The overnight tenor is the base.
    #[inline]
    pub fn term_factor(&self, days: f64) -> f64 {
        if days <= SURFACE_TENORS[0] {
            1.0
        } else {
            1.0 + self.term_slope * (days / 365.0 + 1.0).ln()
        }
    }

    fn smile(&self, atm: f64) -> Smile {
        [
            (10, atm * self.wings),
            (25, atm * self.body),
            (ATM_DELTA, atm),
            (75, atm * self.body),
            (90, atm * self.wings),
        ]
        .into_iter()
        .collect()
    }
}

/// Surface generated from a realized vol, for underlyings with no quoted smile.
pub fn build_surface(base_vol: f64, shape: &SmileShape) -> PricingResult<SmileSurface> {
    if !(base_vol > 0.0) || !base_vol.is_finite() {
        return Err(PricingError::MarketData(format!(
            "base vol must be positive, got {base_vol}"
        )));
    }
    let tenors = SURFACE_TENORS
        .iter()
        .map(|&days| SurfaceTenor {
            days,
            smile: shape.smile(base_vol * shape.term_factor(days)),
            vol_spread: [(ATM_DELTA, shape.vol_spread)].into_iter().collect(),
        })
        .collect();
    tracing::debug!(base_vol, "built historical vol surface");
    SmileSurface::new(tenors, SURFACE_TENORS[0])
}
