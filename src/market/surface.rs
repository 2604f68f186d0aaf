use crate::contract::DAYS_PER_YEAR;
use crate::errors::{PricingError, PricingResult};
use crate::market::{
    RrBf, Smile, SoughtPoint, SpreadPoint, TenorSmile, VolQuery, VolatilitySurface, ATM_DELTA,
};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Two tenors closer than this are the same tenor.
const TENOR_TOLERANCE: f64 = 1e-9;

/// Fallback vol spread when a tenor quotes none.
const DEFAULT_VOL_SPREAD: f64 = 0.01;

/// Passes of strike -> delta -> vol. Enough for the smile shapes quoted in practice.
const DELTA_ITERATIONS: usize = 3;

/// One quoted tenor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceTenor {
    pub days: f64,
    pub smile: Smile,
    /// Vol spread per smile point.
    #[serde(default)]
    pub vol_spread: Smile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurfaceData {
    tenors: Vec<SurfaceTenor>,
    #[serde(default = "default_overnight_tenor")]
    overnight_tenor: f64,
}

fn default_overnight_tenor() -> f64 {
    1.0
}

/// Delta-keyed smile surface.
///
/// Strikes are mapped to call delta with the vol read at that delta (a short fixed-point
/// loop starting from ATM), smiles are linear in delta, tenors are joined linearly in
/// total variance. Outside the quoted range everything extrapolates flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SurfaceData", into = "SurfaceData")]
pub struct SmileSurface {
    tenors: Vec<SurfaceTenor>,
    overnight_tenor: f64,
}

impl TryFrom<SurfaceData> for SmileSurface {
    type Error = PricingError;

    fn try_from(data: SurfaceData) -> PricingResult<Self> {
        Self::new(data.tenors, data.overnight_tenor)
    }
}

impl From<SmileSurface> for SurfaceData {
    fn from(surface: SmileSurface) -> Self {
        Self {
            tenors: surface.tenors,
            overnight_tenor: surface.overnight_tenor,
        }
    }
}

impl SmileSurface {
    pub fn new(mut tenors: Vec<SurfaceTenor>, overnight_tenor: f64) -> PricingResult<Self> {
        if tenors.is_empty() {
            return Err(PricingError::MarketData("surface has no tenors".into()));
        }
        for tenor in &tenors {
            if !(tenor.days > 0.0) {
                return Err(PricingError::MarketData(format!(
                    "tenor days must be positive, got {}",
                    tenor.days
                )));
            }
            if !tenor.smile.contains_key(&ATM_DELTA) {
                return Err(PricingError::MarketData(format!(
                    "smile at {} days has no ATM point",
                    tenor.days
                )));
            }
            if tenor.smile.values().any(|v| !(*v > 0.0) || !v.is_finite()) {
                return Err(PricingError::MarketData(format!(
                    "smile at {} days has a non-positive vol",
                    tenor.days
                )));
            }
        }
        tenors.sort_by(|a, b| a.days.total_cmp(&b.days));
        Ok(Self {
            tenors,
            overnight_tenor,
        })
    }

    /// Same smile at every tenor.
    pub fn flat(vol: f64, tenor_days: &[f64]) -> PricingResult<Self> {
        let smile: Smile = [(25, vol), (ATM_DELTA, vol), (75, vol)].into_iter().collect();
        let tenors = tenor_days
            .iter()
            .map(|&days| SurfaceTenor {
                days,
                smile: smile.clone(),
                vol_spread: Smile::new(),
            })
            .collect();
        Self::new(tenors, default_overnight_tenor())
    }

    pub fn tenors(&self) -> &[SurfaceTenor] {
        &self.tenors
    }

    /// Smile interpolated to `days`.
    fn smile_at(&self, days: f64) -> Smile {
        let (first, last) = match (self.tenors.first(), self.tenors.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Smile::new(),
        };
        if days <= first.days {
            return first.smile.clone();
        }
        if days >= last.days {
            return last.smile.clone();
        }

        let upper = self
            .tenors
            .iter()
            .position(|t| t.days >= days)
            .unwrap_or(self.tenors.len() - 1);
        let lo = &self.tenors[upper.saturating_sub(1)];
        let hi = &self.tenors[upper];
        if (hi.days - lo.days).abs() < TENOR_TOLERANCE {
            return hi.smile.clone();
        }
        let w = (days - lo.days) / (hi.days - lo.days);

        lo.smile
            .keys()
            .chain(hi.smile.keys())
            .map(|&delta| {
                let v_lo = interpolate_delta(&lo.smile, delta as f64);
                let v_hi = interpolate_delta(&hi.smile, delta as f64);
                let total_var =
                    (1.0 - w) * v_lo * v_lo * lo.days + w * v_hi * v_hi * hi.days;
                (delta, (total_var / days).sqrt())
            })
            .collect()
    }

    fn tenor(&self, days: f64) -> PricingResult<&SurfaceTenor> {
        self.tenors
            .iter()
            .find(|t| (t.days - days).abs() < TENOR_TOLERANCE)
            .ok_or_else(|| PricingError::MarketData(format!("no smile quoted at {days} days")))
    }
}

/// Linear in delta, flat outside the quoted points.
fn interpolate_delta(smile: &Smile, delta: f64) -> f64 {
    let mut below: Option<(f64, f64)> = None;
    let mut above: Option<(f64, f64)> = None;
    for (&d, &v) in smile {
        let d = d as f64;
        if d <= delta {
            below = Some((d, v));
        } else if above.is_none() {
            above = Some((d, v));
        }
    }
    match (below, above) {
        (Some((d0, v0)), Some((d1, v1))) => v0 + (v1 - v0) * (delta - d0) / (d1 - d0),
        (Some((_, v)), None) | (None, Some((_, v))) => v,
        (None, None) => f64::NAN,
    }
}

/// Undiscounted call delta in percent.
fn call_delta_pct(spot: f64, strike: f64, years: f64, carry: f64, vol: f64) -> f64 {
    let sigma_sqrt_t = vol * years.sqrt();
    if sigma_sqrt_t < 1e-12 {
        return if spot >= strike { 100.0 } else { 0.0 };
    }
    let d1 = ((spot / strike).ln() + (carry + 0.5 * vol * vol) * years) / sigma_sqrt_t;
    100.0 * Normal::standard().cdf(d1)
}

impl VolatilitySurface for SmileSurface {
    fn get_volatility(&self, query: &VolQuery) -> PricingResult<f64> {
        let days = query.expiry.days().max(f64::EPSILON);
        let smile = self.smile_at(days);

        let vol = match query.point {
            SoughtPoint::Delta(delta) => interpolate_delta(&smile, delta),
            SoughtPoint::Strike(strike) => {
                if !(strike > 0.0) || !(query.spot > 0.0) {
                    return Err(PricingError::MarketData(format!(
                        "cannot read vol at strike {strike} with spot {}",
                        query.spot
                    )));
                }
                let years = days / DAYS_PER_YEAR;
                let carry = query.r_rate - query.q_rate;
                let mut vol = interpolate_delta(&smile, ATM_DELTA as f64);
                for _ in 0..DELTA_ITERATIONS {
                    let delta = call_delta_pct(query.spot, strike, years, carry, vol);
                    vol = interpolate_delta(&smile, delta);
                }
                vol
            }
        };

        if vol.is_finite() {
            Ok(vol)
        } else {
            Err(PricingError::MarketData(format!(
                "no vol for {:?} at {days} days",
                query.point
            )))
        }
    }

    fn get_spread(&self, point: SpreadPoint, day: f64) -> PricingResult<f64> {
        let spread_of = |tenor: &SurfaceTenor| -> f64 {
            let quoted = match point {
                SpreadPoint::Atm => tenor.vol_spread.get(&ATM_DELTA).copied(),
                SpreadPoint::Max => tenor.vol_spread.values().copied().reduce(f64::max),
            };
            quoted.unwrap_or(DEFAULT_VOL_SPREAD)
        };

        let first = &self.tenors[0];
        let last = &self.tenors[self.tenors.len() - 1];
        if day <= first.days {
            return Ok(spread_of(first));
        }
        if day >= last.days {
            return Ok(spread_of(last));
        }
        let upper = self
            .tenors
            .iter()
            .position(|t| t.days >= day)
            .unwrap_or(self.tenors.len() - 1);
        let lo = &self.tenors[upper.saturating_sub(1)];
        let hi = &self.tenors[upper];
        if (hi.days - lo.days).abs() < TENOR_TOLERANCE {
            return Ok(spread_of(hi));
        }
        let w = (day - lo.days) / (hi.days - lo.days);
        Ok(spread_of(lo) + w * (spread_of(hi) - spread_of(lo)))
    }

    fn get_market_rr_bf(&self, tenor: f64) -> PricingResult<RrBf> {
        let smile = &self.tenor(tenor)?.smile;
        let point = |delta: u32| {
            smile.get(&delta).copied().ok_or_else(|| {
                PricingError::MarketData(format!("no {delta}-delta point at {tenor} days"))
            })
        };
        let (c25, atm, c75) = (point(25)?, point(ATM_DELTA)?, point(75)?);
        Ok(RrBf {
            atm,
            rr_25: c25 - c75,
            bf_25: 0.5 * (c25 + c75) - atm,
        })
    }

    fn overnight_tenor(&self) -> f64 {
        self.overnight_tenor
    }

    fn raw_surface(&self) -> Vec<TenorSmile> {
        self.tenors
            .iter()
            .map(|t| TenorSmile {
                days: t.days,
                smile: t.smile.clone(),
            })
            .collect()
    }

    fn with_smile(&self, tenor: f64, smile: Smile) -> Box<dyn VolatilitySurface> {
        let mut surface = self.clone();
        match surface
            .tenors
            .iter_mut()
            .find(|t| (t.days - tenor).abs() < TENOR_TOLERANCE)
        {
            Some(existing) => existing.smile = smile,
            None => {
                surface.tenors.push(SurfaceTenor {
                    days: tenor,
                    smile,
                    vol_spread: Smile::new(),
                });
                surface.tenors.sort_by(|a, b| a.days.total_cmp(&b.days));
            }
        }
        Box::new(surface)
    }
}
