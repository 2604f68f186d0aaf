pub mod historical;
pub mod instruments;
pub mod surface;

use crate::contract::{seconds_between, SECONDS_PER_DAY};
use crate::errors::PricingResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Smile points keyed by call delta in percent (25, 50 = ATM, 75, ...).
pub type Smile = BTreeMap<u32, f64>;

pub const ATM_DELTA: u32 = 50;

// ── Volatility surface ──

/// Where on the smile a vol is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SoughtPoint {
    Strike(f64),
    /// Call delta in percent.
    Delta(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VolExpiry {
    Dates { from: DateTime<Utc>, to: DateTime<Utc> },
    Days(f64),
}

impl VolExpiry {
    pub fn days(&self) -> f64 {
        match self {
            Self::Dates { from, to } => seconds_between(*from, *to) / SECONDS_PER_DAY,
            Self::Days(days) => *days,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolQuery {
    pub point: SoughtPoint,
    pub expiry: VolExpiry,
    pub spot: f64,
    pub q_rate: f64,
    pub r_rate: f64,
}

/// Which vol spread to read off the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpreadPoint {
    Atm,
    Max,
}

/// Market quotes at one tenor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RrBf {
    pub atm: f64,
    pub rr_25: f64,
    pub bf_25: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenorSmile {
    pub days: f64,
    pub smile: Smile,
}

/// Read-only view of an implied volatility surface.
/// Implementations must be immutable snapshots or internally synchronised.
pub trait VolatilitySurface: Send + Sync {
    fn get_volatility(&self, query: &VolQuery) -> PricingResult<f64>;

    fn get_spread(&self, point: SpreadPoint, day: f64) -> PricingResult<f64>;

    fn get_market_rr_bf(&self, tenor: f64) -> PricingResult<RrBf>;

    /// Day count of the overnight tenor.
    fn overnight_tenor(&self) -> f64;

    /// Quoted smiles, shortest tenor first.
    fn raw_surface(&self) -> Vec<TenorSmile>;

    fn first_tenor(&self) -> Option<f64> {
        self.raw_surface().first().map(|t| t.days)
    }

    /// A copy of this surface with the smile at `tenor` replaced (or added).
    fn with_smile(&self, tenor: f64, smile: Smile) -> Box<dyn VolatilitySurface>;
}

// ── Instruments ──

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCategory {
    Forex,
    Commodities,
    Stocks,
    Indices,
    Volidx,
    #[serde(other)]
    Other,
}

impl MarketCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Forex => "forex",
            Self::Commodities => "commodities",
            Self::Stocks => "stocks",
            Self::Indices => "indices",
            Self::Volidx => "volidx",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub market: MarketCategory,
    #[serde(default)]
    pub submarket: String,
    pub pip_size: f64,
    #[serde(default = "default_spot_spread_size")]
    pub spot_spread_size: f64,
}

fn default_spot_spread_size() -> f64 {
    50.0
}

pub trait InstrumentConfig: Send + Sync {
    fn lookup(&self, symbol: &str) -> PricingResult<InstrumentSpec>;
}

// ── Calendar ──

pub trait MarketCalendar: Send + Sync {
    /// End-of-day rollover on the trading day of `date`.
    fn rollover_time(&self, date: DateTime<Utc>) -> DateTime<Utc>;

    /// Day count between two instants under the forex trading-day convention.
    fn trading_days_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64;
}

// ── Equal-tie markup ──

pub trait EqualTieMarkup: Send + Sync {
    fn markup(&self, symbol: &str, time_in_years: f64) -> f64;
}

/// Same equal-tie amount for every symbol and duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatEqualTieMarkup {
    pub amount: f64,
}

impl Default for FlatEqualTieMarkup {
    fn default() -> Self {
        Self { amount: 0.01 }
    }
}

impl EqualTieMarkup for FlatEqualTieMarkup {
    fn markup(&self, _symbol: &str, _time_in_years: f64) -> f64 {
        self.amount
    }
}
