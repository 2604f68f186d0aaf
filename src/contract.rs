use crate::errors::{PricingError, PricingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Contract durations are clamped to this many days before any formula sees them.
pub const MAX_DAYS: f64 = 730.0;

/// A start date further than this past the pricing date makes a contract forward-starting.
pub const FORWARD_STARTING_SECONDS: f64 = 5.0;

pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const DAYS_PER_YEAR: f64 = 365.0;

/// One strike for CALL/PUT, two for EXPIRYMISS/EXPIRYRANGE. Never spills to the heap.
pub type Strikes = SmallVec<[f64; 2]>;

// ── Contract type ──

/// Contract codes accepted on the wire. Unknown codes are kept so that validation
/// can report them instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContractType {
    Call,
    Put,
    ExpiryMiss,
    ExpiryRange,
    Unsupported(String),
}

impl ContractType {
    pub fn code(&self) -> &str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
            Self::ExpiryMiss => "EXPIRYMISS",
            Self::ExpiryRange => "EXPIRYRANGE",
            Self::Unsupported(code) => code,
        }
    }

    #[inline]
    pub fn is_two_barrier(&self) -> bool {
        matches!(self, Self::ExpiryMiss | Self::ExpiryRange)
    }

    #[inline]
    pub fn barrier_count(&self) -> usize {
        if self.is_two_barrier() {
            2
        } else {
            1
        }
    }
}

impl From<&str> for ContractType {
    fn from(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "CALL" => Self::Call,
            "PUT" => Self::Put,
            "EXPIRYMISS" => Self::ExpiryMiss,
            "EXPIRYRANGE" => Self::ExpiryRange,
            _ => Self::Unsupported(code.to_string()),
        }
    }
}

impl From<String> for ContractType {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<ContractType> for String {
    fn from(ct: ContractType) -> Self {
        ct.code().to_string()
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The single-barrier payoff a leg is priced as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Leg {
    Call,
    Put,
}

impl Leg {
    pub fn code(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::Put => "PUT",
        }
    }

    /// +1 for CALL, -1 for PUT.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Call => 1.0,
            Self::Put => -1.0,
        }
    }

    pub fn contract_type(self) -> ContractType {
        match self {
            Self::Call => ContractType::Call,
            Self::Put => ContractType::Put,
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ── Currency convention ──

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PricedWith {
    Numeraire,
    Base,
    Quanto,
    Unrecognized(String),
}

impl PricedWith {
    pub fn code(&self) -> &str {
        match self {
            Self::Numeraire => "numeraire",
            Self::Base => "base",
            Self::Quanto => "quanto",
            Self::Unrecognized(code) => code,
        }
    }
}

impl From<&str> for PricedWith {
    fn from(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "numeraire" => Self::Numeraire,
            "base" => Self::Base,
            "quanto" => Self::Quanto,
            _ => Self::Unrecognized(code.to_string()),
        }
    }
}

impl From<String> for PricedWith {
    fn from(code: String) -> Self {
        Self::from(code.as_str())
    }
}

impl From<PricedWith> for String {
    fn from(pw: PricedWith) -> Self {
        pw.code().to_string()
    }
}

impl fmt::Display for PricedWith {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ── Volatility input ──

/// Caller-supplied volatility. Absent means "read it off the surface at the strike".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VolInput {
    Single(f64),
    Barriers {
        high_barrier_vol: f64,
        low_barrier_vol: f64,
    },
}

impl VolInput {
    /// Vol for the high (CALL) leg of a two-barrier contract.
    pub fn high(self) -> f64 {
        match self {
            Self::Single(v) => v,
            Self::Barriers { high_barrier_vol, .. } => high_barrier_vol,
        }
    }

    /// Vol for the low (PUT) leg of a two-barrier contract.
    pub fn low(self) -> f64 {
        match self {
            Self::Single(v) => v,
            Self::Barriers { low_barrier_vol, .. } => low_barrier_vol,
        }
    }

    /// CALL legs sit on the high barrier, PUT legs on the low one.
    #[inline]
    pub fn for_leg(self, leg: Leg) -> f64 {
        match leg {
            Leg::Call => self.high(),
            Leg::Put => self.low(),
        }
    }
}

// ── Request ──

/// Immutable input to one pricing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub contract_type: ContractType,
    pub spot: f64,
    pub strikes: Strikes,
    pub date_start: DateTime<Utc>,
    pub date_pricing: DateTime<Utc>,
    pub date_expiry: DateTime<Utc>,
    pub discount_rate: f64,
    pub q_rate: f64,
    pub r_rate: f64,
    pub mu: f64,
    #[serde(default)]
    pub vol: Option<VolInput>,
    /// true = payout at hit, false = payout at expiry.
    #[serde(default)]
    pub payouttime_code: bool,
    pub priced_with: PricedWith,
    pub underlying_symbol: String,
    #[serde(default)]
    pub apply_equal_tie_markup: bool,
    /// false when pricing a buy-back of an open contract.
    #[serde(default = "default_for_sale")]
    pub for_sale: bool,
}

fn default_for_sale() -> bool {
    true
}

impl PricingRequest {
    /// Strikes sorted into (low, high). Single-barrier requests return the strike twice.
    pub fn barriers(&self) -> (f64, f64) {
        let first = self.strikes.first().copied().unwrap_or(f64::NAN);
        let last = self.strikes.last().copied().unwrap_or(f64::NAN);
        if first <= last {
            (first, last)
        } else {
            (last, first)
        }
    }
}

/// Values derived once at the start of a request and passed down the call graph.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Derived {
    pub time_in_days: f64,
    pub time_in_years: f64,
    /// Unclamped start-to-expiry duration.
    pub duration_seconds: f64,
    pub is_forward_starting: bool,
    pub is_intraday: bool,
    pub is_atm_contract: bool,
    pub two_barriers: bool,
}

impl Derived {
    pub fn from_request(request: &PricingRequest) -> Self {
        let duration_seconds = seconds_between(request.date_start, request.date_expiry);
        let time_in_days = (duration_seconds / SECONDS_PER_DAY).clamp(f64::EPSILON, MAX_DAYS);
        let two_barriers = request.contract_type.is_two_barrier();
        let is_atm_contract = !two_barriers
            && request.strikes.len() == 1
            && request.strikes[0] == request.spot;

        Self {
            time_in_days,
            time_in_years: time_in_days / DAYS_PER_YEAR,
            duration_seconds,
            is_forward_starting: seconds_between(request.date_pricing, request.date_start)
                > FORWARD_STARTING_SECONDS,
            is_intraday: time_in_days <= 1.0,
            is_atm_contract,
            two_barriers,
        }
    }
}

#[inline]
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Runs every check. The last failing check is the one reported; all are logged.
pub fn validate(request: &PricingRequest) -> PricingResult<()> {
    let mut failures: SmallVec<[PricingError; 4]> = SmallVec::new();

    if let ContractType::Unsupported(code) = &request.contract_type {
        failures.push(PricingError::UnsupportedContractType(code.clone()));
    }

    let expected = request.contract_type.barrier_count();
    if request.strikes.len() != expected {
        failures.push(PricingError::BarrierCountMismatch(format!(
            "{} needs {expected} strike(s), got {}",
            request.contract_type,
            request.strikes.len()
        )));
    } else {
        match (request.contract_type.is_two_barrier(), &request.vol) {
            (false, Some(VolInput::Barriers { .. })) => {
                failures.push(PricingError::BarrierCountMismatch(format!(
                    "{} takes a single vol, got a barrier vol pair",
                    request.contract_type
                )));
            }
            (true, Some(VolInput::Single(_))) => {
                failures.push(PricingError::BarrierCountMismatch(format!(
                    "{} takes a barrier vol pair, got a single vol",
                    request.contract_type
                )));
            }
            _ => {}
        }
    }

    if let PricedWith::Unrecognized(code) = &request.priced_with {
        failures.push(PricingError::UnrecognizedPricedWith(code.clone()));
    }

    if request.date_expiry < request.date_start {
        failures.push(PricingError::ExpiryBeforeStart {
            start: request.date_start.to_rfc3339(),
            expiry: request.date_expiry.to_rfc3339(),
        });
    }

    for failure in &failures {
        tracing::warn!(symbol = %request.underlying_symbol, "invalid pricing request: {failure}");
    }

    match failures.pop() {
        Some(last) => Err(last),
        None => Ok(()),
    }
}
