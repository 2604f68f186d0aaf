pub mod probability;
pub mod slope;

use crate::config::EngineConfig;
use crate::contract::{self, Derived, PricingRequest, MAX_DAYS};
use crate::errors::{PricingError, PricingResult};
use crate::market::{
    EqualTieMarkup, FlatEqualTieMarkup, InstrumentConfig, InstrumentSpec, MarketCalendar,
    MarketCategory, SoughtPoint, VolExpiry, VolQuery, VolatilitySurface,
};
use crate::models::black_scholes::BlackScholesMerton;
use crate::models::PricingFormulaLibrary;
use crate::risk::commission::CommissionSchedule;
use crate::risk::markup::MarkupPolicyTable;
use crate::trace::DebugTrace;
use serde::{Serialize, Serializer};
use std::sync::Arc;

pub use probability::Overrides;

/// Fail-safe amounts: worst case for the seller.
const FAIL_SAFE_PROBABILITY: f64 = 1.0;
const FAIL_SAFE_MARKUP: f64 = 0.0;

#[inline]
pub fn clamp01(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

// ── Outcome ──

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingOutcome {
    pub theo_probability: f64,
    pub risk_markup: f64,
    pub commission_markup: f64,
    pub final_probability: f64,
    #[serde(serialize_with = "error_message")]
    pub error: Option<PricingError>,
    pub debug_trace: DebugTrace,
}

impl PricingOutcome {
    fn fail_safe(error: PricingError, debug_trace: DebugTrace) -> Self {
        Self {
            theo_probability: FAIL_SAFE_PROBABILITY,
            risk_markup: FAIL_SAFE_MARKUP,
            commission_markup: FAIL_SAFE_MARKUP,
            final_probability: FAIL_SAFE_PROBABILITY,
            error: Some(error),
            debug_trace,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of one of the narrow entry points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Priced {
    pub amount: f64,
    #[serde(serialize_with = "error_message")]
    pub error: Option<PricingError>,
    pub debug_trace: DebugTrace,
}

fn error_message<S: Serializer>(error: &Option<PricingError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Fold fail-safe errors into the outcome, propagate everything else.
fn settle(result: PricingResult<f64>, fail_safe: f64, debug_trace: DebugTrace) -> PricingResult<Priced> {
    match result {
        Ok(amount) => Ok(Priced {
            amount,
            error: None,
            debug_trace,
        }),
        Err(e) if e.is_fail_safe() => Ok(Priced {
            amount: fail_safe,
            error: Some(e),
            debug_trace,
        }),
        Err(e) => Err(e),
    }
}

// ── Per-request context ──

/// Everything derived once per request and passed down the call graph.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub request: &'a PricingRequest,
    pub derived: Derived,
    pub instrument: InstrumentSpec,
    /// Day count used for surface queries (trading days for forex).
    pub vol_days: f64,
}

impl RequestContext<'_> {
    pub fn vol_query(&self, point: SoughtPoint) -> VolQuery {
        VolQuery {
            point,
            expiry: VolExpiry::Days(self.vol_days),
            spot: self.request.spot,
            q_rate: self.request.q_rate,
            r_rate: self.request.r_rate,
        }
    }
}

// ── Engine ──

/// Digital option pricing kernel.
///
/// Holds only read-only collaborators, so one engine can serve concurrent requests.
/// Every call builds its own [`DebugTrace`].
#[derive(Clone)]
pub struct PricingEngine {
    pub(crate) surface: Arc<dyn VolatilitySurface>,
    pub(crate) instruments: Arc<dyn InstrumentConfig>,
    pub(crate) calendar: Arc<dyn MarketCalendar>,
    pub(crate) formulas: Arc<dyn PricingFormulaLibrary>,
    pub(crate) equal_tie: Arc<dyn EqualTieMarkup>,
    pub(crate) policy: MarkupPolicyTable,
    pub(crate) commissions: CommissionSchedule,
}

impl PricingEngine {
    pub fn new(
        surface: Arc<dyn VolatilitySurface>,
        instruments: Arc<dyn InstrumentConfig>,
        calendar: Arc<dyn MarketCalendar>,
    ) -> Self {
        Self {
            surface,
            instruments,
            calendar,
            formulas: Arc::new(BlackScholesMerton::new()),
            equal_tie: Arc::new(FlatEqualTieMarkup::default()),
            policy: MarkupPolicyTable::default(),
            commissions: CommissionSchedule::default(),
        }
    }

    /// Apply the loaded markup policy, commission schedule and equal-tie amount.
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_policy(config.markup_policy.clone())
            .with_commissions(config.commissions.clone())
            .with_equal_tie(Arc::new(FlatEqualTieMarkup {
                amount: config.equal_tie_amount,
            }))
    }

    pub fn with_formulas(mut self, formulas: Arc<dyn PricingFormulaLibrary>) -> Self {
        self.formulas = formulas;
        self
    }

    pub fn with_equal_tie(mut self, equal_tie: Arc<dyn EqualTieMarkup>) -> Self {
        self.equal_tie = equal_tie;
        self
    }

    pub fn with_policy(mut self, policy: MarkupPolicyTable) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_commissions(mut self, commissions: CommissionSchedule) -> Self {
        self.commissions = commissions;
        self
    }

    /// Validate the request and derive everything the kernel needs from it.
    pub fn context<'a>(&self, request: &'a PricingRequest) -> PricingResult<RequestContext<'a>> {
        contract::validate(request)?;
        let derived = Derived::from_request(request);
        let instrument = self.instruments.lookup(&request.underlying_symbol)?;
        let vol_days = match instrument.market {
            MarketCategory::Forex => self
                .calendar
                .trading_days_between(request.date_start, request.date_expiry)
                .clamp(f64::EPSILON, MAX_DAYS),
            _ => derived.time_in_days,
        };
        Ok(RequestContext {
            request,
            derived,
            instrument,
            vol_days,
        })
    }

    /// Full price: theoretical probability plus risk and commission markups.
    ///
    /// Contract errors come back as a fail-safe outcome (probability 1, markups 0).
    /// Collaborator errors are returned as `Err`.
    pub fn price(&self, request: &PricingRequest) -> PricingResult<PricingOutcome> {
        let mut trace = DebugTrace::new();
        match self.evaluate(request, &mut trace) {
            Ok((theo, risk, commission)) => Ok(PricingOutcome {
                theo_probability: theo,
                risk_markup: risk,
                commission_markup: commission,
                final_probability: clamp01(theo + risk + commission),
                error: None,
                debug_trace: trace,
            }),
            Err(e) if e.is_fail_safe() => {
                tracing::warn!(
                    symbol = %request.underlying_symbol,
                    contract_type = %request.contract_type,
                    "pricing fell back to fail-safe: {e}"
                );
                Ok(PricingOutcome::fail_safe(e, trace))
            }
            Err(e) => Err(e),
        }
    }

    fn evaluate(
        &self,
        request: &PricingRequest,
        trace: &mut DebugTrace,
    ) -> PricingResult<(f64, f64, f64)> {
        let ctx = self.context(request)?;
        let theo = self.theo(&ctx, trace)?;
        let risk = self.compute_risk_markup(&ctx, Some(theo), trace)?;
        let commission = self.commissions.commission_markup(&ctx, trace);

        tracing::debug!(
            symbol = %request.underlying_symbol,
            theo, risk, commission,
            "priced digital"
        );
        Ok((theo, risk, commission))
    }

    /// Clamped theoretical probability.
    fn theo(&self, ctx: &RequestContext<'_>, trace: &mut DebugTrace) -> PricingResult<f64> {
        let raw =
            self.calculate_probability(ctx, self.surface.as_ref(), &Overrides::default(), trace)?;
        Ok(clamp01(raw))
    }

    pub fn theoretical_probability(&self, request: &PricingRequest) -> PricingResult<Priced> {
        let mut trace = DebugTrace::new();
        let result = self.context(request).and_then(|ctx| self.theo(&ctx, &mut trace));
        settle(result, FAIL_SAFE_PROBABILITY, trace)
    }

    pub fn risk_markup(&self, request: &PricingRequest) -> PricingResult<Priced> {
        let mut trace = DebugTrace::new();
        let result = self
            .context(request)
            .and_then(|ctx| self.compute_risk_markup(&ctx, None, &mut trace));
        settle(result, FAIL_SAFE_MARKUP, trace)
    }

    pub fn commission_markup(&self, request: &PricingRequest) -> PricingResult<Priced> {
        let mut trace = DebugTrace::new();
        let result = self
            .context(request)
            .map(|ctx| self.commissions.commission_markup(&ctx, &mut trace));
        settle(result, FAIL_SAFE_MARKUP, trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{ContractType, PricedWith, VolInput};
    use crate::testing::{
        butterfly_surface, commission_schedule, engine, flat_surface, request, skewed_surface,
    };

    fn all_requests() -> Vec<PricingRequest> {
        let mut out = Vec::new();
        for ct in [ContractType::Call, ContractType::Put] {
            for strike in [90.0, 99.5, 100.0, 100.7, 115.0] {
                for days in [0.01, 0.5, 3.0, 10.0, 400.0] {
                    out.push(request(ct.clone(), &[strike], days));
                }
            }
        }
        for ct in [ContractType::ExpiryMiss, ContractType::ExpiryRange] {
            for (lo, hi) in [(99.0, 101.0), (95.0, 100.2), (80.0, 120.0)] {
                for days in [0.2, 2.0, 30.0] {
                    out.push(request(ct.clone(), &[hi, lo], days));
                }
            }
        }
        out
    }

    #[test]
    fn test_final_probability_clamped() {
        let engine = engine(skewed_surface()).with_commissions(commission_schedule());
        for symbol in ["frxUSDJPY", "IDXSYN", "frxXAUUSD", "R_100"] {
            for mut req in all_requests() {
                req.underlying_symbol = symbol.into();
                req.vol = None;
                let out = engine.price(&req).unwrap();
                assert!(
                    (0.0..=1.0).contains(&out.final_probability),
                    "{symbol} {} {:?}: final={}",
                    req.contract_type,
                    req.strikes,
                    out.final_probability
                );
                assert!((0.0..=1.0).contains(&out.theo_probability));
                assert!(out.risk_markup >= 0.0, "risk markup {}", out.risk_markup);
                assert!(out.commission_markup >= 0.0);
            }
        }
    }

    #[test]
    fn test_price_is_idempotent() {
        let engine = engine(skewed_surface()).with_commissions(commission_schedule());
        let mut req = request(ContractType::ExpiryRange, &[101.0, 99.0], 2.0);
        req.vol = None;
        let a = engine.price(&req).unwrap();
        let b = engine.price(&req).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.final_probability.to_bits(), b.final_probability.to_bits());
    }

    #[test]
    fn test_final_is_sum_of_parts() {
        let engine = engine(skewed_surface()).with_commissions(commission_schedule());
        let req = request(ContractType::Call, &[100.3], 10.0);
        let out = engine.price(&req).unwrap();
        assert!(!out.has_error());
        let sum = out.theo_probability + out.risk_markup + out.commission_markup;
        assert!((out.final_probability - clamp01(sum)).abs() < 1e-15);
        assert!(out.commission_markup > 0.0);
        assert!(out.debug_trace.contains("CALL"));
        assert!(out.debug_trace.contains("risk_markup"));
        assert!(out.debug_trace.contains("commission_markup"));
    }

    #[test]
    fn test_fail_safe_outcomes() {
        let engine = engine(flat_surface(0.1));
        let mut bad = Vec::new();
        bad.push(request(ContractType::Call, &[99.0, 101.0], 2.0));
        bad.push(request(ContractType::ExpiryMiss, &[99.0], 2.0));
        bad.push(request(ContractType::Unsupported("ONETOUCH".into()), &[99.0], 2.0));
        let mut req = request(ContractType::Put, &[99.0], 2.0);
        req.date_expiry = req.date_start - chrono::Duration::minutes(1);
        bad.push(req);
        let mut req = request(ContractType::Put, &[99.0], 2.0);
        req.priced_with = PricedWith::Unrecognized("cents".into());
        bad.push(req);

        for req in bad {
            let out = engine.price(&req).unwrap();
            assert!(out.has_error(), "{} should fail", req.contract_type);
            assert_eq!(out.theo_probability, 1.0);
            assert_eq!(out.final_probability, 1.0);
            assert_eq!(out.risk_markup, 0.0);
            assert_eq!(out.commission_markup, 0.0);

            let theo = engine.theoretical_probability(&req).unwrap();
            assert_eq!(theo.amount, 1.0);
            assert!(theo.error.is_some());
        }
    }

    #[test]
    fn test_narrow_entry_points_fail_safe_on_unknown_numeraire() {
        let engines = [
            engine(skewed_surface()).with_commissions(commission_schedule()),
            engine(butterfly_surface()).with_commissions(commission_schedule()),
        ];
        for engine in &engines {
            for (symbol, days) in [
                ("frxUSDJPY", 10.0),
                ("IDXSYN", 10.0),
                ("frxUSDJPY", 0.5),
                ("IDXSYN", 0.5),
            ] {
                let mut req = request(ContractType::Call, &[100.5], days);
                req.underlying_symbol = symbol.into();
                req.vol = None;
                req.priced_with = PricedWith::Unrecognized("cents".into());

                let risk = engine.risk_markup(&req).unwrap();
                assert_eq!(risk.amount, 0.0, "{symbol} {days}: risk {}", risk.amount);
                assert!(
                    matches!(risk.error, Some(PricingError::UnrecognizedPricedWith(_))),
                    "{symbol} {days}: {:?}",
                    risk.error
                );

                let commission = engine.commission_markup(&req).unwrap();
                assert_eq!(commission.amount, 0.0, "{symbol} {days}: commission");
                assert!(matches!(
                    commission.error,
                    Some(PricingError::UnrecognizedPricedWith(_))
                ));
            }
        }
    }

    #[test]
    fn test_error_categories() {
        let engine = engine(flat_surface(0.1));
        let out = engine.price(&request(ContractType::Call, &[99.0, 101.0], 2.0)).unwrap();
        let msg = out.error.map(|e| e.to_string()).unwrap_or_default();
        assert!(msg.contains("barrier count mismatch"), "got {msg}");

        let mut req = request(ContractType::Call, &[101.0], 2.0);
        req.date_expiry = req.date_start - chrono::Duration::hours(2);
        let out = engine.price(&req).unwrap();
        assert!(matches!(out.error, Some(PricingError::ExpiryBeforeStart { .. })));
    }

    #[test]
    fn test_unknown_symbol_propagates() {
        let engine = engine(flat_surface(0.1));
        let mut req = request(ContractType::Call, &[101.0], 2.0);
        req.underlying_symbol = "frxNOPE".into();
        let err = engine.price(&req).unwrap_err();
        assert!(matches!(err, PricingError::MarketData(_)), "got {err}");
        assert!(engine.risk_markup(&req).is_err());
    }

    #[test]
    fn test_narrow_entry_points_agree_with_price() {
        let engine = engine(skewed_surface()).with_commissions(commission_schedule());
        let req = request(ContractType::Put, &[99.4], 5.0);
        let full = engine.price(&req).unwrap();
        let theo = engine.theoretical_probability(&req).unwrap();
        let risk = engine.risk_markup(&req).unwrap();
        let commission = engine.commission_markup(&req).unwrap();
        assert_eq!(theo.amount, full.theo_probability);
        assert_eq!(risk.amount, full.risk_markup);
        assert_eq!(commission.amount, full.commission_markup);
    }

    #[test]
    fn test_outcome_serializes_error_as_message() {
        let engine = engine(flat_surface(0.1));
        let out = engine.price(&request(ContractType::ExpiryMiss, &[99.0], 2.0)).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["theo_probability"], 1.0);
        let msg = json["error"].as_str().unwrap_or_default();
        assert!(msg.contains("barrier count mismatch"), "got {msg}");
    }

    #[test]
    fn test_forex_vol_uses_trading_days() {
        // Tuesday 08:00 + 6 days lands on Monday 08:00 with one weekend in between.
        let engine = engine(flat_surface(0.1));
        let req = request(ContractType::Call, &[100.0], 6.0);
        let ctx = engine.context(&req).unwrap();
        assert!((ctx.derived.time_in_days - 6.0).abs() < 1e-12);
        assert!((ctx.vol_days - 4.0).abs() < 1e-12, "vol days {}", ctx.vol_days);

        let mut req = request(ContractType::Call, &[100.0], 6.0);
        req.underlying_symbol = "IDXSYN".into();
        let ctx = engine.context(&req).unwrap();
        assert_eq!(ctx.vol_days, ctx.derived.time_in_days);
    }

    #[test]
    fn test_engine_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PricingEngine>();
        let engine = Arc::new(engine(flat_surface(0.1)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut req = request(ContractType::Call, &[100.0 + i as f64 * 0.1], 3.0);
                    req.vol = Some(VolInput::Single(0.1));
                    engine.price(&req).map(|o| o.final_probability)
                })
            })
            .collect();
        for h in handles {
            let p = h.join().unwrap().unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
