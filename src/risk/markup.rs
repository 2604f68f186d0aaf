use crate::contract::{ContractType, Leg};
use crate::engine::{PricingEngine, RequestContext};
use crate::errors::{PricingError, PricingResult};
use crate::market::{MarketCategory, SoughtPoint, SpreadPoint, ATM_DELTA};
use crate::models::FormulaInputs;
use crate::trace::DebugTrace;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cap on vol spread x |vega|.
const VOL_SPREAD_MARKUP_CAP: f64 = 0.7;

/// Cap on the spot spread markup.
const SPOT_SPREAD_MARKUP_CAP: f64 = 0.01;

const SMILE_UNCERTAINTY_MARKUP: f64 = 0.05;
const SMILE_UNCERTAINTY_MAX_DAYS: f64 = 7.0;

const END_OF_DAY_MARKUP: f64 = 0.05;
const END_OF_DAY_MAX_DAYS: f64 = 3.0;

/// Buy-backs of contracts this short (5h01m) may exploit model error.
const MODEL_ARBITRAGE_MARKUP: f64 = 0.05;
const MODEL_ARBITRAGE_MAX_SECONDS: f64 = 18_060.0;

// ── Policy table ──

/// Markup components enabled for one market category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkupPolicy {
    /// Vol spread and spot spread markups.
    pub traded_market_markup: bool,
    pub smile_uncertainty_markup: bool,
    pub end_of_day_markup: bool,
    pub butterfly_markup: bool,
    pub model_arbitrage_markup: bool,
}

/// Policies keyed by market category name. Categories not listed get no markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkupPolicyTable {
    policies: BTreeMap<String, MarkupPolicy>,
}

impl Default for MarkupPolicyTable {
    fn default() -> Self {
        let traded = MarkupPolicy {
            traded_market_markup: true,
            ..MarkupPolicy::default()
        };
        Self::new()
            .with(
                MarketCategory::Forex,
                MarkupPolicy {
                    end_of_day_markup: true,
                    butterfly_markup: true,
                    model_arbitrage_markup: true,
                    ..traded
                },
            )
            .with(
                MarketCategory::Commodities,
                MarkupPolicy {
                    model_arbitrage_markup: true,
                    ..traded
                },
            )
            .with(MarketCategory::Stocks, traded)
            .with(
                MarketCategory::Indices,
                MarkupPolicy {
                    smile_uncertainty_markup: true,
                    model_arbitrage_markup: true,
                    ..traded
                },
            )
    }
}

impl MarkupPolicyTable {
    /// Empty table: no category gets any markup.
    pub fn new() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    pub fn with(mut self, market: MarketCategory, policy: MarkupPolicy) -> Self {
        self.policies.insert(market.name().to_string(), policy);
        self
    }

    pub fn policy_for(&self, market: &MarketCategory) -> MarkupPolicy {
        self.policies
            .get(market.name())
            .copied()
            .unwrap_or_default()
    }
}

// ── Greeks ──

/// Digital delta and vega used to size the markups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkupGreeks {
    pub delta: f64,
    pub vega: f64,
}

impl PricingEngine {
    /// Greeks at the ATM vol. Two-barrier contracts sum CALL(high) and PUT(low);
    /// EXPIRYRANGE is the negation of EXPIRYMISS.
    pub fn markup_greeks(&self, ctx: &RequestContext<'_>) -> PricingResult<MarkupGreeks> {
        let request = ctx.request;
        let atm_vol = self
            .surface
            .get_volatility(&ctx.vol_query(SoughtPoint::Delta(ATM_DELTA as f64)))?;
        let at = |strike: f64| FormulaInputs {
            spot: request.spot,
            strike,
            t: ctx.derived.time_in_years,
            discount_rate: request.discount_rate,
            mu: request.mu,
            vol: atm_vol,
            payout_at_hit: request.payouttime_code,
        };
        let leg_greeks = |leg: Leg, strike: f64| {
            let inputs = at(strike);
            MarkupGreeks {
                delta: self.formulas.digital_delta(leg, &inputs),
                vega: self.formulas.digital_vega(leg, &inputs),
            }
        };

        let (low, high) = request.barriers();
        let greeks = match &request.contract_type {
            ContractType::Call => leg_greeks(Leg::Call, high),
            ContractType::Put => leg_greeks(Leg::Put, low),
            ContractType::ExpiryMiss | ContractType::ExpiryRange => {
                let call = leg_greeks(Leg::Call, high);
                let put = leg_greeks(Leg::Put, low);
                let sign = if request.contract_type == ContractType::ExpiryRange {
                    -1.0
                } else {
                    1.0
                };
                MarkupGreeks {
                    delta: sign * (call.delta + put.delta),
                    vega: sign * (call.vega + put.vega),
                }
            }
            ContractType::Unsupported(code) => {
                return Err(PricingError::UnsupportedContractType(code.clone()))
            }
        };
        Ok(greeks)
    }

    /// Sum of the enabled markup components, halved, plus the equal-tie markup.
    ///
    /// `theo` is the unmodified theoretical probability when the caller already has it;
    /// the butterfly markup computes it otherwise.
    pub fn compute_risk_markup(
        &self,
        ctx: &RequestContext<'_>,
        theo: Option<f64>,
        trace: &mut DebugTrace,
    ) -> PricingResult<f64> {
        let request = ctx.request;
        let derived = &ctx.derived;
        let mut components = DebugTrace::new();

        // No markup at all on forward-starting contracts.
        if derived.is_forward_starting {
            components.value("total_markup", 0.0);
            trace.branch("risk_markup", components);
            return Ok(0.0);
        }

        let policy = self.policy.policy_for(&ctx.instrument.market);
        let mut markup = 0.0;

        if policy.traded_market_markup {
            let greeks = self.markup_greeks(ctx)?;

            let spread_point = if derived.is_atm_contract {
                SpreadPoint::Atm
            } else {
                SpreadPoint::Max
            };
            let vol_spread = self.surface.get_spread(spread_point, ctx.vol_days)?;
            let vol_spread_markup = (vol_spread * greeks.vega.abs()).min(VOL_SPREAD_MARKUP_CAP);
            components.amount(
                "vol_spread_markup",
                vol_spread_markup,
                DebugTrace::new()
                    .with("vol_spread", vol_spread)
                    .with("vega", greeks.vega),
            );
            markup += vol_spread_markup;

            if !derived.is_intraday {
                let spot_spread = ctx.instrument.spot_spread_size * ctx.instrument.pip_size;
                let spot_spread_markup =
                    (spot_spread * greeks.delta.abs()).clamp(0.0, SPOT_SPREAD_MARKUP_CAP);
                components.amount(
                    "spot_spread_markup",
                    spot_spread_markup,
                    DebugTrace::new()
                        .with("spot_spread", spot_spread)
                        .with("delta", greeks.delta),
                );
                markup += spot_spread_markup;
            }
        }

        if policy.smile_uncertainty_markup
            && derived.time_in_days < SMILE_UNCERTAINTY_MAX_DAYS
            && !derived.is_atm_contract
        {
            components.value("smile_uncertainty_markup", SMILE_UNCERTAINTY_MARKUP);
            markup += SMILE_UNCERTAINTY_MARKUP;
        }

        if policy.end_of_day_markup
            && derived.time_in_days <= END_OF_DAY_MAX_DAYS
            && self.in_end_of_day_window(ctx)
        {
            components.value("end_of_day_markup", END_OF_DAY_MARKUP);
            markup += END_OF_DAY_MARKUP;
        }

        if policy.butterfly_markup {
            if let Some((butterfly, parameters)) = self.butterfly_markup(ctx, theo)? {
                components.amount("butterfly_markup", butterfly, parameters);
                markup += butterfly;
            }
        }

        if policy.model_arbitrage_markup
            && !request.for_sale
            && derived.duration_seconds <= MODEL_ARBITRAGE_MAX_SECONDS
        {
            components.value("model_arbitrage_markup", MODEL_ARBITRAGE_MARKUP);
            markup += MODEL_ARBITRAGE_MARKUP;
        }

        // Split evenly between bid and ask.
        markup /= 2.0;

        if request.apply_equal_tie_markup {
            let equal_tie = self
                .equal_tie
                .markup(&request.underlying_symbol, derived.time_in_years);
            components.value("equal_tie_markup", equal_tie);
            markup += equal_tie;
        }

        components.value("total_markup", markup);
        tracing::debug!(
            symbol = %request.underlying_symbol,
            market = %ctx.instrument.market,
            markup,
            "risk markup"
        );
        trace.branch("risk_markup", components);
        Ok(markup)
    }

    /// Start within an hour of rollover, or an intraday contract running across it.
    fn in_end_of_day_window(&self, ctx: &RequestContext<'_>) -> bool {
        let request = ctx.request;
        let rollover = self.calendar.rollover_time(request.date_start);
        rollover - Duration::hours(1) < request.date_start
            || (ctx.derived.is_intraday && rollover < request.date_expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::PricingRequest;
    use crate::market::surface::SmileSurface;
    use crate::market::FlatEqualTieMarkup;
    use crate::testing::{engine, flat_surface, request, skewed_surface};
    use std::sync::Arc;

    fn risk(engine: &PricingEngine, req: &PricingRequest) -> (f64, DebugTrace) {
        let priced = engine.risk_markup(req).unwrap();
        assert!(priced.error.is_none(), "unexpected error {:?}", priced.error);
        (priced.amount, priced.debug_trace)
    }

    fn component(trace: &DebugTrace, name: &str) -> Option<f64> {
        trace.amount_at(&["risk_markup", name])
    }

    #[test]
    fn test_default_policy_table() {
        let table = MarkupPolicyTable::default();
        let forex = table.policy_for(&MarketCategory::Forex);
        assert!(forex.traded_market_markup && forex.end_of_day_markup && forex.butterfly_markup);
        assert!(!forex.smile_uncertainty_markup);
        let indices = table.policy_for(&MarketCategory::Indices);
        assert!(indices.smile_uncertainty_markup && !indices.butterfly_markup);
        assert_eq!(table.policy_for(&MarketCategory::Volidx), MarkupPolicy::default());
        assert_eq!(table.policy_for(&MarketCategory::Other), MarkupPolicy::default());
    }

    #[test]
    fn test_policy_table_from_json() {
        let json = r#"{"stocks":{"traded_market_markup":true,"end_of_day_markup":true}}"#;
        let table: MarkupPolicyTable = serde_json::from_str(json).unwrap();
        let stocks = table.policy_for(&MarketCategory::Stocks);
        assert!(stocks.end_of_day_markup && !stocks.butterfly_markup);
        assert_eq!(table.policy_for(&MarketCategory::Forex), MarkupPolicy::default());
    }

    #[test]
    fn test_forward_starting_is_zero_everywhere() {
        let engine = engine(skewed_surface());
        for symbol in ["frxUSDJPY", "IDXSYN", "frxXAUUSD", "R_100"] {
            for ct in [ContractType::Call, ContractType::ExpiryRange] {
                let strikes: &[f64] = if ct == ContractType::Call { &[100.4] } else { &[99.0, 101.0] };
                let mut req = request(ct.clone(), strikes, 0.2);
                req.underlying_symbol = symbol.into();
                req.apply_equal_tie_markup = true;
                req.for_sale = false;
                req.date_pricing = req.date_start - Duration::seconds(30);
                let (amount, _) = risk(&engine, &req);
                assert_eq!(amount, 0.0, "{symbol} {ct}");
            }
        }
    }

    #[test]
    fn test_vol_spread_uses_atm_or_max() {
        let engine = engine(skewed_surface());
        let atm = request(ContractType::Call, &[100.0], 10.0);
        let (_, trace) = risk(&engine, &atm);
        assert_eq!(
            trace.amount_at(&["risk_markup", "vol_spread_markup", "vol_spread"]),
            Some(0.01)
        );

        let otm = request(ContractType::Call, &[100.8], 10.0);
        let (_, trace) = risk(&engine, &otm);
        assert_eq!(
            trace.amount_at(&["risk_markup", "vol_spread_markup", "vol_spread"]),
            Some(0.03)
        );
        let vsm = component(&trace, "vol_spread_markup").unwrap();
        assert!(vsm <= VOL_SPREAD_MARKUP_CAP && vsm >= 0.0);
    }

    #[test]
    fn test_spot_spread_only_after_one_day() {
        let engine = engine(flat_surface(0.1));
        let (_, trace) = risk(&engine, &request(ContractType::Put, &[99.7], 0.5));
        assert!(component(&trace, "spot_spread_markup").is_none());

        let (_, trace) = risk(&engine, &request(ContractType::Put, &[99.7], 5.0));
        let ssm = component(&trace, "spot_spread_markup").unwrap();
        assert!(ssm > 0.0 && ssm <= SPOT_SPREAD_MARKUP_CAP, "spot spread markup {ssm}");
    }

    #[test]
    fn test_smile_uncertainty_on_short_indices() {
        let engine = engine(flat_surface(0.1));
        let mut req = request(ContractType::Call, &[100.5], 3.0);
        req.underlying_symbol = "IDXSYN".into();
        let (_, trace) = risk(&engine, &req);
        assert_eq!(component(&trace, "smile_uncertainty_markup"), Some(0.05));

        req.strikes = smallvec::smallvec![100.0];
        let (_, trace) = risk(&engine, &req);
        assert!(component(&trace, "smile_uncertainty_markup").is_none(), "ATM is exempt");

        let mut req = request(ContractType::Call, &[100.5], 8.0);
        req.underlying_symbol = "IDXSYN".into();
        let (_, trace) = risk(&engine, &req);
        assert!(component(&trace, "smile_uncertainty_markup").is_none());
    }

    #[test]
    fn test_end_of_day_window() {
        let engine = engine(flat_surface(0.1));
        // Fixture start is 08:00 UTC, rollover 21:00.
        let (_, trace) = risk(&engine, &request(ContractType::Call, &[100.5], 0.25));
        assert!(component(&trace, "end_of_day_markup").is_none());

        // Intraday contract running past rollover.
        let (_, trace) = risk(&engine, &request(ContractType::Call, &[100.5], 0.75));
        assert_eq!(component(&trace, "end_of_day_markup"), Some(0.05));

        // Start inside the last hour before rollover.
        let mut req = request(ContractType::Call, &[100.5], 2.0);
        let shift = Duration::hours(12) + Duration::minutes(30);
        req.date_start += shift;
        req.date_pricing += shift;
        req.date_expiry += shift;
        let (_, trace) = risk(&engine, &req);
        assert_eq!(component(&trace, "end_of_day_markup"), Some(0.05));

        // Too long for the end-of-day markup.
        let mut req = request(ContractType::Call, &[100.5], 4.0);
        req.date_start += shift;
        req.date_pricing += shift;
        req.date_expiry += shift;
        let (_, trace) = risk(&engine, &req);
        assert!(component(&trace, "end_of_day_markup").is_none());
    }

    #[test]
    fn test_model_arbitrage_on_short_buybacks() {
        let engine = engine(flat_surface(0.1));
        let mut req = request(ContractType::Call, &[100.5], 0.2);
        let (_, trace) = risk(&engine, &req);
        assert!(component(&trace, "model_arbitrage_markup").is_none());

        req.for_sale = false;
        let (_, trace) = risk(&engine, &req);
        assert_eq!(component(&trace, "model_arbitrage_markup"), Some(0.05));

        let mut req = request(ContractType::Call, &[100.5], 0.25);
        req.for_sale = false;
        let (_, trace) = risk(&engine, &req);
        assert!(component(&trace, "model_arbitrage_markup").is_none(), "6h is too long");
    }

    #[test]
    fn test_components_halved() {
        let engine = engine(flat_surface(0.1));
        let mut req = request(ContractType::Call, &[100.5], 3.0);
        req.underlying_symbol = "IDXSYN".into();
        let (amount, trace) = risk(&engine, &req);
        let sum: f64 = ["vol_spread_markup", "spot_spread_markup", "smile_uncertainty_markup"]
            .iter()
            .filter_map(|name| component(&trace, name))
            .sum();
        assert!((amount - sum / 2.0).abs() < 1e-15, "{amount} vs {sum}/2");
    }

    #[test]
    fn test_equal_tie_added_after_halving() {
        let engine = engine(flat_surface(0.1));
        let mut req = request(ContractType::Call, &[100.5], 3.0);
        req.underlying_symbol = "R_100".into();
        req.apply_equal_tie_markup = true;
        let (amount, trace) = risk(&engine, &req);
        assert_eq!(amount, 0.01);
        assert_eq!(component(&trace, "equal_tie_markup"), Some(0.01));

        let engine = engine_with_tie(0.02);
        let (amount, _) = risk(&engine, &req);
        assert_eq!(amount, 0.02);
    }

    fn engine_with_tie(amount: f64) -> PricingEngine {
        engine(flat_surface(0.1)).with_equal_tie(Arc::new(FlatEqualTieMarkup { amount }))
    }

    #[test]
    fn test_two_barrier_greeks() {
        let engine = engine(flat_surface(0.1));
        let miss = request(ContractType::ExpiryMiss, &[101.0, 99.0], 5.0);
        let range = request(ContractType::ExpiryRange, &[99.0, 101.0], 5.0);
        let call = request(ContractType::Call, &[101.0], 5.0);
        let put = request(ContractType::Put, &[99.0], 5.0);

        let g = |req: &PricingRequest| {
            let ctx = engine.context(req).unwrap();
            engine.markup_greeks(&ctx).unwrap()
        };
        let (m, r, c, p) = (g(&miss), g(&range), g(&call), g(&put));
        assert!((m.delta - (c.delta + p.delta)).abs() < 1e-15);
        assert!((m.vega - (c.vega + p.vega)).abs() < 1e-15);
        assert_eq!(r.delta, -m.delta);
        assert_eq!(r.vega, -m.vega);
    }

    #[test]
    fn test_risk_markup_non_negative() {
        let surface = SmileSurface::flat(0.3, &[1.0, 7.0, 30.0]).unwrap();
        let engine = engine(surface);
        for days in [0.1, 0.9, 2.0, 6.0, 40.0] {
            for strike in [95.0, 100.0, 100.2, 104.0] {
                let (amount, _) = risk(&engine, &request(ContractType::Put, &[strike], days));
                assert!(amount >= 0.0, "days {days} strike {strike}: {amount}");
            }
        }
    }
}
