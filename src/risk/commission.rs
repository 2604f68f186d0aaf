use crate::engine::RequestContext;
use crate::trace::DebugTrace;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Flat commission on high-risk submarkets and symbols.
const HIGH_RISK_COMMISSION: f64 = 0.05;

/// Flat commission on forward-starting contracts.
const FORWARD_STARTING_COMMISSION: f64 = 0.03;

/// Multiplier per commission level above 1.
const LEVEL_MULTIPLIER: f64 = 1.4;

/// Maturity scaling breakpoints: (days, factor). Flat beyond both ends.
const MATURITY_SCALING: [(f64, f64); 5] = [
    (0.0, 1.5),
    (1.0, 1.5),
    (10.0, 1.2),
    (20.0, 1.0),
    (365.0, 1.0),
];

/// Per-symbol commission data. Loaded once, read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSchedule {
    pub commission_level: HashMap<String, u32>,
    /// Base spread in percent, by market then contract type.
    pub digital_spread_base: HashMap<String, HashMap<String, f64>>,
    /// Fixed maturity scaling per symbol, replacing the breakpoint table.
    pub digital_scaling_factor: HashMap<String, f64>,
    pub high_risk_submarkets: HashSet<String>,
    pub high_risk_symbols: HashSet<String>,
}

/// Linear interpolation over the maturity breakpoints.
pub fn maturity_scaling(days: f64) -> f64 {
    let (first_day, first_factor) = MATURITY_SCALING[0];
    if days <= first_day {
        return first_factor;
    }
    for pair in MATURITY_SCALING.windows(2) {
        let ((d0, f0), (d1, f1)) = (pair[0], pair[1]);
        if days <= d1 {
            return f0 + (f1 - f0) * (days - d0) / (d1 - d0);
        }
    }
    MATURITY_SCALING[MATURITY_SCALING.len() - 1].1
}

impl CommissionSchedule {
    fn is_high_risk(&self, ctx: &RequestContext<'_>) -> bool {
        self.high_risk_submarkets.contains(&ctx.instrument.submarket)
            || self.high_risk_symbols.contains(&ctx.request.underlying_symbol)
    }

    /// Commission markup, recorded under `commission_markup` in the trace.
    pub fn commission_markup(&self, ctx: &RequestContext<'_>, trace: &mut DebugTrace) -> f64 {
        let request = ctx.request;
        let symbol = request.underlying_symbol.as_str();

        if self.is_high_risk(ctx) {
            trace.amount(
                "commission_markup",
                HIGH_RISK_COMMISSION,
                DebugTrace::new().with("high_risk", 1.0),
            );
            return HIGH_RISK_COMMISSION;
        }
        if ctx.derived.is_forward_starting {
            trace.amount(
                "commission_markup",
                FORWARD_STARTING_COMMISSION,
                DebugTrace::new().with("forward_starting", 1.0),
            );
            return FORWARD_STARTING_COMMISSION;
        }

        let market = ctx.instrument.market.name();
        let base_spread = match self
            .digital_spread_base
            .get(market)
            .and_then(|by_type| by_type.get(request.contract_type.code()))
        {
            Some(percent) => percent / 100.0,
            None => {
                tracing::warn!(market, contract_type = %request.contract_type, "no digital spread base, commission is 0");
                0.0
            }
        };

        let level = match self.commission_level.get(symbol) {
            Some(level) => *level,
            None => {
                tracing::warn!(symbol, "no commission level, using 1");
                1
            }
        };
        let level_multiplier = LEVEL_MULTIPLIER.powi(level.saturating_sub(1) as i32);

        let scaling = self
            .digital_scaling_factor
            .get(symbol)
            .copied()
            .unwrap_or_else(|| maturity_scaling(ctx.derived.time_in_days));

        let commission = base_spread * level_multiplier * scaling / 2.0;
        trace.amount(
            "commission_markup",
            commission,
            DebugTrace::new()
                .with("base_spread", base_spread)
                .with("commission_level", level as f64)
                .with("level_multiplier", level_multiplier)
                .with("scaling_factor", scaling),
        );
        commission
    }
}
