//! Shared fixtures for unit tests.

use crate::contract::{ContractType, PricedWith, PricingRequest, VolInput};
use crate::engine::PricingEngine;
use crate::market::instruments::{InstrumentTable, WeekdayCalendar};
use crate::market::surface::{SmileSurface, SurfaceTenor};
use crate::market::{InstrumentSpec, MarketCategory, Smile};
use crate::risk::commission::CommissionSchedule;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const TENORS: [f64; 4] = [1.0, 7.0, 30.0, 365.0];

/// Tuesday 2024-03-05 08:00 UTC.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap()
}

/// Spot 100, vol 0.1, mu 0.023 = r - q, discount 0.01, numeraire, on frxUSDJPY.
/// Two-barrier contracts get a flat barrier vol pair.
pub fn request(contract_type: ContractType, strikes: &[f64], days: f64) -> PricingRequest {
    let start = start();
    let vol = if contract_type.is_two_barrier() {
        VolInput::Barriers {
            high_barrier_vol: 0.1,
            low_barrier_vol: 0.1,
        }
    } else {
        VolInput::Single(0.1)
    };
    PricingRequest {
        contract_type,
        spot: 100.0,
        strikes: strikes.iter().copied().collect(),
        date_start: start,
        date_pricing: start,
        date_expiry: start + Duration::milliseconds((days * 86_400_000.0).round() as i64),
        discount_rate: 0.01,
        q_rate: 0.007,
        r_rate: 0.03,
        mu: 0.023,
        vol: Some(vol),
        payouttime_code: false,
        priced_with: PricedWith::Numeraire,
        underlying_symbol: "frxUSDJPY".into(),
        apply_equal_tie_markup: false,
        for_sale: true,
    }
}

fn spec(market: MarketCategory, submarket: &str, pip_size: f64) -> InstrumentSpec {
    InstrumentSpec {
        market,
        submarket: submarket.into(),
        pip_size,
        spot_spread_size: 50.0,
    }
}

pub fn instruments() -> InstrumentTable {
    InstrumentTable::new()
        .with("frxUSDJPY", spec(MarketCategory::Forex, "major_pairs", 0.001))
        .with("IDXSYN", spec(MarketCategory::Indices, "asia_oceania", 0.01))
        .with("frxXAUUSD", spec(MarketCategory::Commodities, "metals", 0.01))
        .with("R_100", spec(MarketCategory::Volidx, "random_index", 0.01))
}

fn surface_with(smile: &[(u32, f64)], spread: &[(u32, f64)]) -> SmileSurface {
    let smile: Smile = smile.iter().copied().collect();
    let vol_spread: Smile = spread.iter().copied().collect();
    let tenors = TENORS
        .iter()
        .map(|&days| SurfaceTenor {
            days,
            smile: smile.clone(),
            vol_spread: vol_spread.clone(),
        })
        .collect();
    SmileSurface::new(tenors, 1.0).unwrap()
}

pub fn flat_surface(vol: f64) -> SmileSurface {
    surface_with(&[(25, vol), (50, vol), (75, vol)], &[])
}

/// Upper wing rich: vol rises with strike.
pub fn skewed_surface() -> SmileSurface {
    surface_with(
        &[(25, 0.11), (50, 0.10), (75, 0.09)],
        &[(25, 0.03), (50, 0.01), (75, 0.03)],
    )
}

/// 25-delta butterfly of 0.10, well over the cutoff.
pub fn butterfly_surface() -> SmileSurface {
    surface_with(&[(25, 0.20), (50, 0.10), (75, 0.20)], &[(50, 0.01)])
}

pub fn engine(surface: SmileSurface) -> PricingEngine {
    PricingEngine::new(
        Arc::new(surface),
        Arc::new(instruments()),
        Arc::new(WeekdayCalendar::new(21)),
    )
}

/// Forex CALL 4%, PUT 3%; level 1 on frxUSDJPY.
pub fn commission_schedule() -> CommissionSchedule {
    let forex: HashMap<String, f64> = [("CALL".to_string(), 4.0), ("PUT".to_string(), 3.0)]
        .into_iter()
        .collect();
    CommissionSchedule {
        commission_level: [("frxUSDJPY".to_string(), 1)].into_iter().collect(),
        digital_spread_base: [("forex".to_string(), forex)].into_iter().collect(),
        ..CommissionSchedule::default()
    }
}
