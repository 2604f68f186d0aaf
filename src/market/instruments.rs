use crate::contract::SECONDS_PER_DAY;
use crate::errors::{PricingError, PricingResult};
use crate::market::{InstrumentConfig, InstrumentSpec, MarketCalendar};
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Static instrument table keyed by underlying symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentTable {
    specs: HashMap<String, InstrumentSpec>,
}

impl InstrumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, spec: InstrumentSpec) {
        self.specs.insert(symbol.to_string(), spec);
    }

    pub fn with(mut self, symbol: &str, spec: InstrumentSpec) -> Self {
        self.insert(symbol, spec);
        self
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl InstrumentConfig for InstrumentTable {
    fn lookup(&self, symbol: &str) -> PricingResult<InstrumentSpec> {
        self.specs
            .get(symbol)
            .cloned()
            .ok_or_else(|| PricingError::MarketData(format!("unknown underlying {symbol}")))
    }
}

// ── Calendar ──

/// Monday-to-Friday calendar with a fixed daily rollover hour in UTC.
/// No holiday list: every weekday trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayCalendar {
    rollover_hour_utc: u32,
}

impl Default for WeekdayCalendar {
    fn default() -> Self {
        Self::new(21)
    }
}

impl WeekdayCalendar {
    pub fn new(rollover_hour_utc: u32) -> Self {
        Self {
            rollover_hour_utc: rollover_hour_utc.min(23),
        }
    }

    pub fn rollover_hour_utc(&self) -> u32 {
        self.rollover_hour_utc
    }
}

#[inline]
fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}

impl MarketCalendar for WeekdayCalendar {
    fn rollover_time(&self, date: DateTime<Utc>) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.rollover_hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        date.date_naive().and_time(time).and_utc()
    }

    fn trading_days_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        if end <= start {
            return 0.0;
        }
        let mut seconds = 0.0;
        let mut cursor = start;
        while cursor < end {
            let next_midnight = (cursor.date_naive() + Duration::days(1))
                .and_time(NaiveTime::MIN)
                .and_utc();
            let segment_end = next_midnight.min(end);
            if !is_weekend(cursor.weekday()) {
                seconds += (segment_end - cursor).num_milliseconds() as f64 / 1000.0;
            }
            cursor = segment_end;
        }
        seconds / SECONDS_PER_DAY
    }
}
