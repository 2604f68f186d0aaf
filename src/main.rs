use digital_slope::config::{load_json, EngineConfig};
use digital_slope::market::instruments::{InstrumentTable, WeekdayCalendar};
use digital_slope::market::surface::SmileSurface;
use digital_slope::{PricingEngine, PricingRequest};
use serde::Deserialize;
use std::sync::Arc;

/// Everything needed to price one request from a file.
#[derive(Debug, Deserialize)]
struct PricingInput {
    request: PricingRequest,
    surface: SmileSurface,
    instruments: InstrumentTable,
}

fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let Some(path) = std::env::args().nth(1) else {
        tracing::error!("usage: price_digital <request.json>");
        std::process::exit(1);
    };

    let input: PricingInput = match load_json(&path) {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(path = %path, "cannot read pricing input: {e}");
            std::process::exit(1);
        }
    };

    let engine = PricingEngine::new(
        Arc::new(input.surface),
        Arc::new(input.instruments),
        Arc::new(WeekdayCalendar::new(config.rollover_hour_utc)),
    )
    .with_config(&config);

    let outcome = match engine.price(&input.request) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(symbol = %input.request.underlying_symbol, "pricing failed: {e}");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("cannot serialize outcome: {e}");
            std::process::exit(1);
        }
    }
}
