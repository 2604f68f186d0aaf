use crate::errors::{PricingError, PricingResult};
use crate::risk::commission::CommissionSchedule;
use crate::risk::markup::MarkupPolicyTable;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub commissions: CommissionSchedule,
    pub markup_policy: MarkupPolicyTable,
    pub equal_tie_amount: f64,
    pub rollover_hour_utc: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commissions: CommissionSchedule::default(),
            markup_policy: MarkupPolicyTable::default(),
            equal_tie_amount: 0.01,
            rollover_hour_utc: 21,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> PricingResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PricingResult<Self> {
        let env_var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let equal_tie_amount = env_var_or("EQUAL_TIE_AMOUNT", "0.01")
            .parse::<f64>()
            .map_err(|e| PricingError::Config(format!("EQUAL_TIE_AMOUNT: {e}")))?;

        let rollover_hour_utc = env_var_or("ROLLOVER_HOUR_UTC", "21")
            .parse::<u32>()
            .map_err(|e| PricingError::Config(format!("ROLLOVER_HOUR_UTC: {e}")))?;
        if rollover_hour_utc > 23 {
            return Err(PricingError::Config(format!(
                "ROLLOVER_HOUR_UTC: {rollover_hour_utc} is not an hour of the day"
            )));
        }

        let commissions = match lookup("COMMISSION_SCHEDULE_PATH") {
            Some(path) => load_json(PathBuf::from(path))
                .map_err(|e| PricingError::Config(format!("COMMISSION_SCHEDULE_PATH: {e}")))?,
            None => CommissionSchedule::default(),
        };

        let markup_policy = match lookup("MARKUP_POLICY_PATH") {
            Some(path) => load_json(PathBuf::from(path))
                .map_err(|e| PricingError::Config(format!("MARKUP_POLICY_PATH: {e}")))?,
            None => MarkupPolicyTable::default(),
        };

        tracing::info!(
            equal_tie_amount,
            rollover_hour_utc,
            commission_symbols = commissions.commission_level.len(),
            "engine config loaded"
        );

        Ok(Self {
            commissions,
            markup_policy,
            equal_tie_amount,
            rollover_hour_utc,
        })
    }
}

/// Read and deserialize a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> PricingResult<T> {
    let text = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&text)?)
}
