use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use forecast_core::ensure_positive;

/// Runner settings, loaded from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    pub db_path: PathBuf,           // inputs and results share one database
    pub output_dir: PathBuf,        // base for CSV/JSON exports
    pub realm_slug: String,
    pub window_days: u32,           // 30
    pub step_days: u32,             // 7
    pub horizons: Vec<u32>,         // 1,3
    pub min_train_rows: usize,      // 14
    pub parallel: bool,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/db/wow_forecaster.db"),
            output_dir: PathBuf::from("data/processed"),
            realm_slug: "area-52".to_string(),
            window_days: 30,
            step_days: 7,
            horizons: vec![1, 3],
            min_train_rows: 14,
            parallel: false,
        }
    }
}

/// Parse a comma-separated horizon list such as `"1,3,7"`.
pub fn parse_horizons(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("invalid horizon {s:?}"))
        })
        .collect()
}

impl BacktestSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; missing keys take the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let settings = Self {
            db_path: var("BACKTEST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            output_dir: var("BACKTEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            realm_slug: var("BACKTEST_REALM").unwrap_or(defaults.realm_slug),
            window_days: var("BACKTEST_WINDOW_DAYS")
                .map(|v| v.trim().parse())
                .transpose()
                .context("BACKTEST_WINDOW_DAYS must be a positive integer")?
                .unwrap_or(defaults.window_days),
            step_days: var("BACKTEST_STEP_DAYS")
                .map(|v| v.trim().parse())
                .transpose()
                .context("BACKTEST_STEP_DAYS must be a positive integer")?
                .unwrap_or(defaults.step_days),
            horizons: var("BACKTEST_HORIZONS")
                .map(|v| parse_horizons(&v))
                .transpose()
                .context("BACKTEST_HORIZONS must be a comma-separated list of days")?
                .unwrap_or(defaults.horizons),
            min_train_rows: var("BACKTEST_MIN_TRAIN_ROWS")
                .map(|v| v.trim().parse())
                .transpose()
                .context("BACKTEST_MIN_TRAIN_ROWS must be a non-negative integer")?
                .unwrap_or(defaults.min_train_rows),
            parallel: var("BACKTEST_PARALLEL")
                .map(|v| v.trim().to_ascii_lowercase().parse())
                .transpose()
                .context("BACKTEST_PARALLEL must be true or false")?
                .unwrap_or(defaults.parallel),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("window_days", self.window_days)?;
        ensure_positive("step_days", self.step_days)?;
        if self.horizons.is_empty() {
            bail!("at least one horizon is required");
        }
        for &h in &self.horizons {
            ensure_positive("horizon_days", h)?;
        }
        if self.realm_slug.trim().is_empty() {
            bail!("realm slug must not be empty");
        }
        Ok(())
    }

    /// sqlx connection string for `db_path`.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.db_path.display())
    }

    /// Settings as JSON, stored with every run.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
