use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identifies one tradeable series: an archetype traded on one realm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub archetype_id: i64,
    pub realm_slug: String,
}

impl SeriesKey {
    pub fn new(archetype_id: i64, realm_slug: impl Into<String>) -> Self {
        Self {
            archetype_id,
            realm_slug: realm_slug.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.archetype_id, self.realm_slug)
    }
}

/// One daily feature row as delivered by the feature pipeline.
///
/// Only `series`, `obs_date` and `price_mean` are read by the backtest core.
/// Every other numeric column rides along in `aux` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub series: SeriesKey,
    pub obs_date: NaiveDate,
    pub price_mean: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, f64>,
}

impl FeatureRow {
    pub fn new(series: SeriesKey, obs_date: NaiveDate, price_mean: Option<f64>) -> Self {
        Self {
            series,
            obs_date,
            price_mean,
            aux: BTreeMap::new(),
        }
    }

    /// Attach an auxiliary feature column.
    pub fn with_aux(mut self, name: impl Into<String>, value: f64) -> Self {
        self.aux.insert(name.into(), value);
        self
    }

    /// The usable price for this row. NaN and infinities count as missing.
    pub fn price(&self) -> Option<f64> {
        self.price_mean.filter(|p| p.is_finite())
    }
}
