//! Baseline forecasting models.
//!
//! Each baseline encodes one hypothesis about the market and sets the floor
//! any learned model has to beat:
//!
//! - [`LastValueModel`]: random walk, tomorrow looks like today.
//! - [`RollingMeanModel`]: prices revert to a short recent average.
//! - [`DayOfWeekModel`]: demand follows the weekly reset cycle.
//! - [`SimpleVolatilityModel`]: rolling mean plus a turbulence estimate.
//!
//! Every `fit` replaces the fitted state wholesale, so nothing from a previous
//! fold or series can survive into the next prediction.

use chrono::{Datelike, Days, NaiveDate};
use forecast_core::{ensure_positive, FeatureRow, ForecastModel, Result};
use statrs::statistics::Statistics;

pub const DEFAULT_WINDOW: usize = 7;
pub const DEFAULT_ROLLING_MIN_ROWS: usize = 3;
pub const DEFAULT_WEEKDAY_MIN_ROWS: usize = 2;

/// Non-missing prices among the last `window` training rows.
fn tail_prices(rows: &[FeatureRow], window: usize) -> Vec<f64> {
    let start = rows.len().saturating_sub(window);
    rows[start..].iter().filter_map(FeatureRow::price).collect()
}

fn window_param(window: usize) -> Result<()> {
    ensure_positive("window", u32::try_from(window).unwrap_or(u32::MAX))
}

// --- Last Value ---

#[derive(Debug, Clone, Default)]
pub struct LastValueModel {
    last_price: Option<f64>,
}

impl LastValueModel {
    pub const NAME: &'static str = "last_value";

    pub fn new() -> Self {
        Self::default()
    }
}

impl ForecastModel for LastValueModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        self.last_price = rows.iter().rev().find_map(FeatureRow::price);
    }

    /// The horizon is ignored.
    fn predict(&self, _horizon_days: u32) -> Option<f64> {
        self.last_price
    }
}

// --- Rolling Mean ---

#[derive(Debug, Clone)]
pub struct RollingMeanModel {
    window: usize,
    min_rows: usize,
    mean: Option<f64>,
}

impl Default for RollingMeanModel {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            min_rows: DEFAULT_ROLLING_MIN_ROWS,
            mean: None,
        }
    }
}

impl RollingMeanModel {
    pub const NAME: &'static str = "rolling_mean";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(window: usize, min_rows: usize) -> Result<Self> {
        window_param(window)?;
        Ok(Self {
            window,
            min_rows,
            mean: None,
        })
    }
}

impl ForecastModel for RollingMeanModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        let prices = tail_prices(rows, self.window);
        self.mean = (!prices.is_empty() && prices.len() >= self.min_rows)
            .then(|| prices.iter().mean());
    }

    fn predict(&self, _horizon_days: u32) -> Option<f64> {
        self.mean
    }
}

// --- Day of Week ---

/// Per-weekday price history learned from one training window.
#[derive(Debug, Clone)]
struct WeekdayProfile {
    last_date: NaiveDate,
    /// Indexed by days from Monday.
    by_weekday: [Vec<f64>; 7],
    overall_mean: f64,
}

impl WeekdayProfile {
    fn from_rows(rows: &[FeatureRow]) -> Option<Self> {
        let mut by_weekday: [Vec<f64>; 7] = Default::default();
        let mut all_prices = Vec::new();
        let mut last_date = None;

        for row in rows {
            let Some(price) = row.price() else {
                continue;
            };
            by_weekday[row.obs_date.weekday().num_days_from_monday() as usize].push(price);
            all_prices.push(price);
            last_date = Some(row.obs_date);
        }

        Some(Self {
            last_date: last_date?,
            by_weekday,
            overall_mean: all_prices.iter().mean(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DayOfWeekModel {
    min_rows: usize,
    profile: Option<WeekdayProfile>,
}

impl Default for DayOfWeekModel {
    fn default() -> Self {
        Self {
            min_rows: DEFAULT_WEEKDAY_MIN_ROWS,
            profile: None,
        }
    }
}

impl DayOfWeekModel {
    pub const NAME: &'static str = "day_of_week";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_rows(min_rows: usize) -> Self {
        Self {
            min_rows,
            profile: None,
        }
    }
}

impl ForecastModel for DayOfWeekModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        self.profile = WeekdayProfile::from_rows(rows);
    }

    /// Mean price on the target weekday, or the overall training mean when
    /// that weekday has fewer than `min_rows` observations.
    fn predict(&self, horizon_days: u32) -> Option<f64> {
        let profile = self.profile.as_ref()?;
        let target = profile
            .last_date
            .checked_add_days(Days::new(u64::from(horizon_days)))?;
        let prices = &profile.by_weekday[target.weekday().num_days_from_monday() as usize];

        if !prices.is_empty() && prices.len() >= self.min_rows {
            Some(prices.iter().mean())
        } else {
            Some(profile.overall_mean)
        }
    }
}

// --- Simple Volatility ---

#[derive(Debug, Clone, Copy)]
struct VolatilityFit {
    mean: f64,
    volatility_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SimpleVolatilityModel {
    window: usize,
    min_rows: usize,
    fitted: Option<VolatilityFit>,
}

impl Default for SimpleVolatilityModel {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            min_rows: DEFAULT_ROLLING_MIN_ROWS,
            fitted: None,
        }
    }
}

impl SimpleVolatilityModel {
    pub const NAME: &'static str = "simple_volatility";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(window: usize, min_rows: usize) -> Result<Self> {
        window_param(window)?;
        Ok(Self {
            window,
            min_rows,
            fitted: None,
        })
    }

    /// Rolling population std / rolling mean over the fitted window.
    ///
    /// `None` when the model abstained or the mean is not positive.
    pub fn predicted_volatility_pct(&self) -> Option<f64> {
        self.fitted.and_then(|f| f.volatility_pct)
    }
}

impl ForecastModel for SimpleVolatilityModel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        let prices = tail_prices(rows, self.window);
        if prices.is_empty() || prices.len() < self.min_rows {
            self.fitted = None;
            return;
        }

        let mean = prices.iter().mean();
        let std = prices.iter().population_std_dev().max(0.0);
        self.fitted = Some(VolatilityFit {
            mean,
            volatility_pct: (mean > 0.0).then(|| std / mean),
        });
    }

    fn predict(&self, _horizon_days: u32) -> Option<f64> {
        self.fitted.map(|f| f.mean)
    }
}

// --- Baseline Set ---

/// Any of the four baselines, dispatched statically.
#[derive(Debug, Clone)]
pub enum BaselineModel {
    LastValue(LastValueModel),
    RollingMean(RollingMeanModel),
    DayOfWeek(DayOfWeekModel),
    SimpleVolatility(SimpleVolatilityModel),
}

impl BaselineModel {
    /// Volatility estimate, only exposed by the volatility baseline.
    pub fn predicted_volatility_pct(&self) -> Option<f64> {
        match self {
            BaselineModel::SimpleVolatility(m) => m.predicted_volatility_pct(),
            _ => None,
        }
    }
}

impl ForecastModel for BaselineModel {
    fn name(&self) -> &str {
        match self {
            BaselineModel::LastValue(m) => m.name(),
            BaselineModel::RollingMean(m) => m.name(),
            BaselineModel::DayOfWeek(m) => m.name(),
            BaselineModel::SimpleVolatility(m) => m.name(),
        }
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        match self {
            BaselineModel::LastValue(m) => m.fit(rows),
            BaselineModel::RollingMean(m) => m.fit(rows),
            BaselineModel::DayOfWeek(m) => m.fit(rows),
            BaselineModel::SimpleVolatility(m) => m.fit(rows),
        }
    }

    fn predict(&self, horizon_days: u32) -> Option<f64> {
        match self {
            BaselineModel::LastValue(m) => m.predict(horizon_days),
            BaselineModel::RollingMean(m) => m.predict(horizon_days),
            BaselineModel::DayOfWeek(m) => m.predict(horizon_days),
            BaselineModel::SimpleVolatility(m) => m.predict(horizon_days),
        }
    }
}

/// One freshly constructed instance of every baseline.
///
/// Each call returns new instances; nothing is shared between calls.
pub fn all_baseline_models() -> Vec<BaselineModel> {
    vec![
        BaselineModel::LastValue(LastValueModel::new()),
        BaselineModel::RollingMean(RollingMeanModel::new()),
        BaselineModel::DayOfWeek(DayOfWeekModel::new()),
        BaselineModel::SimpleVolatility(SimpleVolatilityModel::new()),
    ]
}
