use chrono::{Days, NaiveDate};
use forecast_core::{ensure_positive, ForecastError, Result};
use serde::{Deserialize, Serialize};

use crate::metrics::{direction, MAPE_EPSILON};

// --- Walk-Forward Folds ---

/// One walk-forward evaluation round.
///
/// Fields are private so every fold goes through [`Fold::new`], which makes a
/// fold with `test_date <= train_end` unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fold {
    fold_index: usize,
    train_start: NaiveDate,
    train_end: NaiveDate,
    test_date: NaiveDate,
    horizon_days: u32,
}

impl Fold {
    /// Build the fold whose training window of `window_days` calendar days
    /// ends (inclusive) at `train_end` and whose target is `horizon_days` later.
    pub fn new(
        fold_index: usize,
        train_end: NaiveDate,
        window_days: u32,
        horizon_days: u32,
    ) -> Result<Self> {
        ensure_positive("window_days", window_days)?;
        ensure_positive("horizon_days", horizon_days)?;

        let train_start = train_end
            .checked_sub_days(Days::new(u64::from(window_days - 1)))
            .ok_or_else(|| {
                ForecastError::InvalidParameter(format!(
                    "training window of {window_days} days before {train_end} is out of range"
                ))
            })?;
        let test_date = train_end
            .checked_add_days(Days::new(u64::from(horizon_days)))
            .ok_or_else(|| {
                ForecastError::InvalidParameter(format!(
                    "test date {horizon_days} days after {train_end} is out of range"
                ))
            })?;

        Ok(Self {
            fold_index,
            train_start,
            train_end,
            test_date,
            horizon_days,
        })
    }

    pub fn fold_index(&self) -> usize {
        self.fold_index
    }

    pub fn train_start(&self) -> NaiveDate {
        self.train_start
    }

    /// The origin: the latest date a model may observe.
    pub fn train_end(&self) -> NaiveDate {
        self.train_end
    }

    pub fn test_date(&self) -> NaiveDate {
        self.test_date
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Inclusive length of the training window in calendar days.
    pub fn window_days(&self) -> i64 {
        (self.train_end - self.train_start).num_days() + 1
    }

    /// Whether `date` falls inside the inclusive training window.
    pub fn in_training_window(&self, date: NaiveDate) -> bool {
        self.train_start <= date && date <= self.train_end
    }
}

// --- Prediction Records ---

/// One model's forecast-vs-actual comparison for one (fold, series) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub fold_index: usize,
    pub archetype_id: i64,
    pub realm_slug: String,
    /// Category label used only for slicing.
    pub category_tag: Option<String>,
    pub model_name: String,
    pub train_end: NaiveDate,
    pub test_date: NaiveDate,
    pub horizon_days: u32,
    /// Observed price on `test_date`; `None` when nothing was observed that day.
    pub actual_price: Option<f64>,
    /// `None` when the model abstained.
    pub predicted_price: Option<f64>,
    /// Price at `train_end`, the reference for directional accuracy.
    pub last_known_price: Option<f64>,
    /// Informational tag, never a model input.
    #[serde(default)]
    pub is_event_window: bool,
}

impl PredictionRecord {
    /// `(actual, predicted)` when both are present and finite.
    pub fn evaluated_pair(&self) -> Option<(f64, f64)> {
        let actual = self.actual_price.filter(|p| p.is_finite())?;
        let predicted = self.predicted_price.filter(|p| p.is_finite())?;
        Some((actual, predicted))
    }

    pub fn abs_error(&self) -> Option<f64> {
        self.evaluated_pair().map(|(a, p)| (a - p).abs())
    }

    /// Absolute percentage error; undefined below the MAPE epsilon.
    pub fn pct_error(&self) -> Option<f64> {
        let (actual, predicted) = self.evaluated_pair()?;
        (actual >= MAPE_EPSILON).then(|| (actual - predicted).abs() / actual.max(MAPE_EPSILON))
    }

    /// Reference price for directional accuracy, if any.
    fn reference(&self) -> Option<f64> {
        self.last_known_price.filter(|p| p.is_finite())
    }

    pub fn direction_actual(&self) -> Option<i8> {
        let (actual, _) = self.evaluated_pair()?;
        Some(direction(actual, self.reference()?))
    }

    pub fn direction_predicted(&self) -> Option<i8> {
        let (_, predicted) = self.evaluated_pair()?;
        Some(direction(predicted, self.reference()?))
    }

    /// Whether the predicted direction matched the actual one.
    ///
    /// `None` unless the record is evaluated, has a reference price, and the
    /// actual price moved away from it. Ties never count either way.
    pub fn direction_correct(&self) -> Option<bool> {
        let actual_dir = self.direction_actual()?;
        if actual_dir == 0 {
            return None;
        }
        let predicted_dir = self.direction_predicted()?;
        Some(predicted_dir == actual_dir)
    }
}

// --- Aggregated Metrics ---

/// Accuracy statistics over a set of prediction records.
///
/// Every accuracy field is `None` when there is not enough data to compute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub n_predictions: usize,
    pub n_evaluated: usize,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub mape: Option<f64>,
    pub directional_accuracy: Option<f64>,
    pub n_directional: usize,
    pub mean_actual: Option<f64>,
    pub mean_predicted: Option<f64>,
    pub model_name: Option<String>,
    pub horizon_days: Option<u32>,
    pub slice_key: Option<String>,
}

// --- Run Parameters ---

/// Parameters describing one backtest run for one realm and horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    pub realm_slug: String,
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    pub window_days: u32,
    pub step_days: u32,
    pub horizon_days: u32,
    pub min_train_rows: usize,
}
