use std::fmt;

use crate::models::{BacktestMetrics, PredictionRecord};

/// Actual prices below this are excluded from MAPE.
pub const MAPE_EPSILON: f64 = 0.01;

/// `+1` when `price` is above `reference`, `-1` when below, `0` on a tie.
pub fn direction(price: f64, reference: f64) -> i8 {
    if price > reference {
        1
    } else if price < reference {
        -1
    } else {
        0
    }
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Aggregate accuracy metrics over `records`.
///
/// Records missing either the actual or the predicted price count towards
/// `n_predictions` only. Every accuracy field is `None` when nothing
/// qualifies for it.
pub fn compute_metrics<'a, I>(
    records: I,
    model_name: Option<&str>,
    horizon_days: Option<u32>,
    slice_key: Option<&str>,
) -> BacktestMetrics
where
    I: IntoIterator<Item = &'a PredictionRecord>,
{
    let mut n_predictions = 0;
    let mut abs_errors = Vec::new();
    let mut sq_errors = Vec::new();
    let mut pct_errors = Vec::new();
    let mut actuals = Vec::new();
    let mut predictions = Vec::new();
    let mut n_directional = 0usize;
    let mut n_correct = 0usize;

    for record in records {
        n_predictions += 1;
        let Some((actual, predicted)) = record.evaluated_pair() else {
            continue;
        };

        let err = actual - predicted;
        abs_errors.push(err.abs());
        sq_errors.push(err * err);
        actuals.push(actual);
        predictions.push(predicted);

        if let Some(pct) = record.pct_error() {
            pct_errors.push(pct);
        }
        // Ties between actual and reference have no direction to score.
        if let Some(correct) = record.direction_correct() {
            n_directional += 1;
            if correct {
                n_correct += 1;
            }
        }
    }

    BacktestMetrics {
        n_predictions,
        n_evaluated: abs_errors.len(),
        mae: mean_of(&abs_errors),
        rmse: mean_of(&sq_errors).map(f64::sqrt),
        mape: mean_of(&pct_errors),
        directional_accuracy: (n_directional > 0)
            .then(|| n_correct as f64 / n_directional as f64),
        n_directional,
        mean_actual: mean_of(&actuals),
        mean_predicted: mean_of(&predictions),
        model_name: model_name.map(str::to_string),
        horizon_days,
        slice_key: slice_key.map(str::to_string),
    }
}

struct OrNa(Option<f64>, usize);

impl fmt::Display for OrNa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.*}", self.1, v),
            None => f.write_str("n/a"),
        }
    }
}

impl fmt::Display for BacktestMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self
            .slice_key
            .as_deref()
            .or(self.model_name.as_deref())
            .unwrap_or("all");
        write!(
            f,
            "{label}: n={}/{} mae={} rmse={} mape={} dir_acc={} (n_dir={})",
            self.n_evaluated,
            self.n_predictions,
            OrNa(self.mae, 4),
            OrNa(self.rmse, 4),
            OrNa(self.mape, 4),
            OrNa(self.directional_accuracy, 3),
            self.n_directional,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(actual: Option<f64>, predicted: Option<f64>, last_known: Option<f64>) -> PredictionRecord {
        PredictionRecord {
            fold_index: 0,
            archetype_id: 1,
            realm_slug: "area-52".to_string(),
            category_tag: Some("consumable".to_string()),
            model_name: "last_value".to_string(),
            train_end: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            test_date: NaiveDate::from_ymd_opt(2024, 10, 2).unwrap(),
            horizon_days: 1,
            actual_price: actual,
            predicted_price: predicted,
            last_known_price: last_known,
            is_event_window: false,
        }
    }

    #[test]
    fn test_direction() {
        assert_eq!(direction(120.0, 100.0), 1);
        assert_eq!(direction(80.0, 100.0), -1);
        assert_eq!(direction(100.0, 100.0), 0);
    }

    #[test]
    fn test_empty_input() {
        let m = compute_metrics(std::iter::empty(), None, None, None);
        assert_eq!(m.n_predictions, 0);
        assert_eq!(m.n_evaluated, 0);
        assert_eq!(m.n_directional, 0);
        assert!(m.mae.is_none());
        assert!(m.rmse.is_none());
        assert!(m.mape.is_none());
        assert!(m.directional_accuracy.is_none());
        assert!(m.mean_actual.is_none());
        assert!(m.mean_predicted.is_none());
    }

    #[test]
    fn test_mae_exact() {
        let records = vec![
            record(Some(100.0), Some(90.0), None),
            record(Some(200.0), Some(220.0), None),
            record(Some(150.0), Some(150.0), None),
        ];
        let m = compute_metrics(&records, Some("last_value"), Some(1), None);
        assert_eq!(m.n_evaluated, 3);
        assert_eq!(m.mae, Some(10.0));
        assert_eq!(m.model_name.as_deref(), Some("last_value"));
        assert_eq!(m.horizon_days, Some(1));
        assert_eq!(m.mean_actual, Some(150.0));
    }

    #[test]
    fn test_rmse_dominates_mae() {
        let records = vec![
            record(Some(100.0), Some(110.0), None),
            record(Some(100.0), Some(200.0), None),
        ];
        let m = compute_metrics(&records, None, None, None);
        let mae = m.mae.unwrap();
        let rmse = m.rmse.unwrap();
        assert_eq!(mae, 55.0);
        assert!((rmse - (10_100.0_f64 / 2.0).sqrt()).abs() < 1e-9);
        assert!((rmse - 71.06).abs() < 0.01);
        assert!(rmse >= mae);
    }

    #[test]
    fn test_rmse_equals_mae_for_uniform_errors() {
        let records = vec![
            record(Some(100.0), Some(95.0), None),
            record(Some(50.0), Some(55.0), None),
        ];
        let m = compute_metrics(&records, None, None, None);
        assert!((m.rmse.unwrap() - m.mae.unwrap()).abs() < 1e-12);
    }

    #[test]
    fn test_directional_accuracy() {
        let records = vec![
            record(Some(120.0), Some(110.0), Some(100.0)),
            record(Some(120.0), Some(80.0), Some(100.0)),
        ];
        let m = compute_metrics(&records, None, None, None);
        assert_eq!(m.directional_accuracy, Some(0.5));
        assert_eq!(m.n_directional, 2);
    }

    #[test]
    fn test_directional_excludes_ties_and_missing_reference() {
        let records = vec![
            record(Some(100.0), Some(110.0), Some(100.0)),
            record(Some(120.0), Some(130.0), None),
        ];
        let m = compute_metrics(&records, None, None, None);
        assert_eq!(m.n_evaluated, 2);
        assert_eq!(m.n_directional, 0);
        assert!(m.directional_accuracy.is_none());
        assert!(m.mae.is_some());
    }

    #[test]
    fn test_null_exclusion() {
        let records = vec![
            record(Some(100.0), Some(90.0), Some(95.0)),
            record(None, Some(90.0), Some(95.0)),
            record(Some(100.0), None, Some(95.0)),
            record(Some(f64::NAN), Some(90.0), Some(95.0)),
        ];
        let m = compute_metrics(&records, None, None, None);
        assert_eq!(m.n_predictions, 4);
        assert_eq!(m.n_evaluated, 1);
        assert_eq!(m.mae, Some(10.0));
        assert_eq!(m.n_directional, 1);
    }

    #[test]
    fn test_mape_skips_near_zero_actuals() {
        let records = vec![
            record(Some(100.0), Some(90.0), None),
            record(Some(0.001), Some(5.0), None),
        ];
        let m = compute_metrics(&records, None, None, None);
        assert_eq!(m.n_evaluated, 2);
        assert_eq!(m.mape, Some(0.1));

        let tiny = vec![record(Some(0.0), Some(5.0), None)];
        let m = compute_metrics(&tiny, None, None, None);
        assert_eq!(m.n_evaluated, 1);
        assert!(m.mape.is_none());
    }

    #[test]
    fn test_display_marks_missing_values() {
        let m = compute_metrics(std::iter::empty(), Some("rolling_mean"), Some(3), None);
        let text = m.to_string();
        assert!(text.starts_with("rolling_mean: n=0/0"));
        assert!(text.contains("mae=n/a"));
    }
}
