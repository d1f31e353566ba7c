//! Walk-forward evaluator.
//!
//! For every (fold, series) pair the evaluator slices the series' training
//! window, re-fits each model on exactly those rows and records the model's
//! forecast next to the observed price on the fold's test date.
//!
//! Models only ever see the training slice. The price lookup used to fill in
//! `actual_price` and `last_known_price` stays inside this module.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use forecast_core::{FeatureRow, ForecastModel, SeriesKey};
use rayon::prelude::*;

use crate::models::{Fold, PredictionRecord};

type PriceLookup<'a> = HashMap<(&'a SeriesKey, NaiveDate), Option<f64>>;

/// Inputs shared by every (fold, series) evaluation.
struct EvalContext<'a> {
    prices: PriceLookup<'a>,
    /// Rows per series, ascending by date, in series key order.
    series: Vec<(&'a SeriesKey, Vec<FeatureRow>)>,
    series_categories: &'a HashMap<i64, String>,
    active_event_dates: &'a HashSet<NaiveDate>,
    min_train_rows: usize,
}

impl<'a> EvalContext<'a> {
    fn new(
        feature_rows: &'a [FeatureRow],
        series_categories: &'a HashMap<i64, String>,
        active_event_dates: &'a HashSet<NaiveDate>,
        min_train_rows: usize,
    ) -> Self {
        // Later duplicates of a (series, date) pair overwrite earlier ones.
        let mut prices = PriceLookup::with_capacity(feature_rows.len());
        let mut grouped: BTreeMap<&SeriesKey, Vec<FeatureRow>> = BTreeMap::new();
        for row in feature_rows {
            prices.insert((&row.series, row.obs_date), row.price());
            grouped.entry(&row.series).or_default().push(row.clone());
        }

        let series = grouped
            .into_iter()
            .map(|(key, mut rows)| {
                rows.sort_by_key(|r| r.obs_date);
                (key, rows)
            })
            .collect();

        Self {
            prices,
            series,
            series_categories,
            active_event_dates,
            min_train_rows,
        }
    }

    fn price_at(&self, key: &'a SeriesKey, date: NaiveDate) -> Option<f64> {
        self.prices.get(&(key, date)).copied().flatten()
    }

    /// Records for one series in one fold, or nothing when the training
    /// window holds fewer than `min_train_rows` priced rows.
    fn evaluate<M: ForecastModel>(
        &self,
        fold: &Fold,
        key: &'a SeriesKey,
        rows: &[FeatureRow],
        models: &mut [M],
    ) -> Vec<PredictionRecord> {
        let lo = rows.partition_point(|r| r.obs_date < fold.train_start());
        let hi = rows.partition_point(|r| r.obs_date <= fold.train_end());
        let train = &rows[lo..hi];

        let priced = train.iter().filter(|r| r.price().is_some()).count();
        if priced < self.min_train_rows {
            return Vec::new();
        }

        let actual_price = self.price_at(key, fold.test_date());
        let last_known_price = self
            .price_at(key, fold.train_end())
            .or_else(|| train.iter().rev().find_map(FeatureRow::price));
        let category_tag = self.series_categories.get(&key.archetype_id).cloned();
        let is_event_window = self.active_event_dates.contains(&fold.test_date());

        models
            .iter_mut()
            .map(|model| {
                model.fit(train);
                let predicted_price = model
                    .predict(fold.horizon_days())
                    .filter(|p| p.is_finite());

                PredictionRecord {
                    fold_index: fold.fold_index(),
                    archetype_id: key.archetype_id,
                    realm_slug: key.realm_slug.clone(),
                    category_tag: category_tag.clone(),
                    model_name: model.name().to_string(),
                    train_end: fold.train_end(),
                    test_date: fold.test_date(),
                    horizon_days: fold.horizon_days(),
                    actual_price,
                    predicted_price,
                    last_known_price,
                    is_event_window,
                }
            })
            .collect()
    }
}

fn log_fold(fold: &Fold) {
    tracing::debug!(
        "Fold {}: train {}..={} -> test {} (h={}d)",
        fold.fold_index(),
        fold.train_start(),
        fold.train_end(),
        fold.test_date(),
        fold.horizon_days()
    );
}

/// Evaluate `models` over every fold and series.
///
/// Records come out ordered by fold, then series key, then model order.
/// Predictions that are NaN or infinite are recorded as abstentions.
pub fn run_backtest<M: ForecastModel>(
    feature_rows: &[FeatureRow],
    folds: &[Fold],
    models: &mut [M],
    series_categories: &HashMap<i64, String>,
    active_event_dates: &HashSet<NaiveDate>,
    min_train_rows: usize,
) -> Vec<PredictionRecord> {
    let ctx = EvalContext::new(
        feature_rows,
        series_categories,
        active_event_dates,
        min_train_rows,
    );

    let mut records = Vec::new();
    for fold in folds {
        log_fold(fold);
        for (key, rows) in &ctx.series {
            records.extend(ctx.evaluate(fold, *key, rows, models));
        }
    }

    tracing::info!(
        "Backtest evaluated {} folds x {} series x {} models -> {} records",
        folds.len(),
        ctx.series.len(),
        models.len(),
        records.len()
    );
    records
}

/// Parallel variant of [`run_backtest`], fanned out across series.
///
/// Each series task builds its own model set with `make_models`, so no model
/// instance is shared between threads. The output is identical to
/// `run_backtest` called with the same model set.
pub fn run_backtest_parallel<M, F>(
    feature_rows: &[FeatureRow],
    folds: &[Fold],
    make_models: F,
    series_categories: &HashMap<i64, String>,
    active_event_dates: &HashSet<NaiveDate>,
    min_train_rows: usize,
) -> Vec<PredictionRecord>
where
    M: ForecastModel,
    F: Fn() -> Vec<M> + Sync,
{
    let ctx = EvalContext::new(
        feature_rows,
        series_categories,
        active_event_dates,
        min_train_rows,
    );
    folds.iter().for_each(log_fold);

    // Outer index: series (key order). Inner index: fold position.
    let per_series: Vec<Vec<Vec<PredictionRecord>>> = ctx
        .series
        .par_iter()
        .map(|(key, rows)| {
            let mut models = make_models();
            folds
                .iter()
                .map(|fold| ctx.evaluate(fold, *key, rows, &mut models))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut per_series: Vec<_> = per_series.into_iter().map(Vec::into_iter).collect();
    let mut records = Vec::new();
    for _ in folds {
        for series_folds in per_series.iter_mut() {
            if let Some(batch) = series_folds.next() {
                records.extend(batch);
            }
        }
    }

    tracing::info!(
        "Parallel backtest evaluated {} folds x {} series -> {} records",
        folds.len(),
        ctx.series.len(),
        records.len()
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baselines::{all_baseline_models, LastValueModel};
    use crate::splits::generate_walk_forward_splits;
    use chrono::Days;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .checked_add_days(Days::new(n - 1))
            .unwrap()
    }

    fn series(id: i64, days: std::ops::RangeInclusive<u64>, price: impl Fn(u64) -> Option<f64>) -> Vec<FeatureRow> {
        days.map(|d| FeatureRow::new(SeriesKey::new(id, "area-52"), day(d), price(d)))
            .collect()
    }

    /// Records the date range of every training slice it is fitted on.
    struct SpyModel {
        seen: Rc<RefCell<Vec<(NaiveDate, NaiveDate)>>>,
    }

    impl ForecastModel for SpyModel {
        fn name(&self) -> &str {
            "spy"
        }

        fn fit(&mut self, rows: &[FeatureRow]) {
            let first = rows.first().map(|r| r.obs_date);
            let last = rows.last().map(|r| r.obs_date);
            if let (Some(first), Some(last)) = (first, last) {
                self.seen.borrow_mut().push((first, last));
            }
        }

        fn predict(&self, _horizon_days: u32) -> Option<f64> {
            Some(f64::NAN)
        }
    }

    #[test]
    fn test_models_never_see_future_rows() {
        let rows = series(1, 1..=60, |d| Some(d as f64));
        let folds = generate_walk_forward_splits(day(1), day(60), 10, 5, 3).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut models = vec![SpyModel { seen: seen.clone() }];

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 1);

        assert_eq!(records.len(), folds.len());
        let seen = seen.borrow();
        assert_eq!(seen.len(), folds.len());
        for (fold, (first, last)) in folds.iter().zip(seen.iter()) {
            assert_eq!(*first, fold.train_start());
            assert_eq!(*last, fold.train_end());
            assert!(*last < fold.test_date());
        }
        // NaN predictions are recorded as abstentions.
        assert!(records.iter().all(|r| r.predicted_price.is_none()));
    }

    #[test]
    fn test_last_value_ignores_future_prices() {
        // Prices jump after day 20; the fold's origin is day 20.
        let rows = series(1, 1..=25, |d| Some(if d > 20 { 10_000.0 } else { d as f64 }));
        let folds = vec![Fold::new(0, day(20), 20, 1).unwrap()];
        let mut models = vec![LastValueModel::new()];

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 5);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].predicted_price, Some(20.0));
        assert_eq!(records[0].actual_price, Some(10_000.0));
        assert_eq!(records[0].last_known_price, Some(20.0));
    }

    #[test]
    fn test_skips_series_with_too_few_priced_rows() {
        let mut rows = series(1, 1..=10, |d| Some(d as f64));
        rows.extend(series(2, 1..=10, |d| (d > 7).then_some(d as f64)));
        let folds = vec![Fold::new(0, day(9), 9, 1).unwrap()];
        let mut models = all_baseline_models();

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 3);

        // Series 2 has only two priced rows (days 8-9) inside the window.
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.archetype_id == 1));
    }

    #[test]
    fn test_last_known_falls_back_to_training_rows() {
        let rows = series(1, 1..=10, |d| (d < 8 || d == 10).then_some(d as f64));
        let folds = vec![Fold::new(0, day(9), 9, 1).unwrap()];
        let mut models = vec![LastValueModel::new()];

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 1);

        assert_eq!(records[0].last_known_price, Some(7.0));
        assert_eq!(records[0].actual_price, Some(10.0));
    }

    #[test]
    fn test_missing_actual_is_recorded_not_skipped() {
        let rows = series(1, 1..=9, |d| Some(d as f64));
        let folds = vec![Fold::new(0, day(9), 9, 2).unwrap()];
        let mut models = vec![LastValueModel::new()];

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 1);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actual_price, None);
        assert_eq!(records[0].predicted_price, Some(9.0));
    }

    #[test]
    fn test_category_and_event_tagging() {
        let mut rows = series(1, 1..=10, |d| Some(d as f64));
        rows.extend(series(2, 1..=10, |d| Some(d as f64)));
        let folds = vec![Fold::new(0, day(9), 9, 1).unwrap()];
        let categories = HashMap::from([(1, "herb".to_string())]);
        let events = HashSet::from([day(10)]);
        let mut models = vec![LastValueModel::new()];

        let records = run_backtest(&rows, &folds, &mut models, &categories, &events, 1);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].category_tag.as_deref(), Some("herb"));
        assert_eq!(records[1].category_tag, None);
        assert!(records.iter().all(|r| r.is_event_window));
    }

    #[test]
    fn test_unsorted_input_is_grouped_and_sorted() {
        let mut rows = series(2, 1..=10, |d| Some(d as f64));
        rows.extend(series(1, 1..=10, |d| Some(100.0 + d as f64)));
        rows.reverse();
        let folds = vec![Fold::new(0, day(9), 9, 1).unwrap()];
        let mut models = vec![LastValueModel::new()];

        let records = run_backtest(&rows, &folds, &mut models, &HashMap::new(), &HashSet::new(), 1);

        assert_eq!(records[0].archetype_id, 1);
        assert_eq!(records[0].predicted_price, Some(109.0));
        assert_eq!(records[1].archetype_id, 2);
        assert_eq!(records[1].predicted_price, Some(9.0));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut rows = Vec::new();
        for id in [5, 1, 3] {
            rows.extend(series(id, 1..=80, |d| {
                (d % 11 != 0).then(|| (id as f64) * 10.0 + ((d * 7) % 13) as f64)
            }));
        }
        let folds = generate_walk_forward_splits(day(1), day(80), 30, 7, 3).unwrap();
        let categories = HashMap::from([(1, "ore".to_string()), (3, "herb".to_string())]);
        let events = HashSet::from([day(40), day(41), day(42)]);

        let mut models = all_baseline_models();
        let sequential = run_backtest(&rows, &folds, &mut models, &categories, &events, 14);
        let parallel = run_backtest_parallel(&rows, &folds, all_baseline_models, &categories, &events, 14);

        assert!(!sequential.is_empty());
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_no_folds_or_rows() {
        let rows = series(1, 1..=10, |d| Some(d as f64));
        let mut models = all_baseline_models();
        assert!(run_backtest(&rows, &[], &mut models, &HashMap::new(), &HashSet::new(), 1).is_empty());

        let folds = vec![Fold::new(0, day(9), 9, 1).unwrap()];
        assert!(run_backtest(&[], &folds, &mut models, &HashMap::new(), &HashSet::new(), 1).is_empty());
    }
}
