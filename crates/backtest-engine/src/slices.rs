//! Group prediction records and compute metrics per group.
//!
//! Every slicer returns a `BTreeMap` so reports iterate in a stable order.

use std::collections::BTreeMap;

use crate::metrics::compute_metrics;
use crate::models::{BacktestMetrics, PredictionRecord};

pub const UNKNOWN_CATEGORY: &str = "unknown";
pub const EVENT_WINDOW: &str = "event_window";
pub const NON_EVENT_WINDOW: &str = "non_event_window";

fn group_by<'a, K: Ord>(
    records: &'a [PredictionRecord],
    key: impl Fn(&PredictionRecord) -> K,
) -> BTreeMap<K, Vec<&'a PredictionRecord>> {
    let mut groups: BTreeMap<K, Vec<&PredictionRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(key(record)).or_default().push(record);
    }
    groups
}

pub fn slice_by_model(records: &[PredictionRecord]) -> BTreeMap<String, BacktestMetrics> {
    group_by(records, |r| r.model_name.clone())
        .into_iter()
        .map(|(model, group)| {
            let metrics = compute_metrics(group, Some(&model), None, Some(&model));
            (model, metrics)
        })
        .collect()
}

/// Keyed by `(model_name, horizon_days)`; the slice key reads `"<model>_<h>d"`.
pub fn slice_by_model_and_horizon(
    records: &[PredictionRecord],
) -> BTreeMap<(String, u32), BacktestMetrics> {
    group_by(records, |r| (r.model_name.clone(), r.horizon_days))
        .into_iter()
        .map(|((model, horizon), group)| {
            let slice_key = format!("{model}_{horizon}d");
            let metrics = compute_metrics(group, Some(&model), Some(horizon), Some(&slice_key));
            ((model, horizon), metrics)
        })
        .collect()
}

/// Records without a category land in the `"unknown"` bucket.
pub fn slice_by_category(records: &[PredictionRecord]) -> BTreeMap<String, BacktestMetrics> {
    group_by(records, |r| {
        r.category_tag
            .clone()
            .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string())
    })
    .into_iter()
    .map(|(category, group)| {
        let metrics = compute_metrics(group, None, None, Some(&category));
        (category, metrics)
    })
    .collect()
}

pub fn slice_by_archetype(records: &[PredictionRecord]) -> BTreeMap<i64, BacktestMetrics> {
    group_by(records, |r| r.archetype_id)
        .into_iter()
        .map(|(archetype_id, group)| {
            let slice_key = archetype_id.to_string();
            (archetype_id, compute_metrics(group, None, None, Some(&slice_key)))
        })
        .collect()
}

/// Split into `"event_window"` and `"non_event_window"`.
///
/// A bucket with no records is left out of the result.
pub fn slice_by_event_window(records: &[PredictionRecord]) -> BTreeMap<String, BacktestMetrics> {
    group_by(records, |r| r.is_event_window)
        .into_iter()
        .map(|(in_event, group)| {
            let label = if in_event { EVENT_WINDOW } else { NON_EVENT_WINDOW };
            (label.to_string(), compute_metrics(group, None, None, Some(label)))
        })
        .collect()
}
