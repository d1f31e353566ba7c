//! CSV and JSON export of one backtest run.
//!
//! Layout for a single realm, date range and horizon:
//!
//! ```text
//! <base>/backtest/<realm>_<start>_<end>/horizon_<N>d/
//!     summary.csv          metrics per (model, horizon)
//!     by_category.csv      metrics per category
//!     by_event_window.csv  event vs. non-event test dates
//!     per_prediction.csv   every prediction record
//!     manifest.json        run parameters and overall summary
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::compute_metrics;
use crate::models::{BacktestMetrics, PredictionRecord, RunParameters};
use crate::slices::{slice_by_category, slice_by_event_window, slice_by_model_and_horizon};

pub const MANIFEST_SCHEMA_VERSION: &str = "1.0";

pub const SUMMARY_CSV: &str = "summary.csv";
pub const BY_CATEGORY_CSV: &str = "by_category.csv";
pub const BY_EVENT_WINDOW_CSV: &str = "by_event_window.csv";
pub const PER_PREDICTION_CSV: &str = "per_prediction.csv";
pub const MANIFEST_JSON: &str = "manifest.json";

/// Four decimals, or an empty cell when absent.
fn fmt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.4}")).unwrap_or_default()
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<usize> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Run directory for one realm and date range. Dashes in the realm slug
/// become underscores.
pub fn make_output_dir(base_dir: &Path, realm_slug: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
    let slug = realm_slug.replace('-', "_");
    base_dir.join("backtest").join(format!("{slug}_{start}_{end}"))
}

pub fn horizon_dir(run_dir: &Path, horizon_days: u32) -> PathBuf {
    run_dir.join(format!("horizon_{horizon_days}d"))
}

// --- CSV ---

#[derive(Serialize)]
struct SummaryRow<'a> {
    model_name: &'a str,
    horizon_days: u32,
    n_predictions: usize,
    n_evaluated: usize,
    mae: String,
    rmse: String,
    mape: String,
    directional_accuracy: String,
    n_directional: usize,
    mean_actual: String,
    mean_predicted: String,
}

pub fn write_summary_csv(
    metrics_by_model_horizon: &BTreeMap<(String, u32), BacktestMetrics>,
    path: &Path,
) -> Result<()> {
    let rows = metrics_by_model_horizon
        .iter()
        .map(|((model_name, horizon_days), m)| SummaryRow {
            model_name,
            horizon_days: *horizon_days,
            n_predictions: m.n_predictions,
            n_evaluated: m.n_evaluated,
            mae: fmt(m.mae),
            rmse: fmt(m.rmse),
            mape: fmt(m.mape),
            directional_accuracy: fmt(m.directional_accuracy),
            n_directional: m.n_directional,
            mean_actual: fmt(m.mean_actual),
            mean_predicted: fmt(m.mean_predicted),
        });
    write_rows(path, rows)?;
    tracing::info!("Summary CSV written: {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct CategoryRow<'a> {
    category: &'a str,
    n_evaluated: usize,
    mae: String,
    rmse: String,
    mape: String,
    directional_accuracy: String,
}

pub fn write_by_category_csv(category_metrics: &BTreeMap<String, BacktestMetrics>, path: &Path) -> Result<()> {
    let rows = category_metrics.iter().map(|(category, m)| CategoryRow {
        category,
        n_evaluated: m.n_evaluated,
        mae: fmt(m.mae),
        rmse: fmt(m.rmse),
        mape: fmt(m.mape),
        directional_accuracy: fmt(m.directional_accuracy),
    });
    write_rows(path, rows)?;
    tracing::info!("By-category CSV written: {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct EventWindowRow<'a> {
    slice: &'a str,
    n_predictions: usize,
    n_evaluated: usize,
    mae: String,
    rmse: String,
    mape: String,
    directional_accuracy: String,
}

pub fn write_by_event_window_csv(event_metrics: &BTreeMap<String, BacktestMetrics>, path: &Path) -> Result<()> {
    let rows = event_metrics.iter().map(|(slice, m)| EventWindowRow {
        slice,
        n_predictions: m.n_predictions,
        n_evaluated: m.n_evaluated,
        mae: fmt(m.mae),
        rmse: fmt(m.rmse),
        mape: fmt(m.mape),
        directional_accuracy: fmt(m.directional_accuracy),
    });
    write_rows(path, rows)?;
    tracing::info!("By-event-window CSV written: {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct PredictionRow<'a> {
    fold_index: usize,
    archetype_id: i64,
    realm_slug: &'a str,
    category_tag: Option<&'a str>,
    model_name: &'a str,
    train_end: NaiveDate,
    test_date: NaiveDate,
    horizon_days: u32,
    actual_price: String,
    predicted_price: String,
    last_known_price: String,
    is_event_window: u8,
}

pub fn write_per_prediction_csv(records: &[PredictionRecord], path: &Path) -> Result<()> {
    let rows = records.iter().map(|r| PredictionRow {
        fold_index: r.fold_index,
        archetype_id: r.archetype_id,
        realm_slug: &r.realm_slug,
        category_tag: r.category_tag.as_deref(),
        model_name: &r.model_name,
        train_end: r.train_end,
        test_date: r.test_date,
        horizon_days: r.horizon_days,
        actual_price: fmt(r.actual_price),
        predicted_price: fmt(r.predicted_price),
        last_known_price: fmt(r.last_known_price),
        is_event_window: u8::from(r.is_event_window),
    });
    let count = write_rows(path, rows)?;
    tracing::info!("Per-prediction CSV written: {} ({} rows)", path.display(), count);
    Ok(())
}

// --- Manifest ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub n_predictions: usize,
    pub n_evaluated: usize,
    pub mae: Option<f64>,
    pub rmse: Option<f64>,
    pub mape: Option<f64>,
    pub directional_accuracy: Option<f64>,
}

impl From<&BacktestMetrics> for EvaluationSummary {
    fn from(m: &BacktestMetrics) -> Self {
        Self {
            n_predictions: m.n_predictions,
            n_evaluated: m.n_evaluated,
            mae: m.mae,
            rmse: m.rmse,
            mape: m.mape,
            directional_accuracy: m.directional_accuracy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputFiles {
    pub summary_csv: PathBuf,
    pub by_category_csv: PathBuf,
    pub by_event_window_csv: PathBuf,
    pub per_prediction_csv: PathBuf,
}

impl OutputFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            summary_csv: dir.join(SUMMARY_CSV),
            by_category_csv: dir.join(BY_CATEGORY_CSV),
            by_event_window_csv: dir.join(BY_EVENT_WINDOW_CSV),
            per_prediction_csv: dir.join(PER_PREDICTION_CSV),
        }
    }
}

/// Summary of one (realm, date range, horizon) backtest written next to its CSVs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestManifest {
    pub schema_version: String,
    pub built_at: DateTime<Utc>,
    /// Row id in `backtest_runs`, when the run was persisted.
    pub backtest_run_id: Option<i64>,
    pub realm_slug: String,
    pub date_range: DateRange,
    pub horizon_days: u32,
    pub fold_count: usize,
    pub model_names: Vec<String>,
    pub evaluation_summary: EvaluationSummary,
    pub output_files: OutputFiles,
    pub config_snapshot: serde_json::Value,
}

pub fn build_manifest(
    params: &RunParameters,
    backtest_run_id: Option<i64>,
    fold_count: usize,
    model_names: &[String],
    records: &[PredictionRecord],
    output_dir: &Path,
    config_snapshot: serde_json::Value,
) -> BacktestManifest {
    let overall = compute_metrics(records, None, Some(params.horizon_days), None);
    BacktestManifest {
        schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
        built_at: Utc::now(),
        backtest_run_id,
        realm_slug: params.realm_slug.clone(),
        date_range: DateRange {
            backtest_start: params.backtest_start,
            backtest_end: params.backtest_end,
        },
        horizon_days: params.horizon_days,
        fold_count,
        model_names: model_names.to_vec(),
        evaluation_summary: EvaluationSummary::from(&overall),
        output_files: OutputFiles::in_dir(output_dir),
        config_snapshot,
    }
}

pub fn write_manifest(manifest: &BacktestManifest, path: &Path) -> Result<()> {
    create_parent(path)?;
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Backtest manifest written: {}", path.display());
    Ok(())
}

/// Write every CSV and the manifest for one horizon. Returns the horizon
/// directory.
pub fn export_horizon(
    base_dir: &Path,
    params: &RunParameters,
    backtest_run_id: Option<i64>,
    fold_count: usize,
    model_names: &[String],
    records: &[PredictionRecord],
    config_snapshot: serde_json::Value,
) -> Result<PathBuf> {
    let run_dir = make_output_dir(
        base_dir,
        &params.realm_slug,
        params.backtest_start,
        params.backtest_end,
    );
    let dir = horizon_dir(&run_dir, params.horizon_days);
    let files = OutputFiles::in_dir(&dir);

    write_summary_csv(&slice_by_model_and_horizon(records), &files.summary_csv)?;
    write_by_category_csv(&slice_by_category(records), &files.by_category_csv)?;
    write_by_event_window_csv(&slice_by_event_window(records), &files.by_event_window_csv)?;
    write_per_prediction_csv(records, &files.per_prediction_csv)?;

    let manifest = build_manifest(
        params,
        backtest_run_id,
        fold_count,
        model_names,
        records,
        &dir,
        config_snapshot,
    );
    write_manifest(&manifest, &dir.join(MANIFEST_JSON))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    fn params() -> RunParameters {
        RunParameters {
            realm_slug: "area-52".to_string(),
            backtest_start: date(1),
            backtest_end: date(31),
            window_days: 14,
            step_days: 7,
            horizon_days: 1,
            min_train_rows: 7,
        }
    }

    fn record(model: &str, actual: Option<f64>, predicted: Option<f64>, category: Option<&str>) -> PredictionRecord {
        PredictionRecord {
            fold_index: 0,
            archetype_id: 42,
            realm_slug: "area-52".to_string(),
            category_tag: category.map(str::to_string),
            model_name: model.to_string(),
            train_end: date(14),
            test_date: date(15),
            horizon_days: 1,
            actual_price: actual,
            predicted_price: predicted,
            last_known_price: Some(100.0),
            is_event_window: false,
        }
    }

    #[test]
    fn test_make_output_dir() {
        let dir = make_output_dir(Path::new("out"), "area-52", date(1), date(31));
        assert_eq!(dir, Path::new("out/backtest/area_52_2024-10-01_2024-10-31"));
        assert_eq!(horizon_dir(&dir, 3), dir.join("horizon_3d"));
    }

    #[test]
    fn test_fmt() {
        assert_eq!(fmt(Some(1.0 / 3.0)), "0.3333");
        assert_eq!(fmt(Some(10.0)), "10.0000");
        assert_eq!(fmt(None), "");
    }

    #[test]
    fn test_summary_csv_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(SUMMARY_CSV);
        let records = vec![
            record("rolling_mean", Some(100.0), Some(90.0), None),
            record("last_value", Some(100.0), None, None),
        ];

        write_summary_csv(&slice_by_model_and_horizon(&records), &path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "model_name,horizon_days,n_predictions,n_evaluated,mae,rmse,mape,directional_accuracy,n_directional,mean_actual,mean_predicted"
        );
        assert_eq!(lines[1], "last_value,1,1,0,,,,,0,,");
        assert_eq!(
            lines[2],
            "rolling_mean,1,1,1,10.0000,10.0000,0.1000,,0,100.0000,90.0000"
        );
    }

    #[test]
    fn test_per_prediction_csv_round_trips_through_reader() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(PER_PREDICTION_CSV);
        let records = vec![
            record("last_value", Some(101.5), Some(100.0), Some("herb")),
            record("last_value", None, Some(100.0), None),
        ];

        write_per_prediction_csv(&records, &path).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 12);
        assert_eq!(&headers[10], "last_known_price");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][3], "herb");
        assert_eq!(&rows[0][8], "101.5000");
        assert_eq!(&rows[1][3], "");
        assert_eq!(&rows[1][8], "");
        assert_eq!(&rows[1][11], "0");
    }

    #[test]
    fn test_export_horizon_writes_all_files() {
        let tmp = TempDir::new().unwrap();
        let records = vec![
            record("last_value", Some(100.0), Some(90.0), Some("herb")),
            record("rolling_mean", Some(100.0), Some(110.0), None),
        ];
        let model_names = vec!["last_value".to_string(), "rolling_mean".to_string()];

        let dir = export_horizon(
            tmp.path(),
            &params(),
            Some(7),
            3,
            &model_names,
            &records,
            serde_json::json!({ "window_days": 14 }),
        )
        .unwrap();

        assert!(dir.ends_with("backtest/area_52_2024-10-01_2024-10-31/horizon_1d"));
        for name in [SUMMARY_CSV, BY_CATEGORY_CSV, BY_EVENT_WINDOW_CSV, PER_PREDICTION_CSV, MANIFEST_JSON] {
            assert!(dir.join(name).is_file(), "missing {name}");
        }

        let by_event = fs::read_to_string(dir.join(BY_EVENT_WINDOW_CSV)).unwrap();
        assert_eq!(by_event.lines().count(), 2);
        assert!(by_event.lines().nth(1).unwrap().starts_with("non_event_window,2,2,"));

        let manifest: BacktestManifest =
            serde_json::from_str(&fs::read_to_string(dir.join(MANIFEST_JSON)).unwrap()).unwrap();
        assert_eq!(manifest.schema_version, MANIFEST_SCHEMA_VERSION);
        assert_eq!(manifest.backtest_run_id, Some(7));
        assert_eq!(manifest.fold_count, 3);
        assert_eq!(manifest.model_names, model_names);
        assert_eq!(manifest.evaluation_summary.n_evaluated, 2);
        assert_eq!(manifest.evaluation_summary.mae, Some(10.0));
        assert_eq!(manifest.output_files.summary_csv, dir.join(SUMMARY_CSV));
        assert_eq!(manifest.config_snapshot["window_days"], 14);
    }
}
