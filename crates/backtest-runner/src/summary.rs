//! The `report` command: print the stored results of a backtest run.

use std::fmt::Write;

use anyhow::{bail, Result};
use backtest_engine::slices::{slice_by_event_window, slice_by_model_and_horizon};
use backtest_engine::{BacktestDb, BacktestRunRecord, PredictionRecord};

/// Pick the run to report: an explicit id, else the latest run for the
/// realm, else the latest run overall.
pub async fn locate_run(
    db: &BacktestDb,
    realm_slug: Option<&str>,
    run_id: Option<i64>,
) -> Result<BacktestRunRecord> {
    if let Some(id) = run_id {
        return match db.get_run(id).await? {
            Some(run) => Ok(run),
            None => bail!("backtest run {id} not found"),
        };
    }
    if let Some(realm) = realm_slug {
        if let Some(run) = db.latest_run(Some(realm)).await? {
            return Ok(run);
        }
        tracing::warn!("No backtest runs for realm={}, falling back to the latest run", realm);
    }
    match db.latest_run(None).await? {
        Some(run) => Ok(run),
        None => bail!("No backtest runs found. Run `backtest-runner run` first."),
    }
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{v:.decimals$}"),
        None => "n/a".to_string(),
    }
}

/// Render run metadata, per-(model, horizon) metrics and the event split.
pub fn render_report(run: &BacktestRunRecord, records: &[PredictionRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Backtest run {} | realm={} | {} -> {} | window={}d step={}d horizon={}d | folds={} | created {}",
        run.backtest_run_id,
        run.realm_slug,
        run.backtest_start,
        run.backtest_end,
        run.window_days,
        run.step_days,
        run.horizon_days,
        run.fold_count,
        run.created_at
    );
    let _ = writeln!(out, "Models: {}", run.models.join(", "));

    if records.is_empty() {
        let _ = writeln!(out, "No prediction records (insufficient data).");
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<20} {:>3} {:>6} {:>6} {:>10} {:>10} {:>8} {:>8}",
        "model", "h", "n", "n_eval", "mae", "rmse", "mape", "dir_acc"
    );
    for ((model, horizon), m) in slice_by_model_and_horizon(records) {
        let _ = writeln!(
            out,
            "{:<20} {:>3} {:>6} {:>6} {:>10} {:>10} {:>8} {:>8}",
            model,
            horizon,
            m.n_predictions,
            m.n_evaluated,
            fmt_opt(m.mae, 4),
            fmt_opt(m.rmse, 4),
            fmt_opt(m.mape, 4),
            fmt_opt(m.directional_accuracy, 3)
        );
    }

    let _ = writeln!(out);
    for m in slice_by_event_window(records).values() {
        let _ = writeln!(out, "{m}");
    }
    out
}

/// Locate a run, reload its records and print the report.
pub async fn report(
    db: &BacktestDb,
    realm_slug: Option<&str>,
    run_id: Option<i64>,
    horizon_days: Option<u32>,
) -> Result<()> {
    let run = locate_run(db, realm_slug, run_id).await?;
    let records = db.load_prediction_records(run.backtest_run_id, horizon_days).await?;
    print!("{}", render_report(&run, &records));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtest_engine::RunParameters;
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, d).unwrap()
    }

    fn params(realm: &str) -> RunParameters {
        RunParameters {
            realm_slug: realm.to_string(),
            backtest_start: date(1),
            backtest_end: date(31),
            window_days: 14,
            step_days: 7,
            horizon_days: 1,
            min_train_rows: 7,
        }
    }

    fn record(model: &str, event: bool) -> PredictionRecord {
        PredictionRecord {
            fold_index: 0,
            archetype_id: 1,
            realm_slug: "area-52".to_string(),
            category_tag: None,
            model_name: model.to_string(),
            train_end: date(14),
            test_date: date(15),
            horizon_days: 1,
            actual_price: Some(110.0),
            predicted_price: Some(105.0),
            last_known_price: Some(100.0),
            is_event_window: event,
        }
    }

    async fn db_with_runs() -> (BacktestDb, i64, i64) {
        let db = BacktestDb::connect("sqlite::memory:").await.unwrap();
        let names = vec!["last_value".to_string()];
        let snapshot = serde_json::json!({});
        let a = db.save_run(&params("area-52"), 1, &names, &snapshot).await.unwrap();
        let b = db.save_run(&params("illidan"), 1, &names, &snapshot).await.unwrap();
        (db, a, b)
    }

    #[tokio::test]
    async fn test_locate_run() {
        let (db, a, b) = db_with_runs().await;

        assert_eq!(locate_run(&db, None, Some(a)).await.unwrap().backtest_run_id, a);
        assert_eq!(locate_run(&db, Some("area-52"), None).await.unwrap().backtest_run_id, a);
        assert_eq!(locate_run(&db, None, None).await.unwrap().backtest_run_id, b);
        // Unknown realm falls back to the latest run overall.
        assert_eq!(locate_run(&db, Some("stormrage"), None).await.unwrap().backtest_run_id, b);
        assert!(locate_run(&db, None, Some(b + 10)).await.is_err());
    }

    #[tokio::test]
    async fn test_no_runs_is_an_error() {
        let db = BacktestDb::connect("sqlite::memory:").await.unwrap();
        let err = locate_run(&db, None, None).await.unwrap_err();
        assert!(err.to_string().contains("No backtest runs"));
    }

    #[tokio::test]
    async fn test_render_report() {
        let (db, a, _) = db_with_runs().await;
        let run = db.get_run(a).await.unwrap().unwrap();
        let records = vec![record("last_value", false), record("rolling_mean", true)];

        let text = render_report(&run, &records);

        assert!(text.starts_with(&format!("Backtest run {a} | realm=area-52")));
        assert!(text.contains("Models: last_value"));
        assert!(text.contains("5.0000"));
        assert!(text.contains("event_window: n=1/1"));
        assert!(text.contains("non_event_window: n=1/1"));

        let empty = render_report(&run, &[]);
        assert!(empty.contains("insufficient data"));
    }
}
