//! The `run` command: backtest one realm over every configured horizon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use backtest_engine::report::export_horizon;
use backtest_engine::{
    all_baseline_models, generate_walk_forward_splits, run_backtest, run_backtest_parallel,
    BacktestDb, RunParameters,
};
use chrono::NaiveDate;
use forecast_core::ForecastModel;

use crate::config::BacktestSettings;
use crate::source::{load_categories, load_event_dates, load_feature_rows};

/// What one horizon produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonOutcome {
    pub horizon_days: u32,
    pub fold_count: usize,
    pub record_count: usize,
    pub backtest_run_id: Option<i64>,
    pub output_dir: Option<PathBuf>,
}

fn model_names() -> Vec<String> {
    all_baseline_models()
        .iter()
        .map(|m| m.name().to_string())
        .collect()
}

/// Fold counts per horizon, without opening the database.
pub fn dry_run(settings: &BacktestSettings, start: NaiveDate, end: NaiveDate) -> Result<Vec<HorizonOutcome>> {
    let names = model_names();
    let mut outcomes = Vec::new();
    for &h in &settings.horizons {
        let folds = generate_walk_forward_splits(start, end, settings.window_days, settings.step_days, h)?;
        println!(
            "[dry-run] realm={} horizon={}d folds={} models={}",
            settings.realm_slug,
            h,
            folds.len(),
            names.join(",")
        );
        outcomes.push(HorizonOutcome {
            horizon_days: h,
            fold_count: folds.len(),
            record_count: 0,
            backtest_run_id: None,
            output_dir: None,
        });
    }
    Ok(outcomes)
}

/// Evaluate, persist and export every horizon for one realm.
///
/// Horizons without folds are skipped with a warning. A realm without
/// feature rows produces no outcomes.
pub async fn run_stage(
    settings: &BacktestSettings,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<HorizonOutcome>> {
    if let Some(parent) = settings.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = BacktestDb::connect(&settings.database_url())
        .await
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;

    let events = load_event_dates(db.pool()).await?;
    let categories = load_categories(db.pool()).await?;
    let rows = load_feature_rows(db.pool(), &settings.realm_slug, start, end).await?;
    if rows.is_empty() {
        tracing::warn!(
            "No feature rows found for realm={} {} -> {}",
            settings.realm_slug,
            start,
            end
        );
        return Ok(Vec::new());
    }

    let names = model_names();
    let snapshot = settings.snapshot();
    let mut outcomes = Vec::new();

    for &h in &settings.horizons {
        let folds = generate_walk_forward_splits(start, end, settings.window_days, settings.step_days, h)?;
        if folds.is_empty() {
            tracing::warn!(
                "No folds for horizon={}d window={} step={} range={} -> {}",
                h,
                settings.window_days,
                settings.step_days,
                start,
                end
            );
            continue;
        }

        let records = if settings.parallel {
            run_backtest_parallel(
                &rows,
                &folds,
                all_baseline_models,
                &categories,
                &events,
                settings.min_train_rows,
            )
        } else {
            let mut models = all_baseline_models();
            run_backtest(
                &rows,
                &folds,
                &mut models,
                &categories,
                &events,
                settings.min_train_rows,
            )
        };

        let params = RunParameters {
            realm_slug: settings.realm_slug.clone(),
            backtest_start: start,
            backtest_end: end,
            window_days: settings.window_days,
            step_days: settings.step_days,
            horizon_days: h,
            min_train_rows: settings.min_train_rows,
        };
        let run_id = db.save_run(&params, folds.len(), &names, &snapshot).await?;
        db.save_prediction_records(run_id, &records).await?;

        let dir = export_horizon(
            &settings.output_dir,
            &params,
            Some(run_id),
            folds.len(),
            &names,
            &records,
            snapshot.clone(),
        )?;

        tracing::info!(
            "Backtest horizon={}d done | folds={} | records={} | realm={}",
            h,
            folds.len(),
            records.len(),
            settings.realm_slug
        );
        outcomes.push(HorizonOutcome {
            horizon_days: h,
            fold_count: folds.len(),
            record_count: records.len(),
            backtest_run_id: Some(run_id),
            output_dir: Some(dir),
        });
    }

    Ok(outcomes)
}
