//! backtest-runner: walk-forward backtests of the baseline forecasters.
//!
//! Reads daily feature rows, archetype categories and event dates from the
//! forecaster database, evaluates every baseline model per horizon, stores the
//! prediction records and writes CSV/JSON summaries.
//!
//! Usage:
//!   cargo run -p backtest-runner -- run --start-date 2024-09-01 --end-date 2024-11-30
//!   cargo run -p backtest-runner -- run --start-date 2024-09-01 --end-date 2024-11-30 --dry-run
//!   cargo run -p backtest-runner -- report --realm area-52

mod args;
mod config;
mod source;
mod stage;
mod summary;

use anyhow::{Context, Result};
use backtest_engine::BacktestDb;

use args::{parse_args, Command, USAGE};
use config::BacktestSettings;

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "backtest_runner=info,backtest_engine=info".into())
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&argv) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("error: {e:#}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    let mut settings = BacktestSettings::from_env().context("invalid BACKTEST_* environment")?;

    match command {
        Command::Help => {
            println!("{USAGE}");
        }
        Command::Run(run) => {
            run.apply(&mut settings)?;
            tracing::info!(
                "backtest-runner: realm={} {} -> {} window={} step={} horizons={:?} db={} parallel={}",
                settings.realm_slug,
                run.start_date,
                run.end_date,
                settings.window_days,
                settings.step_days,
                settings.horizons,
                settings.db_path.display(),
                settings.parallel
            );

            if run.dry_run {
                stage::dry_run(&settings, run.start_date, run.end_date)?;
                return Ok(());
            }

            let outcomes = stage::run_stage(&settings, run.start_date, run.end_date).await?;
            let total: usize = outcomes.iter().map(|o| o.record_count).sum();
            tracing::info!(
                "Backtest complete: {} horizons, {} prediction records",
                outcomes.len(),
                total
            );
            for outcome in &outcomes {
                if let Some(dir) = &outcome.output_dir {
                    println!(
                        "horizon={}d folds={} records={} run_id={} -> {}",
                        outcome.horizon_days,
                        outcome.fold_count,
                        outcome.record_count,
                        outcome.backtest_run_id.unwrap_or_default(),
                        dir.display()
                    );
                }
            }
        }
        Command::Report(report) => {
            if let Some(db) = report.db {
                settings.db_path = db;
            }
            let db = BacktestDb::connect(&settings.database_url())
                .await
                .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
            summary::report(&db, report.realm.as_deref(), report.run_id, report.horizon).await?;
        }
    }

    Ok(())
}
