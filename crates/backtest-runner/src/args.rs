//! Command-line parsing.
//!
//! Flags are looked up by position, the same way for both subcommands:
//! `--flag value` pairs plus bare boolean switches.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;

use crate::config::{parse_horizons, BacktestSettings};

pub const USAGE: &str = "\
Usage:
  backtest-runner run --start-date YYYY-MM-DD --end-date YYYY-MM-DD [options]
  backtest-runner report [options]

Run options:
  --realm SLUG         Realm to evaluate (default: BACKTEST_REALM or area-52)
  --window-days N      Training window in days (default: 30)
  --step-days N        Days between fold origins (default: 7)
  --horizons 1,3       Comma-separated forecast horizons in days
  --db PATH            SQLite database path
  --output-dir DIR     Base directory for CSV/JSON exports
  --parallel           Evaluate series in parallel
  --dry-run            Print fold counts without touching the database

Report options:
  --realm SLUG         Show the latest run for this realm
  --run-id N           Show a specific run
  --horizon N          Only include records for this horizon
  --db PATH            SQLite database path";

#[derive(Debug, Clone, PartialEq)]
pub struct RunArgs {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub realm: Option<String>,
    pub window_days: Option<u32>,
    pub step_days: Option<u32>,
    pub horizons: Option<Vec<u32>>,
    pub db: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub parallel: bool,
    pub dry_run: bool,
}

impl RunArgs {
    /// Overlay the flags that were given onto `settings`, then re-validate.
    pub fn apply(&self, settings: &mut BacktestSettings) -> Result<()> {
        if let Some(realm) = &self.realm {
            settings.realm_slug = realm.clone();
        }
        if let Some(window_days) = self.window_days {
            settings.window_days = window_days;
        }
        if let Some(step_days) = self.step_days {
            settings.step_days = step_days;
        }
        if let Some(horizons) = &self.horizons {
            settings.horizons = horizons.clone();
        }
        if let Some(db) = &self.db {
            settings.db_path = db.clone();
        }
        if let Some(output_dir) = &self.output_dir {
            settings.output_dir = output_dir.clone();
        }
        settings.parallel |= self.parallel;
        settings.validate()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportArgs {
    pub realm: Option<String>,
    pub run_id: Option<i64>,
    pub horizon: Option<u32>,
    pub db: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Run(RunArgs),
    Report(ReportArgs),
    Help,
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        None => Ok(None),
        Some(i) => match args.get(i + 1) {
            Some(v) if !v.starts_with("--") => Ok(Some(v.as_str())),
            _ => bail!("{flag} requires a value"),
        },
    }
}

fn parsed<T>(args: &[String], flag: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    flag_value(args, flag)?
        .map(|v| v.parse::<T>().with_context(|| format!("invalid value for {flag}: {v:?}")))
        .transpose()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn required_date(args: &[String], flag: &str) -> Result<NaiveDate> {
    parsed::<NaiveDate>(args, flag)?.with_context(|| format!("{flag} is required"))
}

/// Parse the arguments that follow the program name.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some(subcommand) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    match subcommand.as_str() {
        "run" => {
            let start_date = required_date(rest, "--start-date")?;
            let end_date = required_date(rest, "--end-date")?;
            if end_date <= start_date {
                bail!("--end-date ({end_date}) must be after --start-date ({start_date})");
            }
            Ok(Command::Run(RunArgs {
                start_date,
                end_date,
                realm: flag_value(rest, "--realm")?.map(str::to_string),
                window_days: parsed(rest, "--window-days")?,
                step_days: parsed(rest, "--step-days")?,
                horizons: flag_value(rest, "--horizons")?
                    .map(parse_horizons)
                    .transpose()?,
                db: flag_value(rest, "--db")?.map(PathBuf::from),
                output_dir: flag_value(rest, "--output-dir")?.map(PathBuf::from),
                parallel: has_flag(rest, "--parallel"),
                dry_run: has_flag(rest, "--dry-run"),
            }))
        }
        "report" => Ok(Command::Report(ReportArgs {
            realm: flag_value(rest, "--realm")?.map(str::to_string),
            run_id: parsed(rest, "--run-id")?,
            horizon: parsed(rest, "--horizon")?,
            db: flag_value(rest, "--db")?.map(PathBuf::from),
        })),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => bail!("unknown command {other:?}"),
    }
}
