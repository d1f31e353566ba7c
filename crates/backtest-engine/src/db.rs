use std::str::FromStr;

use anyhow::Result;
use chrono::NaiveDate;
use forecast_core::ForecastError;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::models::{PredictionRecord, RunParameters};

/// A stored `backtest_runs` row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestRunRecord {
    pub backtest_run_id: i64,
    pub realm_slug: String,
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    pub window_days: u32,
    pub step_days: u32,
    pub horizon_days: u32,
    pub fold_count: usize,
    pub models: Vec<String>,
    pub config_snapshot: serde_json::Value,
    pub created_at: String,
}

/// Persists backtest runs and their prediction records to SQLite.
#[derive(Clone)]
pub struct BacktestDb {
    pool: SqlitePool,
}

impl BacktestDb {
    /// Open (creating if missing) the database at `database_url` and make
    /// sure the backtest tables exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty
        // database, so those get exactly one long-lived connection.
        let in_memory = database_url.contains(":memory:");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the backtest tables if they don't exist.
    pub async fn init_schema(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");

        // sqlx runs one statement per query
        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a `backtest_runs` row and return its id.
    pub async fn save_run(
        &self,
        params: &RunParameters,
        fold_count: usize,
        model_names: &[String],
        config_snapshot: &serde_json::Value,
    ) -> Result<i64> {
        let (backtest_run_id,): (i64,) = sqlx::query_as(
            "INSERT INTO backtest_runs (
                realm_slug, backtest_start, backtest_end,
                window_days, step_days, horizon_days, fold_count,
                models, config_snapshot
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING backtest_run_id",
        )
        .bind(&params.realm_slug)
        .bind(params.backtest_start.to_string())
        .bind(params.backtest_end.to_string())
        .bind(params.window_days)
        .bind(params.step_days)
        .bind(params.horizon_days)
        .bind(i64::try_from(fold_count)?)
        .bind(serde_json::to_string(model_names)?)
        .bind(serde_json::to_string(config_snapshot)?)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            "Saved backtest run {} (realm={}, h={}d, folds={})",
            backtest_run_id,
            params.realm_slug,
            params.horizon_days,
            fold_count
        );
        Ok(backtest_run_id)
    }

    /// Bulk-insert prediction records for a run in one transaction.
    ///
    /// Error and direction columns are derived from each record on the way in.
    pub async fn save_prediction_records(
        &self,
        backtest_run_id: i64,
        records: &[PredictionRecord],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for r in records {
            sqlx::query(
                "INSERT INTO backtest_fold_results (
                    backtest_run_id, fold_index, train_end, test_date, horizon_days,
                    archetype_id, realm_slug, category_tag, model_name,
                    actual_price, predicted_price, last_known_price,
                    abs_error, pct_error,
                    direction_actual, direction_predicted, direction_correct,
                    is_event_window
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(backtest_run_id)
            .bind(i64::try_from(r.fold_index)?)
            .bind(r.train_end.to_string())
            .bind(r.test_date.to_string())
            .bind(r.horizon_days)
            .bind(r.archetype_id)
            .bind(&r.realm_slug)
            .bind(&r.category_tag)
            .bind(&r.model_name)
            .bind(r.actual_price)
            .bind(r.predicted_price)
            .bind(r.last_known_price)
            .bind(r.abs_error())
            .bind(r.pct_error())
            .bind(r.direction_actual())
            .bind(r.direction_predicted())
            .bind(r.direction_correct())
            .bind(r.is_event_window)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            "Saved {} prediction records for backtest run {}",
            records.len(),
            backtest_run_id
        );
        Ok(records.len())
    }

    pub async fn get_run(&self, backtest_run_id: i64) -> Result<Option<BacktestRunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT backtest_run_id, realm_slug, backtest_start, backtest_end,
                    window_days, step_days, horizon_days, fold_count,
                    models, config_snapshot, created_at
             FROM backtest_runs WHERE backtest_run_id = ?",
        )
        .bind(backtest_run_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_record).transpose()
    }

    /// Most recently saved run, optionally restricted to one realm.
    pub async fn latest_run(&self, realm_slug: Option<&str>) -> Result<Option<BacktestRunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT backtest_run_id, realm_slug, backtest_start, backtest_end,
                    window_days, step_days, horizon_days, fold_count,
                    models, config_snapshot, created_at
             FROM backtest_runs
             WHERE (?1 IS NULL OR realm_slug = ?1)
             ORDER BY backtest_run_id DESC LIMIT 1",
        )
        .bind(realm_slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RunRow::into_record).transpose()
    }

    /// Reload the prediction records of a run in insertion order.
    pub async fn load_prediction_records(
        &self,
        backtest_run_id: i64,
        horizon_days: Option<u32>,
    ) -> Result<Vec<PredictionRecord>> {
        let rows = sqlx::query_as::<_, FoldResultRow>(
            "SELECT fold_index, archetype_id, realm_slug, category_tag, model_name,
                    train_end, test_date, horizon_days,
                    actual_price, predicted_price, last_known_price, is_event_window
             FROM backtest_fold_results
             WHERE backtest_run_id = ?1 AND (?2 IS NULL OR horizon_days = ?2)
             ORDER BY result_id",
        )
        .bind(backtest_run_id)
        .bind(horizon_days)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.into_record().map_err(anyhow::Error::from))
            .collect()
    }
}

fn parse_date(column: &str, value: &str) -> forecast_core::Result<NaiveDate> {
    value.parse().map_err(|e| {
        ForecastError::InvalidData(format!("{column}: cannot parse date {value:?}: {e}"))
    })
}

fn non_negative<T: TryFrom<i64>>(column: &str, value: i64) -> forecast_core::Result<T> {
    T::try_from(value)
        .map_err(|_| ForecastError::InvalidData(format!("{column}: {value} is out of range")))
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct RunRow {
    backtest_run_id: i64,
    realm_slug: String,
    backtest_start: String,
    backtest_end: String,
    window_days: i64,
    step_days: i64,
    horizon_days: i64,
    fold_count: i64,
    models: String,
    config_snapshot: String,
    created_at: String,
}

impl RunRow {
    fn into_record(self) -> Result<BacktestRunRecord> {
        Ok(BacktestRunRecord {
            backtest_run_id: self.backtest_run_id,
            backtest_start: parse_date("backtest_start", &self.backtest_start)?,
            backtest_end: parse_date("backtest_end", &self.backtest_end)?,
            realm_slug: self.realm_slug,
            window_days: non_negative("window_days", self.window_days)?,
            step_days: non_negative("step_days", self.step_days)?,
            horizon_days: non_negative("horizon_days", self.horizon_days)?,
            fold_count: non_negative("fold_count", self.fold_count)?,
            models: serde_json::from_str(&self.models)?,
            config_snapshot: serde_json::from_str(&self.config_snapshot)?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FoldResultRow {
    fold_index: i64,
    archetype_id: i64,
    realm_slug: String,
    category_tag: Option<String>,
    model_name: String,
    train_end: String,
    test_date: String,
    horizon_days: i64,
    actual_price: Option<f64>,
    predicted_price: Option<f64>,
    last_known_price: Option<f64>,
    is_event_window: bool,
}

impl FoldResultRow {
    fn into_record(self) -> forecast_core::Result<PredictionRecord> {
        Ok(PredictionRecord {
            fold_index: non_negative("fold_index", self.fold_index)?,
            archetype_id: self.archetype_id,
            realm_slug: self.realm_slug,
            category_tag: self.category_tag,
            model_name: self.model_name,
            train_end: parse_date("train_end", &self.train_end)?,
            test_date: parse_date("test_date", &self.test_date)?,
            horizon_days: non_negative("horizon_days", self.horizon_days)?,
            actual_price: self.actual_price,
            predicted_price: self.predicted_price,
            last_known_price: self.last_known_price,
            is_event_window: self.is_event_window,
        })
    }
}
