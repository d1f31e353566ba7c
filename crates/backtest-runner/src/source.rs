//! Loading the feature pipeline's outputs from SQLite.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{Days, NaiveDate};
use forecast_core::{FeatureRow, ForecastError, SeriesKey};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool};

/// Columns read into `FeatureRow` fields rather than `aux`.
const CORE_COLUMNS: [&str; 4] = ["archetype_id", "realm_slug", "obs_date", "price_mean"];

/// A numeric cell, whether stored as REAL or INTEGER. Text and NULL give `None`.
fn numeric(row: &SqliteRow, index: usize) -> Option<f64> {
    row.try_get::<Option<f64>, _>(index)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<i64>, _>(index)
                .ok()
                .flatten()
                .map(|v| v as f64)
        })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    value.trim().parse().ok()
}

/// Feature rows for one realm with `start <= obs_date <= end`, ordered by
/// series then date.
pub async fn load_feature_rows(
    pool: &SqlitePool,
    realm_slug: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<FeatureRow>> {
    let rows = sqlx::query(
        "SELECT * FROM daily_features
         WHERE realm_slug = ? AND obs_date >= ? AND obs_date <= ?
         ORDER BY archetype_id, obs_date",
    )
    .bind(realm_slug)
    .bind(start.to_string())
    .bind(end.to_string())
    .fetch_all(pool)
    .await?;

    let mut features = Vec::with_capacity(rows.len());
    for row in &rows {
        let archetype_id: i64 = row.try_get("archetype_id")?;
        let realm: String = row.try_get("realm_slug")?;
        let obs_date: String = row.try_get("obs_date")?;
        let obs_date = parse_date(&obs_date).ok_or_else(|| {
            ForecastError::InvalidData(format!(
                "daily_features: bad obs_date {obs_date:?} for archetype {archetype_id}"
            ))
        })?;
        let price_index = row.try_column("price_mean")?.ordinal();

        let mut feature = FeatureRow::new(
            SeriesKey::new(archetype_id, realm),
            obs_date,
            numeric(row, price_index),
        );
        for column in row.columns() {
            if CORE_COLUMNS.contains(&column.name()) {
                continue;
            }
            if let Some(value) = numeric(row, column.ordinal()) {
                feature.aux.insert(column.name().to_string(), value);
            }
        }
        features.push(feature);
    }

    tracing::info!(
        "Loaded {} feature rows for realm={} [{}..{}]",
        features.len(),
        realm_slug,
        start,
        end
    );
    Ok(features)
}

/// Archetype id to category label.
pub async fn load_categories(pool: &SqlitePool) -> Result<HashMap<i64, String>> {
    let rows: Vec<(i64, Option<String>)> =
        sqlx::query_as("SELECT archetype_id, category_tag FROM economic_archetypes")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, tag)| tag.map(|t| (id, t)))
        .collect())
}

/// Every calendar date on which at least one event is active.
///
/// An event without an end date covers its start date only. Rows whose dates
/// don't parse, or that end before they start, are skipped.
pub async fn load_event_dates(pool: &SqlitePool) -> Result<HashSet<NaiveDate>> {
    let rows: Vec<(Option<String>, Option<String>)> =
        sqlx::query_as("SELECT start_date, end_date FROM wow_events WHERE start_date IS NOT NULL")
            .fetch_all(pool)
            .await?;

    let mut dates = HashSet::new();
    let mut skipped = 0usize;
    for (start, end) in rows {
        let Some(start) = start.as_deref().and_then(parse_date) else {
            skipped += 1;
            continue;
        };
        let end = match end.as_deref().filter(|s| !s.trim().is_empty()) {
            None => start,
            Some(raw) => match parse_date(raw) {
                Some(end) => end,
                None => {
                    skipped += 1;
                    continue;
                }
            },
        };

        let mut day = start;
        while day <= end {
            dates.insert(day);
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} events with unparsable dates", skipped);
    }
    Ok(dates)
}
