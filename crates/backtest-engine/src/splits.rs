use chrono::{Days, NaiveDate};
use forecast_core::{ensure_positive, Result};

use crate::models::Fold;

/// Generate rolling-origin walk-forward folds.
///
/// The first origin (`train_end`) is `start_date + window_days - 1`; each fold
/// predicts `origin + horizon_days`, and the origin advances by `step_days`
/// until the test date would pass `end_date`. The training window keeps a
/// fixed size rather than expanding from `start_date`.
///
/// Returns an empty list when `end_date <= start_date` or when the range
/// cannot hold one full window plus its horizon. A zero day count is an
/// `InvalidParameter` error.
pub fn generate_walk_forward_splits(
    start_date: NaiveDate,
    end_date: NaiveDate,
    window_days: u32,
    step_days: u32,
    horizon_days: u32,
) -> Result<Vec<Fold>> {
    ensure_positive("window_days", window_days)?;
    ensure_positive("step_days", step_days)?;
    ensure_positive("horizon_days", horizon_days)?;

    let mut folds = Vec::new();
    if end_date <= start_date {
        return Ok(folds);
    }

    let Some(mut origin) = start_date.checked_add_days(Days::new(u64::from(window_days - 1)))
    else {
        return Ok(folds);
    };

    loop {
        // Past the representable calendar counts as past end_date.
        let Some(test_date) = origin.checked_add_days(Days::new(u64::from(horizon_days))) else {
            break;
        };
        if test_date > end_date {
            break;
        }

        folds.push(Fold::new(folds.len(), origin, window_days, horizon_days)?);

        origin = match origin.checked_add_days(Days::new(u64::from(step_days))) {
            Some(next) => next,
            None => break,
        };
    }

    Ok(folds)
}
