use crate::FeatureRow;

/// Point-forecast model evaluated by the walk-forward backtester.
///
/// `fit` receives the training rows of exactly one series, sorted ascending
/// by `obs_date`, and must discard every piece of state from a previous fit.
/// `predict` forecasts `horizon_days` past the last training date and returns
/// `None` when the model abstains (insufficient training data).
pub trait ForecastModel {
    fn name(&self) -> &str;

    fn fit(&mut self, rows: &[FeatureRow]);

    fn predict(&self, horizon_days: u32) -> Option<f64>;
}

impl<M: ForecastModel + ?Sized> ForecastModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fit(&mut self, rows: &[FeatureRow]) {
        (**self).fit(rows)
    }

    fn predict(&self, horizon_days: u32) -> Option<f64> {
        (**self).predict(horizon_days)
    }
}
