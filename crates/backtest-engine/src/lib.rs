pub mod baselines;
pub mod db;
pub mod evaluator;
pub mod metrics;
pub mod models;
pub mod report;
pub mod slices;
pub mod splits;

pub use baselines::{all_baseline_models, BaselineModel};
pub use db::{BacktestDb, BacktestRunRecord};
pub use evaluator::{run_backtest, run_backtest_parallel};
pub use metrics::{compute_metrics, MAPE_EPSILON};
pub use models::*;
pub use splits::generate_walk_forward_splits;
