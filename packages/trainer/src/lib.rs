pub mod app;
pub mod config;
pub mod logging;

pub use app::{run, AppError, RunSummary};
pub use config::{Config, ConfigError, Dataset, Mode};
