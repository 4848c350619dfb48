use std::process::ExitCode;

use dkvmn_trainer::config::Config;
use dkvmn_trainer::logging::{init_tracing, LogSettings};

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::from(2);
        }
    };

    let _log_guard = init_tracing(&LogSettings::from_env(&config.log_level));
    tracing::debug!(?config, "configuration");

    match dkvmn_trainer::run(&config) {
        Ok(summary) => {
            match serde_json::to_string(&summary) {
                Ok(json) => tracing::info!(summary = %json, "run complete"),
                Err(err) => tracing::warn!(error = %err, "cannot serialise run summary"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}
