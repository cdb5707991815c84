pub mod error;
mod tooling;

pub use error::{ProvisionStage, ToolingError};
pub use tooling::*;

use std::io;

fn load_runtime_settings() -> RuntimeSettings {
    let Some(path) = settings_file_path() else {
        return RuntimeSettings::default();
    };
    match load_settings(&path) {
        Ok(settings) => settings,
        Err(error) => {
            log::warn!("Ignoring settings at {}: {error}", path.display());
            RuntimeSettings::default()
        }
    }
}

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let settings = load_runtime_settings();
    let mut locator = BinaryLocator::from_settings(&settings);
    let stdin = io::stdin();
    let result = run_session(&mut locator, &settings, stdin.lock(), io::stdout());

    if let Err(error) = result {
        log::debug!("Session ended with error: {error:?}");
        if let Err(write_error) = report_error(&mut io::stdout(), &error) {
            log::error!("Failed to report error: {write_error}");
        }
    }
}
