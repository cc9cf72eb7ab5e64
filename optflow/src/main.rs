mod supervisor;

use std::process;

use core_types::config::AppConfig;
use thiserror::Error;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("optflow failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(supervisor::run(config))
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Storage(#[from] storage::StorageError),
    #[error(transparent)]
    Farm(#[from] ws_farm::FarmError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
