#![cfg(not(tarpaulin_include))]

use std::env;
use worklist::app;
use worklist::config::Config;

/// Main entry point for the web application
///
/// Reads configuration from the environment (and `.env`), then serves the
/// upload UI until the process is stopped.
///
/// # Arguments
/// * First command line argument, if given, overrides the listen address
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::from_env();
    if let Some(bind) = env::args().nth(1) {
        config.bind = bind;
    }

    app::run(config).await
}
