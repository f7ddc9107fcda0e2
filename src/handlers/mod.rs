pub mod cache;
pub mod run;
pub mod which;

use anyhow::Result;
use std::env;
use scriptkit::config::{load_config, Config};
use scriptkit::Context;

/// Config of the current directory. Warm-up is left to `sk warm`.
pub fn current_config() -> Result<Config> {
    let current_dir = env::current_dir()?;
    let mut config = load_config(&current_dir)?;
    config.cache.warm_up = false;
    Ok(config)
}

pub fn open_context() -> Result<Context> {
    Context::new(&current_config()?)
}
