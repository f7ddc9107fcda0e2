use anyhow::{Result, bail};
use colored::*;
use std::time::Duration;
use super::open_context;

pub fn handle_which(name: &str) -> Result<()> {
    let ctx = open_context()?;
    let found = ctx.paths.resolve(name);
    ctx.shutdown(Duration::ZERO)?;

    match found {
        Some(path) => {
            println!("{} {} {}", name.bold(), "->".dimmed(), path.green());
            Ok(())
        }
        None => bail!("Command '{}' not found", name),
    }
}
