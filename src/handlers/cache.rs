use anyhow::Result;
use colored::*;
use std::collections::BTreeMap;
use std::time::Duration;
use scriptkit::Context;
use super::current_config;

pub fn handle_cache(clear: bool, forget: Option<String>) -> Result<()> {
    let store = current_config()?.store();
    let Some(file) = store.file() else {
        println!("{} Path persistence is disabled", "ℹ️".blue());
        return Ok(());
    };

    if clear {
        store.clear()?;
        println!("{} Cleared {}", "🧹".red(), file.display());
    }
    if let Some(name) = forget {
        if store.remove(&name)? {
            println!("{} Forgot {}", "🧹".red(), name.bold());
        } else {
            println!("{} '{}' was not cached", "⚠️".yellow(), name);
        }
    }

    println!("{} {}", "📦".green(), file.display().to_string().bold());
    print_table(&store.load()?);
    Ok(())
}

pub fn handle_warm() -> Result<()> {
    let ctx = Context::new(&current_config()?)?;
    let resolved = ctx.paths.warm_up();
    let table = ctx.paths.snapshot();
    ctx.shutdown(Duration::ZERO)?;

    println!("{} Resolved {} command(s)", "🔥".yellow(), resolved);
    print_table(&table);
    Ok(())
}

fn print_table(table: &BTreeMap<String, String>) {
    if table.is_empty() {
        println!("  {}", "(empty)".dimmed());
        return;
    }
    let width = table.keys().map(|k| k.len()).max().unwrap_or(0);
    for (name, path) in table {
        println!("  {}  {}", format!("{:width$}", name, width = width).cyan(), path);
    }
}
