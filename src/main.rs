mod cli;
mod handlers;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use handlers::{cache, run, which};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { program, args, shell, elevated, quiet, input, env, env_file, timeout } => {
            run::handle_run(run::RunOptions { program, args, shell, elevated, quiet, input, env, env_file, timeout })
        }
        Commands::Line { line } => run::handle_line(&line),
        Commands::Which { name } => which::handle_which(&name),
        Commands::Cache { clear, forget } => cache::handle_cache(clear, forget),
        Commands::Warm => cache::handle_warm(),
    }
}
