use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sk", version, about = "scriptkit: run external commands through a path cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program as a subprocess (or on the host shell)
    #[command(visible_alias = "r")]
    Run {
        /// Program name or path; names without '/' go through the path cache
        program: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Hand the joined line to the host shell instead
        #[arg(short = 's', long)]
        shell: bool,

        /// Ask the host shell for administrator privileges
        #[arg(long, requires = "shell")]
        elevated: bool,

        /// Only stream output, do not buffer it
        #[arg(short = 'q', long)]
        quiet: bool,

        /// File piped to the program's stdin
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Extra environment variable (KEY=VALUE)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Dotenv file merged into the environment
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Interrupt the program after this many seconds
        #[arg(short = 't', long)]
        timeout: Option<u64>,
    },

    /// Split a command line like a shell would and run it as a subprocess
    #[command(visible_alias = "l")]
    Line { line: String },

    /// Resolve a command name through the path cache
    #[command(visible_alias = "w")]
    Which { name: String },

    /// Inspect or edit the persisted path cache
    #[command(visible_alias = "c")]
    Cache {
        /// Remove every persisted entry
        #[arg(long)]
        clear: bool,

        /// Remove one persisted entry
        #[arg(long, value_name = "NAME")]
        forget: Option<String>,
    },

    /// Resolve every known command and print the table
    Warm,
}
