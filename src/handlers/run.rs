use anyhow::{Context as _, Result, bail};
use colored::*;
use crossbeam_channel::{after, bounded, never, select};
use log::{debug, warn};
use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use scriptkit::config::load_env_file;
use scriptkit::{Context, ExecutionMode, Script, ScriptError, ScriptResult, StreamEvent};
use super::open_context;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct RunOptions {
    pub program: String,
    pub args: Vec<String>,
    pub shell: bool,
    pub elevated: bool,
    pub quiet: bool,
    pub input: Option<PathBuf>,
    pub env: Vec<String>,
    pub env_file: Option<PathBuf>,
    pub timeout: Option<u64>,
}

impl RunOptions {
    pub fn plain(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            shell: false,
            elevated: false,
            quiet: false,
            input: None,
            env: Vec::new(),
            env_file: None,
            timeout: None,
        }
    }
}

pub fn handle_run(opts: RunOptions) -> Result<()> {
    let ctx = open_context()?;
    let script = build_script(&ctx, &opts)?;
    let result = run_script(&ctx, &script, opts.quiet, opts.timeout.map(Duration::from_secs));
    ctx.shutdown(SHUTDOWN_GRACE)?;

    match result? {
        Ok(Some(output)) => println!("{}", output),
        Ok(None) => debug!("`{}` produced no output", script),
        Err(e) => bail!("❌ {}", e),
    }
    Ok(())
}

/// `sk line "<command line>"`
pub fn handle_line(line: &str) -> Result<()> {
    let mut words = shell_words::split(line)
        .with_context(|| format!("Failed to parse command line: {}", line))?
        .into_iter();
    let Some(program) = words.next() else {
        bail!("Empty command line");
    };
    handle_run(RunOptions::plain(program, words.collect()))
}

fn build_script(ctx: &Context, opts: &RunOptions) -> Result<Script> {
    if opts.shell {
        let mode = ExecutionMode::HostShell { elevated: opts.elevated };
        return Ok(Script::new(opts.program.clone(), opts.args.clone(), mode));
    }

    let path = if opts.program.contains('/') {
        opts.program.clone()
    } else {
        match ctx.paths.resolve(&opts.program) {
            Some(path) => path,
            None => bail!("Command '{}' not found", opts.program),
        }
    };
    let mode = ExecutionMode::Subprocess {
        suppress_output: opts.quiet,
        environment: environment(&opts.env, opts.env_file.as_deref())?,
        input_file: opts.input.clone(),
    };
    Ok(Script::new(path, opts.args.clone(), mode))
}

/// Inherited environment with the env file and `-e` pairs on top, or `None` when neither is given.
fn environment(pairs: &[String], env_file: Option<&Path>) -> Result<Option<HashMap<String, String>>> {
    if pairs.is_empty() && env_file.is_none() {
        return Ok(None);
    }
    let mut vars: HashMap<String, String> = env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect();
    if let Some(file) = env_file {
        vars.extend(load_env_file(file)?);
    }
    for pair in pairs {
        let (key, val) = parse_pair(pair)?;
        vars.insert(key, val);
    }
    Ok(Some(vars))
}

fn parse_pair(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => bail!("Invalid environment variable '{}', expected KEY=VALUE", pair),
    }
}

/// Runs `script` on a worker thread, printing streamed chunks when `quiet` and
/// interrupting on Ctrl-C or when `timeout` elapses.
fn run_script(ctx: &Context, script: &Script, quiet: bool, timeout: Option<Duration>) -> Result<ScriptResult> {
    let executor = ctx.executor.clone();
    let events = if quiet { executor.subscribe() } else { never() };

    let on_signal = executor.clone();
    ctrlc::set_handler(move || {
        eprintln!("{} Interrupted", "⚠️".yellow());
        on_signal.interrupt();
    })
    .context("Failed to install Ctrl-C handler")?;

    let (done_tx, done_rx) = bounded(1);
    let worker = {
        let executor = executor.clone();
        let script = script.clone();
        thread::spawn(move || {
            let _ = done_tx.send(executor.execute(&script));
        })
    };
    let deadline = timeout.map(after).unwrap_or_else(never);

    let mut finished = None;
    while finished.is_none() {
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    print_event(event);
                }
            }
            recv(done_rx) -> result => finished = Some(result),
            recv(deadline) -> _ => {
                warn!("timed out, interrupting `{}`", script);
                executor.interrupt();
            }
        }
    }
    if worker.join().is_err() {
        bail!("Execution thread panicked");
    }

    // Every chunk is published before `execute` returns.
    for event in events.try_iter() {
        print_event(event);
    }
    match finished {
        Some(result) => result.context("Execution thread exited without a result"),
        None => bail!("Execution thread exited without a result"),
    }
}

fn print_event(event: StreamEvent) {
    match event {
        Ok(chunk) => {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
        Err(ScriptError::ExecuteFailed { message, .. }) => eprint!("{}", message.red()),
        Err(e) => eprintln!("{}", e.to_string().red()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("A=1").unwrap(), ("A".to_string(), "1".to_string()));
        assert_eq!(parse_pair("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
        assert_eq!(parse_pair("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_pair("=1").is_err());
        assert!(parse_pair("novalue").is_err());
    }

    #[test]
    fn test_environment_is_inherited_only_when_customized() {
        assert!(environment(&[], None).unwrap().is_none());

        let vars = environment(&["SK_EXTRA=yes".to_string()], None).unwrap().unwrap();
        assert_eq!(vars.get("SK_EXTRA").map(String::as_str), Some("yes"));
        if let Ok(path) = env::var("PATH") {
            assert_eq!(vars.get("PATH"), Some(&path));
        }
    }

    #[test]
    fn test_pairs_override_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        std::fs::write(&file, "SK_LAYER=file\nSK_FILE_ONLY=1\n").unwrap();

        let vars = environment(&["SK_LAYER=flag".to_string()], Some(file.as_path())).unwrap().unwrap();
        assert_eq!(vars["SK_LAYER"], "flag");
        assert_eq!(vars["SK_FILE_ONLY"], "1");
    }
}
