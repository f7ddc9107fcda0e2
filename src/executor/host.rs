use std::process::{Command, Output, Stdio};
use std::sync::Mutex;
use log::debug;
use serde::Deserialize;
use crate::executor::Strategy;
use crate::script::{ExecutionMode, Script, ScriptError, ScriptResult};

/// Message the host interpreter reports when a command exits non-zero without stderr.
pub const NON_ZERO_STATUS: &str = "The command exited with a non-zero status.";

// Host interpreters are not safe to drive concurrently: one submission at a time, process-wide.
static SUBMISSION: Mutex<()> = Mutex::new(());

/// Failure reported by a host interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterFailure {
    pub code: Option<i32>,
    pub message: String,
}

impl InterpreterFailure {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A host automation interpreter that runs one shell line at a time.
pub trait HostInterpreter: Send + Sync {
    /// Source submitted for `line`, wrapped to request elevation when asked.
    fn render(&self, line: &str, elevated: bool) -> String;

    /// Runs `source`, returning its textual result.
    fn run(&self, source: &str) -> Result<Option<String>, InterpreterFailure>;
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InterpreterKind {
    Posix,
    Osascript,
}

impl InterpreterKind {
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            InterpreterKind::Osascript
        } else {
            InterpreterKind::Posix
        }
    }

    pub fn build(self) -> Box<dyn HostInterpreter> {
        match self {
            InterpreterKind::Posix => Box::new(PosixShell::default()),
            InterpreterKind::Osascript => Box::new(OsaScript),
        }
    }
}

pub fn default_interpreter() -> Box<dyn HostInterpreter> {
    InterpreterKind::native().build()
}

/// AppleScript `do shell script`, run through `osascript`.
pub struct OsaScript;

impl HostInterpreter for OsaScript {
    fn render(&self, line: &str, elevated: bool) -> String {
        let administrator = if elevated { " with administrator privileges" } else { "" };
        format!("do shell script \"{}\"{}", line, administrator)
    }

    fn run(&self, source: &str) -> Result<Option<String>, InterpreterFailure> {
        let output = Command::new("/usr/bin/osascript")
            .arg("-e")
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| InterpreterFailure::new(None, format!("failed to start osascript: {}", e)))?;

        if output.status.success() {
            Ok(text_of(&output))
        } else {
            Err(parse_osascript_error(&String::from_utf8_lossy(&output.stderr)))
        }
    }
}

/// Splits `0:42: execution error: <message> (<code>)` into message and code.
pub fn parse_osascript_error(stderr: &str) -> InterpreterFailure {
    let stderr = stderr.trim();
    let body = match stderr.find("execution error: ") {
        Some(idx) => &stderr[idx + "execution error: ".len()..],
        None => stderr,
    };

    if body.ends_with(')') {
        if let Some(open) = body.rfind(" (") {
            if let Ok(code) = body[open + 2..body.len() - 1].parse::<i32>() {
                return InterpreterFailure::new(Some(code), &body[..open]);
            }
        }
    }
    let message = if body.is_empty() { "unknown error" } else { body };
    InterpreterFailure::new(None, message)
}

/// `sh -c <line>`; elevation goes through non-interactive `sudo`.
pub struct PosixShell {
    shell: String,
}

impl PosixShell {
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for PosixShell {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl HostInterpreter for PosixShell {
    fn render(&self, line: &str, elevated: bool) -> String {
        if elevated {
            format!("sudo -n {}", line)
        } else {
            line.to_string()
        }
    }

    fn run(&self, source: &str) -> Result<Option<String>, InterpreterFailure> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| InterpreterFailure::new(None, format!("failed to start {}: {}", self.shell, e)))?;

        if output.status.success() {
            return Ok(text_of(&output));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let message = if stderr.is_empty() { NON_ZERO_STATUS } else { stderr };
        Err(InterpreterFailure::new(output.status.code(), message))
    }
}

fn text_of(output: &Output) -> Option<String> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = stdout.trim_end_matches(['\n', '\r']);
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Runs `HostShell` scripts through a [`HostInterpreter`].
pub struct HostShellStrategy {
    interpreter: Box<dyn HostInterpreter>,
}

impl HostShellStrategy {
    pub fn new(interpreter: Box<dyn HostInterpreter>) -> Self {
        Self { interpreter }
    }
}

impl Strategy for HostShellStrategy {
    fn execute(&self, script: &Script) -> ScriptResult {
        let elevated = match &script.mode {
            ExecutionMode::HostShell { elevated } => *elevated,
            _ => return Err(ScriptError::UnknownExecutionMode),
        };
        // Only the interpreter can tell whether the path resolves, so no filesystem check here.
        script.checked_path()?;

        let source = self.interpreter.render(&script.shell(), elevated);
        let outcome = {
            let _guard = SUBMISSION.lock().unwrap_or_else(|e| e.into_inner());
            self.interpreter.run(&source)
        };

        match outcome {
            Ok(output) => Ok(output),
            // Silent non-zero exits are indistinguishable from "no output" here.
            Err(failure) if failure.message == NON_ZERO_STATUS => {
                debug!("host shell returned non-zero status without output: {}", source);
                Ok(None)
            }
            Err(failure) => Err(ScriptError::execute_failed(
                source,
                failure.code,
                format!("host interpreter failed with {}", failure.message),
            )),
        }
    }
}
