pub mod error;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use crate::paths::PathCache;

pub use error::{InvalidReason, ScriptError, ScriptResult, ScriptResultExt, StreamEvent};

/// How a script is run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Matches no strategy.
    #[default]
    Unclassified,
    /// Hand the rendered shell line to the host interpreter.
    HostShell { elevated: bool },
    /// Launch the path directly as a child process.
    Subprocess {
        /// Stream output on the event bus only, never buffer it.
        suppress_output: bool,
        /// Replaces the inherited environment when set.
        environment: Option<HashMap<String, String>>,
        /// File whose contents are piped to stdin.
        input_file: Option<PathBuf>,
    },
}

impl ExecutionMode {
    /// Plain subprocess: buffered output, inherited environment, no input.
    pub fn subprocess() -> Self {
        ExecutionMode::Subprocess {
            suppress_output: false,
            environment: None,
            input_file: None,
        }
    }

    pub fn host_shell() -> Self {
        ExecutionMode::HostShell { elevated: false }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            ExecutionMode::Unclassified => ModeKind::Unclassified,
            ExecutionMode::HostShell { .. } => ModeKind::HostShell,
            ExecutionMode::Subprocess { .. } => ModeKind::Subprocess,
        }
    }
}

/// Data-less tag of an [`ExecutionMode`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Unclassified,
    HostShell,
    Subprocess,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModeKind::Unclassified => "unclassified",
            ModeKind::HostShell => "host-shell",
            ModeKind::Subprocess => "subprocess",
        };
        f.write_str(s)
    }
}

/// One external command invocation, described as data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub path: Option<String>,
    pub arguments: Vec<String>,
    pub mode: ExecutionMode,
}

impl Script {
    pub fn new(path: impl Into<String>, arguments: Vec<String>, mode: ExecutionMode) -> Self {
        Self {
            path: Some(path.into()),
            arguments,
            mode,
        }
    }

    /// Builds a script whose path is the resolved location of a logical command name.
    /// The path stays `None` when the name cannot be resolved; execution then fails validation.
    pub fn command(paths: &PathCache, name: &str, mode: ExecutionMode) -> Self {
        Self {
            path: paths.resolve(name),
            arguments: Vec::new(),
            mode,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Appends `separator`, then `other`'s path and arguments, to this script's arguments.
    /// A separator is only inserted when this script already has arguments.
    pub fn combine(mut self, other: &Script, separator: &str) -> Self {
        if !self.arguments.is_empty() {
            self.arguments.push(separator.to_string());
        }
        if let Some(p) = &other.path {
            self.arguments.push(p.clone());
        }
        self.arguments.extend(other.arguments.iter().cloned());
        self
    }

    /// `path + " " + arguments joined by " "`.
    ///
    /// Nothing is quoted or escaped. Callers must quote arguments containing
    /// spaces or shell metacharacters themselves before the line reaches a shell.
    pub fn shell(&self) -> String {
        let path = self.path.as_deref().unwrap_or("");
        format!("{} {}", path, self.arguments.join(" "))
    }

    /// The non-empty path, if any.
    pub(crate) fn checked_path(&self) -> Result<&str, InvalidReason> {
        match self.path.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(InvalidReason::PathEmpty),
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shell())
    }
}
