use thiserror::Error;
use super::ModeKind;

/// Result of executing a script: the captured output on success.
pub type ScriptResult = Result<Option<String>, ScriptError>;

/// One chunk of streamed output. stdout chunks are `Ok`, stderr chunks are `Err`.
pub type StreamEvent = Result<String, ScriptError>;

/// Why a script was rejected before anything was launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("script path is empty")]
    PathEmpty,
    #[error("script path does not exist or is a directory: {0}")]
    PathNotExistOrIsDirectory(String),
    #[error("permission denied executing: {0}")]
    PathPermissionDenied(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// A strategy received a mode it does not understand.
    #[error("unknown execution mode")]
    UnknownExecutionMode,

    /// No strategy is registered for the script's mode.
    #[error("no strategy can handle {mode} scripts")]
    CannotHandle { mode: ModeKind },

    #[error("invalid script: {0}")]
    Invalid(#[from] InvalidReason),

    /// Launch or runtime failure. `script` is the fully rendered command line.
    #[error("`{script}` failed: {message}")]
    ExecuteFailed {
        script: String,
        code: Option<i32>,
        message: String,
    },
}

impl ScriptError {
    pub fn execute_failed(script: impl Into<String>, code: Option<i32>, message: impl Into<String>) -> Self {
        ScriptError::ExecuteFailed {
            script: script.into(),
            code,
            message: message.into(),
        }
    }

    /// Exit code (or signal number) carried by an execution failure.
    pub fn code(&self) -> Option<i32> {
        match self {
            ScriptError::ExecuteFailed { code, .. } => *code,
            _ => None,
        }
    }
}

/// Convenience accessors on [`ScriptResult`].
pub trait ScriptResultExt {
    /// Captured text of a successful run, if there was any.
    fn output(&self) -> Option<&str>;
}

impl ScriptResultExt for ScriptResult {
    fn output(&self) -> Option<&str> {
        match self {
            Ok(Some(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_failed_display_embeds_command() {
        let err = ScriptError::execute_failed("/bin/ls -z", Some(2), "bad flag");
        assert_eq!(err.to_string(), "`/bin/ls -z` failed: bad flag");
        assert_eq!(err.code(), Some(2));
    }

    #[test]
    fn test_invalid_reason_converts() {
        let err: ScriptError = InvalidReason::PathEmpty.into();
        assert_eq!(err, ScriptError::Invalid(InvalidReason::PathEmpty));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn test_output_accessor() {
        let ok: ScriptResult = Ok(Some("v1".to_string()));
        let none: ScriptResult = Ok(None);
        let err: ScriptResult = Err(ScriptError::UnknownExecutionMode);
        assert_eq!(ok.output(), Some("v1"));
        assert_eq!(none.output(), None);
        assert_eq!(err.output(), None);
    }
}
