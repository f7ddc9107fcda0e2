//! Run external commands as data: a [`Script`] describes the invocation, the
//! [`Executor`] picks the strategy for its mode, and the [`PathCache`] turns
//! logical command names into executable paths.

pub mod config;
pub mod context;
pub mod executor;
pub mod paths;
pub mod script;

pub use config::{Config, load_config};
pub use context::Context;
pub use executor::{Executor, Strategy};
pub use paths::{Discovery, PathCache, PathStore};
pub use script::{ExecutionMode, InvalidReason, ModeKind, Script, ScriptError, ScriptResult, ScriptResultExt, StreamEvent};
