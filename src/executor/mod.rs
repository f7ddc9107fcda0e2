pub mod host;
pub mod process;
pub mod stream;

use std::collections::HashMap;
use std::sync::Arc;
use crossbeam_channel::Receiver;
use log::debug;
use crate::script::{ModeKind, Script, ScriptError, ScriptResult, StreamEvent};

use self::host::{default_interpreter, HostInterpreter, HostShellStrategy};
use self::process::ProcessStrategy;
use self::stream::EventBus;


/// One way of running a [`Script`].
pub trait Strategy: Send + Sync {
    fn execute(&self, script: &Script) -> ScriptResult;

    /// Requests that in-flight work stops. Must not block on that work finishing.
    fn interrupt(&self) {}
}

/// Routes scripts to the strategy registered for their mode.
pub struct Executor {
    strategies: HashMap<ModeKind, Arc<dyn Strategy>>,
    processes: Arc<ProcessStrategy>,
    events: Arc<EventBus>,
}

impl Executor {
    /// Host shell and subprocess strategies registered, the former backed by `interpreter`.
    pub fn new(interpreter: Box<dyn HostInterpreter>) -> Self {
        let events = Arc::new(EventBus::new());
        let processes = Arc::new(ProcessStrategy::new(events.clone()));
        let mut executor = Self {
            strategies: HashMap::new(),
            processes: processes.clone(),
            events,
        };
        executor.register(ModeKind::HostShell, Arc::new(HostShellStrategy::new(interpreter)));
        executor.register(ModeKind::Subprocess, processes);
        executor
    }

    /// Installs `strategy` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: ModeKind, strategy: Arc<dyn Strategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn execute(&self, script: &Script) -> ScriptResult {
        let kind = script.mode.kind();
        match self.strategies.get(&kind) {
            Some(strategy) => {
                debug!("dispatching {} script: {}", kind, script.shell());
                strategy.execute(script)
            }
            None => Err(ScriptError::CannotHandle { mode: kind }),
        }
    }

    /// Signals every strategy. Returns without waiting for anything to exit.
    pub fn interrupt(&self) {
        debug!("interrupting {} live process(es)", self.live_count());
        for strategy in self.strategies.values() {
            strategy.interrupt();
        }
    }

    /// Streamed stdout/stderr chunks of every subprocess run from now on.
    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Subprocesses currently tracked as running.
    pub fn live_count(&self) -> usize {
        self.processes.live_count()
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(default_interpreter())
    }
}
