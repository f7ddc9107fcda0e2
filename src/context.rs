use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use crate::config::Config;
use crate::executor::Executor;
use crate::paths::PathCache;
use crate::script::{Script, ScriptResult};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Executor and path cache built together from one [`Config`].
pub struct Context {
    pub executor: Arc<Executor>,
    pub paths: PathCache,
}

impl Context {
    pub fn new(config: &Config) -> Result<Self> {
        let executor = Arc::new(Executor::new(config.interpreter.kind().build()));
        Self::with_executor(config, executor)
    }

    /// Like [`Context::new`] with a prepared executor.
    pub fn with_executor(config: &Config, executor: Arc<Executor>) -> Result<Self> {
        let paths = PathCache::new(executor.clone(), config.store());
        config.apply(&paths)?;
        if config.cache.warm_up {
            paths.warm_up();
        }
        Ok(Self { executor, paths })
    }

    pub fn execute(&self, script: &Script) -> ScriptResult {
        self.executor.execute(script)
    }

    /// Interrupts live work, waits up to `grace` for it to drain, then persists the cache.
    pub fn shutdown(self, grace: Duration) -> Result<()> {
        self.executor.interrupt();
        let started = Instant::now();
        while self.executor.live_count() > 0 {
            if started.elapsed() >= grace {
                warn!("{} process(es) still running after {:?}", self.executor.live_count(), grace);
                break;
            }
            thread::sleep(DRAIN_POLL);
        }
        debug!("flushing path cache");
        self.paths.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config(dir: &tempfile::TempDir, extra: &str) -> Config {
        let file = dir.path().join("paths.toml");
        let mut config = parse_config(&format!("[cache]\nwarm-up = false\n{}", extra)).unwrap();
        config.cache.file = Some(file);
        config
    }

    #[test]
    fn test_shutdown_flushes_resolved_paths() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool");
        std::fs::write(&tool, "").unwrap();
        let tool = tool.to_string_lossy().into_owned();
        let config = config(&dir, "");
        if config.cache_file() != config.cache.file {
            // SCRIPTKIT_CACHE is set in this environment.
            return;
        }

        let ctx = Context::new(&config).unwrap();
        ctx.paths.set("tool", Some(tool.clone()));
        ctx.paths.set("virtual", Some("not-a-file".into()));
        let store = crate::paths::PathStore::at(dir.path().join("paths.toml"));
        ctx.shutdown(Duration::from_secs(1)).unwrap();

        let table = store.load().unwrap();
        assert_eq!(table.get("tool"), Some(&tool));
        assert!(!table.contains_key("virtual"));
    }

    #[test]
    fn test_config_overrides_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir, "[commands.mytool]\npath = \"/opt/bin/mytool\"\n");
        let ctx = Context::new(&config).unwrap();
        assert_eq!(ctx.paths.resolve("mytool").as_deref(), Some("/opt/bin/mytool"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shutdown_interrupts_live_work() {
        use crate::script::ExecutionMode;

        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(&config(&dir, "")).unwrap();
        let sleep = which::which("sleep").unwrap().to_string_lossy().into_owned();
        let executor = ctx.executor.clone();

        let pending = thread::spawn(move || {
            executor.execute(&Script::new(sleep, vec!["30".into()], ExecutionMode::subprocess()))
        });
        let started = Instant::now();
        while ctx.executor.live_count() == 0 {
            assert!(started.elapsed() < Duration::from_secs(10), "process never started");
            thread::sleep(Duration::from_millis(5));
        }

        ctx.shutdown(Duration::from_secs(10)).unwrap();
        assert!(pending.join().unwrap().is_err());
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
