use anyhow::{Context, Result};
use colored::*;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use crate::executor::host::InterpreterKind;
use crate::paths::{Discovery, PathCache, PathStore};
use crate::script::{ExecutionMode, Script};

pub const CONFIG_FILE: &str = "scriptkit.toml";
/// Overrides `[cache] file`.
pub const CACHE_ENV: &str = "SCRIPTKIT_CACHE";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub commands: HashMap<String, CommandConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    pub file: Option<PathBuf>,
    #[serde(default = "enabled", alias = "warm_up")]
    pub warm_up: bool,
    /// Persist discovered paths at all.
    #[serde(default = "enabled")]
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: None,
            warm_up: true,
            persist: true,
        }
    }
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct InterpreterConfig {
    pub kind: Option<InterpreterKind>,
}

impl InterpreterConfig {
    pub fn kind(&self) -> InterpreterKind {
        self.kind.unwrap_or_else(InterpreterKind::native)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryKind {
    Locator,
    PathHelper,
    SearchPath,
}

/// Per-command override. `path` wins over `script`, which wins over `discovery`.
#[derive(Debug, Default, Deserialize)]
pub struct CommandConfig {
    pub path: Option<String>,
    pub discovery: Option<DiscoveryKind>,
    pub script: Option<String>,
}

impl CommandConfig {
    pub fn discovery(&self) -> Result<Option<Discovery>> {
        if let Some(path) = &self.path {
            return Ok(Some(Discovery::Fixed(path.clone())));
        }
        if let Some(line) = &self.script {
            let mut words = shell_words::split(line)
                .with_context(|| format!("Invalid discovery script: {}", line))?
                .into_iter();
            let Some(program) = words.next() else {
                anyhow::bail!("Discovery script is empty");
            };
            return Ok(Some(Discovery::Script(Script::new(program, words.collect(), ExecutionMode::host_shell()))));
        }
        Ok(self.discovery.map(|kind| match kind {
            DiscoveryKind::Locator => Discovery::Locator,
            DiscoveryKind::PathHelper => Discovery::PathHelper,
            DiscoveryKind::SearchPath => Discovery::SearchPath,
        }))
    }
}

impl Config {
    /// Cache file: `SCRIPTKIT_CACHE`, then `[cache] file`, then the platform cache dir.
    pub fn cache_file(&self) -> Option<PathBuf> {
        match env::var_os(CACHE_ENV) {
            Some(file) if !file.is_empty() => Some(PathBuf::from(file)),
            _ => self.cache.file.clone().or_else(PathStore::default_location),
        }
    }

    pub fn store(&self) -> PathStore {
        if !self.cache.persist {
            return PathStore::disabled();
        }
        match self.cache_file() {
            Some(file) => PathStore::at(file),
            None => PathStore::disabled(),
        }
    }

    /// Registers every `[commands.*]` override on `paths`.
    pub fn apply(&self, paths: &PathCache) -> Result<()> {
        for (name, command) in &self.commands {
            let discovery = command
                .discovery()
                .with_context(|| format!("Invalid [commands.{}] entry", name))?;
            if let Some(discovery) = discovery {
                paths.register_discovery(name, discovery);
            }
            // A fixed path is authoritative over anything cached.
            if let Some(path) = &command.path {
                paths.set(name, Some(path.clone()));
            }
        }
        Ok(())
    }
}

/// Reads `scriptkit.toml` from `dir`; a missing file means defaults.
pub fn load_config(dir: &Path) -> Result<Config> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse {}", config_path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Key/value pairs of a dotenv file, without touching the process environment.
pub fn load_env_file(path: &Path) -> Result<Vec<(String, String)>> {
    eprintln!("{} Loading environment from: {}", "🌿".green(), path.display().to_string().bold());
    let mut vars = Vec::new();
    for item in dotenvy::from_path_iter(path).with_context(|| format!("Failed to open {}", path.display()))? {
        let (key, val) = item.with_context(|| format!("Failed to parse {}", path.display()))?;
        vars.push((key, val));
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::sync::Arc;

    #[test]
    fn test_empty_config_has_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.cache.warm_up);
        assert!(config.cache.persist);
        assert!(config.cache.file.is_none());
        assert_eq!(config.interpreter.kind(), InterpreterKind::native());
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
[cache]
file = "/tmp/paths.toml"
warm-up = false

[interpreter]
kind = "posix"

[commands.pod]
discovery = "path-helper"

[commands.mytool]
path = "/opt/bin/mytool"

[commands.other]
script = "/usr/bin/which 'other tool'"
"#,
        )
        .unwrap();

        assert_eq!(config.cache.file, Some(PathBuf::from("/tmp/paths.toml")));
        assert!(!config.cache.warm_up);
        assert_eq!(config.interpreter.kind(), InterpreterKind::Posix);
        assert_eq!(config.commands["pod"].discovery, Some(DiscoveryKind::PathHelper));
        assert!(matches!(config.commands["pod"].discovery().unwrap(), Some(Discovery::PathHelper)));
        assert!(matches!(
            config.commands["mytool"].discovery().unwrap(),
            Some(Discovery::Fixed(ref p)) if p == "/opt/bin/mytool"
        ));
        match config.commands["other"].discovery().unwrap() {
            Some(Discovery::Script(script)) => {
                assert_eq!(script.path.as_deref(), Some("/usr/bin/which"));
                assert_eq!(script.arguments, vec!["other tool".to_string()]);
                assert_eq!(script.mode, ExecutionMode::host_shell());
            }
            other => panic!("unexpected discovery: {:?}", other),
        }
    }

    #[test]
    fn test_snake_case_warm_up_is_accepted() {
        let config = parse_config("[cache]\nwarm_up = false\n").unwrap();
        assert!(!config.cache.warm_up);
    }

    #[test]
    fn test_unknown_discovery_is_rejected() {
        assert!(parse_config("[commands.x]\ndiscovery = \"guess\"\n").is_err());
    }

    #[test]
    fn test_missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(config.cache.warm_up);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[cache]\npersist = false\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(!config.cache.persist);
        assert!(config.store().file().is_none());
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[cache\n").unwrap();
        assert!(load_config(dir.path()).is_err());
    }

    #[test]
    fn test_unterminated_script_is_an_error() {
        let command = CommandConfig {
            script: Some("which 'oops".into()),
            ..Default::default()
        };
        assert!(command.discovery().is_err());
    }

    #[test]
    fn test_apply_registers_overrides() {
        let config = parse_config(
            "[commands.mytool]\npath = \"/opt/bin/mytool\"\n\n[commands.ruby]\ndiscovery = \"search-path\"\n",
        )
        .unwrap();
        let paths = PathCache::new(Arc::new(Executor::default()), PathStore::disabled());
        config.apply(&paths).unwrap();

        assert_eq!(paths.get("mytool").as_deref(), Some("/opt/bin/mytool"));
        assert!(matches!(paths.discovery("ruby"), Some(Discovery::SearchPath)));
    }

    #[test]
    fn test_env_file_is_read_without_exporting() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(".env");
        fs::write(&file, "SCRIPTKIT_TEST_ONLY=1\nQUOTED=\"a b\"\n").unwrap();

        let vars = load_env_file(&file).unwrap();
        assert_eq!(
            vars,
            vec![
                ("SCRIPTKIT_TEST_ONLY".to_string(), "1".to_string()),
                ("QUOTED".to_string(), "a b".to_string()),
            ]
        );
        assert!(env::var("SCRIPTKIT_TEST_ONLY").is_err());
    }
}
