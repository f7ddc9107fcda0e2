use anyhow::{Context, Result};
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use toml::{Table, Value};

/// Table key the resolved paths live under.
pub const STORE_KEY: &str = "script_commands";

/// Logical command name -> path table persisted as TOML.
///
/// Writes are read-modify-write over the whole file and are serialized per store,
/// so concurrent merges from one process never lose entries. Other tables in the
/// file are kept as they are. A file that no longer parses is replaced on the next write.
pub struct PathStore {
    file: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl PathStore {
    pub fn at(file: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            write_lock: Mutex::new(()),
        }
    }

    /// A store that remembers nothing.
    pub fn disabled() -> Self {
        Self {
            file: None,
            write_lock: Mutex::new(()),
        }
    }

    /// `<cache dir>/scriptkit/paths.toml`
    pub fn default_location() -> Option<PathBuf> {
        dirs::cache_dir().map(|d| d.join("scriptkit").join("paths.toml"))
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        match &self.file {
            Some(file) => read_table(file),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(name))
    }

    pub fn merge(&self, name: &str, path: &str) -> Result<()> {
        self.merge_all([(name.to_string(), path.to_string())])
    }

    /// Adds or replaces `entries`, keeping every other entry.
    pub fn merge_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.update(|table| {
            table.extend(entries);
            true
        })
        .map(|_| ())
    }

    /// Returns whether `name` was present.
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.update(|table| table.remove(name).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        self.update(|table| {
            let had_entries = !table.is_empty();
            table.clear();
            had_entries
        })
        .map(|_| ())
    }

    // `edit` returns whether the table changed and needs writing.
    fn update<F>(&self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let Some(file) = &self.file else {
            return Ok(false);
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        // Set when the file has to be rewritten even if `edit` changes nothing.
        let mut repaired = false;
        let mut document: Table = match read_document(file)? {
            Some(content) => toml::from_str(&content).unwrap_or_else(|e| {
                warn!("path cache {} is corrupt, rewriting it: {}", file.display(), e);
                repaired = true;
                Table::new()
            }),
            None => Table::new(),
        };
        let mut commands: BTreeMap<String, String> = match document.remove(STORE_KEY) {
            Some(value) => value.try_into().unwrap_or_else(|e| {
                warn!("[{}] in {} is malformed, rewriting it: {}", STORE_KEY, file.display(), e);
                repaired = true;
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };
        let changed = edit(&mut commands);
        if changed || repaired {
            let commands = Value::try_from(commands).context("Failed to serialize path cache")?;
            document.insert(STORE_KEY.to_string(), commands);
            write_document(file, &document)?;
        }
        Ok(changed)
    }
}

// `None` when the file does not exist yet.
fn read_document(file: &Path) -> Result<Option<String>> {
    if !file.exists() {
        return Ok(None);
    }
    fs::read_to_string(file)
        .map(Some)
        .with_context(|| format!("Failed to read path cache {}", file.display()))
}

fn read_table(file: &Path) -> Result<BTreeMap<String, String>> {
    let Some(content) = read_document(file)? else {
        return Ok(BTreeMap::new());
    };
    let document: Table = toml::from_str(&content)
        .with_context(|| format!("Failed to parse path cache {}", file.display()))?;
    match document.get(STORE_KEY) {
        Some(value) => value
            .clone()
            .try_into()
            .with_context(|| format!("Failed to parse [{}] in {}", STORE_KEY, file.display())),
        None => Ok(BTreeMap::new()),
    }
}

fn write_document(file: &Path, document: &Table) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).context("Failed to create path cache directory")?;
    }
    let content = toml::to_string(document).context("Failed to serialize path cache")?;

    // Replace atomically so readers never see a half-written table.
    let tmp = file.with_extension(format!("toml.{}.tmp", std::process::id()));
    fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, file).with_context(|| format!("Failed to replace path cache {}", file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn store() -> (tempfile::TempDir, PathStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PathStore::at(dir.path().join("nested").join("paths.toml"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.get("git").unwrap(), None);
    }

    #[test]
    fn test_merge_keeps_other_entries() {
        let (_dir, store) = store();
        store.merge("git", "/usr/bin/git").unwrap();
        store.merge("ruby", "/usr/bin/ruby").unwrap();
        store.merge("git", "/opt/git/bin/git").unwrap();

        let table = store.load().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["git"], "/opt/git/bin/git");
        assert_eq!(table["ruby"], "/usr/bin/ruby");
    }

    #[test]
    fn test_file_uses_fixed_table_key() {
        let (_dir, store) = store();
        store.merge("git", "/usr/bin/git").unwrap();
        let raw = fs::read_to_string(store.file().unwrap()).unwrap();
        assert!(raw.contains(&format!("[{}]", STORE_KEY)), "{}", raw);
    }

    #[test]
    fn test_unrelated_tables_survive_writes() {
        let (_dir, store) = store();
        let file = store.file().unwrap().to_path_buf();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "[other]\nx = 1\n\n[script_commands]\nsh = \"/bin/sh\"\n").unwrap();
        assert_eq!(store.get("sh").unwrap(), Some("/bin/sh".to_string()));

        store.merge("git", "/usr/bin/git").unwrap();
        let raw: Table = toml::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(raw["other"]["x"].as_integer(), Some(1));
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let (_dir, store) = store();
        store.merge_all([("a".to_string(), "/a".to_string()), ("b".to_string(), "/b".to_string())]).unwrap();
        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(store.load().unwrap().len(), 1);
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_store_ignores_writes() {
        let store = PathStore::disabled();
        store.merge("git", "/usr/bin/git").unwrap();
        assert!(store.load().unwrap().is_empty());
        assert!(store.file().is_none());
    }

    #[test]
    fn test_concurrent_merges_lose_nothing() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || store.merge(&format!("tool{}", i), &format!("/bin/tool{}", i)).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load().unwrap().len(), 16);
    }

    #[test]
    fn test_corrupt_file_fails_reads() {
        let (_dir, store) = store();
        let file = store.file().unwrap().to_path_buf();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "this is = = not toml").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn test_corrupt_file_is_replaced_on_write() {
        let (_dir, store) = store();
        let file = store.file().unwrap().to_path_buf();
        fs::create_dir_all(file.parent().unwrap()).unwrap();

        fs::write(&file, "garbage = = x").unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());

        fs::write(&file, "garbage = = x").unwrap();
        store.merge("git", "/usr/bin/git").unwrap();
        assert_eq!(store.get("git").unwrap(), Some("/usr/bin/git".to_string()));
    }

    #[test]
    fn test_malformed_command_table_is_replaced_on_write() {
        let (_dir, store) = store();
        let file = store.file().unwrap().to_path_buf();
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "script_commands = 3\n").unwrap();
        assert!(store.load().is_err());

        store.merge("git", "/usr/bin/git").unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
