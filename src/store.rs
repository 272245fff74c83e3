// Attribute store: string records scoped by local adapter address and category
//
// On disk every scope is one text file, `<root>/<ADAPTER ADDRESS>/<category>`,
// holding one `KEY VALUE` line per entry. Backslashes and line breaks in
// values are escaped so every entry stays on its own line.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bluer::Address;
use log::debug;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Settings of the local adapter itself (`class`, `name`).
    Config,
    Names,
    Aliases,
    Manufacturers,
    LastSeen,
    LastUsed,
    LinkKeys,
}

impl Category {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Names => "names",
            Self::Aliases => "aliases",
            Self::Manufacturers => "manufacturers",
            Self::LastSeen => "lastseen",
            Self::LastUsed => "lastused",
            Self::LinkKeys => "linkkeys",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub adapter: Address,
    pub category: Category,
}

impl Scope {
    pub fn new(adapter: Address, category: Category) -> Self {
        Self { adapter, category }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Receives every entry of a scope, in key order.
pub trait EntryVisitor {
    fn visit(&mut self, key: &str, value: &str);
}

pub trait AttributeStore: Send + Sync {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError>;
    /// Deleting an absent key is not an error.
    fn delete(&self, scope: Scope, key: &str) -> Result<(), StoreError>;
    fn for_each(&self, scope: Scope, visitor: &mut dyn EntryVisitor) -> Result<(), StoreError>;
}

/// Address keys are kept in canonical upper-case form; other keys as given.
fn normalize_key(key: &str) -> String {
    let key = key.trim();
    match key.parse::<Address>() {
        Ok(address) => address.to_string(),
        Err(_) => key.to_string(),
    }
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

pub struct TextFileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl TextFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self, scope: Scope) -> PathBuf {
        self.root
            .join(scope.adapter.to_string())
            .join(scope.category.file_name())
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                let (key, value) = line.split_once(' ').unwrap_or((line, ""));
                (normalize_key(key), unescape_value(value))
            })
            .collect())
    }

    fn save(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let io_error = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_error)?;
        }

        let mut content = String::new();
        for (key, value) in entries {
            content.push_str(key);
            content.push(' ');
            content.push_str(&escape_value(value));
            content.push('\n');
        }

        let staging = path.with_extension("tmp");
        fs::write(&staging, content).map_err(io_error)?;
        fs::rename(&staging, path).map_err(io_error)
    }
}

impl AttributeStore for TextFileStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = Self::load(&self.path(scope))?;
        Ok(entries.remove(&normalize_key(key)))
    }

    fn set(&self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let path = self.path(scope);
        let mut entries = Self::load(&path)?;
        entries.insert(normalize_key(key), value.to_string());
        debug!("Storing {key} in {}", path.display());
        Self::save(&path, &entries)
    }

    fn delete(&self, scope: Scope, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let path = self.path(scope);
        let mut entries = Self::load(&path)?;
        if entries.remove(&normalize_key(key)).is_none() {
            return Ok(());
        }
        Self::save(&path, &entries)
    }

    fn for_each(&self, scope: Scope, visitor: &mut dyn EntryVisitor) -> Result<(), StoreError> {
        for (key, value) in Self::load(&self.path(scope))? {
            visitor.visit(&key, &value);
        }
        Ok(())
    }
}

/// Volatile store for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(Scope, String), String>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl AttributeStore for MemoryStore {
    fn get(&self, scope: Scope, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(&(scope, normalize_key(key))).cloned())
    }

    fn set(&self, scope: Scope, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert((scope, normalize_key(key)), value.to_string());
        Ok(())
    }

    fn delete(&self, scope: Scope, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(&(scope, normalize_key(key)));
        Ok(())
    }

    fn for_each(&self, scope: Scope, visitor: &mut dyn EntryVisitor) -> Result<(), StoreError> {
        let entries = self.entries.lock();
        for ((entry_scope, key), value) in entries.iter() {
            if *entry_scope == scope {
                visitor.visit(key, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Vec<(String, String)>);

    impl EntryVisitor for Collect {
        fn visit(&mut self, key: &str, value: &str) {
            self.0.push((key.to_string(), value.to_string()));
        }
    }

    fn adapter() -> Address {
        "00:1A:7D:DA:71:13".parse().expect("address")
    }

    fn exercise(store: &dyn AttributeStore) {
        let keys = Scope::new(adapter(), Category::LinkKeys);
        let names = Scope::new(adapter(), Category::Names);

        store
            .set(keys, "00:0a:95:9d:68:16", "0123456789ABCDEF 0 4")
            .expect("set");
        store.set(keys, "00:0A:95:9D:68:01", "FEDCBA 0 6").expect("set");
        store.set(names, "00:0A:95:9D:68:16", "phone").expect("set");

        assert_eq!(
            store.get(keys, "00:0A:95:9D:68:16").expect("get").as_deref(),
            Some("0123456789ABCDEF 0 4")
        );
        assert_eq!(store.get(keys, "11:22:33:44:55:66").expect("get"), None);

        let mut visited = Collect(Vec::new());
        store.for_each(keys, &mut visited).expect("for_each");
        let visited: Vec<&str> = visited.0.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(visited, vec!["00:0A:95:9D:68:01", "00:0A:95:9D:68:16"]);

        store.delete(keys, "00:0A:95:9D:68:16").expect("delete");
        store.delete(keys, "00:0A:95:9D:68:16").expect("second delete");
        assert_eq!(store.get(keys, "00:0A:95:9D:68:16").expect("get"), None);
        assert_eq!(
            store.get(names, "00:0A:95:9D:68:16").expect("get").as_deref(),
            Some("phone")
        );
    }

    #[test]
    fn memory_store_scopes_entries() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn text_file_store_scopes_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        exercise(&TextFileStore::new(dir.path()));
    }

    #[test]
    fn text_file_store_writes_key_value_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TextFileStore::new(dir.path());
        let scope = Scope::new(adapter(), Category::Config);

        store.set(scope, "class", "0x00010c").expect("set");
        store.set(scope, "name", "my desk").expect("set");

        let path = dir.path().join("00:1A:7D:DA:71:13").join("config");
        let content = fs::read_to_string(path).expect("read");
        assert_eq!(content, "class 0x00010c\nname my desk\n");
        assert_eq!(
            store.get(scope, "name").expect("get").as_deref(),
            Some("my desk")
        );
    }

    #[test]
    fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TextFileStore::new(dir.path());
        let scope = Scope::new(adapter(), Category::LastSeen);

        assert_eq!(store.get(scope, "00:0A:95:9D:68:16").expect("get"), None);
        let mut visited = Collect(Vec::new());
        store.for_each(scope, &mut visited).expect("for_each");
        assert!(visited.0.is_empty());
    }

    #[test]
    fn line_breaks_in_values_stay_in_one_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TextFileStore::new(dir.path());
        let config = Scope::new(adapter(), Category::Config);
        let aliases = Scope::new(adapter(), Category::Aliases);

        store.set(config, "class", "0x000100").expect("set");
        store
            .set(config, "name", "desk\nclass 0xffffff")
            .expect("set");
        store
            .set(aliases, "00:0A:95:9D:68:16", "phone\r\nsecond line \\n")
            .expect("set");

        assert_eq!(
            store.get(config, "name").expect("get").as_deref(),
            Some("desk\nclass 0xffffff")
        );
        assert_eq!(
            store.get(config, "class").expect("get").as_deref(),
            Some("0x000100")
        );
        assert_eq!(
            store
                .get(aliases, "00:0A:95:9D:68:16")
                .expect("get")
                .as_deref(),
            Some("phone\r\nsecond line \\n")
        );

        let content = fs::read_to_string(store.path(config)).expect("read");
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn surrounding_whitespace_in_values_survives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TextFileStore::new(dir.path());
        let names = Scope::new(adapter(), Category::Names);

        store
            .set(names, "00:0A:95:9D:68:16", "  spaced out  ")
            .expect("set");
        assert_eq!(
            store
                .get(names, "00:0a:95:9d:68:16")
                .expect("get")
                .as_deref(),
            Some("  spaced out  ")
        );
    }
}
