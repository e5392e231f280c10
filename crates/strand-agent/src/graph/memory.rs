use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use strand_core::error::{MemoryAccess, Result, StrandError};
use strand_core::NodeSpec;

type Store = Arc<RwLock<HashMap<String, Arc<Value>>>>;

/// Per-run key/value store that nodes use to communicate.
///
/// Values are stored behind `Arc` so that a snapshot or a shared read does
/// not copy the whole payload. Cloning a `SharedMemory` clones the handle,
/// not the contents.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory {
    store: Store,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed memory from a trigger input or a session snapshot.
    pub fn from_map(map: HashMap<String, Value>) -> Self {
        let memory = Self::new();
        memory.merge(map);
        memory
    }

    /// View with no key restrictions. Used by the engine itself.
    pub fn full_view(&self, owner: impl Into<String>) -> MemoryView {
        MemoryView {
            store: Arc::clone(&self.store),
            owner: owner.into(),
            read: KeyScope::All,
            write: KeyScope::All,
        }
    }

    /// View scoped to a node's declared input and output keys.
    pub fn view_for(&self, node: &NodeSpec) -> MemoryView {
        MemoryView {
            store: Arc::clone(&self.store),
            owner: node.id.clone(),
            read: KeyScope::from_keys(&node.input_keys),
            write: KeyScope::from_keys(&node.output_keys),
        }
    }

    /// Deep copy of every key.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .map(|(k, v)| (k.clone(), Value::clone(v)))
            .collect()
    }

    /// Replace the contents with `map`.
    pub fn restore(&self, map: HashMap<String, Value>) {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        guard.extend(map.into_iter().map(|(k, v)| (k, Arc::new(v))));
    }

    /// Insert every entry of `map`, overwriting existing keys.
    pub fn merge(&self, map: HashMap<String, Value>) {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        guard.extend(map.into_iter().map(|(k, v)| (k, Arc::new(v))));
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).map(|v| Value::clone(v))
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.into(), Arc::new(value));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Set of keys a view may touch. An empty declaration means every key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyScope {
    All,
    Only(BTreeSet<String>),
}

impl KeyScope {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            Self::All
        } else {
            Self::Only(keys)
        }
    }

    pub fn allows(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(keys) => keys.contains(key),
        }
    }

    /// Keys allowed by both scopes.
    pub fn narrow(&self, other: &KeyScope) -> KeyScope {
        match (self, other) {
            (Self::All, scope) | (scope, Self::All) => scope.clone(),
            (Self::Only(a), Self::Only(b)) => Self::Only(a.intersection(b).cloned().collect()),
        }
    }
}

/// A node's window onto Shared Memory.
///
/// Reads hand back owned copies, so mutating a returned value never reaches
/// the store or another reader. `read_shared` skips the copy and returns the
/// stored `Arc`, which cannot be mutated through.
#[derive(Debug, Clone)]
pub struct MemoryView {
    store: Store,
    owner: String,
    read: KeyScope,
    write: KeyScope,
}

impl MemoryView {
    /// Node id that permission errors are attributed to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn read_scope(&self) -> &KeyScope {
        &self.read
    }

    pub fn write_scope(&self) -> &KeyScope {
        &self.write
    }

    pub fn can_read(&self, key: &str) -> bool {
        self.read.allows(key)
    }

    pub fn can_write(&self, key: &str) -> bool {
        self.write.allows(key)
    }

    /// Deep copy of `key`, or `None` when it has not been written.
    pub fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_shared(key)?.map(|v| Value::clone(&v)))
    }

    /// Stored value without copying.
    pub fn read_shared(&self, key: &str) -> Result<Option<Arc<Value>>> {
        self.check(key, MemoryAccess::Read)?;
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).cloned())
    }

    pub fn write(&self, key: &str, value: Value) -> Result<()> {
        self.check(key, MemoryAccess::Write)?;
        let mut guard = self.store.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key.to_string(), Arc::new(value));
        Ok(())
    }

    /// Deep copy of every readable key that is present.
    pub fn read_all(&self) -> HashMap<String, Value> {
        let guard = self.store.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .filter(|(k, _)| self.read.allows(k))
            .map(|(k, v)| (k.clone(), Value::clone(v)))
            .collect()
    }

    /// A further-restricted view over the same store.
    ///
    /// The new scopes are intersected with this view's, so a derived view
    /// never gains access its parent lacks.
    pub fn with_permissions<R, W, S, T>(&self, read_keys: R, write_keys: W) -> MemoryView
    where
        R: IntoIterator<Item = S>,
        W: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        MemoryView {
            store: Arc::clone(&self.store),
            owner: self.owner.clone(),
            read: self.read.narrow(&KeyScope::from_keys(read_keys)),
            write: self.write.narrow(&KeyScope::from_keys(write_keys)),
        }
    }

    fn check(&self, key: &str, access: MemoryAccess) -> Result<()> {
        let scope = match access {
            MemoryAccess::Read => &self.read,
            MemoryAccess::Write => &self.write,
        };
        if scope.allows(key) {
            Ok(())
        } else {
            Err(StrandError::Permission {
                node: self.owner.clone(),
                key: key.to_string(),
                access,
            })
        }
    }
}
