use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{registry} registry already holds an entry for `{key}`")]
    DuplicateRegistry { registry: &'static str, key: String },
    #[error("{registry} registry has no entry for `{key}`")]
    UnregisteredKeyAccess { registry: &'static str, key: String },
}

/// String-keyed producer map. Writes happen at boot; lookups are concurrent afterwards.
pub struct Registry<V: ?Sized> {
    name: &'static str,
    entries: RwLock<BTreeMap<String, Arc<V>>>,
}

impl<V: ?Sized> Registry<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register(&self, key: impl Into<String>, value: Arc<V>) -> Result<(), RegistryError> {
        let key = key.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(RegistryError::DuplicateRegistry {
                registry: self.name,
                key,
            });
        }
        entries.insert(key, value);
        Ok(())
    }

    pub fn obtain(&self, key: &str) -> Result<Arc<V>, RegistryError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnregisteredKeyAccess {
                registry: self.name,
                key: key.to_string(),
            })
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: ?Sized> std::fmt::Debug for Registry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
#[path = "keyed_test.rs"]
mod tests;
