//! Opens a per-username store. The real multi-server store registry (home
//! server lookup, SQL-backed persistence) is out of scope per the design;
//! this keeps one `MemoryStore` alive per username for the life of the
//! process, which is enough to exercise delivery end to end but is never
//! a production backend.

use std::collections::HashMap;
use std::sync::Mutex;

use kopano_core::{Error, Result};
use kopano_store::MemoryStore;

pub trait StoreRegistry: Send + Sync {
    fn open_for(&self, username: &str) -> Result<MemoryStore>;
}

#[derive(Default)]
pub struct InMemoryStoreRegistry {
    stores: Mutex<HashMap<String, MemoryStore>>,
}

impl InMemoryStoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreRegistry for InMemoryStoreRegistry {
    fn open_for(&self, username: &str) -> Result<MemoryStore> {
        if username.is_empty() {
            return Err(Error::InvalidArgument("empty recipient username".into()));
        }
        let mut stores = self.stores.lock().map_err(|_| Error::Internal("store registry lock poisoned".into()))?;
        Ok(stores.entry(username.to_string()).or_insert_with(|| MemoryStore::new(username, username)).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_the_same_store_for_repeat_lookups() {
        use kopano_store::Store;
        let registry = InMemoryStoreRegistry::new();
        let a = registry.open_for("alice").unwrap();
        let b = registry.open_for("alice").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.owner_username(), "alice");
    }

    #[test]
    fn rejects_empty_username() {
        let registry = InMemoryStoreRegistry::new();
        assert!(registry.open_for("").is_err());
    }
}
