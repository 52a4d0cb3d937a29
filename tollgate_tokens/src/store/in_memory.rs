//! An in-memory credential store

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CredentialStore, StoreError};

/// An in-memory credential store
#[derive(Default, Debug)]
pub struct InMemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStore {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store pre-populated with `entries`
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Removes `key` from the store, returning its previous value
    pub async fn remove(&self, key: &str) -> Option<String> {
        self.values.lock().await.remove(key)
    }

    /// Copies out the current contents of the store
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.lock().await.clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.values.lock().await.contains_key(key))
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        let mut values = self.values.lock().await;
        for (key, value) in entries {
            values.insert((*key).to_owned(), (*value).to_owned());
        }
        Ok(())
    }
}
