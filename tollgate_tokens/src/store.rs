//! Key-value stores holding the credential record

use std::{error, io, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "file")]
pub mod file;
mod in_memory;

#[cfg(feature = "file")]
pub use file::FileStore;
pub use in_memory::InMemoryStore;

/// An error reading from or writing to a credential store
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error from the backing storage
    #[error("credential store I/O error")]
    Io(#[from] io::Error),
    /// An error from a custom store implementation
    #[error("credential store backend error")]
    Backend(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A string-valued key-value store, such as a process or collection environment
///
/// The credential record and, optionally, the client configuration are read
/// from here.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Gets the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Whether `key` is present in the store, even with an empty value
    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Stores several values as a unit
    ///
    /// The default implementation sets each entry in turn. Stores which can
    /// write atomically should override this.
    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        (**self).has(key).await
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), StoreError> {
        (**self).set_many(entries).await
    }
}
