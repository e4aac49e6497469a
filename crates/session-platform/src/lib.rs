//! Persistent session snapshot surface for Applypath frontends.
//!
//! Hosts use this to restore a previously authenticated session before
//! the backend readiness signal fires. The resilience layer never touches
//! storage itself; it only receives the restored state.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// JSON session snapshot persistence helpers.
pub mod snapshot;

pub use snapshot::{clear_snapshot, load_snapshot, save_snapshot, SessionSnapshot};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session entry not found")]
    NotFound,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store backend failure: {0}")]
    Backend(String),
}

/// Key-value read/write surface for session material.
pub trait SessionStore: Send + Sync {
    fn set_entry(&self, service: &str, key: &str, value: &str) -> Result<(), SessionStoreError>;

    fn get_entry(&self, service: &str, key: &str) -> Result<String, SessionStoreError>;

    fn delete_entry(&self, service: &str, key: &str) -> Result<(), SessionStoreError>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl SessionStore for InMemorySessionStore {
    fn set_entry(&self, service: &str, key: &str, value: &str) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert((service.to_owned(), key.to_owned()), value.to_owned());
        Ok(())
    }

    fn get_entry(&self, service: &str, key: &str) -> Result<String, SessionStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        data.get(&(service.to_owned(), key.to_owned()))
            .cloned()
            .ok_or(SessionStoreError::NotFound)
    }

    fn delete_entry(&self, service: &str, key: &str) -> Result<(), SessionStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SessionStoreError::Backend("poisoned lock".to_owned()))?;
        if data.remove(&(service.to_owned(), key.to_owned())).is_none() {
            return Err(SessionStoreError::NotFound);
        }
        Ok(())
    }
}

/// Store wrapper pinned to one service scope, so multiple backend
/// connections can share a platform store without key collisions.
#[derive(Clone)]
pub struct ScopedSessionStore<S: SessionStore> {
    inner: S,
    service: String,
}

impl<S: SessionStore> ScopedSessionStore<S> {
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.inner.set_entry(&self.service, key, value)
    }

    pub fn get(&self, key: &str) -> Result<String, SessionStoreError> {
        self.inner.get_entry(&self.service, key)
    }

    pub fn delete(&self, key: &str) -> Result<(), SessionStoreError> {
        self.inner.delete_entry(&self.service, key)
    }
}
