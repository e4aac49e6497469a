//! In-process stand-in for the remote document store.
//!
//! Connectivity is a host-controlled switch so the harness can script
//! offline windows and watch the resilience layer absorb them.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use resilience_core::StoreError;
use tracing::debug;

/// Profile document served by the stub store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDocument {
    pub subject_id: String,
    pub display_name: String,
    pub profile_kind: String,
}

impl ProfileDocument {
    /// Minimal degraded profile used as a read fallback.
    pub fn placeholder(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: String::new(),
            profile_kind: "student".to_owned(),
        }
    }
}

#[derive(Default)]
struct StubState {
    profiles: HashMap<String, ProfileDocument>,
    answers: Vec<(String, String, String)>,
}

/// Scriptable document store with a connectivity switch.
#[derive(Clone, Default)]
pub struct StubDocumentStore {
    online: Arc<AtomicBool>,
    state: Arc<Mutex<StubState>>,
}

impl StubDocumentStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.online.store(true, Ordering::SeqCst);
        store
    }

    pub fn set_online(&self, online: bool) {
        debug!(online, "stub store connectivity toggled");
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn upsert_profile(&self, subject_id: &str, display_name: &str, profile_kind: &str) {
        let mut state = self.lock();
        state.profiles.insert(
            subject_id.to_owned(),
            ProfileDocument {
                subject_id: subject_id.to_owned(),
                display_name: display_name.to_owned(),
                profile_kind: profile_kind.to_owned(),
            },
        );
    }

    pub async fn load_profile(&self, subject_id: &str) -> Result<ProfileDocument, StoreError> {
        self.check_online()?;
        let state = self.lock();
        state
            .profiles
            .get(subject_id)
            .cloned()
            .ok_or_else(|| StoreError::new("not-found", format!("no profile for {subject_id}")))
    }

    pub async fn save_answer(
        &self,
        subject_id: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        let mut state = self.lock();
        state
            .answers
            .push((subject_id.to_owned(), field.to_owned(), value.to_owned()));
        Ok(())
    }

    /// Number of committed answers, for end-of-run reporting.
    pub fn committed_answers(&self) -> usize {
        self.lock().answers.len()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable("document store unreachable"))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StubState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_profiles_while_online() {
        let store = StubDocumentStore::new();
        store.upsert_profile("u-alice", "Alice Zhang", "student");

        let profile = store
            .load_profile("u-alice")
            .await
            .expect("profile should load");
        assert_eq!(profile.display_name, "Alice Zhang");
    }

    #[tokio::test]
    async fn fails_transiently_while_offline() {
        let store = StubDocumentStore::new();
        store.upsert_profile("u-alice", "Alice Zhang", "student");
        store.set_online(false);

        let err = store
            .load_profile("u-alice")
            .await
            .expect_err("offline reads must fail");
        assert_eq!(err.code, "unavailable");

        let err = store
            .save_answer("u-alice", "essay", "draft")
            .await
            .expect_err("offline writes must fail");
        assert_eq!(err.code, "unavailable");
        assert_eq!(store.committed_answers(), 0);
    }

    #[tokio::test]
    async fn missing_profile_is_a_fatal_error() {
        let store = StubDocumentStore::new();
        let err = store
            .load_profile("u-ghost")
            .await
            .expect_err("unknown subject must fail");
        assert_eq!(err.code, "not-found");
    }
}
