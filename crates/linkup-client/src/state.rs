//! Backend handle shared by every service of a client session.
//!
//! A [`Backend`] either wraps an open [`Database`] or is *offline*. Offline
//! backends make every service call a no-op so the rest of the app keeps
//! working when no store is configured.

use std::sync::{Arc, Mutex, MutexGuard};

use linkup_shared::constants::DEFAULT_SUBSCRIPTION_BUFFER;
use linkup_store::{Change, Database};
use tokio::sync::broadcast;

use crate::error::{ClientError, Result};

pub type SharedDb = Arc<Mutex<Database>>;

#[derive(Clone)]
pub struct Backend {
    db: Option<SharedDb>,
    /// Capacity of each live subscription's outgoing channel.
    buffer: usize,
}

impl Backend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Some(Arc::new(Mutex::new(db))),
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }

    pub fn offline() -> Self {
        Self {
            db: None,
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn is_configured(&self) -> bool {
        self.db.is_some()
    }

    pub fn buffer(&self) -> usize {
        self.buffer
    }

    /// Run `f` against the database. Returns `Ok(None)` when offline.
    pub(crate) fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<Option<T>> {
        let Some(db) = &self.db else {
            tracing::debug!("No backend configured, skipping operation");
            return Ok(None);
        };
        let guard = lock(db)?;
        f(&guard).map(Some)
    }

    /// Database handle and a change receiver registered before any query
    /// runs, so no write between the two is missed.
    pub(crate) fn listen(&self) -> Option<(SharedDb, broadcast::Receiver<Change>)> {
        let db = self.db.as_ref()?;
        let changes = subscribe_changes(db)?;
        Some((Arc::clone(db), changes))
    }
}

pub(crate) fn lock(db: &SharedDb) -> Result<MutexGuard<'_, Database>> {
    db.lock().map_err(|_| ClientError::LockPoisoned)
}

pub(crate) fn subscribe_changes(db: &SharedDb) -> Option<broadcast::Receiver<Change>> {
    match db.lock() {
        Ok(guard) => Some(guard.subscribe_changes()),
        Err(_) => {
            tracing::error!("Database lock poisoned, cannot subscribe to changes");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_backend_skips_work() {
        let backend = Backend::offline();
        assert!(!backend.is_configured());
        let ran = backend.with_db(|_| Ok(42)).unwrap();
        assert_eq!(ran, None);
        assert!(backend.listen().is_none());
    }

    #[test]
    fn configured_backend_runs_closure() {
        let backend = Backend::new(Database::open_in_memory().unwrap()).with_buffer(0);
        assert_eq!(backend.buffer(), 1);
        let users = backend.with_db(|db| Ok(db.list_users(10)?.len())).unwrap();
        assert_eq!(users, Some(0));
    }
}
