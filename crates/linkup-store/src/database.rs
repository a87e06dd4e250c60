//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the broadcast
//! change feed: every CRUD helper that commits a write publishes a
//! [`Change`] after the commit, so a listener that re-queries on receipt
//! always observes the new state.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use linkup_shared::constants::DEFAULT_CHANGE_FEED_CAPACITY;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::changes::Change;
use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] plus its change feed.
pub struct Database {
    conn: Connection,
    changes: broadcast::Sender<Change>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/linkup/linkup.db`
    /// - macOS:   `~/Library/Application Support/com.linkup.linkup/linkup.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\linkup\linkup\data\linkup.db`
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        tracing::info!(path = %db_path.display(), "opening database");
        Self::open_at(&db_path)
    }

    /// Location used by [`Database::new`]. The parent directory is created.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "linkup", "linkup").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("linkup.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        Self::open_at_with_capacity(path, DEFAULT_CHANGE_FEED_CAPACITY)
    }

    /// Like [`Database::open_at`] with a custom change feed capacity.
    pub fn open_at_with_capacity(path: &Path, change_capacity: usize) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, change_capacity)
    }

    /// Private in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_capacity(DEFAULT_CHANGE_FEED_CAPACITY)
    }

    pub fn open_in_memory_with_capacity(change_capacity: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, change_capacity)
    }

    fn init(conn: Connection, change_capacity: usize) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;

        let (changes, _) = broadcast::channel(change_capacity.max(1));
        Ok(Self { conn, changes })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers; writes made through the
    /// raw connection publish no [`Change`].
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Receive every change published after this call.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    /// Publish a change. Having no listener is not an error.
    pub fn publish(&self, change: Change) {
        tracing::trace!(?change, "publishing change");
        let _ = self.changes.send(change);
    }
}
