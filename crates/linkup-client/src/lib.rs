//! LinkUp client core: chat, friend and post services, live unread counts
//! and the activity feed, all on top of the local store.
//!
//! Everything hangs off a [`LinkUp`] session. A session opened in offline
//! mode has no backend; its services do nothing and its subscriptions emit
//! one empty snapshot.

pub mod activity;
pub mod chats;
pub mod config;
pub mod error;
pub mod events;
pub mod friends;
pub mod live;
pub mod posts;
pub mod state;
pub mod unread;
pub mod users;

use linkup_shared::UserId;
use linkup_store::Database;
use tracing_subscriber::{fmt, EnvFilter};

pub use activity::{ActivityComposer, ActivityItem, ActivityKind, Actor};
pub use chats::{ChatService, MessageDraft};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use friends::FriendService;
pub use live::Subscription;
pub use posts::PostService;
pub use state::Backend;
pub use unread::{UnreadAggregator, UnreadSummary};
pub use users::UserService;

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling this twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("linkup_client=debug,linkup_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// A client session.
pub struct LinkUp {
    backend: Backend,
    config: ClientConfig,
}

impl LinkUp {
    /// Open the store described by `config`, or start offline.
    pub fn open(config: ClientConfig) -> Result<Self> {
        if config.offline {
            tracing::info!("Starting in offline mode");
            return Ok(Self::offline(config));
        }

        let path = match &config.db_path {
            Some(path) => path.clone(),
            None => Database::default_path()?,
        };
        let db = Database::open_at_with_capacity(&path, config.change_feed_capacity)?;
        tracing::info!(path = %path.display(), "Database opened");
        Ok(Self::with_database(db, config))
    }

    pub fn with_database(db: Database, config: ClientConfig) -> Self {
        Self {
            backend: Backend::new(db).with_buffer(config.subscription_buffer),
            config,
        }
    }

    pub fn offline(config: ClientConfig) -> Self {
        Self {
            backend: Backend::offline().with_buffer(config.subscription_buffer),
            config,
        }
    }

    pub fn is_offline(&self) -> bool {
        !self.backend.is_configured()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn chats(&self) -> ChatService {
        ChatService::new(self.backend.clone())
    }

    pub fn friends(&self) -> FriendService {
        FriendService::new(self.backend.clone())
    }

    pub fn posts(&self) -> PostService {
        PostService::new(self.backend.clone())
    }

    pub fn users(&self) -> UserService {
        UserService::new(self.backend.clone())
    }

    pub fn unread(&self, user: UserId) -> UnreadAggregator {
        UnreadAggregator::new(self.backend.clone(), user)
    }

    pub fn activity(&self, viewer: UserId) -> ActivityComposer {
        ActivityComposer::new(self.backend.clone(), viewer, self.config.activity_limit)
    }
}
