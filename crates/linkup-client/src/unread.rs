//! Unread counts across every chat a user belongs to.
//!
//! The aggregator task owns one listener for the user's chat membership and
//! one per chat for its messages. Whenever any of them reports, the full
//! per-chat mapping is re-emitted. Chats the user leaves drop their
//! listener; new chats get one.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use linkup_shared::{ChatId, UserId};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chats::ChatService;
use crate::error::Result;
use crate::live::{spawn_query, Listener, Subscription};
use crate::state::{subscribe_changes, Backend, SharedDb};

/// Unread messages per chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnreadSummary {
    pub per_chat: BTreeMap<ChatId, usize>,
}

impl UnreadSummary {
    pub fn total(&self) -> usize {
        self.per_chat.values().sum()
    }

    pub fn count(&self, chat_id: &ChatId) -> usize {
        self.per_chat.get(chat_id).copied().unwrap_or(0)
    }
}

/// Live unread state of one user.
///
/// The last summary produced by [`UnreadAggregator::subscribe`] is kept on
/// the instance and backs [`UnreadAggregator::total_unread_count`].
pub struct UnreadAggregator {
    backend: Backend,
    user: UserId,
    chats: ChatService,
    latest: Arc<Mutex<UnreadSummary>>,
}

impl UnreadAggregator {
    pub fn new(backend: Backend, user: UserId) -> Self {
        Self {
            chats: ChatService::new(backend.clone()),
            backend,
            user,
            latest: Arc::new(Mutex::new(UnreadSummary::default())),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Live unread summary of the user. Emits once the membership is known,
    /// then after every change to the membership or to a member chat.
    pub fn subscribe(&self) -> Subscription<UnreadSummary> {
        let Some((db, changes)) = self.backend.listen() else {
            return Subscription::once(UnreadSummary::default());
        };

        let (membership_tx, membership_rx) = mpsc::channel(self.backend.buffer());
        let watched = self.user.clone();
        let user = self.user.clone();
        let membership = spawn_query(
            Arc::clone(&db),
            changes,
            move |change| change.concerns_member(&watched),
            move |db| Ok(db.list_chat_ids_for_user(&user)?),
            membership_tx,
        );

        let (tx, rx) = mpsc::channel(self.backend.buffer());
        let task = tokio::spawn(run_aggregator(
            db,
            self.user.clone(),
            membership,
            membership_rx,
            Arc::clone(&self.latest),
            self.backend.buffer(),
            tx,
        ));
        Subscription::new(rx, task)
    }

    /// Mark every message of `chat_id` as read by this user. Returns the
    /// number of messages newly marked. Other chats are not touched.
    pub async fn mark_chat_as_read(&self, chat_id: &ChatId) -> Result<usize> {
        self.chats.mark_chat_as_read(chat_id, &self.user).await
    }

    /// Sum of the counts in the last emitted summary.
    pub fn total_unread_count(&self) -> usize {
        self.summary().total()
    }

    /// Last emitted summary.
    pub fn summary(&self) -> UnreadSummary {
        match self.latest.lock() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Compute the summary straight from the store, bypassing the live
    /// state.
    pub async fn fetch(&self) -> Result<UnreadSummary> {
        Ok(self
            .backend
            .with_db(|db| {
                let per_chat = db.unread_counts_for_user(&self.user)?.into_iter().collect();
                Ok(UnreadSummary { per_chat })
            })?
            .unwrap_or_default())
    }
}

async fn run_aggregator(
    db: SharedDb,
    user: UserId,
    _membership: Listener,
    mut membership_rx: mpsc::Receiver<Vec<ChatId>>,
    latest: Arc<Mutex<UnreadSummary>>,
    buffer: usize,
    tx: mpsc::Sender<UnreadSummary>,
) {
    let (count_tx, mut count_rx) = mpsc::channel::<(ChatId, usize)>(buffer);
    let mut sources: HashMap<ChatId, Listener> = HashMap::new();
    let mut summary = UnreadSummary::default();

    loop {
        tokio::select! {
            Some(chat_ids) = membership_rx.recv() => {
                sources.retain(|id, _| chat_ids.contains(id));
                summary.per_chat.retain(|id, _| chat_ids.contains(id));

                for chat_id in chat_ids {
                    if sources.contains_key(&chat_id) {
                        continue;
                    }
                    let Some(changes) = subscribe_changes(&db) else {
                        continue;
                    };
                    let listener = spawn_chat_count(&db, changes, chat_id.clone(), user.clone(), count_tx.clone());
                    sources.insert(chat_id, listener);
                }
                debug!(user = %user, chats = sources.len(), "Unread membership updated");
            }
            Some((chat_id, count)) = count_rx.recv() => {
                // Ticks from a chat the user already left.
                if !sources.contains_key(&chat_id) {
                    continue;
                }
                summary.per_chat.insert(chat_id, count);
            }
            else => break,
        }

        match latest.lock() {
            Ok(mut latest) => *latest = summary.clone(),
            Err(_) => warn!("Unread state lock poisoned"),
        }
        if tx.send(summary.clone()).await.is_err() {
            break;
        }
    }
}

fn spawn_chat_count(
    db: &SharedDb,
    changes: tokio::sync::broadcast::Receiver<linkup_store::Change>,
    chat_id: ChatId,
    user: UserId,
    tx: mpsc::Sender<(ChatId, usize)>,
) -> Listener {
    let watched = chat_id.clone();
    spawn_query(
        Arc::clone(db),
        changes,
        move |change| change.concerns_messages_of(&watched),
        move |db| Ok((chat_id.clone(), db.count_unread(&chat_id, &user)?)),
        tx,
    )
}
