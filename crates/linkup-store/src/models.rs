//! Document models persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use linkup_shared::constants::DELETED_MESSAGE_PLACEHOLDER;
use linkup_shared::{pair_key, ChatId, ChatKind, MessageKind, RequestStatus, Role, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
    /// When the user joined the platform.
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Denormalized copy of a chat's newest message, kept for list rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub id: Uuid,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// A conversation, either direct (two users) or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    /// Display name, groups only.
    pub name: Option<String>,
    /// Participants in join order.
    pub participants: Vec<UserId>,
    /// Group admins. Always empty for direct chats.
    pub admins: Vec<UserId>,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn is_direct(&self) -> bool {
        self.kind == ChatKind::Direct
    }

    pub fn contains(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.admins.contains(user)
    }

    /// The other side of a direct chat.
    pub fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if !self.is_direct() || !self.contains(user) {
            return None;
        }
        self.participants.iter().find(|p| *p != user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub url: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

/// Points at the message being replied to, with a short preview so the
/// reply renders without fetching the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    pub message_id: Uuid,
    pub sender_id: UserId,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardRef {
    pub message_id: Uuid,
    pub sender_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    /// Assigned by the store when the message is written.
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Users who have seen the message. Starts as `{sender}`.
    pub read_by: BTreeSet<UserId>,
    /// Users who deleted the message for themselves only.
    pub hidden_for: BTreeSet<UserId>,
    pub deleted_for_everyone: bool,
    pub reply_to: Option<ReplyRef>,
    pub forwarded_from: Option<ForwardRef>,
}

impl Message {
    /// A message is unread for `user` when someone else sent it, `user` has
    /// not read it, and it is not deleted from `user`'s point of view.
    pub fn is_unread_for(&self, user: &UserId) -> bool {
        &self.sender_id != user
            && !self.read_by.contains(user)
            && self.is_visible_to(user)
    }

    pub fn is_visible_to(&self, user: &UserId) -> bool {
        !self.deleted_for_everyone && !self.hidden_for.contains(user)
    }

    /// Content as a reader sees it: tombstoned messages show a placeholder.
    pub fn display_content(&self) -> &str {
        if self.deleted_for_everyone {
            DELETED_MESSAGE_PLACEHOLDER
        } else {
            &self.content
        }
    }

    pub fn snapshot(&self) -> LastMessage {
        LastMessage {
            id: self.id,
            sender_id: self.sender_id.clone(),
            content: self.display_content().to_string(),
            kind: self.kind,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Friendships
// ---------------------------------------------------------------------------

/// Symmetric relation keyed by the sorted pair of user ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub id: String,
    /// The pair, lower id first.
    pub users: (UserId, UserId),
    pub created_at: DateTime<Utc>,
}

impl Friendship {
    pub fn new(a: &UserId, b: &UserId, created_at: DateTime<Utc>) -> Self {
        let users = if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        Self {
            id: pair_key(a, b),
            users,
            created_at,
        }
    }

    /// The friend of `user` in this pair.
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        if &self.users.0 == user {
            Some(&self.users.1)
        } else if &self.users.1 == user {
            Some(&self.users.0)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FriendRequest {
    pub id: Uuid,
    pub from: UserId,
    pub to: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FriendRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
