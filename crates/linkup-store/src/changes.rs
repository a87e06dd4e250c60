//! Change notifications published after every committed write.
//!
//! A [`Change`] names the document (or collection slice) that moved, never
//! its new contents: listeners re-run their query when a change concerns
//! them.

use linkup_shared::{ChatId, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A chat was created, updated, deleted, or its participant list changed.
    /// `participants` also lists users that were just removed.
    Chat {
        chat_id: ChatId,
        participants: Vec<UserId>,
    },
    /// Messages of a chat were inserted, read, edited, hidden or deleted.
    Messages { chat_id: ChatId },
    /// A friendship between two users was created or removed.
    Friendship { users: (UserId, UserId) },
    /// A friend request was created or changed status.
    FriendRequest { from: UserId, to: UserId },
    /// A post by this author was created or deleted.
    Post { author_id: UserId },
    /// A user record was created or updated.
    User { user_id: UserId },
}

impl Change {
    /// Whether this change can alter the set of chats `user` belongs to, or
    /// the metadata of one of them.
    pub fn concerns_member(&self, user: &UserId) -> bool {
        matches!(self, Change::Chat { participants, .. } if participants.contains(user))
    }

    /// Whether this change touches the chat document or its messages.
    pub fn concerns_chat(&self, chat: &ChatId) -> bool {
        match self {
            Change::Chat { chat_id, .. } | Change::Messages { chat_id } => chat_id == chat,
            _ => false,
        }
    }

    pub fn concerns_messages_of(&self, chat: &ChatId) -> bool {
        matches!(self, Change::Messages { chat_id } if chat_id == chat)
    }

    pub fn concerns_friendships_of(&self, user: &UserId) -> bool {
        matches!(self, Change::Friendship { users: (a, b) } if a == user || b == user)
    }

    pub fn is_post(&self) -> bool {
        matches!(self, Change::Post { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Change::User { .. })
    }
}
