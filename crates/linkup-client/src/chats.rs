//! Chat membership and message access.
//!
//! Direct chats are keyed by the sorted pair of participant ids, so creating
//! one twice (in either order) yields the same chat. Sending into a direct
//! chat requires a friendship unless the sender holds an elevated role.

use std::collections::BTreeSet;

use linkup_shared::constants::MESSAGE_PAGE_SIZE;
use linkup_shared::validation::{
    reply_preview, validate_direct_participants, validate_group_name, validate_group_participants,
    validate_message_content,
};
use linkup_shared::{ChatId, ChatKind, DeleteScope, MessageKind, UserId};
use linkup_store::{now, Attachment, Chat, Database, ForwardRef, Message, ReplyRef};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::live::{self, Subscription};
use crate::state::Backend;

/// Content of a message about to be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<Attachment>,
    /// Id of a message in the same chat this one answers.
    pub reply_to: Option<Uuid>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_attachment(mut self, kind: MessageKind, attachment: Attachment) -> Self {
        self.kind = kind;
        self.attachments.push(attachment);
        self
    }

    pub fn replying_to(mut self, message_id: Uuid) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[derive(Clone)]
pub struct ChatService {
    backend: Backend,
}

impl ChatService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Create a chat, or return the existing direct chat between the same
    /// two users.
    ///
    /// Groups always get a new id and their first participant becomes the
    /// only admin. `name` is ignored for direct chats.
    pub async fn create_or_get_chat(
        &self,
        participants: &[UserId],
        name: Option<&str>,
        is_group: bool,
    ) -> Result<Option<ChatId>> {
        // Validate before touching the backend so bad input fails offline too.
        let chat = if is_group {
            let members = validate_group_participants(participants)?;
            let name = match name {
                Some(name) => {
                    validate_group_name(name)?;
                    Some(name.trim().to_string())
                }
                None => None,
            };
            new_chat(ChatId::group(), ChatKind::Group, name, members)
        } else {
            let (a, b) = validate_direct_participants(participants)?;
            new_chat(ChatId::direct(&a, &b), ChatKind::Direct, None, vec![a, b])
        };

        self.backend.with_db(|db| {
            if db.insert_chat(&chat)? {
                info!(chat_id = %chat.id, kind = %chat.kind, "Chat created");
            } else {
                debug!(chat_id = %chat.id, "Chat already exists");
            }
            Ok(chat.id.clone())
        })
    }

    pub async fn get_chat(&self, chat_id: &ChatId) -> Result<Option<Chat>> {
        Ok(self.backend.with_db(|db| Ok(db.find_chat(chat_id)?))?.flatten())
    }

    /// Chats of `user`, most recently active first.
    pub async fn list_chats(&self, user: &UserId) -> Result<Vec<Chat>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_chats_for_user(user)?))?
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Send a message. The message and the chat's last-message snapshot are
    /// written in one transaction.
    pub async fn send_message(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        draft: MessageDraft,
    ) -> Result<Option<Uuid>> {
        validate_message_content(&draft.content, !draft.attachments.is_empty())?;

        self.backend.with_db(|db| {
            let chat = writable_chat(db, chat_id, sender)?;

            let reply_to = match draft.reply_to {
                Some(id) => {
                    let original = db
                        .find_message(id)?
                        .filter(|m| &m.chat_id == chat_id && m.is_visible_to(sender))
                        .ok_or(ClientError::MessageNotFound(id))?;
                    Some(ReplyRef {
                        message_id: original.id,
                        sender_id: original.sender_id.clone(),
                        preview: reply_preview(original.display_content()),
                    })
                }
                None => None,
            };

            let mut message = new_message(&chat, sender, draft.content, draft.kind);
            message.attachments = draft.attachments;
            message.reply_to = reply_to;

            db.insert_message(&message)?;
            debug!(chat_id = %chat_id, message_id = %message.id, "Message sent");
            Ok(message.id)
        })
    }

    /// Copy a message into another chat, recording where it came from.
    /// The same rules as [`ChatService::send_message`] apply to the target.
    pub async fn forward_message(
        &self,
        message_id: Uuid,
        target: &ChatId,
        sender: &UserId,
    ) -> Result<Option<Uuid>> {
        self.backend.with_db(|db| {
            let original = db
                .find_message(message_id)?
                .ok_or(ClientError::MessageNotFound(message_id))?;

            let source = db
                .find_chat(&original.chat_id)?
                .ok_or_else(|| ClientError::ChatNotFound(original.chat_id.clone()))?;
            if !source.contains(sender) || !original.is_visible_to(sender) {
                return Err(ClientError::MessageNotFound(message_id));
            }
            if original.deleted_for_everyone {
                return Err(ClientError::MessageDeleted);
            }

            let chat = writable_chat(db, target, sender)?;

            let mut message = new_message(&chat, sender, original.content.clone(), original.kind);
            message.attachments = original.attachments.clone();
            message.forwarded_from = Some(ForwardRef {
                message_id: original.id,
                sender_id: original.sender_id.clone(),
            });

            db.insert_message(&message)?;
            debug!(
                from_chat = %original.chat_id,
                to_chat = %target,
                message_id = %message.id,
                "Message forwarded"
            );
            Ok(message.id)
        })
    }

    /// Replace the text of a message. Only the sender may edit, and
    /// tombstoned messages stay deleted.
    pub async fn edit_message(&self, message_id: Uuid, editor: &UserId, content: &str) -> Result<()> {
        let message = self.backend.with_db(|db| {
            let message = db
                .find_message(message_id)?
                .ok_or(ClientError::MessageNotFound(message_id))?;
            if &message.sender_id != editor {
                return Err(ClientError::NotMessageOwner);
            }
            if message.deleted_for_everyone {
                return Err(ClientError::MessageDeleted);
            }
            validate_message_content(content, !message.attachments.is_empty())?;

            db.edit_message(&message, content, now())?;
            Ok(message)
        })?;

        if let Some(message) = message {
            debug!(chat_id = %message.chat_id, message_id = %message.id, "Message edited");
        }
        Ok(())
    }

    /// Delete a message.
    ///
    /// `Everyone` tombstones the message for all readers and is reserved to
    /// its sender. `SenderOnly` hides it for `user` alone. Both are
    /// idempotent.
    pub async fn delete_message(&self, message_id: Uuid, scope: DeleteScope, user: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let message = db
                .find_message(message_id)?
                .ok_or(ClientError::MessageNotFound(message_id))?;

            match scope {
                DeleteScope::Everyone => {
                    if &message.sender_id != user {
                        return Err(ClientError::NotMessageOwner);
                    }
                    if db.tombstone_message(&message, now())? {
                        info!(chat_id = %message.chat_id, message_id = %message.id, "Message deleted for everyone");
                    }
                }
                DeleteScope::SenderOnly => {
                    let chat = db.find_chat(&message.chat_id)?;
                    if !chat.is_some_and(|c| c.contains(user)) {
                        return Err(ClientError::NotParticipant {
                            chat: message.chat_id.clone(),
                            user: user.clone(),
                        });
                    }
                    if db.hide_message_for(&message, user, now())? {
                        debug!(message_id = %message.id, user = %user, "Message hidden for user");
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Messages of a chat as `viewer` sees them, newest first. Messages the
    /// viewer hid are left out; tombstoned ones stay in place (render them
    /// with [`Message::display_content`]).
    pub async fn messages_for(
        &self,
        chat_id: &ChatId,
        viewer: &UserId,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(MESSAGE_PAGE_SIZE);
        Ok(self
            .backend
            .with_db(|db| {
                let chat = db
                    .find_chat(chat_id)?
                    .ok_or_else(|| ClientError::ChatNotFound(chat_id.clone()))?;
                ensure_participant(&chat, viewer)?;
                Ok(db.get_visible_messages_for_chat(chat_id, viewer, limit, offset)?)
            })?
            .unwrap_or_default())
    }

    /// Add `user` to every message's read-by set in the chat. Returns the
    /// number of messages newly marked.
    ///
    /// A missing chat or a non-member caller is a no-op returning 0.
    pub async fn mark_chat_as_read(&self, chat_id: &ChatId, user: &UserId) -> Result<usize> {
        Ok(self
            .backend
            .with_db(|db| {
                match db.find_chat(chat_id)? {
                    Some(chat) if chat.contains(user) => {}
                    Some(_) => {
                        debug!(chat_id = %chat_id, user = %user, "Not a participant, nothing to mark");
                        return Ok(0);
                    }
                    None => {
                        debug!(chat_id = %chat_id, "Chat not found, nothing to mark");
                        return Ok(0);
                    }
                }
                let marked = db.mark_chat_read(chat_id, user, now())?;
                if marked > 0 {
                    debug!(chat_id = %chat_id, user = %user, marked, "Chat marked as read");
                }
                Ok(marked)
            })?
            .unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Chat lifecycle
    // ------------------------------------------------------------------

    /// Delete a chat from `user`'s point of view.
    ///
    /// Direct chats are removed for both sides together with every message.
    /// Leaving a group only removes `user`; the group is deleted once empty.
    pub async fn delete_chat(&self, chat_id: &ChatId, user: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let Some(chat) = db.find_chat(chat_id)? else {
                debug!(chat_id = %chat_id, "Chat not found, nothing to delete");
                return Ok(());
            };
            ensure_participant(&chat, user)?;

            if chat.is_direct() {
                db.delete_chat(chat_id)?;
                info!(chat_id = %chat_id, "Direct chat deleted");
                Ok(())
            } else {
                leave_group(db, &chat, user)
            }
        })?;
        Ok(())
    }

    /// Add `user` to a group. Only admins may add participants.
    pub async fn add_participant(&self, chat_id: &ChatId, actor: &UserId, user: &UserId) -> Result<()> {
        if user.as_str().trim().is_empty() {
            return Err(linkup_shared::ValidationError::EmptyUserId.into());
        }
        self.backend.with_db(|db| {
            let chat = group_chat(db, chat_id)?;
            ensure_admin(&chat, actor)?;
            if db.add_participant(chat_id, user, now())? {
                info!(chat_id = %chat_id, user = %user, "Participant added");
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Remove `user` from a group. Admins may remove anyone; everybody may
    /// remove themselves.
    pub async fn remove_participant(&self, chat_id: &ChatId, actor: &UserId, user: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let chat = group_chat(db, chat_id)?;
            if actor != user {
                ensure_admin(&chat, actor)?;
            }
            if !chat.contains(user) {
                return Ok(());
            }
            leave_group(db, &chat, user)
        })?;
        Ok(())
    }

    pub async fn promote_admin(&self, chat_id: &ChatId, actor: &UserId, user: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let chat = group_chat(db, chat_id)?;
            ensure_admin(&chat, actor)?;
            ensure_participant(&chat, user)?;
            if db.set_admin(chat_id, user, true)? {
                info!(chat_id = %chat_id, user = %user, "Participant promoted to admin");
            }
            Ok(())
        })?;
        Ok(())
    }

    pub async fn rename_group(&self, chat_id: &ChatId, actor: &UserId, name: &str) -> Result<()> {
        validate_group_name(name)?;
        self.backend.with_db(|db| {
            let chat = group_chat(db, chat_id)?;
            ensure_admin(&chat, actor)?;
            db.rename_chat(chat_id, name.trim(), now())?;
            Ok(())
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Live views
    // ------------------------------------------------------------------

    /// Live list of `user`'s chats, most recently active first.
    pub fn subscribe_chats(&self, user: &UserId) -> Subscription<Vec<Chat>> {
        let Some((db, changes)) = self.backend.listen() else {
            return Subscription::once(Vec::new());
        };
        let watched = user.clone();
        let user = user.clone();
        live::subscribe(
            db,
            changes,
            self.backend.buffer(),
            move |change| change.concerns_member(&watched),
            move |db| Ok(db.list_chats_for_user(&user)?),
        )
    }

    /// Live page of the newest messages of a chat as `viewer` sees them.
    pub fn subscribe_messages(&self, chat_id: &ChatId, viewer: &UserId) -> Subscription<Vec<Message>> {
        let Some((db, changes)) = self.backend.listen() else {
            return Subscription::once(Vec::new());
        };
        let watched = chat_id.clone();
        let chat_id = chat_id.clone();
        let viewer = viewer.clone();
        live::subscribe(
            db,
            changes,
            self.backend.buffer(),
            move |change| change.concerns_chat(&watched),
            move |db| {
                match db.find_chat(&chat_id)? {
                    Some(chat) if chat.contains(&viewer) => {}
                    _ => return Ok(Vec::new()),
                }
                Ok(db.get_visible_messages_for_chat(&chat_id, &viewer, MESSAGE_PAGE_SIZE, 0)?)
            },
        )
    }
}

fn new_chat(id: ChatId, kind: ChatKind, name: Option<String>, participants: Vec<UserId>) -> Chat {
    let ts = now();
    let admins = match kind {
        ChatKind::Group => participants.first().cloned().into_iter().collect(),
        ChatKind::Direct => Vec::new(),
    };
    Chat {
        id,
        kind,
        name,
        participants,
        admins,
        last_message: None,
        created_at: ts,
        updated_at: ts,
    }
}

fn new_message(chat: &Chat, sender: &UserId, content: String, kind: MessageKind) -> Message {
    Message {
        id: Uuid::new_v4(),
        chat_id: chat.id.clone(),
        sender_id: sender.clone(),
        content,
        kind,
        attachments: Vec::new(),
        created_at: now(),
        edited_at: None,
        read_by: BTreeSet::from([sender.clone()]),
        hidden_for: BTreeSet::new(),
        deleted_for_everyone: false,
        reply_to: None,
        forwarded_from: None,
    }
}

/// Load a chat `sender` may post into: they must participate, and direct
/// chats need a friendship unless `sender` has an elevated role.
fn writable_chat(db: &Database, chat_id: &ChatId, sender: &UserId) -> Result<Chat> {
    let chat = db
        .find_chat(chat_id)?
        .ok_or_else(|| ClientError::ChatNotFound(chat_id.clone()))?;
    ensure_participant(&chat, sender)?;

    if let Some(other) = chat.counterpart(sender) {
        if !db.role_of(sender)?.is_elevated() && !db.are_friends(sender, other)? {
            debug!(chat_id = %chat_id, sender = %sender, "Rejected message between non-friends");
            return Err(ClientError::NotFriends(sender.clone(), other.clone()));
        }
    }
    Ok(chat)
}

fn group_chat(db: &Database, chat_id: &ChatId) -> Result<Chat> {
    let chat = db
        .find_chat(chat_id)?
        .ok_or_else(|| ClientError::ChatNotFound(chat_id.clone()))?;
    if chat.is_direct() {
        return Err(ClientError::NotAGroup(chat_id.clone()));
    }
    Ok(chat)
}

fn ensure_participant(chat: &Chat, user: &UserId) -> Result<()> {
    if chat.contains(user) {
        Ok(())
    } else {
        Err(ClientError::NotParticipant {
            chat: chat.id.clone(),
            user: user.clone(),
        })
    }
}

fn ensure_admin(chat: &Chat, user: &UserId) -> Result<()> {
    if chat.is_admin(user) {
        Ok(())
    } else {
        Err(ClientError::NotGroupAdmin {
            chat: chat.id.clone(),
            user: user.clone(),
        })
    }
}

/// Remove `user` from a group. An emptied group is deleted; a group left
/// without admins hands the role to its earliest remaining participant.
fn leave_group(db: &Database, chat: &Chat, user: &UserId) -> Result<()> {
    let remaining: Vec<&UserId> = chat.participants.iter().filter(|p| *p != user).collect();

    if remaining.is_empty() {
        db.delete_chat(&chat.id)?;
        info!(chat_id = %chat.id, "Last participant left, group deleted");
        return Ok(());
    }

    db.remove_participant(&chat.id, user, now())?;
    info!(chat_id = %chat.id, user = %user, "Participant left group");

    let admins_left = chat.admins.iter().any(|a| a != user);
    if !admins_left {
        let successor = remaining[0];
        db.set_admin(&chat.id, successor, true)?;
        info!(chat_id = %chat.id, admin = %successor, "Admin role handed over");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use linkup_shared::Role;
    use linkup_store::{Friendship, User};

    use super::*;

    pub(crate) fn backend() -> Backend {
        Backend::new(Database::open_in_memory().unwrap())
    }

    pub(crate) fn befriend(backend: &Backend, a: &str, b: &str) {
        backend
            .with_db(|db| {
                db.insert_friendship(&Friendship::new(&UserId::from(a), &UserId::from(b), now()))?;
                Ok(())
            })
            .unwrap();
    }

    pub(crate) fn register(backend: &Backend, id: &str, role: Role) {
        backend
            .with_db(|db| {
                db.upsert_user(&User {
                    id: UserId::from(id),
                    display_name: id.to_uppercase(),
                    role,
                    created_at: now(),
                })?;
                Ok(())
            })
            .unwrap();
    }

    fn ids(list: &[&str]) -> Vec<UserId> {
        list.iter().map(|s| UserId::from(*s)).collect()
    }

    fn count_messages(backend: &Backend, chat: &ChatId) -> usize {
        backend
            .with_db(|db| Ok(db.get_messages_for_chat(chat, 1000, 0)?.len()))
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn direct_chat_creation_is_idempotent() {
        let service = ChatService::new(backend());
        let first = service
            .create_or_get_chat(&ids(&["zed", "amy"]), None, false)
            .await
            .unwrap()
            .unwrap();
        let second = service
            .create_or_get_chat(&ids(&["amy", "zed"]), Some("ignored"), false)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str(), "amy_zed");
        assert_eq!(service.list_chats(&UserId::from("amy")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_participants_are_rejected() {
        let service = ChatService::new(backend());
        let err = service
            .create_or_get_chat(&ids(&["amy", "amy"]), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));

        let err = service
            .create_or_get_chat(&ids(&["a", "b", "c"]), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));
    }

    #[tokio::test]
    async fn groups_get_fresh_ids_and_creator_admin() {
        let service = ChatService::new(backend());
        let members = ids(&["owner", "b", "c"]);
        let g1 = service
            .create_or_get_chat(&members, Some(" Team "), true)
            .await
            .unwrap()
            .unwrap();
        let g2 = service
            .create_or_get_chat(&members, Some("Team"), true)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(g1, g2);

        let chat = service.get_chat(&g1).await.unwrap().unwrap();
        assert_eq!(chat.name.as_deref(), Some("Team"));
        assert_eq!(chat.admins, ids(&["owner"]));
    }

    #[tokio::test]
    async fn friend_gate_blocks_direct_messages_between_strangers() {
        let backend = backend();
        let service = ChatService::new(backend.clone());
        let chat = service
            .create_or_get_chat(&ids(&["amy", "bob"]), None, false)
            .await
            .unwrap()
            .unwrap();

        let err = service
            .send_message(&chat, &UserId::from("amy"), MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFriends(_, _)));
        assert_eq!(count_messages(&backend, &chat), 0);
        assert!(service.get_chat(&chat).await.unwrap().unwrap().last_message.is_none());

        befriend(&backend, "bob", "amy");
        let sent = service
            .send_message(&chat, &UserId::from("amy"), MessageDraft::text("hi"))
            .await
            .unwrap();
        assert!(sent.is_some());
        assert_eq!(count_messages(&backend, &chat), 1);
    }

    #[tokio::test]
    async fn elevated_roles_skip_friend_gate() {
        let backend = backend();
        register(&backend, "support", Role::Support);
        let service = ChatService::new(backend.clone());
        let chat = service
            .create_or_get_chat(&ids(&["support", "user"]), None, false)
            .await
            .unwrap()
            .unwrap();

        service
            .send_message(&chat, &UserId::from("support"), MessageDraft::text("hello"))
            .await
            .unwrap();
        let err = service
            .send_message(&chat, &UserId::from("user"), MessageDraft::text("hey"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFriends(_, _)));
    }

    #[tokio::test]
    async fn outsiders_cannot_send() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["a", "b"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let err = service
            .send_message(&group, &UserId::from("mallory"), MessageDraft::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn sending_updates_last_message_snapshot() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["a", "b"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let id = service
            .send_message(&group, &UserId::from("b"), MessageDraft::text("latest"))
            .await
            .unwrap()
            .unwrap();

        let chat = service.get_chat(&group).await.unwrap().unwrap();
        let last = chat.last_message.unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.content, "latest");
        assert_eq!(chat.updated_at, last.created_at);
    }

    #[tokio::test]
    async fn deleting_direct_chat_removes_it_for_both() {
        let backend = backend();
        befriend(&backend, "amy", "bob");
        let service = ChatService::new(backend.clone());
        let chat = service
            .create_or_get_chat(&ids(&["amy", "bob"]), None, false)
            .await
            .unwrap()
            .unwrap();
        for text in ["one", "two"] {
            service
                .send_message(&chat, &UserId::from("bob"), MessageDraft::text(text))
                .await
                .unwrap();
        }

        service.delete_chat(&chat, &UserId::from("amy")).await.unwrap();

        assert!(service.get_chat(&chat).await.unwrap().is_none());
        assert!(service.list_chats(&UserId::from("bob")).await.unwrap().is_empty());
        assert_eq!(count_messages(&backend, &chat), 0);
    }

    #[tokio::test]
    async fn leaving_group_keeps_it_for_the_rest() {
        let service = ChatService::new(backend());
        let members = ids(&["u1", "u2", "u3", "u4", "u5"]);
        let group = service
            .create_or_get_chat(&members, Some("five"), true)
            .await
            .unwrap()
            .unwrap();

        service.delete_chat(&group, &UserId::from("u3")).await.unwrap();

        let chat = service.get_chat(&group).await.unwrap().unwrap();
        assert_eq!(chat.participants, ids(&["u1", "u2", "u4", "u5"]));
        assert!(service.list_chats(&UserId::from("u3")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_admin_leaving_hands_over_and_empty_group_is_deleted() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["admin", "next"]), None, true)
            .await
            .unwrap()
            .unwrap();

        service.delete_chat(&group, &UserId::from("admin")).await.unwrap();
        let chat = service.get_chat(&group).await.unwrap().unwrap();
        assert_eq!(chat.admins, ids(&["next"]));

        service.delete_chat(&group, &UserId::from("next")).await.unwrap();
        assert!(service.get_chat(&group).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn group_management_requires_admin() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["admin", "member"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let admin = UserId::from("admin");
        let member = UserId::from("member");
        let newcomer = UserId::from("newcomer");

        let err = service.add_participant(&group, &member, &newcomer).await.unwrap_err();
        assert!(matches!(err, ClientError::NotGroupAdmin { .. }));

        service.add_participant(&group, &admin, &newcomer).await.unwrap();
        service.rename_group(&group, &admin, "Renamed").await.unwrap();
        service.promote_admin(&group, &admin, &member).await.unwrap();
        service.remove_participant(&group, &member, &newcomer).await.unwrap();
        // Leaving is always allowed.
        service.remove_participant(&group, &member, &member).await.unwrap();

        let chat = service.get_chat(&group).await.unwrap().unwrap();
        assert_eq!(chat.name.as_deref(), Some("Renamed"));
        assert_eq!(chat.participants, vec![admin]);
    }

    #[tokio::test]
    async fn delete_scopes_are_respected() {
        let backend = backend();
        let service = ChatService::new(backend.clone());
        let group = service
            .create_or_get_chat(&ids(&["a", "b", "c"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let (a, b, c) = (UserId::from("a"), UserId::from("b"), UserId::from("c"));

        let hidden = service
            .send_message(&group, &a, MessageDraft::text("hide me"))
            .await
            .unwrap()
            .unwrap();
        service
            .delete_message(hidden, DeleteScope::SenderOnly, &b)
            .await
            .unwrap();
        // Idempotent.
        service
            .delete_message(hidden, DeleteScope::SenderOnly, &b)
            .await
            .unwrap();

        let seen_by_b = service.messages_for(&group, &b, None, 0).await.unwrap();
        let seen_by_c = service.messages_for(&group, &c, None, 0).await.unwrap();
        assert!(seen_by_b.is_empty());
        assert_eq!(seen_by_c.len(), 1);

        let err = service
            .delete_message(hidden, DeleteScope::Everyone, &b)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotMessageOwner));

        service
            .delete_message(hidden, DeleteScope::Everyone, &a)
            .await
            .unwrap();
        for viewer in [&a, &c] {
            let messages = service.messages_for(&group, viewer, None, 0).await.unwrap();
            assert_eq!(messages.len(), 1);
            assert!(messages[0].deleted_for_everyone);
            assert_eq!(messages[0].display_content(), "This message was deleted");
        }
        let chat = service.get_chat(&group).await.unwrap().unwrap();
        assert_eq!(
            chat.last_message.unwrap().content,
            "This message was deleted"
        );
    }

    #[tokio::test]
    async fn hidden_messages_leave_full_pages() {
        let backend = backend();
        befriend(&backend, "amy", "bob");
        let service = ChatService::new(backend.clone());
        let chat = service
            .create_or_get_chat(&ids(&["amy", "bob"]), None, false)
            .await
            .unwrap()
            .unwrap();
        let (amy, bob) = (UserId::from("amy"), UserId::from("bob"));

        let mut sent = Vec::new();
        for text in ["one", "two", "three", "four"] {
            let id = service
                .send_message(&chat, &amy, MessageDraft::text(text))
                .await
                .unwrap()
                .unwrap();
            sent.push(id);
        }
        for id in &sent[2..] {
            service
                .delete_message(*id, DeleteScope::SenderOnly, &bob)
                .await
                .unwrap();
        }

        let page = service.messages_for(&chat, &bob, Some(2), 0).await.unwrap();
        let texts: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["two", "one"]);
        assert!(service
            .messages_for(&chat, &bob, Some(2), 2)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            service.messages_for(&chat, &amy, Some(2), 0).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn underscored_ids_get_their_own_chat_and_friendship() {
        let backend = backend();
        befriend(&backend, "a_b", "c");
        let service = ChatService::new(backend.clone());
        let friends = crate::friends::FriendService::new(backend.clone());
        let (a, b_c) = (UserId::from("a"), UserId::from("b_c"));

        assert!(!friends.are_friends(&a, &b_c).await.unwrap());
        assert!(friends.send_request(&a, &b_c).await.unwrap().is_some());

        let taken = service
            .create_or_get_chat(&ids(&["a_b", "c"]), None, false)
            .await
            .unwrap()
            .unwrap();
        let chat = service
            .create_or_get_chat(&ids(&["a", "b_c"]), None, false)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(taken, chat);
        assert_eq!(
            service.get_chat(&chat).await.unwrap().unwrap().participants,
            ids(&["a", "b_c"])
        );

        let err = service
            .send_message(&chat, &a, MessageDraft::text("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFriends(_, _)));

        befriend(&backend, "b_c", "a");
        assert!(service
            .send_message(&chat, &a, MessageDraft::text("hi"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn replies_forwards_and_edits() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["a", "b"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let other = service
            .create_or_get_chat(&ids(&["b", "c"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let (a, b) = (UserId::from("a"), UserId::from("b"));

        let original = service
            .send_message(&group, &a, MessageDraft::text("question?"))
            .await
            .unwrap()
            .unwrap();
        service
            .send_message(&group, &b, MessageDraft::text("answer").replying_to(original))
            .await
            .unwrap();

        let err = service.edit_message(original, &b, "hijack").await.unwrap_err();
        assert!(matches!(err, ClientError::NotMessageOwner));
        service.edit_message(original, &a, "question, edited").await.unwrap();

        service.forward_message(original, &other, &b).await.unwrap();

        let page = service.messages_for(&group, &a, None, 0).await.unwrap();
        let reply = page[0].reply_to.as_ref().unwrap();
        assert_eq!(reply.message_id, original);
        assert_eq!(reply.preview, "question?");
        assert!(page[1].edited_at.is_some());

        let forwarded = service.messages_for(&other, &b, None, 0).await.unwrap();
        assert_eq!(forwarded[0].content, "question, edited");
        assert_eq!(forwarded[0].forwarded_from.as_ref().unwrap().sender_id, a);
    }

    #[tokio::test]
    async fn mark_read_ignores_unknown_chats_and_outsiders() {
        let service = ChatService::new(backend());
        let marked = service
            .mark_chat_as_read(&ChatId::from("missing"), &UserId::from("a"))
            .await
            .unwrap();
        assert_eq!(marked, 0);

        let group = service
            .create_or_get_chat(&ids(&["a", "b"]), None, true)
            .await
            .unwrap()
            .unwrap();
        service
            .send_message(&group, &UserId::from("a"), MessageDraft::text("x"))
            .await
            .unwrap();
        let outsider = service
            .mark_chat_as_read(&group, &UserId::from("zz"))
            .await
            .unwrap();
        assert_eq!(outsider, 0);
        assert_eq!(
            service.mark_chat_as_read(&group, &UserId::from("b")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn live_messages_follow_writes() {
        let service = ChatService::new(backend());
        let group = service
            .create_or_get_chat(&ids(&["a", "b"]), None, true)
            .await
            .unwrap()
            .unwrap();
        let mut sub = service.subscribe_messages(&group, &UserId::from("b"));
        assert!(sub.next().await.unwrap().is_empty());

        service
            .send_message(&group, &UserId::from("a"), MessageDraft::text("ping"))
            .await
            .unwrap();
        loop {
            let messages = sub.next().await.unwrap();
            if messages.len() == 1 {
                assert_eq!(messages[0].content, "ping");
                break;
            }
        }
    }
}
