//! CRUD operations for [`Message`] records, read markers and hidden markers.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use linkup_shared::constants::DELETED_MESSAGE_PLACEHOLDER;
use linkup_shared::{ChatId, UserId};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::changes::Change;
use crate::codec::{decode_enum, decode_json, decode_opt_ts, decode_ts, decode_uuid, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Attachment, ForwardRef, Message, ReplyRef};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, kind, attachments, created_at, \
     edited_at, deleted_for_everyone, reply_to, forwarded_from";

impl Database {
    /// Append a message and refresh the owning chat's last-message snapshot
    /// and `updated_at` in a single transaction: readers see both or neither.
    ///
    /// Every id in `message.read_by` gets a read marker.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, kind, attachments,
                                   created_at, edited_at, deleted_for_everyone, reply_to, forwarded_from)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                message.id.to_string(),
                message.chat_id.as_str(),
                message.sender_id.as_str(),
                message.content,
                message.kind.as_str(),
                serde_json::to_string(&message.attachments)?,
                encode_ts(&message.created_at),
                message.edited_at.as_ref().map(encode_ts),
                message.deleted_for_everyone,
                message.reply_to.as_ref().map(serde_json::to_string).transpose()?,
                message
                    .forwarded_from
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            ],
        )?;

        for reader in &message.read_by {
            tx.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    message.id.to_string(),
                    reader.as_str(),
                    encode_ts(&message.created_at)
                ],
            )?;
        }

        let touched = tx.execute(
            "UPDATE chats SET last_message = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                message.chat_id.as_str(),
                serde_json::to_string(&message.snapshot())?,
                encode_ts(&message.created_at),
            ],
        )?;
        if touched == 0 {
            return Err(StoreError::NotFound);
        }

        tx.commit()?;

        self.publish(Change::Messages {
            chat_id: message.chat_id.clone(),
        });
        self.publish_chat(&message.chat_id)?;
        Ok(())
    }

    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.find_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(message) => Ok(self.hydrate(vec![message])?.pop()),
            None => Ok(None),
        }
    }

    /// Messages of a chat, newest first.
    pub fn get_messages_for_chat(
        &self,
        chat_id: &ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(params![chat_id.as_str(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        self.hydrate(messages)
    }

    /// Messages of a chat as `viewer` sees them, newest first. Messages the
    /// viewer hid are skipped before paging, so a page is only short at the
    /// end of the history.
    pub fn get_visible_messages_for_chat(
        &self,
        chat_id: &ChatId,
        viewer: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m
             WHERE m.chat_id = ?1
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(
            params![chat_id.as_str(), viewer.as_str(), limit, offset],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        self.hydrate(messages)
    }

    /// Number of messages in `chat_id` that are unread for `user`.
    ///
    /// Mirrors [`Message::is_unread_for`] in SQL.
    pub fn count_unread(&self, chat_id: &ChatId, user: &UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.chat_id = ?1
               AND m.sender_id != ?2
               AND m.deleted_for_everyone = 0
               AND NOT EXISTS (SELECT 1 FROM message_reads r
                               WHERE r.message_id = m.id AND r.user_id = ?2)
               AND NOT EXISTS (SELECT 1 FROM message_hidden h
                               WHERE h.message_id = m.id AND h.user_id = ?2)",
            params![chat_id.as_str(), user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Unread counts for every chat `user` participates in.
    pub fn unread_counts_for_user(&self, user: &UserId) -> Result<HashMap<ChatId, usize>> {
        let mut counts = HashMap::new();
        for chat_id in self.list_chat_ids_for_user(user)? {
            let count = self.count_unread(&chat_id, user)?;
            counts.insert(chat_id, count);
        }
        Ok(counts)
    }

    /// Add `user` to the read-by set of every message in the chat that
    /// `user` did not send and has not read yet. Returns the number of
    /// messages newly marked; a second call returns 0.
    pub fn mark_chat_read(&self, chat_id: &ChatId, user: &UserId, at: DateTime<Utc>) -> Result<usize> {
        let marked = self.conn().execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at)
             SELECT id, ?2, ?3 FROM messages
             WHERE chat_id = ?1 AND sender_id != ?2",
            params![chat_id.as_str(), user.as_str(), encode_ts(&at)],
        )?;

        if marked > 0 {
            self.publish(Change::Messages {
                chat_id: chat_id.clone(),
            });
        }
        Ok(marked)
    }

    /// Hide a message for one user only. Returns `false` if already hidden.
    pub fn hide_message_for(&self, message: &Message, user: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO message_hidden (message_id, user_id, hidden_at)
             VALUES (?1, ?2, ?3)",
            params![message.id.to_string(), user.as_str(), encode_ts(&at)],
        )?;

        if inserted > 0 {
            self.publish(Change::Messages {
                chat_id: message.chat_id.clone(),
            });
        }
        Ok(inserted > 0)
    }

    /// Tombstone a message for everyone: content and attachments are cleared
    /// and the chat snapshot shows the placeholder if it pointed here.
    /// Returns `false` if the message was already tombstoned.
    pub fn tombstone_message(&self, message: &Message, at: DateTime<Utc>) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = tx.execute(
            "UPDATE messages
             SET deleted_for_everyone = 1, deleted_at = ?2, content = '', attachments = '[]'
             WHERE id = ?1 AND deleted_for_everyone = 0",
            params![message.id.to_string(), encode_ts(&at)],
        )?;

        if affected == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE chats
             SET last_message = json_set(last_message, '$.content', ?3)
             WHERE id = ?1 AND json_extract(last_message, '$.id') = ?2",
            params![
                message.chat_id.as_str(),
                message.id.to_string(),
                DELETED_MESSAGE_PLACEHOLDER
            ],
        )?;

        tx.commit()?;

        self.publish(Change::Messages {
            chat_id: message.chat_id.clone(),
        });
        self.publish_chat(&message.chat_id)?;
        Ok(true)
    }

    /// Replace the text of a message and record the edit time. The chat
    /// snapshot follows if it pointed at this message.
    pub fn edit_message(&self, message: &Message, content: &str, at: DateTime<Utc>) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = tx.execute(
            "UPDATE messages SET content = ?2, edited_at = ?3
             WHERE id = ?1 AND deleted_for_everyone = 0",
            params![message.id.to_string(), content, encode_ts(&at)],
        )?;

        if affected == 0 {
            return Ok(false);
        }

        tx.execute(
            "UPDATE chats
             SET last_message = json_set(last_message, '$.content', ?3)
             WHERE id = ?1 AND json_extract(last_message, '$.id') = ?2",
            params![message.chat_id.as_str(), message.id.to_string(), content],
        )?;

        tx.commit()?;

        self.publish(Change::Messages {
            chat_id: message.chat_id.clone(),
        });
        self.publish_chat(&message.chat_id)?;
        Ok(true)
    }

    /// Fill in `read_by` and `hidden_for` for a batch of messages.
    fn hydrate(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        if messages.is_empty() {
            return Ok(messages);
        }

        let ids: Vec<String> = messages.iter().map(|m| m.id.to_string()).collect();
        let reads = self.markers_for("message_reads", &ids)?;
        let hidden = self.markers_for("message_hidden", &ids)?;

        for message in &mut messages {
            let key = message.id.to_string();
            message.read_by = reads.get(&key).cloned().unwrap_or_default();
            message.hidden_for = hidden.get(&key).cloned().unwrap_or_default();
        }
        Ok(messages)
    }

    fn markers_for(&self, table: &str, ids: &[String]) -> Result<HashMap<String, BTreeSet<UserId>>> {
        let sql = format!(
            "SELECT message_id, user_id FROM {table} WHERE message_id IN ({})",
            crate::codec::placeholders(1, ids.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut markers: HashMap<String, BTreeSet<UserId>> = HashMap::new();
        for row in rows {
            let (message_id, user_id) = row?;
            markers.entry(message_id).or_default().insert(UserId(user_id));
        }
        Ok(markers)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let content: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let attachments_json: String = row.get(5)?;
    let created_str: String = row.get(6)?;
    let edited_str: Option<String> = row.get(7)?;
    let deleted_for_everyone: bool = row.get(8)?;
    let reply_json: Option<String> = row.get(9)?;
    let forward_json: Option<String> = row.get(10)?;

    let attachments: Vec<Attachment> = decode_json(&attachments_json, 5)?;
    let reply_to: Option<ReplyRef> = reply_json.map(|raw| decode_json(&raw, 9)).transpose()?;
    let forwarded_from: Option<ForwardRef> =
        forward_json.map(|raw| decode_json(&raw, 10)).transpose()?;

    Ok(Message {
        id: decode_uuid(&id_str, 0)?,
        chat_id: ChatId(chat_id),
        sender_id: UserId(sender_id),
        content,
        kind: decode_enum(&kind_str, 4)?,
        attachments,
        created_at: decode_ts(&created_str, 6)?,
        edited_at: decode_opt_ts(edited_str, 7)?,
        read_by: BTreeSet::new(),
        hidden_for: BTreeSet::new(),
        deleted_for_everyone,
        reply_to,
        forwarded_from,
    })
}
