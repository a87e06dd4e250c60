//! CRUD operations for [`Chat`] records and their participant lists.

use chrono::{DateTime, Utc};
use linkup_shared::{ChatId, UserId};
use rusqlite::{params, OptionalExtension};

use crate::changes::Change;
use crate::codec::{decode_enum, decode_json, decode_ts, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Chat, LastMessage};

const CHAT_COLUMNS: &str = "id, kind, name, last_message, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a chat with its participants and admins.
    ///
    /// Returns `false` without touching anything when a chat with the same
    /// id already exists, which makes direct chat creation idempotent even
    /// when two callers race.
    pub fn insert_chat(&self, chat: &Chat) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO chats (id, kind, name, last_message, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat.id.as_str(),
                chat.kind.as_str(),
                chat.name,
                chat.last_message
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                encode_ts(&chat.created_at),
                encode_ts(&chat.updated_at),
            ],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        for (position, user) in chat.participants.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, position, is_admin, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chat.id.as_str(),
                    user.as_str(),
                    position as i64,
                    chat.admins.contains(user),
                    encode_ts(&chat.created_at),
                ],
            )?;
        }

        tx.commit()?;

        self.publish(Change::Chat {
            chat_id: chat.id.clone(),
            participants: chat.participants.clone(),
        });
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: &ChatId) -> Result<Chat> {
        self.find_chat(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_chat(&self, id: &ChatId) -> Result<Option<Chat>> {
        let chat = self
            .conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.as_str()],
                row_to_chat,
            )
            .optional()?;

        match chat {
            Some(mut chat) => {
                self.load_participants(&mut chat)?;
                Ok(Some(chat))
            }
            None => Ok(None),
        }
    }

    /// Chats `user` participates in, most recently updated first.
    pub fn list_chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.kind, c.name, c.last_message, c.created_at, c.updated_at
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY c.updated_at DESC, c.rowid DESC",
        )?;

        let rows = stmt.query_map(params![user.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            let mut chat = row?;
            self.load_participants(&mut chat)?;
            chats.push(chat);
        }
        Ok(chats)
    }

    /// Ids of the chats `user` participates in, in a stable order.
    pub fn list_chat_ids_for_user(&self, user: &UserId) -> Result<Vec<ChatId>> {
        let mut stmt = self.conn().prepare(
            "SELECT chat_id FROM chat_participants WHERE user_id = ?1 ORDER BY chat_id",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(ChatId(row?));
        }
        Ok(ids)
    }

    fn load_participants(&self, chat: &mut Chat) -> Result<()> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, is_admin FROM chat_participants
             WHERE chat_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![chat.id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        chat.participants.clear();
        chat.admins.clear();
        for row in rows {
            let (user, is_admin) = row?;
            let user = UserId(user);
            if is_admin {
                chat.admins.push(user.clone());
            }
            chat.participants.push(user);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Append a participant. Returns `false` if already present.
    pub fn add_participant(&self, chat_id: &ChatId, user: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, position, is_admin, joined_at)
             SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1, 0, ?3
             FROM chat_participants WHERE chat_id = ?1",
            params![chat_id.as_str(), user.as_str(), encode_ts(&at)],
        )?;

        if inserted > 0 {
            self.touch_chat(chat_id, at)?;
            self.publish_chat(chat_id)?;
        }
        Ok(inserted > 0)
    }

    /// Remove a participant. Returns `false` if the user was not in the chat.
    pub fn remove_participant(&self, chat_id: &ChatId, user: &UserId, at: DateTime<Utc>) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.as_str(), user.as_str()],
        )?;

        if removed > 0 {
            self.touch_chat(chat_id, at)?;
            let mut participants = self.participant_ids(chat_id)?;
            participants.push(user.clone());
            self.publish(Change::Chat {
                chat_id: chat_id.clone(),
                participants,
            });
        }
        Ok(removed > 0)
    }

    pub fn set_admin(&self, chat_id: &ChatId, user: &UserId, is_admin: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chat_participants SET is_admin = ?3
             WHERE chat_id = ?1 AND user_id = ?2 AND is_admin != ?3",
            params![chat_id.as_str(), user.as_str(), is_admin],
        )?;
        if affected > 0 {
            self.publish_chat(chat_id)?;
        }
        Ok(affected > 0)
    }

    pub fn rename_chat(&self, chat_id: &ChatId, name: &str, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET name = ?2, updated_at = ?3 WHERE id = ?1",
            params![chat_id.as_str(), name, encode_ts(&at)],
        )?;
        if affected > 0 {
            self.publish_chat(chat_id)?;
        }
        Ok(affected > 0)
    }

    fn touch_chat(&self, chat_id: &ChatId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
            params![chat_id.as_str(), encode_ts(&at)],
        )?;
        Ok(())
    }

    pub(crate) fn participant_ids(&self, chat_id: &ChatId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.as_str()], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(UserId(row?));
        }
        Ok(ids)
    }

    pub(crate) fn publish_chat(&self, chat_id: &ChatId) -> Result<()> {
        let participants = self.participant_ids(chat_id)?;
        self.publish(Change::Chat {
            chat_id: chat_id.clone(),
            participants,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a chat together with its participants and messages.
    /// Returns `true` if a chat was deleted.
    pub fn delete_chat(&self, chat_id: &ChatId) -> Result<bool> {
        let participants = self.participant_ids(chat_id)?;
        let affected = self
            .conn()
            .execute("DELETE FROM chats WHERE id = ?1", params![chat_id.as_str()])?;

        if affected > 0 {
            self.publish(Change::Messages {
                chat_id: chat_id.clone(),
            });
            self.publish(Change::Chat {
                chat_id: chat_id.clone(),
                participants,
            });
        }
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Chat`] without participants.
fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let name: Option<String> = row.get(2)?;
    let last_json: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    let last_message: Option<LastMessage> =
        last_json.map(|raw| decode_json(&raw, 3)).transpose()?;

    Ok(Chat {
        id: ChatId(id),
        kind: decode_enum(&kind_str, 1)?,
        name,
        participants: Vec::new(),
        admins: Vec::new(),
        last_message,
        created_at: decode_ts(&created_str, 4)?,
        updated_at: decode_ts(&updated_str, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::now;
    use linkup_shared::ChatKind;

    pub(crate) fn group(id: &str, members: &[&str]) -> Chat {
        let ts = now();
        let participants: Vec<UserId> = members.iter().map(|m| UserId::from(*m)).collect();
        Chat {
            id: ChatId::from(id),
            kind: ChatKind::Group,
            name: Some("crew".into()),
            admins: participants.iter().take(1).cloned().collect(),
            participants,
            last_message: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let chat = group("g1", &["ann", "ben"]);

        assert!(db.insert_chat(&chat).unwrap());
        assert!(!db.insert_chat(&chat).unwrap());

        let stored = db.get_chat(&chat.id).unwrap();
        assert_eq!(stored, chat);
    }

    #[test]
    fn membership_index_follows_participants() {
        let db = Database::open_in_memory().unwrap();
        db.insert_chat(&group("g1", &["ann", "ben"])).unwrap();
        db.insert_chat(&group("g2", &["ben", "cat"])).unwrap();

        let ben = UserId::from("ben");
        assert_eq!(db.list_chat_ids_for_user(&ben).unwrap().len(), 2);

        assert!(db.remove_participant(&ChatId::from("g1"), &ben, now()).unwrap());
        assert!(!db.remove_participant(&ChatId::from("g1"), &ben, now()).unwrap());
        assert_eq!(
            db.list_chat_ids_for_user(&ben).unwrap(),
            vec![ChatId::from("g2")]
        );

        assert!(db.add_participant(&ChatId::from("g1"), &ben, now()).unwrap());
        let g1 = db.get_chat(&ChatId::from("g1")).unwrap();
        assert_eq!(g1.participants.last(), Some(&ben));
    }

    #[tokio::test]
    async fn removal_change_includes_removed_user() {
        let db = Database::open_in_memory().unwrap();
        db.insert_chat(&group("g1", &["ann", "ben"])).unwrap();
        let mut rx = db.subscribe_changes();

        db.remove_participant(&ChatId::from("g1"), &UserId::from("ben"), now())
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert!(change.concerns_member(&UserId::from("ben")));
        assert!(change.concerns_member(&UserId::from("ann")));
    }

    #[test]
    fn delete_missing_chat_reports_false() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.delete_chat(&ChatId::from("nope")).unwrap());
    }
}
