//! CRUD operations for [`User`] records.

use linkup_shared::{Role, UserId};
use rusqlite::{params, OptionalExtension};

use crate::changes::Change;
use crate::codec::{decode_enum, decode_ts, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

const USER_COLUMNS: &str = "id, display_name, role, created_at";

impl Database {
    /// Insert a user, or update display name and role if it exists.
    /// The original join date is kept.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role",
            params![
                user.id.as_str(),
                user.display_name,
                user.role.as_str(),
                encode_ts(&user.created_at),
            ],
        )?;

        self.publish(Change::User {
            user_id: user.id.clone(),
        });
        Ok(())
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.find_user(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.as_str()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Role of a user, `Role::User` when the user is unknown.
    pub fn role_of(&self, id: &UserId) -> Result<Role> {
        Ok(self.find_user(id)?.map(|u| u.role).unwrap_or_default())
    }

    /// All users, newest first.
    pub fn list_users(&self, limit: u32) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![limit], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub fn set_user_role(&self, id: &UserId, role: Role) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), id.as_str()],
        )?;
        if affected > 0 {
            self.publish(Change::User {
                user_id: id.clone(),
            });
        }
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(User {
        id: UserId(id),
        display_name,
        role: decode_enum(&role_str, 2)?,
        created_at: decode_ts(&created_str, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::now;

    fn user(id: &str, role: Role) -> User {
        User {
            id: UserId::from(id),
            display_name: id.to_uppercase(),
            role,
            created_at: now(),
        }
    }

    #[test]
    fn upsert_keeps_join_date() {
        let db = Database::open_in_memory().unwrap();
        let original = user("ada", Role::User);
        db.upsert_user(&original).unwrap();

        let mut renamed = user("ada", Role::Support);
        renamed.display_name = "Ada L.".into();
        renamed.created_at = original.created_at + chrono::Duration::days(1);
        db.upsert_user(&renamed).unwrap();

        let stored = db.get_user(&UserId::from("ada")).unwrap();
        assert_eq!(stored.display_name, "Ada L.");
        assert_eq!(stored.role, Role::Support);
        assert_eq!(stored.created_at, original.created_at);
    }

    #[test]
    fn unknown_user_has_plain_role() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.role_of(&UserId::from("ghost")).unwrap(), Role::User);
        assert!(matches!(
            db.get_user(&UserId::from("ghost")),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn list_is_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let mut first = user("first", Role::User);
        first.created_at = now() - chrono::Duration::minutes(5);
        db.upsert_user(&first).unwrap();
        db.upsert_user(&user("second", Role::User)).unwrap();

        let ids: Vec<_> = db
            .list_users(10)
            .unwrap()
            .into_iter()
            .map(|u| u.id.0)
            .collect();
        assert_eq!(ids, vec!["second", "first"]);
    }
}
