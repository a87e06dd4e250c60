//! CRUD operations for [`Friendship`] and [`FriendRequest`] records.

use chrono::{DateTime, Utc};
use linkup_shared::{RequestStatus, UserId};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::changes::Change;
use crate::codec::{decode_enum, decode_ts, decode_uuid, encode_ts};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{FriendRequest, Friendship};

const REQUEST_COLUMNS: &str = "id, from_id, to_id, status, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub fn insert_friend_request(&self, request: &FriendRequest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO friend_requests (id, from_id, to_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                request.id.to_string(),
                request.from.as_str(),
                request.to.as_str(),
                request.status.as_str(),
                encode_ts(&request.created_at),
                encode_ts(&request.updated_at),
            ],
        )?;

        self.publish(Change::FriendRequest {
            from: request.from.clone(),
            to: request.to.clone(),
        });
        Ok(())
    }

    pub fn get_friend_request(&self, id: Uuid) -> Result<FriendRequest> {
        self.conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM friend_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_request,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Pending request sent from `from` to `to`, if any.
    pub fn find_pending_request(&self, from: &UserId, to: &UserId) -> Result<Option<FriendRequest>> {
        let request = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM friend_requests
                     WHERE from_id = ?1 AND to_id = ?2 AND status = 'pending'
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![from.as_str(), to.as_str()],
                row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    /// Pending requests addressed to `user`, newest first.
    pub fn list_incoming_requests(&self, user: &UserId) -> Result<Vec<FriendRequest>> {
        self.list_requests("to_id", user)
    }

    /// Pending requests sent by `user`, newest first.
    pub fn list_outgoing_requests(&self, user: &UserId) -> Result<Vec<FriendRequest>> {
        self.list_requests("from_id", user)
    }

    fn list_requests(&self, column: &str, user: &UserId) -> Result<Vec<FriendRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM friend_requests
             WHERE {column} = ?1 AND status = 'pending'
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt.query_map(params![user.as_str()], row_to_request)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    /// Move a pending request to `status`. Returns `false` if the request
    /// was not pending.
    pub fn set_request_status(&self, request: &FriendRequest, status: RequestStatus, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE friend_requests SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'",
            params![request.id.to_string(), status.as_str(), encode_ts(&at)],
        )?;
        if affected > 0 {
            self.publish(Change::FriendRequest {
                from: request.from.clone(),
                to: request.to.clone(),
            });
        }
        Ok(affected > 0)
    }

    /// Accept a pending request and create the friendship in one
    /// transaction. Returns the friendship, or `None` if the request was not
    /// pending anymore.
    pub fn accept_friend_request(&self, request: &FriendRequest, at: DateTime<Utc>) -> Result<Option<Friendship>> {
        let tx = self.conn().unchecked_transaction()?;

        let affected = tx.execute(
            "UPDATE friend_requests SET status = 'accepted', updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![request.id.to_string(), encode_ts(&at)],
        )?;
        if affected == 0 {
            return Ok(None);
        }

        let friendship = Friendship::new(&request.from, &request.to, at);
        tx.execute(
            "INSERT OR IGNORE INTO friendships (id, user_a, user_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                friendship.id,
                friendship.users.0.as_str(),
                friendship.users.1.as_str(),
                encode_ts(&friendship.created_at),
            ],
        )?;

        tx.commit()?;

        self.publish(Change::FriendRequest {
            from: request.from.clone(),
            to: request.to.clone(),
        });
        self.publish(Change::Friendship {
            users: friendship.users.clone(),
        });
        Ok(Some(friendship))
    }

    pub fn delete_friend_request(&self, request: &FriendRequest) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM friend_requests WHERE id = ?1",
            params![request.id.to_string()],
        )?;
        if affected > 0 {
            self.publish(Change::FriendRequest {
                from: request.from.clone(),
                to: request.to.clone(),
            });
        }
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Friendships
    // ------------------------------------------------------------------

    /// Insert a friendship. Returns `false` if the pair were already friends.
    pub fn insert_friendship(&self, friendship: &Friendship) -> Result<bool> {
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO friendships (id, user_a, user_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                friendship.id,
                friendship.users.0.as_str(),
                friendship.users.1.as_str(),
                encode_ts(&friendship.created_at),
            ],
        )?;
        if inserted > 0 {
            self.publish(Change::Friendship {
                users: friendship.users.clone(),
            });
        }
        Ok(inserted > 0)
    }

    pub fn find_friendship(&self, a: &UserId, b: &UserId) -> Result<Option<Friendship>> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let friendship = self
            .conn()
            .query_row(
                "SELECT id, user_a, user_b, created_at FROM friendships
                 WHERE user_a = ?1 AND user_b = ?2",
                params![low.as_str(), high.as_str()],
                row_to_friendship,
            )
            .optional()?;
        Ok(friendship)
    }

    pub fn are_friends(&self, a: &UserId, b: &UserId) -> Result<bool> {
        Ok(self.find_friendship(a, b)?.is_some())
    }

    /// Friendships of `user`, newest first.
    pub fn list_friendships(&self, user: &UserId) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_a, user_b, created_at FROM friendships
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY created_at DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], row_to_friendship)?;

        let mut friendships = Vec::new();
        for row in rows {
            friendships.push(row?);
        }
        Ok(friendships)
    }

    pub fn list_friend_ids(&self, user: &UserId) -> Result<Vec<UserId>> {
        Ok(self
            .list_friendships(user)?
            .iter()
            .filter_map(|f| f.other(user).cloned())
            .collect())
    }

    pub fn delete_friendship(&self, a: &UserId, b: &UserId) -> Result<bool> {
        let Some(friendship) = self.find_friendship(a, b)? else {
            return Ok(false);
        };
        let affected = self.conn().execute(
            "DELETE FROM friendships WHERE id = ?1",
            params![friendship.id],
        )?;
        if affected > 0 {
            self.publish(Change::Friendship {
                users: friendship.users,
            });
        }
        Ok(affected > 0)
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    let id_str: String = row.get(0)?;
    let from: String = row.get(1)?;
    let to: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(FriendRequest {
        id: decode_uuid(&id_str, 0)?,
        from: UserId(from),
        to: UserId(to),
        status: decode_enum(&status_str, 3)?,
        created_at: decode_ts(&created_str, 4)?,
        updated_at: decode_ts(&updated_str, 5)?,
    })
}

fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    let id: String = row.get(0)?;
    let user_a: String = row.get(1)?;
    let user_b: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(Friendship {
        id,
        users: (UserId(user_a), UserId(user_b)),
        created_at: decode_ts(&created_str, 3)?,
    })
}
