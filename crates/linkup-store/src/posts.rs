//! CRUD operations for [`Post`] records.

use linkup_shared::UserId;
use rusqlite::{params, params_from_iter, OptionalExtension};
use uuid::Uuid;

use crate::changes::Change;
use crate::codec::{decode_ts, decode_uuid, encode_ts, placeholders};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Post;

impl Database {
    pub fn insert_post(&self, post: &Post) -> Result<()> {
        self.conn().execute(
            "INSERT INTO posts (id, author_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                post.id.to_string(),
                post.author_id.as_str(),
                post.content,
                encode_ts(&post.created_at),
            ],
        )?;

        self.publish(Change::Post {
            author_id: post.author_id.clone(),
        });
        Ok(())
    }

    pub fn get_post(&self, id: Uuid) -> Result<Post> {
        self.conn()
            .query_row(
                "SELECT id, author_id, content, created_at FROM posts WHERE id = ?1",
                params![id.to_string()],
                row_to_post,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn delete_post(&self, post: &Post) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM posts WHERE id = ?1", params![post.id.to_string()])?;
        if affected > 0 {
            self.publish(Change::Post {
                author_id: post.author_id.clone(),
            });
        }
        Ok(affected > 0)
    }

    /// Newest posts written by any of `authors`.
    pub fn list_posts_by_authors(&self, authors: &[UserId], limit: u32) -> Result<Vec<Post>> {
        if authors.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, author_id, content, created_at FROM posts
             WHERE author_id IN ({})
             ORDER BY created_at DESC, rowid DESC
             LIMIT {limit}",
            placeholders(1, authors.len())
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(authors.iter().map(|a| a.as_str())), row_to_post)?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }

    /// Newest posts platform-wide.
    pub fn list_recent_posts(&self, limit: u32) -> Result<Vec<Post>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, author_id, content, created_at FROM posts
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_post)?;

        let mut posts = Vec::new();
        for row in rows {
            posts.push(row?);
        }
        Ok(posts)
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    let id_str: String = row.get(0)?;
    let author_id: String = row.get(1)?;
    let content: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(Post {
        id: decode_uuid(&id_str, 0)?,
        author_id: UserId(author_id),
        content,
        created_at: decode_ts(&created_str, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::now;

    fn post(author: &str, minutes_ago: i64) -> Post {
        Post {
            id: Uuid::new_v4(),
            author_id: UserId::from(author),
            content: format!("post by {author}"),
            created_at: now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn filters_by_author_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let old = post("ann", 10);
        let new = post("ben", 1);
        db.insert_post(&old).unwrap();
        db.insert_post(&new).unwrap();
        db.insert_post(&post("cat", 0)).unwrap();

        let authors = [UserId::from("ann"), UserId::from("ben")];
        let posts = db.list_posts_by_authors(&authors, 10).unwrap();
        assert_eq!(posts, vec![new, old]);

        assert!(db.list_posts_by_authors(&[], 10).unwrap().is_empty());
        assert_eq!(db.list_recent_posts(2).unwrap().len(), 2);
    }

    #[test]
    fn delete_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let p = post("ann", 0);
        db.insert_post(&p).unwrap();
        assert_eq!(db.get_post(p.id).unwrap(), p);

        assert!(db.delete_post(&p).unwrap());
        assert!(matches!(db.get_post(p.id), Err(StoreError::NotFound)));
    }
}
