use linkup_shared::validation::validate_post_content;
use linkup_shared::UserId;
use linkup_store::{now, Post, StoreError};
use tracing::info;
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::state::Backend;

#[derive(Clone)]
pub struct PostService {
    backend: Backend,
}

impl PostService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn create_post(&self, author: &UserId, content: &str) -> Result<Option<Uuid>> {
        validate_post_content(content)?;
        self.backend.with_db(|db| {
            let post = Post {
                id: Uuid::new_v4(),
                author_id: author.clone(),
                content: content.to_string(),
                created_at: now(),
            };
            db.insert_post(&post)?;
            info!(author = %author, post_id = %post.id, "Post created");
            Ok(post.id)
        })
    }

    pub async fn delete_post(&self, post_id: Uuid, actor: &UserId) -> Result<()> {
        self.backend.with_db(|db| {
            let post = match db.get_post(post_id) {
                Ok(post) => post,
                Err(StoreError::NotFound) => return Err(ClientError::PostNotFound(post_id)),
                Err(e) => return Err(e.into()),
            };
            if &post.author_id != actor {
                return Err(ClientError::NotPostAuthor);
            }
            db.delete_post(&post)?;
            info!(author = %actor, post_id = %post_id, "Post deleted");
            Ok(())
        })?;
        Ok(())
    }

    /// Newest posts by any of `authors`.
    pub async fn posts_by(&self, authors: &[UserId], limit: u32) -> Result<Vec<Post>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_posts_by_authors(authors, limit)?))?
            .unwrap_or_default())
    }

    /// Newest posts on the whole platform.
    pub async fn recent_posts(&self, limit: u32) -> Result<Vec<Post>> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.list_recent_posts(limit)?))?
            .unwrap_or_default())
    }
}
