use linkup_shared::{Role, UserId, ValidationError};
use linkup_store::{now, User};
use tracing::info;

use crate::error::Result;
use crate::state::Backend;

#[derive(Clone)]
pub struct UserService {
    backend: Backend,
}

impl UserService {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Create or update a user record. The join date of an existing user is
    /// kept.
    pub async fn register(&self, id: &UserId, display_name: &str, role: Role) -> Result<Option<User>> {
        if id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyUserId.into());
        }
        self.backend.with_db(|db| {
            db.upsert_user(&User {
                id: id.clone(),
                display_name: display_name.trim().to_string(),
                role,
                created_at: now(),
            })?;
            info!(user = %id, role = %role, "User registered");
            Ok(db.get_user(id)?)
        })
    }

    pub async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.backend.with_db(|db| Ok(db.find_user(id)?))?.flatten())
    }

    /// Role of `id`. Unknown users and offline sessions get `Role::User`.
    pub async fn role_of(&self, id: &UserId) -> Result<Role> {
        Ok(self
            .backend
            .with_db(|db| Ok(db.role_of(id)?))?
            .unwrap_or_default())
    }

    /// Returns `false` when the user does not exist.
    pub async fn set_role(&self, id: &UserId, role: Role) -> Result<bool> {
        Ok(self
            .backend
            .with_db(|db| {
                let changed = db.set_user_role(id, role)?;
                if changed {
                    info!(user = %id, role = %role, "Role changed");
                }
                Ok(changed)
            })?
            .unwrap_or(false))
    }
}
