use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{normalize_email, Role, User};
use crate::error::DatabaseError;

/// Credential store consumed by the session service.
///
/// The `set_*` operations are single-field atomic updates and report whether
/// a user with that id existed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `DatabaseError::Duplicate` when the email is taken.
    async fn create_user(&self, user: &User) -> Result<User, DatabaseError>;

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError>;

    async fn set_email_verified(&self, id: Uuid) -> Result<bool, DatabaseError>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError>;

    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool, DatabaseError>;
}

/// Process-local store for tests and for running the service without Postgres.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<bool, DatabaseError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user) => {
                apply(user);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create_user(&self, user: &User) -> Result<User, DatabaseError> {
        let mut users = self.users.write().await;
        let email = normalize_email(&user.email);

        if users.values().any(|u| u.email == email) {
            return Err(DatabaseError::Duplicate);
        }

        let mut stored = user.clone();
        stored.email = email;
        users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let email = normalize_email(email);
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn set_email_verified(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.update(id, |u| u.email_verified = true).await
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        let password_hash = password_hash.to_string();
        self.update(id, move |u| u.password_hash = password_hash).await
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool, DatabaseError> {
        self.update(id, |u| u.role = role).await
    }
}
