use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::db::models::{normalize_email, Role, User, UserRow};
use crate::db::store::UserStore;
use crate::error::DatabaseError;

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, role, email_verified, created_at";

/// Postgres-backed credential store and owner of the connection pool.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, DatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| DatabaseError::MigrationError(e.to_string()))
    }

    pub fn get_pool_status(&self) -> DbPoolStatus {
        let size = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DbPoolStatus {
            total_connections: size,
            active_connections: size.saturating_sub(idle),
            idle_connections: idle,
        }
    }

    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>, DatabaseError> {
        Ok(self.pool.as_ref().begin().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl UserStore for DbOperations {
    async fn create_user(&self, user: &User) -> Result<User, DatabaseError> {
        let sql = format!(
            "INSERT INTO users ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {cols}",
            cols = USER_COLUMNS
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user.id)
            .bind(normalize_email(&user.email))
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.role.as_str())
            .bind(user.email_verified)
            .bind(user.created_at)
            .fetch_one(self.pool.as_ref())
            .await?;

        row.try_into()
    }

    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DatabaseError> {
        let sql = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(self.pool.as_ref())
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn set_email_verified(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_role(&self, id: Uuid, role: Role) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET role = $1 WHERE id = $2")
            .bind(role.as_str())
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct DbPoolStatus {
    pub total_connections: u32,
    pub active_connections: u32,
    pub idle_connections: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> DbOperations {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let db = DbOperations::new_with_options(&url, 5, Duration::from_secs(5))
            .await
            .expect("Failed to connect to test database");
        db.run_migrations().await.expect("Failed to run migrations");
        db
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_user_round_trip() {
        let db = connect().await;
        let email = format!("{}@example.com", Uuid::new_v4());
        let user = User::new(&email, "hash".into(), "Test".into(), "User".into());

        let created = db.create_user(&user).await.unwrap();
        assert_eq!(created.id, user.id);

        let duplicate = User::new(&email.to_uppercase(), "hash".into(), "T".into(), "U".into());
        assert!(matches!(db.create_user(&duplicate).await, Err(DatabaseError::Duplicate)));

        assert!(db.set_role(user.id, Role::Mentor).await.unwrap());
        assert!(db.set_email_verified(user.id).await.unwrap());
        let fetched = db.get_user_by_email(&email).await.unwrap().unwrap();
        assert_eq!(fetched.role, Role::Mentor);
        assert!(fetched.email_verified);

        db.close().await;
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pool_status() {
        let db = connect().await;
        let status = db.get_pool_status();

        assert!(status.total_connections <= 5, "Total connections should not exceed max");
        assert!(status.idle_connections <= status.total_connections);
        assert_eq!(
            status.active_connections + status.idle_connections,
            status.total_connections
        );

        db.close().await;
    }
}
