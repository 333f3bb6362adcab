//! Durable record of issued single-use tokens.
//!
//! Refresh, email verification and password reset tokens are all recorded
//! here; a token is usable only while its row exists, is unrevoked and has
//! not expired. `redeem` and `rotate` flip `revoked` with a compare-and-set,
//! so of two concurrent redemptions of the same token exactly one succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::auth::TokenKind;
use crate::db::models::{RefreshTokenRecord, RefreshTokenRow};
use crate::db::DbOperations;
use crate::error::{DatabaseError, LedgerError};

#[async_trait]
pub trait RefreshLedger: Send + Sync {
    /// Records a freshly minted token, unrevoked, expiring `ttl` from now.
    async fn issue(
        &self,
        token: &str,
        user_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError>;

    /// Atomically marks the token revoked and returns its owner.
    async fn redeem(&self, token: &str) -> Result<Uuid, LedgerError>;

    /// Redeems `old` and records `replacement` for the same user in one
    /// atomic step. If `old` cannot be redeemed nothing is recorded.
    async fn rotate(
        &self,
        old: &str,
        replacement: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError>;

    /// Idempotent. Unknown tokens are not an error.
    async fn revoke(&self, token: &str) -> Result<(), LedgerError>;

    /// Revokes every live token of `kind` owned by the user; returns how many.
    async fn revoke_all(&self, user_id: Uuid, kind: TokenKind) -> Result<u64, LedgerError>;

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, LedgerError>;
}

/// Why a record could not be redeemed at `now`.
fn classify(record: Option<&RefreshTokenRecord>, now: DateTime<Utc>) -> LedgerError {
    match record {
        None => LedgerError::NotFound,
        Some(r) if r.revoked => LedgerError::AlreadyUsed,
        Some(r) if r.is_expired_at(now) => LedgerError::Expired,
        // Lost a race between the conditional update and this lookup.
        Some(_) => LedgerError::AlreadyUsed,
    }
}

const TOKEN_COLUMNS: &str = "token, user_id, kind, expires_at, revoked, created_at";

#[derive(Clone)]
pub struct PgRefreshLedger {
    db: DbOperations,
}

impl PgRefreshLedger {
    pub fn new(db: DbOperations) -> Self {
        Self { db }
    }

    async fn insert(
        conn: &mut PgConnection,
        record: &RefreshTokenRecord,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        let sql = format!(
            "INSERT INTO refresh_tokens ({cols}) VALUES ($1, $2, $3, $4, $5, $6) RETURNING {cols}",
            cols = TOKEN_COLUMNS
        );
        let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(&record.token)
            .bind(record.user_id)
            .bind(record.kind.as_str())
            .bind(record.expires_at)
            .bind(record.revoked)
            .bind(record.created_at)
            .fetch_one(&mut *conn)
            .await?;

        RefreshTokenRecord::try_from(row).map_err(LedgerError::from)
    }

    async fn lookup(
        conn: &mut PgConnection,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        let sql = format!("SELECT {} FROM refresh_tokens WHERE token = $1", TOKEN_COLUMNS);
        let row = sqlx::query_as::<_, RefreshTokenRow>(&sql)
            .bind(token)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(RefreshTokenRecord::try_from).transpose()?)
    }

    /// Compare-and-set on `revoked`. With `owner` set, only that user's
    /// token matches.
    async fn redeem_in(
        conn: &mut PgConnection,
        token: &str,
        owner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, LedgerError> {
        let redeemed: Option<Uuid> = sqlx::query_scalar(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE token = $1 AND revoked = FALSE AND expires_at >= $2 \
             AND ($3::uuid IS NULL OR user_id = $3) \
             RETURNING user_id",
        )
        .bind(token)
        .bind(now)
        .bind(owner)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(user_id) = redeemed {
            return Ok(user_id);
        }

        let record = Self::lookup(conn, token)
            .await?
            .filter(|r| owner.map_or(true, |o| o == r.user_id));
        Err(classify(record.as_ref(), now))
    }
}

#[async_trait]
impl RefreshLedger for PgRefreshLedger {
    async fn issue(
        &self,
        token: &str,
        user_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        let record = RefreshTokenRecord::new(token.to_string(), user_id, kind, ttl);
        let mut conn = self.db.pool().acquire().await?;
        Self::insert(&mut conn, &record).await
    }

    async fn redeem(&self, token: &str) -> Result<Uuid, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        Self::redeem_in(&mut conn, token, None, Utc::now()).await
    }

    async fn rotate(
        &self,
        old: &str,
        replacement: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        let mut tx = self.db.begin_transaction().await?;

        Self::redeem_in(&mut tx, old, Some(user_id), Utc::now()).await?;
        let record = RefreshTokenRecord::new(
            replacement.to_string(),
            user_id,
            TokenKind::Refresh,
            ttl,
        );
        let stored = Self::insert(&mut tx, &record).await?;

        tx.commit().await?;
        debug!(%user_id, "refresh token rotated");
        Ok(stored)
    }

    async fn revoke(&self, token: &str) -> Result<(), LedgerError> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE token = $1")
            .bind(token)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid, kind: TokenKind) -> Result<u64, LedgerError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = TRUE \
             WHERE user_id = $1 AND kind = $2 AND revoked = FALSE",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        let mut conn = self.db.pool().acquire().await?;
        Self::lookup(&mut conn, token).await
    }
}

/// Ledger kept in process memory. All mutations take the write lock, which
/// makes each compare-and-set atomic.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRefreshLedger {
    records: Arc<RwLock<HashMap<String, RefreshTokenRecord>>>,
}

impl InMemoryRefreshLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn records_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    fn redeem_locked(
        records: &mut HashMap<String, RefreshTokenRecord>,
        token: &str,
        owner: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Uuid, LedgerError> {
        match records.get_mut(token) {
            Some(r)
                if !r.revoked
                    && !r.is_expired_at(now)
                    && owner.map_or(true, |o| o == r.user_id) =>
            {
                r.revoked = true;
                Ok(r.user_id)
            }
            Some(r) if owner.map_or(true, |o| o == r.user_id) => {
                Err(classify(Some(&*r), now))
            }
            _ => Err(LedgerError::NotFound),
        }
    }

    fn insert_locked(
        records: &mut HashMap<String, RefreshTokenRecord>,
        record: RefreshTokenRecord,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        if records.contains_key(&record.token) {
            return Err(LedgerError::Database(DatabaseError::Duplicate));
        }
        records.insert(record.token.clone(), record.clone());
        Ok(record)
    }
}

#[async_trait]
impl RefreshLedger for InMemoryRefreshLedger {
    async fn issue(
        &self,
        token: &str,
        user_id: Uuid,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        let record = RefreshTokenRecord::new(token.to_string(), user_id, kind, ttl);
        let mut records = self.records.write().await;
        Self::insert_locked(&mut records, record)
    }

    async fn redeem(&self, token: &str) -> Result<Uuid, LedgerError> {
        let mut records = self.records.write().await;
        Self::redeem_locked(&mut records, token, None, Utc::now())
    }

    async fn rotate(
        &self,
        old: &str,
        replacement: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<RefreshTokenRecord, LedgerError> {
        let mut records = self.records.write().await;
        if records.contains_key(replacement) {
            return Err(LedgerError::Database(DatabaseError::Duplicate));
        }
        Self::redeem_locked(&mut records, old, Some(user_id), Utc::now())?;
        let record = RefreshTokenRecord::new(
            replacement.to_string(),
            user_id,
            TokenKind::Refresh,
            ttl,
        );
        Self::insert_locked(&mut records, record)
    }

    async fn revoke(&self, token: &str) -> Result<(), LedgerError> {
        if let Some(r) = self.records.write().await.get_mut(token) {
            r.revoked = true;
        }
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid, kind: TokenKind) -> Result<u64, LedgerError> {
        let mut count = 0;
        for r in self.records.write().await.values_mut() {
            if r.user_id == user_id && r.kind == kind && !r.revoked {
                r.revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find(&self, token: &str) -> Result<Option<RefreshTokenRecord>, LedgerError> {
        Ok(self.records.read().await.get(token).cloned())
    }
}
