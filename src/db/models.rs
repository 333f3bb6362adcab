use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::TokenKind;
use crate::error::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Mentor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Mentor => "MENTOR",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "MENTOR" => Ok(Role::Mentor),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role {:?}", other)),
        }
    }
}

/// Emails are stored trimmed and lower-cased; every lookup goes through this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, password_hash: String, first_name: String, last_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            first_name,
            last_name,
            role: Role::User,
            email_verified: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row.role.parse().map_err(DatabaseError::QueryError)?;
        Ok(Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role,
            email_verified: row.email_verified,
            created_at: row.created_at,
        })
    }
}

/// One issued single-use token. Rows are never deleted by the service; a
/// revoked row stays as audit history.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshTokenRecord {
    pub token: String,
    pub user_id: Uuid,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(token: String, user_id: Uuid, kind: TokenKind, ttl: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            token,
            user_id,
            kind,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            revoked: false,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RefreshTokenRow {
    pub token: String,
    pub user_id: Uuid,
    pub kind: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RefreshTokenRow> for RefreshTokenRecord {
    type Error = DatabaseError;

    fn try_from(row: RefreshTokenRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse().map_err(DatabaseError::QueryError)?;
        Ok(Self {
            token: row.token,
            user_id: row.user_id,
            kind,
            expires_at: row.expires_at,
            revoked: row.revoked,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_its_name() {
        for role in [Role::User, Role::Mentor, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
        assert!("ROOT".parse::<Role>().is_err());
    }

    #[test]
    fn new_user_is_unverified_with_folded_email() {
        let user = User::new("  Jane.Doe@Example.COM ", "hash".into(), "Jane".into(), "Doe".into());
        assert_eq!(user.email, "jane.doe@example.com");
        assert_eq!(user.role, Role::User);
        assert!(!user.email_verified);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let user = User::new("a@b.co", "secret-hash".into(), "A".into(), "B".into());
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "USER");
    }

    #[test]
    fn record_expiry_is_strict() {
        let record = RefreshTokenRecord::new(
            "t".into(),
            Uuid::new_v4(),
            TokenKind::Refresh,
            chrono::Duration::hours(1),
        );
        assert!(!record.revoked);
        assert!(!record.is_expired_at(record.expires_at));
        assert!(record.is_expired_at(record.expires_at + chrono::Duration::seconds(1)));
    }

    #[test]
    fn record_expiry_saturates_instead_of_overflowing() {
        let record = RefreshTokenRecord::new(
            "t".into(),
            Uuid::new_v4(),
            TokenKind::Refresh,
            chrono::Duration::days(100_000_000),
        );
        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!record.is_expired_at(Utc::now()));
    }
}
