//! Signed claim-sets for every token kind the service hands out.
//!
//! All kinds share one HMAC secret. The `type` claim is the only thing that
//! tells them apart, so every consumer must check [`Claims::kind`] (or call
//! [`Claims::expect_kind`]) before trusting a verified token.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::models::Role;
use crate::error::TokenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    VerifyEmail,
    PasswordReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::VerifyEmail => "verify_email",
            TokenKind::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            "verify_email" => Ok(TokenKind::VerifyEmail),
            "password_reset" => Ok(TokenKind::PasswordReset),
            other => Err(format!("unknown token kind {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    /// Only access tokens carry a role; it is encoded as `""` otherwise.
    #[serde(default, with = "role_or_empty")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    /// Keeps two tokens minted in the same second for the same user distinct.
    pub jti: Uuid,
}

impl Claims {
    pub fn expect_kind(self, expected: TokenKind) -> Result<Self, TokenError> {
        if self.kind == expected {
            Ok(self)
        } else {
            Err(TokenError::WrongKind {
                expected,
                found: self.kind,
            })
        }
    }
}

mod role_or_empty {
    use super::Role;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(role: &Option<Role>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(role.map(|r| r.as_str()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Role>, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub action: Duration,
}

impl TokenLifetimes {
    pub fn from_config(auth: &AuthConfig) -> Self {
        Self {
            access: Duration::try_minutes(auth.access_ttl_minutes)
                .unwrap_or(Duration::max_value()),
            refresh: Duration::try_hours(auth.refresh_ttl_hours)
                .unwrap_or(Duration::max_value()),
            action: Duration::try_hours(auth.action_ttl_hours)
                .unwrap_or(Duration::max_value()),
        }
    }

    pub fn for_kind(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access,
            TokenKind::Refresh => self.refresh,
            TokenKind::VerifyEmail | TokenKind::PasswordReset => self.action,
        }
    }
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access: Duration::hours(1),
            refresh: Duration::hours(24),
            action: Duration::hours(24),
        }
    }
}

/// HS256 signer and verifier. Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetimes: TokenLifetimes,
    leeway_secs: i64,
}

impl TokenCodec {
    pub fn new(secret: &[u8], lifetimes: TokenLifetimes) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            lifetimes,
            leeway_secs: 0,
        }
    }

    pub fn from_config(auth: &AuthConfig) -> Self {
        Self::new(auth.jwt_secret.as_bytes(), TokenLifetimes::from_config(auth))
            .with_leeway(auth.leeway_secs)
    }

    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.leeway_secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self
    }

    pub fn lifetime(&self, kind: TokenKind) -> Duration {
        self.lifetimes.for_kind(kind)
    }

    pub fn issue_access(&self, user_id: Uuid, role: Role) -> Result<String, TokenError> {
        self.issue_at(user_id, Some(role), TokenKind::Access, Utc::now())
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue_at(user_id, None, TokenKind::Refresh, Utc::now())
    }

    /// Email verification and password reset tokens.
    pub fn issue_action(&self, user_id: Uuid, kind: TokenKind) -> Result<String, TokenError> {
        match kind {
            TokenKind::VerifyEmail | TokenKind::PasswordReset => {
                self.issue_at(user_id, None, kind, Utc::now())
            }
            other => Err(TokenError::Signing(format!("{} is not an action token", other))),
        }
    }

    /// Signs a claim-set as if the current time were `now`.
    pub fn issue_at(
        &self,
        user_id: Uuid,
        role: Option<Role>,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add_signed(self.lifetime(kind))
            .ok_or_else(|| TokenError::Signing(format!("{} lifetime is out of range", kind)))?;
        let claims = Claims {
            sub: user_id,
            role: if kind == TokenKind::Access { role } else { None },
            kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Checks algorithm and signature first, then expiry against `now`.
    /// Does not look at the token kind.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = ["exp", "sub"].iter().map(|c| c.to_string()).collect();

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        if now.timestamp() > data.claims.exp.saturating_add(self.leeway_secs) {
            return Err(TokenError::Expired);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test_secret", TokenLifetimes::default())
    }

    #[test]
    fn access_token_round_trips() {
        let codec = codec();
        let uid = Uuid::new_v4();
        let token = codec.issue_access(uid, Role::Admin).unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.sub, uid);
        assert_eq!(claims.role, Some(Role::Admin));
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn refresh_token_has_empty_role_and_day_lifetime() {
        let codec = codec();
        let token = codec.issue_refresh(Uuid::new_v4()).unwrap();

        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.role, None);
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn refresh_role_is_encoded_as_empty_string() {
        let codec = codec();
        let token = codec.issue_refresh(Uuid::new_v4()).unwrap();
        let claims = codec.verify(&token).unwrap();
        let json = serde_json::to_value(&claims).unwrap();

        assert_eq!(json["role"], "");
        assert_eq!(json["type"], "refresh");
    }

    #[test]
    fn tokens_minted_back_to_back_differ() {
        let codec = codec();
        let uid = Uuid::new_v4();
        let now = Utc::now();
        let a = codec.issue_at(uid, None, TokenKind::Refresh, now).unwrap();
        let b = codec.issue_at(uid, None, TokenKind::Refresh, now).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn expired_token_is_rejected_even_with_valid_signature() {
        let codec = codec();
        let issued = Utc::now() - Duration::hours(2);
        let token = codec
            .issue_at(Uuid::new_v4(), Some(Role::User), TokenKind::Access, issued)
            .unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn expiry_boundary_and_leeway() {
        let codec = codec();
        let issued = Utc::now();
        let token = codec
            .issue_at(Uuid::new_v4(), Some(Role::User), TokenKind::Access, issued)
            .unwrap();
        let exp = issued + Duration::hours(1);

        assert!(codec.verify_at(&token, exp).is_ok());
        assert_eq!(
            codec.verify_at(&token, exp + Duration::seconds(1)),
            Err(TokenError::Expired)
        );

        let lenient = codec.with_leeway(30);
        assert!(lenient.verify_at(&token, exp + Duration::seconds(30)).is_ok());
        assert_eq!(
            lenient.verify_at(&token, exp + Duration::seconds(31)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn out_of_range_lifetime_is_a_signing_error() {
        let lifetimes = TokenLifetimes {
            refresh: Duration::days(100_000_000),
            ..TokenLifetimes::default()
        };
        let codec = TokenCodec::new(b"test_secret", lifetimes);

        let err = codec.issue_refresh(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, TokenError::Signing(_)));
        assert!(codec.issue_access(Uuid::new_v4(), Role::User).is_ok());
    }

    #[test]
    fn wrong_secret_is_invalid_signature() {
        let token = codec().issue_access(Uuid::new_v4(), Role::User).unwrap();
        let other = TokenCodec::new(b"other_secret", TokenLifetimes::default());

        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn foreign_algorithm_is_invalid_signature() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: Some(Role::Admin),
            kind: TokenKind::Access,
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            jti: Uuid::new_v4(),
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn tampered_payload_is_invalid_signature() {
        let codec = codec();
        let token = codec.issue_access(Uuid::new_v4(), Role::User).unwrap();
        let forged = codec.issue_access(Uuid::new_v4(), Role::Admin).unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_payload = forged.split('.').nth(1).unwrap();
        parts[1] = forged_payload;
        let spliced = parts.join(".");

        assert_eq!(codec.verify(&spliced), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert_eq!(codec.verify("not-a-token"), Err(TokenError::Malformed));
        assert_eq!(codec.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn unknown_kind_is_malformed() {
        #[derive(Serialize)]
        struct Loose {
            sub: String,
            role: String,
            #[serde(rename = "type")]
            kind: String,
            iat: i64,
            exp: i64,
            jti: String,
        }
        let loose = Loose {
            sub: Uuid::new_v4().to_string(),
            role: String::new(),
            kind: "superuser".into(),
            iat: Utc::now().timestamp(),
            exp: (Utc::now() + Duration::hours(1)).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &loose,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap();

        assert_eq!(codec().verify(&token), Err(TokenError::Malformed));
    }

    #[test]
    fn codec_does_not_enforce_kind_but_claims_can() {
        let codec = codec();
        let token = codec.issue_access(Uuid::new_v4(), Role::User).unwrap();
        let claims = codec.verify(&token).unwrap();

        assert!(claims.clone().expect_kind(TokenKind::Access).is_ok());
        assert_eq!(
            claims.expect_kind(TokenKind::Refresh),
            Err(TokenError::WrongKind {
                expected: TokenKind::Refresh,
                found: TokenKind::Access
            })
        );
    }

    #[test]
    fn action_tokens_only_for_action_kinds() {
        let codec = codec();
        let uid = Uuid::new_v4();

        let reset = codec.issue_action(uid, TokenKind::PasswordReset).unwrap();
        assert_eq!(codec.verify(&reset).unwrap().kind, TokenKind::PasswordReset);

        assert!(matches!(
            codec.issue_action(uid, TokenKind::Access),
            Err(TokenError::Signing(_))
        ));
    }
}
