use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

use crate::auth::identity::Identity;
use crate::auth::ledger::RefreshLedger;
use crate::auth::password::{hash_password, verify_password, PasswordPolicy};
use crate::auth::token::{TokenCodec, TokenKind};
use crate::config::{EmailConfig, Settings};
use crate::db::models::{normalize_email, Role, User};
use crate::db::store::UserStore;
use crate::error::{AppError, AuthError, DatabaseError, LedgerError, ValidationError};
use crate::notify::{dispatch, Letter, Notifier};

const MAX_NAME_LEN: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Registration, verification, login and session rotation.
pub struct AuthService {
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn RefreshLedger>,
    codec: Arc<TokenCodec>,
    notifier: Arc<dyn Notifier>,
    email: EmailConfig,
    policy: PasswordPolicy,
    /// Verified against when the email is unknown so both login failures do
    /// the same amount of work.
    dummy_hash: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn RefreshLedger>,
        codec: Arc<TokenCodec>,
        notifier: Arc<dyn Notifier>,
        settings: &Settings,
    ) -> Result<Self, AppError> {
        Ok(Self {
            users,
            ledger,
            codec,
            notifier,
            email: settings.email.clone(),
            policy: PasswordPolicy::default(),
            dummy_hash: hash_password("dummy-Password-1")?,
        })
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn register(&self, account: NewAccount) -> Result<User, AppError> {
        let email = normalize_email(&account.email);
        if !email.validate_email() {
            return Err(ValidationError::InvalidEmail.into());
        }
        let first_name = clean_name("first_name", &account.first_name)?;
        let last_name = clean_name("last_name", &account.last_name)?;
        self.policy.check(&account.password)?;

        let password_hash = hash_password(&account.password)?;
        let mut user = User::new(&email, password_hash, first_name, last_name);
        // Without outbound mail there is no way to confirm an address.
        user.email_verified = !self.email.enabled;

        let user = self.users.create_user(&user).await.map_err(|e| match e {
            DatabaseError::Duplicate => AppError::ConflictError("email exists".into()),
            other => AppError::DatabaseError(other),
        })?;
        info!(user_id = %user.id, "account registered");

        if !user.email_verified {
            if let Err(e) = self.send_verification(&user).await {
                warn!(user_id = %user.id, "could not issue verification token: {}", e);
            }
        }

        Ok(user)
    }

    /// Marks the owner of a verification token as verified. Each token
    /// works once.
    pub async fn verify_email(&self, token: &str) -> Result<(), AppError> {
        let claims = self
            .codec
            .verify(token)
            .and_then(|c| c.expect_kind(TokenKind::VerifyEmail))
            .map_err(|_| ValidationError::BadToken)?;

        let owner = self.ledger.redeem(token).await.map_err(bad_token)?;
        if owner != claims.sub || !self.users.set_email_verified(owner).await? {
            return Err(ValidationError::BadToken.into());
        }

        info!(user_id = %owner, "email verified");
        Ok(())
    }

    /// Issues a fresh verification letter for an unverified account. Silent
    /// for unknown or already verified addresses.
    pub async fn resend_verification(&self, email: &str) -> Result<(), AppError> {
        if !self.email.enabled {
            return Ok(());
        }
        match self.users.get_user_by_email(email).await {
            Ok(Some(user)) if !user.email_verified => {
                if let Err(e) = self.send_verification(&user).await {
                    warn!(user_id = %user.id, "could not reissue verification token: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("verification resend lookup failed: {}", e),
        }
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        let user = match self.users.get_user_by_email(email).await? {
            Some(user) => user,
            None => {
                let _ = verify_password(password, &self.dummy_hash);
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }
        if !user.email_verified {
            return Err(AuthError::NotVerified.into());
        }

        let pair = self.issue_pair(&user).await?;
        info!(user_id = %user.id, "login succeeded");
        Ok(pair)
    }

    /// Exchanges a refresh token for a new pair. The presented token is spent
    /// even if the caller never receives the response.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self
            .codec
            .verify(refresh_token)
            .and_then(|c| c.expect_kind(TokenKind::Refresh))?;

        // Role comes from the store so a role change shows up on next refresh.
        let user = self
            .users
            .get_user_by_id(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let access_token = self.codec.issue_access(user.id, user.role)?;
        let next_refresh = self.codec.issue_refresh(user.id)?;
        self.ledger
            .rotate(
                refresh_token,
                &next_refresh,
                user.id,
                self.codec.lifetime(TokenKind::Refresh),
            )
            .await?;

        info!(user_id = %user.id, "session refreshed");
        Ok(TokenPair {
            access_token,
            refresh_token: next_refresh,
        })
    }

    /// Revokes the refresh token. Unknown or already revoked tokens succeed.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AppError> {
        self.ledger.revoke(refresh_token).await?;
        Ok(())
    }

    /// Sends a reset letter if the account exists. Always succeeds so the
    /// response reveals nothing about which emails are registered.
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        if let Err(e) = self.send_reset(email).await {
            warn!("password reset request not completed: {}", e);
        }
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let claims = self
            .codec
            .verify(token)
            .and_then(|c| c.expect_kind(TokenKind::PasswordReset))
            .map_err(|_| ValidationError::BadToken)?;
        // Check strength before spending the token.
        self.policy.check(new_password)?;
        let password_hash = hash_password(new_password)?;

        let owner = self.ledger.redeem(token).await.map_err(bad_token)?;
        if owner != claims.sub || !self.users.set_password_hash(owner, &password_hash).await? {
            return Err(ValidationError::BadToken.into());
        }

        let revoked = self.ledger.revoke_all(owner, TokenKind::Refresh).await?;
        info!(user_id = %owner, revoked_sessions = revoked, "password reset");
        Ok(())
    }

    pub async fn change_role(
        &self,
        actor: &Identity,
        user_id: Uuid,
        role: &str,
    ) -> Result<(), AppError> {
        if !actor.is_admin() {
            warn!(actor = %actor.user_id, target = %user_id, "role change refused");
            return Err(AuthError::Forbidden.into());
        }
        let role: Role = role
            .trim()
            .parse()
            .map_err(ValidationError::BadRequest)?;

        if !self.users.set_role(user_id, role).await? {
            return Err(AppError::NotFoundError("user not found".into()));
        }

        info!(actor = %actor.user_id, target = %user_id, role = %role, "role changed");
        Ok(())
    }

    async fn issue_pair(&self, user: &User) -> Result<TokenPair, AppError> {
        let access_token = self.codec.issue_access(user.id, user.role)?;
        let refresh_token = self.codec.issue_refresh(user.id)?;
        self.ledger
            .issue(
                &refresh_token,
                user.id,
                TokenKind::Refresh,
                self.codec.lifetime(TokenKind::Refresh),
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn issue_action_token(&self, user: &User, kind: TokenKind) -> Result<String, AppError> {
        let token = self.codec.issue_action(user.id, kind)?;
        self.ledger
            .issue(&token, user.id, kind, self.codec.lifetime(kind))
            .await?;
        Ok(token)
    }

    async fn send_verification(&self, user: &User) -> Result<(), AppError> {
        let token = self.issue_action_token(user, TokenKind::VerifyEmail).await?;
        dispatch(
            self.notifier.clone(),
            Letter::verification(&self.email, &user.email, &token),
        );
        Ok(())
    }

    async fn send_reset(&self, email: &str) -> Result<(), AppError> {
        let user = match self.users.get_user_by_email(email).await? {
            Some(user) => user,
            None => return Ok(()),
        };
        let token = self.issue_action_token(&user, TokenKind::PasswordReset).await?;
        dispatch(
            self.notifier.clone(),
            Letter::password_reset(&self.email, &user.email, &token),
        );
        Ok(())
    }
}

fn clean_name(field: &str, raw: &str) -> Result<String, ValidationError> {
    let name = raw.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::BadRequest(format!(
            "{} must be 1 to {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Single-use token failures surface as "bad token"; storage failures stay 500s.
fn bad_token(err: LedgerError) -> AppError {
    match err {
        LedgerError::Database(e) => AppError::DatabaseError(e),
        _ => ValidationError::BadToken.into(),
    }
}
