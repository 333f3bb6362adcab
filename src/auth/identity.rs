//! Caller identity propagated from the gateway to upstream services.
//!
//! The gateway strips any client-supplied copies of these headers and sets
//! them only after verifying an access token, so services behind it may
//! trust them as-is.

use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};
use uuid::Uuid;

use crate::auth::Claims;
use crate::db::models::Role;
use crate::error::{AppError, AuthError};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Option<Role>,
}

impl Identity {
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AuthError::MissingIdentity)?;

        // An absent or unrecognised role means no privileges.
        let role = headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());

        Ok(Self { user_id, role })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }

    /// Header pairs to attach to a forwarded request.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(USER_ID_HEADER, self.user_id.to_string())];
        if let Some(role) = self.role {
            pairs.push((USER_ROLE_HEADER, role.as_str().to_string()));
        }
        pairs
    }
}

impl FromRequest for Identity {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Identity::from_headers(req.headers()).map_err(AppError::from))
    }
}
