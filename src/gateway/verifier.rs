use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use std::sync::Arc;

use crate::auth::{Identity, TokenCodec, TokenKind};
use crate::error::AuthError;

/// Checks bearer access tokens at the edge. Shares the signing secret with
/// the auth service but never touches its storage.
#[derive(Clone)]
pub struct GatewayVerifier {
    codec: Arc<TokenCodec>,
}

impl GatewayVerifier {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self
            .codec
            .verify(token)
            .and_then(|c| c.expect_kind(TokenKind::Access))
            .map_err(|e| {
                tracing::debug!("bearer token rejected: {}", e);
                AuthError::InvalidToken
            })?;

        Ok(Identity::from_claims(&claims))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::InvalidToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingToken);
    }
    match token.trim() {
        "" => Err(AuthError::MissingToken),
        token => Ok(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenLifetimes;
    use crate::db::models::Role;
    use actix_web::http::header::HeaderValue;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(b"test_secret", TokenLifetimes::default()))
    }

    fn with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accepts_access_token() {
        let codec = codec();
        let uid = Uuid::new_v4();
        let token = codec.issue_access(uid, Role::Mentor).unwrap();
        let verifier = GatewayVerifier::new(codec);

        let identity = verifier
            .authenticate(&with_auth(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(identity.user_id, uid);
        assert_eq!(identity.role, Some(Role::Mentor));
    }

    #[test]
    fn missing_or_non_bearer_header() {
        let verifier = GatewayVerifier::new(codec());
        assert_eq!(
            verifier.authenticate(&HeaderMap::new()),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            verifier.authenticate(&with_auth("Basic dXNlcjpwYXNz")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            verifier.authenticate(&with_auth("Bearer ")),
            Err(AuthError::MissingToken)
        );
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let codec = codec();
        let token = codec.issue_refresh(Uuid::new_v4()).unwrap();
        let verifier = GatewayVerifier::new(codec);

        assert_eq!(
            verifier.authenticate(&with_auth(&format!("Bearer {}", token))),
            Err(AuthError::InvalidToken)
        );
    }

    #[test]
    fn expired_and_foreign_tokens_are_invalid() {
        let codec = codec();
        let expired = codec
            .issue_at(
                Uuid::new_v4(),
                Some(Role::User),
                TokenKind::Access,
                Utc::now() - Duration::hours(3),
            )
            .unwrap();
        let foreign = TokenCodec::new(b"someone_else", TokenLifetimes::default())
            .issue_access(Uuid::new_v4(), Role::Admin)
            .unwrap();
        let verifier = GatewayVerifier::new(codec);

        for token in [expired, foreign, "garbage".to_string()] {
            assert_eq!(
                verifier.authenticate(&with_auth(&format!("Bearer {}", token))),
                Err(AuthError::InvalidToken)
            );
        }
    }
}
