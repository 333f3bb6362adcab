use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::identity::Identity;
use crate::auth::service::{NewAccount, TokenPair};
use crate::error::{AppError, ValidationError};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub email: String,
    pub email_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: String,
}

/// Mounts the session endpoints under `/api/auth`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/auth")
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config())
            .route("/register", web::post().to(register))
            .route("/verify", web::get().to(verify_email))
            .route("/verify/resend", web::post().to(resend_verification))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            .route("/logout", web::post().to(logout))
            .route("/password/forgot", web::post().to(forgot_password))
            .route("/password/reset", web::post().to(reset_password))
            .route("/admin/users/{id}/role", web::post().to(change_role)),
    );
}

fn bad_request(message: String) -> actix_web::Error {
    AppError::ValidationError(ValidationError::BadRequest(message)).into()
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| bad_request(err.to_string()))
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| bad_request(err.to_string()))
}

fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| bad_request(err.to_string()))
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let req = req.into_inner();
    if req.validate().is_err() {
        return Err(ValidationError::InvalidEmail.into());
    }

    let user = state
        .auth_service
        .register(NewAccount {
            email: req.email,
            password: req.password,
            first_name: req.first_name,
            last_name: req.last_name,
        })
        .await?;

    Ok(HttpResponse::Created().json(RegisterResponse {
        id: user.id,
        email: user.email,
        email_verified: user.email_verified,
    }))
}

pub async fn verify_email(
    query: web::Query<TokenQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.verify_email(&query.token).await?;
    Ok(HttpResponse::Ok().content_type("text/plain").body("verified"))
}

/// The address a lookup-style request names, if it names a plausible one.
/// Unparseable bodies and malformed addresses get the same answer as unknown
/// ones.
fn requested_email(req: Option<web::Json<EmailRequest>>) -> Option<String> {
    req.map(web::Json::into_inner)
        .filter(|req| req.validate().is_ok())
        .map(|req| req.email)
}

pub async fn resend_verification(
    req: Option<web::Json<EmailRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if let Some(email) = requested_email(req) {
        state.auth_service.resend_verification(&email).await?;
    }
    Ok(HttpResponse::NoContent().finish())
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    match state.auth_service.login(&req.email, &req.password).await {
        Ok(pair) => Ok(HttpResponse::Ok().json(pair)),
        Err(e) => {
            warn!("login rejected: {}", e);
            Err(e)
        }
    }
}

pub async fn refresh(
    req: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let pair: TokenPair = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(HttpResponse::Ok().json(pair))
}

pub async fn logout(
    req: web::Json<RefreshRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state.auth_service.logout(&req.refresh_token).await?;
    info!("session closed");
    Ok(HttpResponse::NoContent().finish())
}

pub async fn forgot_password(
    req: Option<web::Json<EmailRequest>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    if let Some(email) = requested_email(req) {
        state.auth_service.forgot_password(&email).await?;
    }
    Ok(HttpResponse::NoContent().finish())
}

pub async fn reset_password(
    req: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state
        .auth_service
        .reset_password(&req.token, &req.new_password)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "updated" })))
}

pub async fn change_role(
    identity: Identity,
    path: web::Path<Uuid>,
    req: web::Json<ChangeRoleRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    state
        .auth_service
        .change_role(&identity, path.into_inner(), &req.role)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
