pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod notify;

use actix_web::HttpResponse;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::{AuthService, TokenCodec};
pub use db::{DbOperations, User};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Installs the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// State shared by the auth service's handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub auth_service: Arc<AuthService>,
    pub db: Option<DbOperations>,
}

impl AppState {
    /// Connects to Postgres, applies migrations and wires the session service.
    pub async fn new(config: Settings) -> Result<Self> {
        let db = DbOperations::new_with_options(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        db.run_migrations().await?;

        let notifier =
            notify::LogNotifier::new(&config.email).reveal_links(config.is_development());
        let auth_service = AuthService::new(
            Arc::new(db.clone()),
            Arc::new(auth::PgRefreshLedger::new(db.clone())),
            Arc::new(TokenCodec::from_config(&config.auth)),
            Arc::new(notifier),
            &config,
        )?;

        Ok(Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db: Some(db),
        })
    }

    /// State around an already built service, with no database attached.
    pub fn with_service(config: Settings, auth_service: AuthService) -> Self {
        Self {
            config: Arc::new(config),
            auth_service: Arc::new(auth_service),
            db: None,
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(db) = &self.db {
            db.close().await;
        }
        Ok(())
    }
}
