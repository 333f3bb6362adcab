//! Edge gateway: a single public entry point that routes `/api/*` requests to
//! the owning service, verifying access tokens on protected prefixes.

pub mod proxy;
pub mod routes;
pub mod verifier;

use actix_cors::Cors;
use actix_web::web;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenCodec;
use crate::config::{CorsConfig, Settings};
use crate::error::AppError;

pub use routes::{Route, RouteClass, RouteTable};
pub use verifier::GatewayVerifier;

#[derive(Clone)]
pub struct GatewayState {
    pub routes: Arc<RouteTable>,
    pub verifier: GatewayVerifier,
    pub client: reqwest::Client,
}

impl GatewayState {
    pub fn new(config: &Settings) -> Result<Self, AppError> {
        let routes = RouteTable::from_config(&config.gateway)?;
        let codec = TokenCodec::from_config(&config.auth);
        Self::with_routes(routes, codec, Duration::from_secs(config.gateway.upstream_timeout_secs))
    }

    pub fn with_routes(
        routes: RouteTable,
        codec: TokenCodec,
        upstream_timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::ConfigError(format!("http client: {}", e)))?;

        Ok(Self {
            routes: Arc::new(routes),
            verifier: GatewayVerifier::new(Arc::new(codec)),
            client,
        })
    }
}

/// Health check plus the catch-all forwarder.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(crate::health_check))
        .default_service(web::to(proxy::forward));
}

pub fn cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default().allow_any_origin()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
    };

    cors.allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec!["Authorization", "Content-Type"])
        .supports_credentials()
        .max_age(config.max_age as usize)
}
