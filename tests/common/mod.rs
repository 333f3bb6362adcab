#![allow(dead_code)]

use actix_web::web;
use config::Map;
use std::sync::Arc;
use upskill_auth::auth::InMemoryRefreshLedger;
use upskill_auth::db::InMemoryUserStore;
use upskill_auth::notify::MemoryNotifier;
use upskill_auth::{AppState, AuthService, Settings, TokenCodec};

pub struct TestContext {
    pub state: web::Data<AppState>,
    pub users: InMemoryUserStore,
    pub ledger: InMemoryRefreshLedger,
    pub outbox: MemoryNotifier,
    pub codec: TokenCodec,
}

pub fn settings(pairs: &[(&str, &str)]) -> Settings {
    let vars: Map<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Settings::from_env_map(vars).expect("Failed to load test config")
}

pub fn context(email_enabled: bool) -> TestContext {
    let config = settings(&[("APP_EMAIL__ENABLED", if email_enabled { "true" } else { "false" })]);
    let users = InMemoryUserStore::new();
    let ledger = InMemoryRefreshLedger::new();
    let outbox = MemoryNotifier::new();
    let codec = TokenCodec::from_config(&config.auth);

    let service = AuthService::new(
        Arc::new(users.clone()),
        Arc::new(ledger.clone()),
        Arc::new(codec.clone()),
        Arc::new(outbox.clone()),
        &config,
    )
    .expect("Failed to build auth service");

    TestContext {
        state: web::Data::new(AppState::with_service(config, service)),
        users,
        ledger,
        outbox,
        codec,
    }
}
