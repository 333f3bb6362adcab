use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use tracing::info;
use upskill_auth::auth::handlers;
use upskill_auth::{health_check, init_tracing, AppError, AppState, Settings};

#[actix_web::main]
async fn main() -> upskill_auth::Result<()> {
    // Load environment variables
    dotenv().ok();

    init_tracing();

    let config = Settings::new()?;
    info!("Configuration loaded successfully");
    if config.is_development() {
        info!("Running in development mode; letters are written to the log");
    }

    let state = AppState::new(config.clone()).await?;
    let state = web::Data::new(state);
    info!("Database ready, migrations applied");

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Auth service listening on {}:{}", config.server.host, config.server.port);

    let app_state = state.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .route("/health", web::get().to(health_check))
            .configure(handlers::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    state.shutdown().await?;
    info!("Auth service stopped");
    Ok(())
}
