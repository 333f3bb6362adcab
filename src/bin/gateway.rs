use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use tracing::info;
use upskill_auth::gateway::{self, GatewayState};
use upskill_auth::{init_tracing, AppError, Settings};

#[actix_web::main]
async fn main() -> upskill_auth::Result<()> {
    dotenv().ok();

    init_tracing();

    let config = Settings::new()?;
    let state = web::Data::new(GatewayState::new(&config)?);
    info!(
        auth = %config.gateway.auth_url,
        user = %config.gateway.user_url,
        progress = %config.gateway.progress_url,
        ai = %config.gateway.ai_url,
        "Upstreams configured"
    );

    let listener = TcpListener::bind(format!("{}:{}", config.gateway.host, config.gateway.port))?;
    info!("Gateway listening on {}:{}", config.gateway.host, config.gateway.port);

    let cors_config = config.cors.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(gateway::cors(&cors_config))
            .app_data(state.clone())
            .configure(gateway::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
