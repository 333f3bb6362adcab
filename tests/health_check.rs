mod common;

use actix_web::{test, web, App};
use chrono::DateTime;
use upskill_auth::gateway::{self, GatewayState};

#[actix_web::test]
async fn test_health_check() {
    let ctx = common::context(false);

    // Create test app
    let app = test::init_service(
        App::new()
            .app_data(ctx.state.clone())
            .route("/health", web::get().to(upskill_auth::health_check)),
    )
    .await;

    // Send request
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    // Assert response
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");

    // Verify timestamp is valid RFC3339
    let timestamp = body["timestamp"].as_str().expect("Timestamp should be a string");
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[actix_web::test]
async fn test_gateway_health_is_not_proxied() {
    let settings = common::settings(&[]);
    let state = web::Data::new(GatewayState::new(&settings).unwrap());
    let app = test::init_service(
        App::new()
            .app_data(state)
            .configure(gateway::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");
}
