use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use tracking_gateway::{AppState, GatewayConfig, create_router};

fn app_with(config: GatewayConfig) -> Router {
    create_router(AppState::new(config))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn order_body() -> Value {
    json!({
        "trackingNumber": "RTN-ABC12345",
        "zipCode": "63101",
        "pickup": { "address": "1 Market St" },
        "delivery": { "address": "500 Olive St" },
        "createdAt": "2024-03-01T12:00:00Z"
    })
}

async fn registered_app() -> Router {
    let app = app_with(GatewayConfig::default());
    let (status, body) = call(&app, post_json("/internal/orders", order_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["lastEventId"], 1);
    app
}

#[tokio::test]
async fn test_snapshot_with_valid_credential() {
    let app = registered_app().await;

    let (status, body) = call(&app, get("/tracking/RTN-ABC12345?zipCode=63101")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["trackingNumber"], "RTN-ABC12345");
    assert_eq!(body["status"], "created");
    assert_eq!(body["pickup"]["address"], "1 Market St");

    // Lowercase input and padded postal code are normalized
    let (status, _) = call(&app, get("/tracking/rtn-abc12345?zipCode=%2063101%20")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_authorization_symmetry() {
    let app = registered_app().await;

    let unknown = call(&app, get("/tracking/RTN-NOPE0000?zipCode=63101")).await;
    let wrong_zip = call(&app, get("/tracking/RTN-ABC12345?zipCode=10001")).await;
    let missing_zip = call(&app, get("/tracking/RTN-ABC12345")).await;
    let malformed = call(&app, get("/tracking/RTN%24%24%24?zipCode=63101")).await;
    let unknown_events = call(&app, get("/tracking/RTN-NOPE0000/events?zipCode=63101")).await;
    let wrong_events = call(&app, get("/tracking/RTN-ABC12345/events?zipCode=10001")).await;

    assert_eq!(unknown.0, StatusCode::NOT_FOUND);
    assert_eq!(
        unknown.1,
        json!({ "error": "NOT_FOUND", "message": "Tracking info not found" })
    );
    for other in [wrong_zip, missing_zip, malformed, unknown_events, wrong_events] {
        assert_eq!(other, unknown);
    }
}

#[tokio::test]
async fn test_publish_and_read_event_log() {
    let app = registered_app().await;

    let (status, event) = call(
        &app,
        post_json(
            "/internal/orders/RTN-ABC12345/events",
            json!({
                "eventType": "driver_assigned",
                "description": "Driver assigned",
                "metadata": { "driverName": "Sam", "vehicle": "White van" }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(event["id"], 2);

    let (status, log) = call(&app, get("/tracking/RTN-ABC12345/events?zipCode=63101")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["totalEvents"], 2);
    assert_eq!(log["events"][0]["eventType"], "created");
    assert_eq!(log["events"][1]["eventType"], "driver_assigned");

    let (_, snapshot) = call(&app, get("/tracking/RTN-ABC12345?zipCode=63101")).await;
    assert_eq!(snapshot["driver"]["name"], "Sam");
    assert_eq!(snapshot["lastEventId"], 2);
}

#[tokio::test]
async fn test_publish_error_statuses() {
    let app = registered_app().await;

    let (status, body) = call(&app, post_json("/internal/orders", order_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "CONFLICT");

    let (status, _) = call(
        &app,
        post_json(
            "/internal/orders/RTN-NOPE0000/events",
            json!({ "eventType": "en_route" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Location updates need coordinates
    let (status, body) = call(
        &app,
        post_json(
            "/internal/orders/RTN-ABC12345/events",
            json!({ "eventType": "location_update" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");

    let (status, _) = call(
        &app,
        post_json(
            "/internal/orders/RTN-ABC12345/events",
            json!({ "eventType": "delivered" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        &app,
        post_json(
            "/internal/orders/RTN-ABC12345/events",
            json!({ "eventType": "en_route" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["message"],
        "Tracking stream closed for RTN-ABC12345: order is delivered"
    );
}

#[tokio::test]
async fn test_internal_token_required_when_configured() {
    let app = app_with(GatewayConfig {
        internal_token: Some("s3cret".to_string()),
        ..GatewayConfig::default()
    });

    let (status, body) = call(&app, post_json("/internal/orders", order_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "UNAUTHORIZED");

    let mut request = post_json("/internal/orders", order_body());
    request
        .headers_mut()
        .insert("X-Internal-Token", "s3cret".parse().unwrap());
    let (status, _) = call(&app, request).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_snapshot_rate_limit() {
    let app = app_with(GatewayConfig {
        snapshot_rate_capacity: 2,
        snapshot_rate_refill: 0.001,
        ..GatewayConfig::default()
    });

    for _ in 0..2 {
        let (status, _) = call(&app, get("/tracking/RTN-ABC12345?zipCode=00000")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
    let (status, body) = call(&app, get("/tracking/RTN-ABC12345?zipCode=00000")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn test_health_reports_metrics() {
    let app = registered_app().await;
    call(&app, get("/tracking/RTN-ABC12345?zipCode=10001")).await;

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["metrics"]["authorizationFailures"], 1);
    assert_eq!(body["channels"], 0);
}

#[tokio::test]
async fn test_metrics_text_exposition() {
    let app = registered_app().await;
    call(&app, get("/tracking/RTN-ABC12345?zipCode=10001")).await;

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 9);
    assert!(lines.contains(&"authorization_failures 1"));
    assert!(lines.contains(&"channels_active 0"));
}
