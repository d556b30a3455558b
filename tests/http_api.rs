use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use diesel_async::{
    AsyncPgConnection,
    pooled_connection::{AsyncDieselConnectionManager, bb8},
};
use keebshop_orderservice::{app_state::AppState, config};
use tower::ServiceExt;

/// Router over a pool that never connects; only requests rejected before any
/// query are exercised here.
fn router() -> Router {
    let config = config::load_from(|key| {
        (key == "DATABASE_URL").then(|| "postgres://localhost/unreachable".to_string())
    })
    .unwrap();
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database.url);
    let pool = bb8::Pool::builder().build_unchecked(manager);
    keebshop_orderservice::app(AppState::new(pool, config)).0
}

#[tokio::test]
async fn cart_requires_customer_identity() {
    let response = router()
        .oneshot(
            Request::get("/customers/carts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_customer_identity_is_rejected() {
    let response = router()
        .oneshot(
            Request::post("/customers/orders")
                .header("x-customer-id", "not-a-number")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_changes_are_staff_only() {
    let response = router()
        .oneshot(
            Request::patch("/staff/orders/1/status")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"status":"delivered"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_webhook_body_is_a_client_error() {
    let response = router()
        .oneshot(
            Request::post("/payments/webhook")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
