//! Inventory reservation and settlement for a keyboard shop: carts that never
//! oversell, checkout into immutable orders, and payment callbacks that deduct
//! and restore stock exactly once.

pub mod app_error;
pub mod app_state;
pub mod bootstrap;
pub mod carts;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod inventory;
pub mod middleware;
pub mod models;
pub mod orders;
pub mod payments;
pub mod routes;
pub mod schema;
pub mod settlement;
pub mod sweep;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use utoipa::openapi::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::app_state::AppState;

/// All routers merged, with their OpenAPI description.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    routes::payments::routes_with_openapi()
        .merge(routes::customers::carts::routes_with_openapi())
        .merge(routes::customers::orders::routes_with_openapi())
        .merge(routes::staff::orders::routes_with_openapi())
        .merge(routes::staff::catalog::routes_with_openapi())
}

/// The service router without the Swagger UI.
pub fn app(state: AppState) -> (Router, OpenApi) {
    let (router, openapi) = routes_with_openapi().split_for_parts();
    let router = router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state);
    (router, openapi)
}
