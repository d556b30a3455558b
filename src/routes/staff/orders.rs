use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    middleware,
    models::{Actor, OrderEntity, OrderStatus},
    orders::{self, OrderWithLines},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/staff/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(update_order_status))
            .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
    )
}

/// Fetch any order.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Staff"],
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderWithLines, String>)
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::get_order(&state, id, Actor::Staff).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Get order successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusReq {
    pub status: OrderStatus,
}

/// Move an order to a new status (deliver, cancel, refund).
#[utoipa::path(
    patch,
    path = "/{id}/status",
    tags = ["Staff"],
    params(
        ("id" = i32, Path, description = "Order ID to update")
    ),
    request_body = UpdateStatusReq,
    responses(
        (status = 200, description = "Order updated", body = StdResponse<OrderEntity, String>),
        (status = 409, description = "Transition not allowed")
    )
)]
async fn update_order_status(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Json(body): Json<UpdateStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::update_status(&state, id, body.status, Actor::Staff).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Order status updated"),
    })
}
