use axum::{
    Extension, Json,
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
    models::{Actor, OrderEntity, OrderStatus, PaymentTransactionEntity},
    orders::{self, OrderWithLines},
    payments, settlement,
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/customers/orders",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_orders))
            .routes(utoipa_axum::routes!(checkout))
            .routes(utoipa_axum::routes!(get_order))
            .routes(utoipa_axum::routes!(cancel_order))
            .routes(utoipa_axum::routes!(create_payment_for_order))
            .routes(utoipa_axum::routes!(get_order_payments))
            .route_layer(axum::middleware::from_fn(middleware::customer_identity)),
    )
}

/// Fetch all orders of the authenticated customer, newest first.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Orders"],
    responses(
        (status = 200, description = "Orders with their lines", body = StdResponse<Vec<OrderWithLines>, String>)
    )
)]
async fn get_my_orders(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let orders = orders::list_by_customer(&state, customer_id).await?;

    Ok(StdResponse {
        data: Some(orders),
        message: Some("Get orders successfully"),
    })
}

/// Turn the cart into a pending order.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Orders"],
    responses(
        (status = 200, description = "Order created", body = StdResponse<OrderWithLines, String>),
        (status = 400, description = "Cart is empty"),
        (status = 409, description = "A line is no longer in stock")
    )
)]
async fn checkout(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let order = settlement::create_order(&state, customer_id).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Order created successfully"),
    })
}

/// Fetch one order of the authenticated customer.
#[utoipa::path(
    get,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to fetch")
    ),
    responses(
        (status = 200, description = "Get order successfully", body = StdResponse<OrderWithLines, String>),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::get_order(&state, id, Actor::Customer(customer_id)).await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Get order successfully"),
    })
}

/// Cancel an order. Stock is given back if the order had been paid.
#[utoipa::path(
    delete,
    path = "/{id}",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to cancel")
    ),
    responses(
        (status = 200, description = "Order cancelled", body = StdResponse<OrderEntity, String>),
        (status = 409, description = "Order can no longer be cancelled")
    )
)]
async fn cancel_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let order = orders::update_status(
        &state,
        id,
        OrderStatus::Cancelled,
        Actor::Customer(customer_id),
    )
    .await?;

    Ok(StdResponse {
        data: Some(order),
        message: Some("Order cancelled successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct CreatePaymentReq {
    pub provider: String,
}

/// Open a new payment attempt for a pending order.
#[utoipa::path(
    post,
    path = "/{id}/payment",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID to pay for")
    ),
    request_body = CreatePaymentReq,
    responses(
        (status = 200, description = "Payment transaction opened", body = StdResponse<PaymentTransactionEntity, String>),
        (status = 409, description = "Order is not awaiting payment")
    )
)]
async fn create_payment_for_order(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<CreatePaymentReq>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = payments::create_payment_for_order(
        &state,
        id,
        Actor::Customer(customer_id),
        &body.provider,
    )
    .await?;

    Ok(StdResponse {
        data: Some(transaction),
        message: Some("Payment created successfully"),
    })
}

/// List the payment attempts of an order.
#[utoipa::path(
    get,
    path = "/{id}/payments",
    tags = ["Orders"],
    params(
        ("id" = i32, Path, description = "Order ID")
    ),
    responses(
        (status = 200, description = "Payment transactions, newest first", body = StdResponse<Vec<PaymentTransactionEntity>, String>)
    )
)]
async fn get_order_payments(
    Path(id): Path<i32>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let transactions = payments::list_for_order(&state, id, Actor::Customer(customer_id)).await?;

    Ok(StdResponse {
        data: Some(transactions),
        message: Some("Get payments successfully"),
    })
}
