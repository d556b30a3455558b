use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    carts,
    middleware,
    models::{CartLineEntity, ProductKind, ProductRef},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/customers/carts",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_my_cart))
            .routes(utoipa_axum::routes!(add_item))
            .routes(utoipa_axum::routes!(set_quantity))
            .routes(utoipa_axum::routes!(clear_cart))
            .routes(utoipa_axum::routes!(remove_item))
            .routes(utoipa_axum::routes!(get_availability))
            .route_layer(axum::middleware::from_fn(middleware::customer_identity)),
    )
}

#[derive(Deserialize, ToSchema)]
pub struct CartItemReq {
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub quantity: i32,
}

impl CartItemReq {
    fn product(&self) -> ProductRef {
        ProductRef::new(self.product_kind, self.product_id)
    }
}

#[derive(Serialize, ToSchema)]
pub struct ClearCartRes {
    pub removed: usize,
}

#[derive(Serialize, ToSchema)]
pub struct AvailabilityRes {
    pub product: ProductRef,
    pub available: i64,
}

/// Fetch the authenticated customer's cart.
#[utoipa::path(
    get,
    path = "/",
    tags = ["Carts"],
    responses(
        (status = 200, description = "Cart lines, oldest first", body = StdResponse<Vec<CartLineEntity>, String>)
    )
)]
async fn get_my_cart(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let lines = carts::list(&state, customer_id).await?;

    Ok(StdResponse {
        data: Some(lines),
        message: Some("Get cart successfully"),
    })
}

/// Add units of a product to the cart, on top of any already there.
#[utoipa::path(
    post,
    path = "/",
    tags = ["Carts"],
    request_body = CartItemReq,
    responses(
        (status = 200, description = "Cart line after the addition", body = StdResponse<CartLineEntity, String>),
        (status = 409, description = "Not enough stock")
    )
)]
async fn add_item(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<CartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let line = carts::add_item(&state, customer_id, body.product(), body.quantity).await?;

    Ok(StdResponse {
        data: Some(line),
        message: Some("Item added to cart"),
    })
}

/// Replace the quantity of a product in the cart.
#[utoipa::path(
    put,
    path = "/",
    tags = ["Carts"],
    request_body = CartItemReq,
    responses(
        (status = 200, description = "Updated cart line", body = StdResponse<CartLineEntity, String>),
        (status = 409, description = "Not enough stock")
    )
)]
async fn set_quantity(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
    Json(body): Json<CartItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let line = carts::set_quantity(&state, customer_id, body.product(), body.quantity).await?;

    Ok(StdResponse {
        data: Some(line),
        message: Some("Cart updated"),
    })
}

/// Empty the cart.
#[utoipa::path(
    delete,
    path = "/",
    tags = ["Carts"],
    responses(
        (status = 200, description = "Number of removed lines", body = StdResponse<ClearCartRes, String>)
    )
)]
async fn clear_cart(
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let removed = carts::clear(&state, customer_id).await?;

    Ok(StdResponse {
        data: Some(ClearCartRes { removed }),
        message: Some("Cart cleared"),
    })
}

/// Remove one product from the cart.
#[utoipa::path(
    delete,
    path = "/{kind}/{id}",
    tags = ["Carts"],
    params(
        ("kind" = ProductKind, Path, description = "Product kind"),
        ("id" = i32, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Removed cart line", body = StdResponse<CartLineEntity, String>),
        (status = 404, description = "Product is not in the cart")
    )
)]
async fn remove_item(
    Path((kind, id)): Path<(ProductKind, i32)>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let line = carts::remove_item(&state, customer_id, ProductRef::new(kind, id)).await?;

    Ok(StdResponse {
        data: Some(line),
        message: Some("Item removed from cart"),
    })
}

/// How many units of a product the caller could hold in their cart.
#[utoipa::path(
    get,
    path = "/{kind}/{id}/availability",
    tags = ["Carts"],
    params(
        ("kind" = ProductKind, Path, description = "Product kind"),
        ("id" = i32, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Units available to this customer", body = StdResponse<AvailabilityRes, String>)
    )
)]
async fn get_availability(
    Path((kind, id)): Path<(ProductKind, i32)>,
    State(state): State<AppState>,
    Extension(customer_id): Extension<i32>,
) -> Result<impl IntoResponse, AppError> {
    let product = ProductRef::new(kind, id);
    let available = carts::availability(&state, customer_id, product).await?;

    Ok(StdResponse {
        data: Some(AvailabilityRes { product, available }),
        message: Some("Get availability successfully"),
    })
}
