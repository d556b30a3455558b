use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::{AppError, StdResponse},
    app_state::AppState,
    catalog::{self, NewBuild, NewProduct},
    middleware,
    models::{BuildEntity, CatalogProductEntity, InventoryRecordEntity, ProductKind, ProductRef},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/staff/catalog",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(register_product))
            .routes(utoipa_axum::routes!(register_build))
            .routes(utoipa_axum::routes!(remove_product))
            .routes(utoipa_axum::routes!(restock))
            .route_layer(axum::middleware::from_fn(middleware::staff_authorization)),
    )
}

#[derive(Serialize, ToSchema)]
pub struct RegisterProductRes {
    pub product: CatalogProductEntity,
    pub inventory: InventoryRecordEntity,
}

/// Register a stocked product together with its inventory record.
#[utoipa::path(
    post,
    path = "/products",
    tags = ["Catalog"],
    request_body = NewProduct,
    responses(
        (status = 200, description = "Product registered", body = StdResponse<RegisterProductRes, String>)
    )
)]
async fn register_product(
    State(state): State<AppState>,
    Json(body): Json<NewProduct>,
) -> Result<impl IntoResponse, AppError> {
    let (product, inventory) = catalog::register_product(&state, body).await?;

    Ok(StdResponse {
        data: Some(RegisterProductRes { product, inventory }),
        message: Some("Product registered"),
    })
}

/// Register a build from an existing kit, switch and keycap set.
#[utoipa::path(
    post,
    path = "/builds",
    tags = ["Catalog"],
    request_body = NewBuild,
    responses(
        (status = 200, description = "Build registered", body = StdResponse<BuildEntity, String>),
        (status = 404, description = "A component does not exist")
    )
)]
async fn register_build(
    State(state): State<AppState>,
    Json(body): Json<NewBuild>,
) -> Result<impl IntoResponse, AppError> {
    let build = catalog::register_build(&state, body).await?;

    Ok(StdResponse {
        data: Some(build),
        message: Some("Build registered"),
    })
}

/// Delete a product and its inventory record once nothing references it.
#[utoipa::path(
    delete,
    path = "/products/{kind}/{id}",
    tags = ["Catalog"],
    params(
        ("kind" = ProductKind, Path, description = "Product kind"),
        ("id" = i32, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Product removed", body = StdResponse<ProductRef, String>),
        (status = 404, description = "No such product"),
        (status = 409, description = "Still in a cart, an open order or a build")
    )
)]
async fn remove_product(
    Path((kind, id)): Path<(ProductKind, i32)>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let product = ProductRef::new(kind, id);
    catalog::remove_product(&state, product).await?;

    Ok(StdResponse {
        data: Some(product),
        message: Some("Product removed"),
    })
}

#[derive(Deserialize, ToSchema)]
pub struct RestockReq {
    pub quantity: i32,
}

/// Receive goods into stock.
#[utoipa::path(
    post,
    path = "/products/{kind}/{id}/restock",
    tags = ["Catalog"],
    params(
        ("kind" = ProductKind, Path, description = "Product kind"),
        ("id" = i32, Path, description = "Product ID")
    ),
    request_body = RestockReq,
    responses(
        (status = 200, description = "Inventory after restocking", body = StdResponse<InventoryRecordEntity, String>)
    )
)]
async fn restock(
    Path((kind, id)): Path<(ProductKind, i32)>,
    State(state): State<AppState>,
    Json(body): Json<RestockReq>,
) -> Result<impl IntoResponse, AppError> {
    let record = catalog::restock(&state, ProductRef::new(kind, id), body.quantity).await?;

    Ok(StdResponse {
        data: Some(record),
        message: Some("Restocked"),
    })
}
