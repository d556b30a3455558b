use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::{error::InventoryError, models::ProductRef};

/// Standard JSON envelope for every response body.
#[derive(Serialize, ToSchema, Debug)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T: Serialize, M: Serialize> IntoResponse for StdResponse<T, M> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    ForbiddenResource(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient stock for {product}: {available} available")]
    InsufficientStock { product: ProductRef, available: i64 },
    #[error("The service is busy, please try again")]
    TryAgain,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenResource(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::InsufficientStock { .. } => StatusCode::CONFLICT,
            AppError::TryAgain => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body: StdResponse<Value, String> = match &self {
            AppError::InsufficientStock { product, available } => StdResponse {
                data: Some(json!({ "product": product, "available": available })),
                message: Some(self.to_string()),
            },
            AppError::Other(err) => {
                error!("Unhandled error: {err:#}");
                StdResponse {
                    data: None,
                    message: Some("Internal server error".into()),
                }
            }
            _ => StdResponse {
                data: None,
                message: Some(self.to_string()),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock { product, available } => {
                AppError::InsufficientStock { product, available }
            }
            InventoryError::NotFound | InventoryError::UnknownTransaction(_) => AppError::NotFound,
            InventoryError::Forbidden => {
                AppError::ForbiddenResource("Not allowed to act on this resource".into())
            }
            InventoryError::EmptyCart
            | InventoryError::InvalidQuantity(_)
            | InventoryError::NotStockable(_)
            | InventoryError::UnsupportedProvider(_)
            | InventoryError::AmountMismatch { .. } => AppError::BadRequest(err.to_string()),
            InventoryError::InvalidTransition { .. }
            | InventoryError::InvalidPaymentTransition { .. }
            | InventoryError::ProductInUse(_) => AppError::Conflict(err.to_string()),
            InventoryError::LockTimeout | InventoryError::Pool(_) => AppError::TryAgain,
            InventoryError::InventoryNotConfigured(product) => {
                error!(%product, "Product has no inventory record; catalog lifecycle hook missed it");
                AppError::Other(anyhow::anyhow!("Inventory not configured for {product}"))
            }
            InventoryError::Database(err) => AppError::Other(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderStatus, ProductKind};

    #[test]
    fn inventory_errors_map_to_http_statuses() {
        let cases = [
            (
                InventoryError::InsufficientStock {
                    product: ProductRef::new(ProductKind::Kit, 1),
                    available: 0,
                },
                StatusCode::CONFLICT,
            ),
            (InventoryError::EmptyCart, StatusCode::BAD_REQUEST),
            (InventoryError::LockTimeout, StatusCode::SERVICE_UNAVAILABLE),
            (InventoryError::Forbidden, StatusCode::FORBIDDEN),
            (
                InventoryError::UnknownTransaction("abc".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                InventoryError::InvalidTransition {
                    from: OrderStatus::Cancelled,
                    to: OrderStatus::Paid,
                },
                StatusCode::CONFLICT,
            ),
            (
                InventoryError::ProductInUse(ProductRef::new(ProductKind::Build, 3)),
                StatusCode::CONFLICT,
            ),
            (InventoryError::NotFound, StatusCode::NOT_FOUND),
            (
                InventoryError::InventoryNotConfigured(ProductRef::new(ProductKind::Switch, 2)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[tokio::test]
    async fn insufficient_stock_names_the_product() {
        let response = AppError::InsufficientStock {
            product: ProductRef::new(ProductKind::Build, 9),
            available: 2,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["product"]["kind"], "build");
        assert_eq!(body["data"]["product"]["id"], 9);
        assert_eq!(body["data"]["available"], 2);
    }
}
