use axum::{Json, extract::State, response::IntoResponse};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app_error::AppError,
    app_state::AppState,
    error::InventoryError,
    payments::{self, PaymentConfirmation},
};

/// Defines routes with OpenAPI specs.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/payments",
        OpenApiRouter::new().routes(utoipa_axum::routes!(webhook)),
    )
}

/// Gateway callback body, after signature verification upstream.
#[derive(Deserialize, ToSchema)]
pub struct WebhookReq {
    pub txn_ref: String,
    pub result_code: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub paid_at: DateTime<Utc>,
}

/// What the gateway sees. Carries no order or stock state.
#[derive(Serialize, ToSchema, Debug, PartialEq, Eq)]
pub struct WebhookAck {
    pub code: &'static str,
    pub message: &'static str,
}

const ACCEPTED: WebhookAck = WebhookAck {
    code: "00",
    message: "Confirmed",
};

const ACKNOWLEDGED: WebhookAck = WebhookAck {
    code: "99",
    message: "Acknowledged",
};

/// Rejections the gateway must not retry. They are answered like any other
/// callback so a forged request learns nothing.
fn is_final_rejection(err: &InventoryError) -> bool {
    matches!(
        err,
        InventoryError::UnknownTransaction(_)
            | InventoryError::AmountMismatch { .. }
            | InventoryError::InvalidPaymentTransition { .. }
            | InventoryError::NotFound
    )
}

/// Receive a payment result from the gateway. Safe to deliver more than once.
#[utoipa::path(
    post,
    path = "/webhook",
    tags = ["Payments"],
    request_body = WebhookReq,
    responses(
        (status = 200, description = "Callback received", body = WebhookAck),
        (status = 503, description = "Temporarily unable to process; retry later")
    )
)]
async fn webhook(
    State(state): State<AppState>,
    Json(body): Json<WebhookReq>,
) -> Result<impl IntoResponse, AppError> {
    let confirmation = PaymentConfirmation {
        result_code: body.result_code,
        amount: body.amount,
        paid_at: body.paid_at,
    };

    match payments::apply_confirmation(&state, &body.txn_ref, &confirmation).await {
        Ok(_) => Ok(Json(ACCEPTED)),
        Err(err) if is_final_rejection(&err) => Ok(Json(ACKNOWLEDGED)),
        Err(InventoryError::InsufficientStock { product, available }) => {
            error!(
                txn_ref = %body.txn_ref,
                %product,
                available,
                "Paid order cannot be deducted; stock changed outside the reservation flow"
            );
            Err(AppError::TryAgain)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;

    #[test]
    fn forged_or_stale_callbacks_are_final() {
        assert!(is_final_rejection(&InventoryError::UnknownTransaction("x".into())));
        assert!(is_final_rejection(&InventoryError::AmountMismatch {
            txn_ref: "x".into()
        }));
        assert!(is_final_rejection(&InventoryError::InvalidPaymentTransition {
            from: PaymentStatus::Failed,
            to: PaymentStatus::Pending,
        }));
    }

    #[test]
    fn transient_failures_are_retried_by_the_gateway() {
        assert!(!is_final_rejection(&InventoryError::LockTimeout));
        assert!(!is_final_rejection(&InventoryError::Pool("down".into())));
    }
}
