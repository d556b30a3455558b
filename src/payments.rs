//! Payment transactions and the confirmation state machine.
//!
//! ```text
//! pending ──► success ──► failed | cancelled     (reversal: stock restored)
//!    │            ▲
//!    └──► failed | cancelled ──┘                 (late success)
//! ```
//!
//! Nothing ever returns to `pending`; a new attempt is a new transaction.
//! Ledger effects are keyed off the order's `inventory_deducted` flag, read and
//! written under the order's row lock, so duplicated or concurrent callbacks
//! deduct at most once and restore only what was deducted.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    config::PaymentConfig,
    db,
    error::InventoryError,
    models::{
        Actor, CreatePaymentTransactionEntity, OrderEntity, OrderStatus,
        PaymentStatus, PaymentTransactionEntity,
    },
    orders::{self, lock_order, transition_locked},
    schema::payment_transactions,
};

/// A verified gateway callback. Signature checks happen before this point.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PaymentConfirmation {
    pub result_code: String,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub paid_at: DateTime<Utc>,
}

/// What a confirmation does beyond recording itself on the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationEffect {
    /// Same outcome already recorded.
    Duplicate,
    /// Transaction updated; order and ledger untouched.
    Recorded,
    /// Order moved to `paid` and stock deducted.
    OrderPaid,
    /// Earlier success reversed; order refunded and stock restored.
    OrderReversed,
    /// Success for an order that is already closed; needs a manual refund.
    Orphaned,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfirmationOutcome {
    pub effect: ConfirmationEffect,
    pub transaction: PaymentTransactionEntity,
    pub order: OrderEntity,
}

pub fn classify(result_code: &str, config: &PaymentConfig) -> PaymentStatus {
    if result_code == config.success_code {
        PaymentStatus::Success
    } else if config.cancel_codes.iter().any(|code| code == result_code) {
        PaymentStatus::Cancelled
    } else {
        PaymentStatus::Failed
    }
}

/// Decides the effect of moving a transaction from `old` to `new`.
/// `other_success` is whether another transaction of the same order succeeded.
pub fn plan(
    old: PaymentStatus,
    new: PaymentStatus,
    order_status: OrderStatus,
    other_success: bool,
) -> Result<ConfirmationEffect, InventoryError> {
    use PaymentStatus::*;

    if new == Pending {
        return Err(InventoryError::InvalidPaymentTransition { from: old, to: new });
    }
    if old == new {
        return Ok(ConfirmationEffect::Duplicate);
    }

    let effect = match (new, order_status) {
        (Success, OrderStatus::Pending) => ConfirmationEffect::OrderPaid,
        (Success, OrderStatus::Paid | OrderStatus::Delivered) => ConfirmationEffect::Recorded,
        (Success, OrderStatus::Cancelled | OrderStatus::Refunded) => ConfirmationEffect::Orphaned,
        (Failed | Cancelled, OrderStatus::Paid | OrderStatus::Delivered)
            if old == Success && !other_success =>
        {
            ConfirmationEffect::OrderReversed
        }
        _ => ConfirmationEffect::Recorded,
    };
    Ok(effect)
}

/// Applies a confirmation inside the caller's transaction.
///
/// Lock order is order row, then transaction row, then ledger rows, matching
/// every other path that touches an order.
pub async fn apply_confirmation_in(
    conn: &mut AsyncPgConnection,
    config: &PaymentConfig,
    txn_ref: &str,
    confirmation: &PaymentConfirmation,
) -> Result<ConfirmationOutcome, InventoryError> {
    let order_id: i32 = payment_transactions::table
        .filter(payment_transactions::txn_ref.eq(txn_ref))
        .select(payment_transactions::order_id)
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| InventoryError::UnknownTransaction(txn_ref.to_string()))?;

    let order = lock_order(conn, order_id).await?;

    let transaction: PaymentTransactionEntity = payment_transactions::table
        .filter(payment_transactions::txn_ref.eq(txn_ref))
        .select(PaymentTransactionEntity::as_select())
        .for_update()
        .get_result(conn)
        .await?;

    if transaction.amount != confirmation.amount {
        return Err(InventoryError::AmountMismatch {
            txn_ref: txn_ref.to_string(),
        });
    }

    let old = transaction.status;
    let new = classify(&confirmation.result_code, config);

    let other_success: i64 = payment_transactions::table
        .filter(payment_transactions::order_id.eq(order.id))
        .filter(payment_transactions::id.ne(transaction.id))
        .filter(payment_transactions::status.eq(PaymentStatus::Success))
        .count()
        .get_result(conn)
        .await?;

    let effect = plan(old, new, order.status, other_success > 0)?;

    if effect == ConfirmationEffect::Duplicate {
        info!(txn_ref, status = %new, "Duplicate payment confirmation ignored");
        return Ok(ConfirmationOutcome {
            effect,
            transaction,
            order,
        });
    }

    let paid_at = if new == PaymentStatus::Success {
        Some(confirmation.paid_at)
    } else {
        transaction.paid_at
    };

    let transaction = diesel::update(payment_transactions::table.find(transaction.id))
        .set((
            payment_transactions::status.eq(new),
            payment_transactions::result_code.eq(&confirmation.result_code),
            payment_transactions::paid_at.eq(paid_at),
            payment_transactions::updated_at.eq(diesel::dsl::now),
        ))
        .returning(PaymentTransactionEntity::as_returning())
        .get_result(conn)
        .await?;

    let order = match effect {
        ConfirmationEffect::OrderPaid => {
            transition_locked(conn, &order, OrderStatus::Paid, confirmation.paid_at).await?
        }
        ConfirmationEffect::OrderReversed => {
            transition_locked(conn, &order, OrderStatus::Refunded, Utc::now()).await?
        }
        ConfirmationEffect::Orphaned => {
            error!(
                txn_ref,
                order_id = order.id,
                order_status = %order.status,
                "Payment succeeded for a closed order; refund it manually"
            );
            order
        }
        ConfirmationEffect::Recorded | ConfirmationEffect::Duplicate => order,
    };

    info!(txn_ref, from = %old, to = %new, ?effect, "Payment confirmation applied");
    Ok(ConfirmationOutcome {
        effect,
        transaction,
        order,
    })
}

/// Single ingress point for gateway callbacks. Safe to retry.
#[instrument(skip(state, confirmation), fields(result_code = %confirmation.result_code))]
pub async fn apply_confirmation(
    state: &AppState,
    txn_ref: &str,
    confirmation: &PaymentConfirmation,
) -> Result<ConfirmationOutcome, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let result = db::with_retry(&state.config.retry, "apply_confirmation", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        let config = state.config.payment.clone();
        let txn_ref = txn_ref.to_string();
        let confirmation = confirmation.clone();
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                apply_confirmation_in(conn, &config, &txn_ref, &confirmation).await
            })
        })
        .await
    })
    .await;

    if let Err(err @ (InventoryError::UnknownTransaction(_) | InventoryError::AmountMismatch { .. })) =
        &result
    {
        warn!(txn_ref, "Rejected payment confirmation, possibly forged or stale: {err}");
    }
    result
}

/// Opens a new pending transaction for the full amount of a pending order.
pub async fn create_payment_in(
    conn: &mut AsyncPgConnection,
    config: &PaymentConfig,
    order_id: i32,
    actor: Actor,
    provider: &str,
) -> Result<PaymentTransactionEntity, InventoryError> {
    if !config.providers.iter().any(|known| known == provider) {
        return Err(InventoryError::UnsupportedProvider(provider.to_string()));
    }

    let order = lock_order(conn, order_id).await?;
    if let Actor::Customer(customer_id) = actor {
        if customer_id != order.customer_id {
            return Err(InventoryError::Forbidden);
        }
    }
    if order.status != OrderStatus::Pending {
        return Err(InventoryError::InvalidTransition {
            from: order.status,
            to: OrderStatus::Paid,
        });
    }

    let transaction = diesel::insert_into(payment_transactions::table)
        .values(CreatePaymentTransactionEntity {
            id: Uuid::new_v4(),
            order_id: order.id,
            txn_ref: Uuid::new_v4().simple().to_string(),
            status: PaymentStatus::Pending,
            amount: order.total_amount.clone(),
            provider: provider.to_string(),
        })
        .returning(PaymentTransactionEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(
        order_id,
        txn_ref = %transaction.txn_ref,
        amount = %transaction.amount,
        "Payment transaction opened"
    );
    Ok(transaction)
}

#[instrument(skip(state))]
pub async fn create_payment_for_order(
    state: &AppState,
    order_id: i32,
    actor: Actor,
    provider: &str,
) -> Result<PaymentTransactionEntity, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "create_payment", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        let config = state.config.payment.clone();
        let provider = provider.to_string();
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                create_payment_in(conn, &config, order_id, actor, &provider).await
            })
        })
        .await
    })
    .await
}

/// Transactions of an order, newest first.
pub async fn list_for_order(
    state: &AppState,
    order_id: i32,
    actor: Actor,
) -> Result<Vec<PaymentTransactionEntity>, InventoryError> {
    // Reuses the order lookup for its ownership check.
    let order = orders::get_order(state, order_id, actor).await?.order;
    let conn = &mut db::connection(&state.db_pool).await?;

    Ok(payment_transactions::table
        .filter(payment_transactions::order_id.eq(order.id))
        .order_by(payment_transactions::created_at.desc())
        .select(PaymentTransactionEntity::as_select())
        .load(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PaymentConfig {
        PaymentConfig::default()
    }

    #[test]
    fn result_codes_are_classified() {
        assert_eq!(classify("00", &config()), PaymentStatus::Success);
        assert_eq!(classify("24", &config()), PaymentStatus::Cancelled);
        assert_eq!(classify("51", &config()), PaymentStatus::Failed);
    }

    #[test]
    fn first_success_pays_the_order() {
        let effect = plan(
            PaymentStatus::Pending,
            PaymentStatus::Success,
            OrderStatus::Pending,
            false,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::OrderPaid);
    }

    #[test]
    fn repeated_success_is_a_duplicate() {
        let effect = plan(
            PaymentStatus::Success,
            PaymentStatus::Success,
            OrderStatus::Paid,
            false,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::Duplicate);
    }

    #[test]
    fn second_transaction_success_does_not_pay_twice() {
        let effect = plan(
            PaymentStatus::Pending,
            PaymentStatus::Success,
            OrderStatus::Paid,
            true,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::Recorded);
    }

    #[test]
    fn reversal_of_success_restores() {
        for new in [PaymentStatus::Failed, PaymentStatus::Cancelled] {
            let effect = plan(PaymentStatus::Success, new, OrderStatus::Paid, false).unwrap();
            assert_eq!(effect, ConfirmationEffect::OrderReversed);
        }
    }

    #[test]
    fn reversal_is_skipped_while_another_payment_stands() {
        let effect = plan(
            PaymentStatus::Success,
            PaymentStatus::Failed,
            OrderStatus::Paid,
            true,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::Recorded);
    }

    #[test]
    fn failure_of_pending_payment_leaves_order_alone() {
        let effect = plan(
            PaymentStatus::Pending,
            PaymentStatus::Failed,
            OrderStatus::Pending,
            false,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::Recorded);
    }

    #[test]
    fn success_on_closed_order_is_orphaned() {
        let effect = plan(
            PaymentStatus::Pending,
            PaymentStatus::Success,
            OrderStatus::Cancelled,
            false,
        )
        .unwrap();
        assert_eq!(effect, ConfirmationEffect::Orphaned);
    }

    #[test]
    fn nothing_returns_to_pending() {
        assert!(matches!(
            plan(
                PaymentStatus::Failed,
                PaymentStatus::Pending,
                OrderStatus::Pending,
                false
            ),
            Err(InventoryError::InvalidPaymentTransition { .. })
        ));
    }
}
