//! Time-driven order transitions.
//!
//! Both passes select their rows `FOR UPDATE SKIP LOCKED`, so several service
//! instances can sweep at once and an order being paid or cancelled right now
//! is simply left for the next tick.

use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{error, info, instrument};

use crate::{
    app_state::AppState,
    config::SweepConfig,
    db,
    error::InventoryError,
    models::{Actor, OrderEntity, OrderStatus},
    orders::{check_transition, transition_locked},
    schema::orders,
};

/// Moves every order in `batch` to `to`, returning the ids that changed.
async fn transition_batch(
    conn: &mut AsyncPgConnection,
    batch: Vec<OrderEntity>,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Vec<i32>, InventoryError> {
    let mut changed = Vec::with_capacity(batch.len());
    for order in batch {
        check_transition(order.status, to, Actor::System, order.customer_id)?;
        transition_locked(conn, &order, to, now).await?;
        changed.push(order.id);
    }
    Ok(changed)
}

/// Cancels orders left unpaid for longer than the pending timeout.
pub async fn expire_stale_pending_in(
    conn: &mut AsyncPgConnection,
    config: &SweepConfig,
    now: DateTime<Utc>,
) -> Result<Vec<i32>, InventoryError> {
    let cutoff = now - config.pending_timeout;
    let stale: Vec<OrderEntity> = orders::table
        .filter(orders::status.eq(OrderStatus::Pending))
        .filter(orders::created_at.lt(cutoff))
        .order_by(orders::id.asc())
        .limit(config.batch_size)
        .select(OrderEntity::as_select())
        .for_update()
        .skip_locked()
        .load(conn)
        .await?;

    transition_batch(conn, stale, OrderStatus::Cancelled, now).await
}

/// Marks orders delivered once they have been paid for long enough.
pub async fn promote_paid_in(
    conn: &mut AsyncPgConnection,
    config: &SweepConfig,
    now: DateTime<Utc>,
) -> Result<Vec<i32>, InventoryError> {
    let cutoff = now - config.delivered_after;
    let due: Vec<OrderEntity> = orders::table
        .filter(orders::status.eq(OrderStatus::Paid))
        .filter(orders::paid_at.lt(cutoff))
        .order_by(orders::id.asc())
        .limit(config.batch_size)
        .select(OrderEntity::as_select())
        .for_update()
        .skip_locked()
        .load(conn)
        .await?;

    transition_batch(conn, due, OrderStatus::Delivered, now).await
}

#[instrument(skip(state))]
pub async fn expire_stale_pending_orders(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<Vec<i32>, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let expired = db::with_retry(&state.config.retry, "expire_pending_orders", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        let config = state.config.sweep.clone();
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                expire_stale_pending_in(conn, &config, now).await
            })
        })
        .await
    })
    .await?;

    if !expired.is_empty() {
        info!(count = expired.len(), orders = ?expired, "Expired stale pending orders");
    }
    Ok(expired)
}

#[instrument(skip(state))]
pub async fn promote_paid_to_delivered(
    state: &AppState,
    now: DateTime<Utc>,
) -> Result<Vec<i32>, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let promoted = db::with_retry(&state.config.retry, "promote_paid_orders", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        let config = state.config.sweep.clone();
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                promote_paid_in(conn, &config, now).await
            })
        })
        .await
    })
    .await?;

    if !promoted.is_empty() {
        info!(count = promoted.len(), orders = ?promoted, "Promoted paid orders to delivered");
    }
    Ok(promoted)
}

/// Runs both passes forever on the configured interval.
pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.sweep.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = Utc::now();

        if let Err(err) = expire_stale_pending_orders(&state, now).await {
            error!("Pending order sweep failed: {err}");
        }
        if let Err(err) = promote_paid_to_delivered(&state, now).await {
            error!("Delivery promotion sweep failed: {err}");
        }
    }
}
