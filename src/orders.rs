//! Order status transitions and the gated ledger effects attached to them.

use chrono::{DateTime, Utc};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::{
    app_state::AppState,
    db,
    error::InventoryError,
    inventory::{
        ledger,
        resolver::{self, Demand},
    },
    models::{
        Actor, OrderEntity, OrderLineEntity, OrderStatus, PaymentStatus, ProductKind,
    },
    schema::{order_lines, orders, payment_transactions},
};

#[derive(Serialize, Debug, Clone, ToSchema)]
pub struct OrderWithLines {
    pub order: OrderEntity,
    pub lines: Vec<OrderLineEntity>,
}

/// Ledger side effect of moving an order into a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryEffect {
    Deduct,
    Restore,
    Nothing,
}

/// Deduction happens once, on the way into `paid`; restoration only undoes an
/// outstanding deduction.
pub fn inventory_effect(to: OrderStatus, inventory_deducted: bool) -> InventoryEffect {
    match to {
        OrderStatus::Paid if !inventory_deducted => InventoryEffect::Deduct,
        OrderStatus::Cancelled | OrderStatus::Refunded if inventory_deducted => {
            InventoryEffect::Restore
        }
        _ => InventoryEffect::Nothing,
    }
}

pub fn check_transition(
    from: OrderStatus,
    to: OrderStatus,
    actor: Actor,
    owner_id: i32,
) -> Result<(), InventoryError> {
    if let Actor::Customer(customer_id) = actor {
        if customer_id != owner_id {
            return Err(InventoryError::Forbidden);
        }
    }

    let privileged = matches!(actor, Actor::Staff | Actor::System);
    let allowed = match (from, to) {
        (OrderStatus::Pending, OrderStatus::Paid) => actor == Actor::System,
        (OrderStatus::Pending, OrderStatus::Cancelled) => true,
        (OrderStatus::Paid, OrderStatus::Cancelled) => true,
        (OrderStatus::Paid, OrderStatus::Delivered)
        | (OrderStatus::Paid, OrderStatus::Refunded)
        | (OrderStatus::Delivered, OrderStatus::Refunded) => privileged,
        _ => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(InventoryError::InvalidTransition { from, to })
    }
}

pub(crate) async fn lock_order(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<OrderEntity, InventoryError> {
    orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .for_update()
        .get_result(conn)
        .await
        .optional()?
        .ok_or(InventoryError::NotFound)
}

pub(crate) async fn load_lines(
    conn: &mut AsyncPgConnection,
    order_id: i32,
) -> Result<Vec<OrderLineEntity>, InventoryError> {
    Ok(order_lines::table
        .filter(order_lines::order_id.eq(order_id))
        .order_by(order_lines::id.asc())
        .select(OrderLineEntity::as_select())
        .load(conn)
        .await?)
}

/// Raw inventory consumed by every line of an order.
pub(crate) async fn order_demand(
    conn: &mut AsyncPgConnection,
    lines: &[OrderLineEntity],
) -> Result<Demand, InventoryError> {
    let build_ids: Vec<i32> = lines
        .iter()
        .filter(|line| line.product_kind == ProductKind::Build)
        .map(|line| line.product_id)
        .collect();
    let recipes = resolver::load_recipes(conn, &build_ids).await?;

    let mut demand = Demand::new();
    for line in lines {
        demand.add(
            &resolver::components_of(line.product(), &recipes)?,
            line.quantity,
        );
    }
    Ok(demand)
}

/// Moves a locked order to `to`, applying the gated ledger effect. `at` stamps
/// `paid_at` when entering `paid`. Legality is the caller's job.
pub(crate) async fn transition_locked(
    conn: &mut AsyncPgConnection,
    order: &OrderEntity,
    to: OrderStatus,
    at: DateTime<Utc>,
) -> Result<OrderEntity, InventoryError> {
    let effect = inventory_effect(to, order.inventory_deducted);
    let inventory_deducted = match effect {
        InventoryEffect::Deduct => {
            let lines = load_lines(conn, order.id).await?;
            let demand = order_demand(conn, &lines).await?;
            ledger::deduct(conn, &demand).await?;
            true
        }
        InventoryEffect::Restore => {
            let lines = load_lines(conn, order.id).await?;
            let demand = order_demand(conn, &lines).await?;
            ledger::restore(conn, &demand).await?;
            false
        }
        InventoryEffect::Nothing => order.inventory_deducted,
    };

    if matches!(to, OrderStatus::Cancelled | OrderStatus::Refunded) {
        // Open payment attempts of a dead order can no longer succeed.
        diesel::update(
            payment_transactions::table
                .filter(payment_transactions::order_id.eq(order.id))
                .filter(payment_transactions::status.eq(PaymentStatus::Pending)),
        )
        .set((
            payment_transactions::status.eq(PaymentStatus::Cancelled),
            payment_transactions::updated_at.eq(diesel::dsl::now),
        ))
        .execute(conn)
        .await?;
    }

    let paid_at = if to == OrderStatus::Paid {
        Some(at)
    } else {
        order.paid_at
    };

    let updated = diesel::update(orders::table.find(order.id))
        .set((
            orders::status.eq(to),
            orders::inventory_deducted.eq(inventory_deducted),
            orders::paid_at.eq(paid_at),
            orders::updated_at.eq(diesel::dsl::now),
        ))
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(
        order_id = order.id,
        from = %order.status,
        to = %to,
        ?effect,
        "Order status changed"
    );
    Ok(updated)
}

/// Validated status change inside the caller's transaction. Re-applying the
/// current status is a no-op.
pub async fn update_status_in(
    conn: &mut AsyncPgConnection,
    order_id: i32,
    to: OrderStatus,
    actor: Actor,
) -> Result<OrderEntity, InventoryError> {
    let order = lock_order(conn, order_id).await?;
    if let Actor::Customer(customer_id) = actor {
        if customer_id != order.customer_id {
            return Err(InventoryError::Forbidden);
        }
    }
    if order.status == to {
        return Ok(order);
    }
    check_transition(order.status, to, actor, order.customer_id)?;
    transition_locked(conn, &order, to, Utc::now()).await
}

#[instrument(skip(state))]
pub async fn update_status(
    state: &AppState,
    order_id: i32,
    to: OrderStatus,
    actor: Actor,
) -> Result<OrderEntity, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "update_order_status", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                update_status_in(conn, order_id, to, actor).await
            })
        })
        .await
    })
    .await
}

pub async fn get_order(
    state: &AppState,
    order_id: i32,
    actor: Actor,
) -> Result<OrderWithLines, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;

    let order: OrderEntity = orders::table
        .find(order_id)
        .select(OrderEntity::as_select())
        .get_result(conn)
        .await
        .optional()?
        .ok_or(InventoryError::NotFound)?;

    if let Actor::Customer(customer_id) = actor {
        if customer_id != order.customer_id {
            // Do not reveal that someone else's order exists.
            return Err(InventoryError::NotFound);
        }
    }

    let lines = load_lines(conn, order.id).await?;
    Ok(OrderWithLines { order, lines })
}

pub async fn list_by_customer(
    state: &AppState,
    customer_id: i32,
) -> Result<Vec<OrderWithLines>, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;

    let orders: Vec<OrderEntity> = orders::table
        .filter(orders::customer_id.eq(customer_id))
        .order_by(orders::created_at.desc())
        .select(OrderEntity::as_select())
        .load(conn)
        .await?;

    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let lines: Vec<OrderLineEntity> = order_lines::table
        .filter(order_lines::order_id.eq_any(&order_ids))
        .order_by(order_lines::id.asc())
        .select(OrderLineEntity::as_select())
        .load(conn)
        .await?;

    let mut group: std::collections::HashMap<i32, Vec<OrderLineEntity>> =
        std::collections::HashMap::new();
    for line in lines {
        group.entry(line.order_id).or_default().push(line);
    }

    Ok(orders
        .into_iter()
        .map(|order| OrderWithLines {
            lines: group.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduction_and_restoration_are_gated() {
        assert_eq!(inventory_effect(OrderStatus::Paid, false), InventoryEffect::Deduct);
        assert_eq!(inventory_effect(OrderStatus::Paid, true), InventoryEffect::Nothing);
        assert_eq!(
            inventory_effect(OrderStatus::Cancelled, true),
            InventoryEffect::Restore
        );
        assert_eq!(
            inventory_effect(OrderStatus::Cancelled, false),
            InventoryEffect::Nothing
        );
        assert_eq!(
            inventory_effect(OrderStatus::Refunded, true),
            InventoryEffect::Restore
        );
        assert_eq!(
            inventory_effect(OrderStatus::Delivered, true),
            InventoryEffect::Nothing
        );
    }

    #[test]
    fn only_the_system_marks_orders_paid() {
        assert!(check_transition(OrderStatus::Pending, OrderStatus::Paid, Actor::System, 1).is_ok());
        assert!(check_transition(OrderStatus::Pending, OrderStatus::Paid, Actor::Staff, 1).is_err());
        assert!(
            check_transition(OrderStatus::Pending, OrderStatus::Paid, Actor::Customer(1), 1)
                .is_err()
        );
    }

    #[test]
    fn customers_cancel_only_their_own_orders() {
        assert!(
            check_transition(OrderStatus::Pending, OrderStatus::Cancelled, Actor::Customer(1), 1)
                .is_ok()
        );
        assert!(
            check_transition(OrderStatus::Paid, OrderStatus::Cancelled, Actor::Customer(1), 1)
                .is_ok()
        );
        assert!(matches!(
            check_transition(OrderStatus::Pending, OrderStatus::Cancelled, Actor::Customer(2), 1),
            Err(InventoryError::Forbidden)
        ));
        assert!(
            check_transition(OrderStatus::Paid, OrderStatus::Delivered, Actor::Customer(1), 1)
                .is_err()
        );
    }

    #[test]
    fn terminal_states_stay_terminal() {
        for to in OrderStatus::ALL {
            assert!(check_transition(OrderStatus::Cancelled, *to, Actor::Staff, 1).is_err());
            assert!(check_transition(OrderStatus::Refunded, *to, Actor::System, 1).is_err());
        }
        assert!(matches!(
            check_transition(OrderStatus::Delivered, OrderStatus::Pending, Actor::Staff, 1),
            Err(InventoryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn staff_can_refund_delivered_orders() {
        assert!(
            check_transition(OrderStatus::Delivered, OrderStatus::Refunded, Actor::Staff, 1).is_ok()
        );
        assert!(check_transition(OrderStatus::Paid, OrderStatus::Delivered, Actor::System, 1).is_ok());
    }
}
