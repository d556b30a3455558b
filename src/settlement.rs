//! Checkout: turns a customer's cart into an immutable pending order.

use std::collections::{BTreeSet, HashMap};

use bigdecimal::BigDecimal;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, instrument, warn};

use crate::{
    app_state::AppState,
    db,
    error::InventoryError,
    inventory::{
        reservation::{self, Exclusion},
        resolver::{self, Component},
    },
    models::{
        BuildEntity, CartLineEntity, CatalogProductEntity, CreateOrderEntity,
        CreateOrderLineEntity, OrderEntity, OrderLineEntity, OrderStatus, ProductKind, ProductRef,
    },
    orders::OrderWithLines,
    schema::{builds, cart_lines, catalog_products, order_lines, orders},
};

/// Name and unit price captured into an order line.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub name: String,
    pub price: BigDecimal,
}

/// `Σ price × quantity`.
pub fn order_total<'a>(lines: impl IntoIterator<Item = (&'a BigDecimal, i32)>) -> BigDecimal {
    lines
        .into_iter()
        .fold(BigDecimal::from(0), |total, (price, quantity)| {
            total + price * &BigDecimal::from(quantity)
        })
}

/// Current names and prices of the products in `lines`.
async fn price_book(
    conn: &mut AsyncPgConnection,
    lines: &[CartLineEntity],
) -> Result<HashMap<ProductRef, Snapshot>, InventoryError> {
    let (build_lines, simple_lines): (Vec<&CartLineEntity>, Vec<&CartLineEntity>) = lines
        .iter()
        .partition(|line| line.product_kind == ProductKind::Build);

    let mut book = HashMap::new();

    if !simple_lines.is_empty() {
        let kinds: Vec<ProductKind> = simple_lines.iter().map(|line| line.product_kind).collect();
        let ids: Vec<i32> = simple_lines.iter().map(|line| line.product_id).collect();
        let products: Vec<CatalogProductEntity> = catalog_products::table
            .filter(catalog_products::product_kind.eq_any(&kinds))
            .filter(catalog_products::product_id.eq_any(&ids))
            .select(CatalogProductEntity::as_select())
            .load(conn)
            .await?;
        for product in products {
            book.insert(
                ProductRef::new(product.product_kind, product.product_id),
                Snapshot {
                    name: product.name,
                    price: product.unit_price,
                },
            );
        }
    }

    if !build_lines.is_empty() {
        let ids: Vec<i32> = build_lines.iter().map(|line| line.product_id).collect();
        let found: Vec<BuildEntity> = builds::table
            .filter(builds::id.eq_any(&ids))
            .select(BuildEntity::as_select())
            .load(conn)
            .await?;
        for build in found {
            book.insert(
                ProductRef::new(ProductKind::Build, build.id),
                Snapshot {
                    name: build.name,
                    price: build.unit_price,
                },
            );
        }
    }

    Ok(book)
}

/// Settles the customer's cart inside the caller's transaction.
///
/// Re-validates every line against current stock (other customers' carts and
/// unpaid orders count as claimed), snapshots names and prices, and deletes the
/// consumed cart lines. Any failure leaves the cart untouched.
pub async fn settle(
    conn: &mut AsyncPgConnection,
    customer_id: i32,
) -> Result<OrderWithLines, InventoryError> {
    db::lock_customer_cart(conn, customer_id).await?;

    let lines: Vec<CartLineEntity> = cart_lines::table
        .filter(cart_lines::customer_id.eq(customer_id))
        .order_by((
            cart_lines::added_at.asc(),
            cart_lines::product_kind.asc(),
            cart_lines::product_id.asc(),
        ))
        .select(CartLineEntity::as_select())
        .load(conn)
        .await?;

    if lines.is_empty() {
        return Err(InventoryError::EmptyCart);
    }

    let build_ids: Vec<i32> = lines
        .iter()
        .filter(|line| line.product_kind == ProductKind::Build)
        .map(|line| line.product_id)
        .collect();
    let recipes = resolver::load_recipes(conn, &build_ids).await?;

    let resolved: Vec<(ProductRef, i32, Vec<Component>)> = lines
        .iter()
        .map(|line| {
            resolver::components_of(line.product(), &recipes)
                .map(|components| (line.product(), line.quantity, components))
        })
        .collect::<Result<_, _>>()?;

    let targets: BTreeSet<ProductRef> = resolved
        .iter()
        .flat_map(|(_, _, components)| components.iter().map(|component| component.product))
        .collect();

    let position =
        reservation::lock_position(conn, &targets, Exclusion::Customer(customer_id)).await?;
    if let Err(err) = position.check_lines(
        resolved
            .iter()
            .map(|(product, quantity, components)| (*product, *quantity, components.as_slice())),
    ) {
        warn!(customer_id, "Checkout rejected: {err}");
        return Err(err);
    }

    let book = price_book(conn, &lines).await?;
    let mut snapshots = Vec::with_capacity(lines.len());
    for line in &lines {
        let snapshot = book
            .get(&line.product())
            .cloned()
            .ok_or(InventoryError::InventoryNotConfigured(line.product()))?;
        snapshots.push((line, snapshot));
    }

    let total_amount = order_total(
        snapshots
            .iter()
            .map(|(line, snapshot)| (&snapshot.price, line.quantity)),
    );

    let order: OrderEntity = diesel::insert_into(orders::table)
        .values(CreateOrderEntity {
            customer_id,
            status: OrderStatus::Pending,
            total_amount,
        })
        .returning(OrderEntity::as_returning())
        .get_result(conn)
        .await?;

    let new_lines: Vec<CreateOrderLineEntity> = snapshots
        .into_iter()
        .map(|(line, snapshot)| CreateOrderLineEntity {
            order_id: order.id,
            product_kind: line.product_kind,
            product_id: line.product_id,
            name_snapshot: snapshot.name,
            price_snapshot: snapshot.price,
            quantity: line.quantity,
        })
        .collect();

    let created_lines: Vec<OrderLineEntity> = diesel::insert_into(order_lines::table)
        .values(&new_lines)
        .returning(OrderLineEntity::as_returning())
        .get_results(conn)
        .await?;

    diesel::delete(cart_lines::table.filter(cart_lines::customer_id.eq(customer_id)))
        .execute(conn)
        .await?;

    info!(
        customer_id,
        order_id = order.id,
        total = %order.total_amount,
        lines = created_lines.len(),
        "Order created"
    );

    Ok(OrderWithLines {
        order,
        lines: created_lines,
    })
}

#[instrument(skip(state))]
pub async fn create_order(
    state: &AppState,
    customer_id: i32,
) -> Result<OrderWithLines, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "create_order", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                settle(conn, customer_id).await
            })
        })
        .await
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn total_sums_price_times_quantity() {
        let ten = dec("10.00");
        let five_fifty = dec("5.50");
        let total = order_total([(&ten, 3), (&five_fifty, 1)]);
        assert_eq!(total, dec("35.50"));
    }

    #[test]
    fn total_of_nothing_is_zero() {
        assert_eq!(order_total(std::iter::empty()), BigDecimal::from(0));
    }
}
