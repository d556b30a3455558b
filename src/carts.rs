//! Cart mutations. Every write that grows a claim runs the reservation check in
//! the same transaction, under the same ledger locks, as the write itself.

use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::{info, instrument};

use crate::{
    app_state::AppState,
    db,
    error::InventoryError,
    inventory::reservation::{self, Exclusion},
    models::{CartLineEntity, CreateCartLineEntity, ProductRef},
    schema::cart_lines,
};

/// How a requested quantity combines with an existing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartWrite {
    /// Add to whatever is already in the cart.
    Increment,
    /// Replace the line's quantity.
    Replace,
}

async fn find_line(
    conn: &mut AsyncPgConnection,
    customer_id: i32,
    product: ProductRef,
) -> Result<Option<CartLineEntity>, InventoryError> {
    Ok(cart_lines::table
        .find((customer_id, product.kind, product.id))
        .select(CartLineEntity::as_select())
        .get_result(conn)
        .await
        .optional()?)
}

/// Checks and writes one cart line inside the caller's transaction.
pub async fn write_line_in(
    conn: &mut AsyncPgConnection,
    customer_id: i32,
    product: ProductRef,
    quantity: i32,
    mode: CartWrite,
) -> Result<CartLineEntity, InventoryError> {
    if quantity < 1 {
        return Err(InventoryError::InvalidQuantity(i64::from(quantity)));
    }

    db::lock_customer_cart(conn, customer_id).await?;

    let existing = find_line(conn, customer_id, product).await?;
    let requested = match (mode, &existing) {
        (CartWrite::Increment, Some(line)) => line
            .quantity
            .checked_add(quantity)
            .ok_or(InventoryError::InvalidQuantity(
                i64::from(line.quantity) + i64::from(quantity),
            ))?,
        _ => quantity,
    };

    // The line being edited is replaced, so it must not count against itself.
    reservation::check_or_reject(
        conn,
        product,
        requested,
        Exclusion::CartLine {
            customer_id,
            product,
        },
    )
    .await?;

    let line = diesel::insert_into(cart_lines::table)
        .values(CreateCartLineEntity {
            customer_id,
            product_kind: product.kind,
            product_id: product.id,
            quantity: requested,
        })
        .on_conflict((
            cart_lines::customer_id,
            cart_lines::product_kind,
            cart_lines::product_id,
        ))
        .do_update()
        .set((
            cart_lines::quantity.eq(requested),
            cart_lines::updated_at.eq(diesel::dsl::now),
        ))
        .returning(CartLineEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(customer_id, %product, quantity = requested, "Cart line written");
    Ok(line)
}

async fn write_line(
    state: &AppState,
    customer_id: i32,
    product: ProductRef,
    quantity: i32,
    mode: CartWrite,
) -> Result<CartLineEntity, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "write_cart_line", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                write_line_in(conn, customer_id, product, quantity, mode).await
            })
        })
        .await
    })
    .await
}

/// Adds `quantity` units of `product` to the customer's cart.
#[instrument(skip(state))]
pub async fn add_item(
    state: &AppState,
    customer_id: i32,
    product: ProductRef,
    quantity: i32,
) -> Result<CartLineEntity, InventoryError> {
    write_line(state, customer_id, product, quantity, CartWrite::Increment).await
}

/// Sets the quantity of `product` in the customer's cart.
#[instrument(skip(state))]
pub async fn set_quantity(
    state: &AppState,
    customer_id: i32,
    product: ProductRef,
    quantity: i32,
) -> Result<CartLineEntity, InventoryError> {
    write_line(state, customer_id, product, quantity, CartWrite::Replace).await
}

pub async fn remove_item(
    state: &AppState,
    customer_id: i32,
    product: ProductRef,
) -> Result<CartLineEntity, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;

    let removed = diesel::delete(cart_lines::table.find((customer_id, product.kind, product.id)))
        .returning(CartLineEntity::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or(InventoryError::NotFound)?;

    info!(customer_id, %product, "Cart line removed");
    Ok(removed)
}

pub async fn clear(state: &AppState, customer_id: i32) -> Result<usize, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;

    let removed = diesel::delete(cart_lines::table.filter(cart_lines::customer_id.eq(customer_id)))
        .execute(conn)
        .await?;

    info!(customer_id, removed, "Cart cleared");
    Ok(removed)
}

pub async fn list(state: &AppState, customer_id: i32) -> Result<Vec<CartLineEntity>, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;

    Ok(cart_lines::table
        .filter(cart_lines::customer_id.eq(customer_id))
        .order_by(cart_lines::added_at.asc())
        .select(CartLineEntity::as_select())
        .load(conn)
        .await?)
}

/// Largest quantity the customer's line for `product` could be set to right now.
#[instrument(skip(state))]
pub async fn availability(
    state: &AppState,
    customer_id: i32,
    product: ProductRef,
) -> Result<i64, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "cart_availability", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                reservation::available(
                    conn,
                    product,
                    Exclusion::CartLine {
                        customer_id,
                        product,
                    },
                )
                .await
            })
        })
        .await
    })
    .await
}
