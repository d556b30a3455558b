//! Per-product on-hand quantities.
//!
//! Quantities only change through [`adjust`], which requires a [`LockedRecord`]
//! and therefore a prior `SELECT ... FOR UPDATE` in the same transaction.

use std::collections::BTreeMap;

use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{debug, info};

use crate::{
    error::InventoryError,
    inventory::resolver::Demand,
    models::{CreateInventoryRecordEntity, InventoryRecordEntity, ProductRef},
    schema::inventory_records,
};

/// An inventory row that is exclusively locked by the current transaction.
#[derive(Debug, Clone)]
pub struct LockedRecord(InventoryRecordEntity);

impl LockedRecord {
    pub fn product(&self) -> ProductRef {
        self.0.product()
    }

    pub fn quantity(&self) -> i64 {
        i64::from(self.0.quantity)
    }

    pub fn into_inner(self) -> InventoryRecordEntity {
        self.0
    }
}

/// Locks the ledger row of `product` until the enclosing transaction ends.
/// Blocks while another transaction holds it (bounded by `lock_timeout`).
pub async fn lock_and_get(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<LockedRecord, InventoryError> {
    if !product.kind.is_stocked() {
        return Err(InventoryError::NotStockable(product));
    }

    inventory_records::table
        .find((product.kind, product.id))
        .select(InventoryRecordEntity::as_select())
        .for_update()
        .get_result(conn)
        .await
        .optional()?
        .map(LockedRecord)
        .ok_or(InventoryError::InventoryNotConfigured(product))
}

/// Locks every product in ascending [`ProductRef`] order (kit, switch, keycap,
/// artisan keycap, accessory; then by id) so overlapping callers never deadlock.
pub async fn lock_many(
    conn: &mut AsyncPgConnection,
    products: impl IntoIterator<Item = ProductRef>,
) -> Result<BTreeMap<ProductRef, LockedRecord>, InventoryError> {
    let ordered: std::collections::BTreeSet<ProductRef> = products.into_iter().collect();
    let mut locked = BTreeMap::new();
    for product in ordered {
        let record = lock_and_get(conn, product).await?;
        locked.insert(product, record);
    }
    Ok(locked)
}

/// Applies `quantity += delta` to a locked row. Refuses to go below zero.
pub async fn adjust(
    conn: &mut AsyncPgConnection,
    record: &mut LockedRecord,
    delta: i64,
) -> Result<(), InventoryError> {
    let product = record.product();
    let new_quantity = record.quantity() + delta;
    if new_quantity < 0 {
        return Err(InventoryError::InsufficientStock {
            product,
            available: record.quantity(),
        });
    }
    let new_quantity = i32::try_from(new_quantity).map_err(|_| InventoryError::InvalidQuantity(new_quantity))?;

    let updated = diesel::update(inventory_records::table.find((product.kind, product.id)))
        .set((
            inventory_records::quantity.eq(new_quantity),
            inventory_records::updated_at.eq(diesel::dsl::now),
        ))
        .returning(InventoryRecordEntity::as_returning())
        .get_result(conn)
        .await?;

    debug!(%product, delta, quantity = new_quantity, "Adjusted inventory");
    record.0 = updated;
    Ok(())
}

/// Removes the resolved consumption of an order from stock.
pub async fn deduct(conn: &mut AsyncPgConnection, demand: &Demand) -> Result<(), InventoryError> {
    apply(conn, demand, -1).await
}

/// Returns a previously deducted consumption to stock.
pub async fn restore(conn: &mut AsyncPgConnection, demand: &Demand) -> Result<(), InventoryError> {
    apply(conn, demand, 1).await
}

async fn apply(
    conn: &mut AsyncPgConnection,
    demand: &Demand,
    sign: i64,
) -> Result<(), InventoryError> {
    // Lock everything first; a failure on any row aborts the caller's transaction.
    let mut locked = lock_many(conn, demand.products()).await?;
    for (product, quantity) in demand.iter() {
        let record = locked
            .get_mut(&product)
            .ok_or(InventoryError::InventoryNotConfigured(product))?;
        adjust(conn, record, sign * quantity).await?;
    }
    Ok(())
}

/// Catalog hook: every stocked product gets exactly one ledger row on creation.
pub async fn create_record(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
    initial_quantity: i32,
) -> Result<InventoryRecordEntity, InventoryError> {
    if !product.kind.is_stocked() {
        return Err(InventoryError::NotStockable(product));
    }
    if initial_quantity < 0 {
        return Err(InventoryError::InvalidQuantity(i64::from(initial_quantity)));
    }

    let record = diesel::insert_into(inventory_records::table)
        .values(CreateInventoryRecordEntity {
            product_kind: product.kind,
            product_id: product.id,
            quantity: initial_quantity,
        })
        .returning(InventoryRecordEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(%product, quantity = initial_quantity, "Created inventory record");
    Ok(record)
}

/// Catalog hook: drops the ledger row of a deleted product.
pub async fn delete_record(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<(), InventoryError> {
    let deleted = diesel::delete(inventory_records::table.find((product.kind, product.id)))
        .execute(conn)
        .await?;
    if deleted == 0 {
        return Err(InventoryError::InventoryNotConfigured(product));
    }
    info!(%product, "Deleted inventory record");
    Ok(())
}

/// Receives goods into stock.
pub async fn restock(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
    quantity: i32,
) -> Result<InventoryRecordEntity, InventoryError> {
    if quantity < 1 {
        return Err(InventoryError::InvalidQuantity(i64::from(quantity)));
    }
    let mut record = lock_and_get(conn, product).await?;
    adjust(conn, &mut record, i64::from(quantity)).await?;
    info!(%product, received = quantity, on_hand = record.quantity(), "Restocked");
    Ok(record.into_inner())
}
