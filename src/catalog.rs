//! Catalog lifecycle hooks. The catalog itself is owned elsewhere; this module
//! keeps its read model and the inventory ledger in step with it.

use bigdecimal::BigDecimal;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    app_state::AppState,
    db,
    error::InventoryError,
    inventory::ledger,
    models::{
        BuildEntity, CatalogProductEntity, CreateBuildEntity, CreateCatalogProductEntity,
        InventoryRecordEntity, OrderStatus, ProductKind, ProductRef,
    },
    schema::{builds, cart_lines, catalog_products, order_lines, orders},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewProduct {
    pub kind: ProductKind,
    pub id: i32,
    pub name: String,
    #[schema(value_type = String)]
    pub unit_price: BigDecimal,
    /// Only meaningful for kits.
    pub number_of_keys: Option<i32>,
    pub initial_quantity: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewBuild {
    pub name: String,
    #[schema(value_type = String)]
    pub unit_price: BigDecimal,
    pub kit_id: i32,
    pub switch_id: i32,
    pub keycap_id: i32,
    /// Defaults to the kit's number of keys.
    pub switch_quantity: Option<i32>,
}

/// Inserts the catalog row and its ledger row.
pub async fn register_product_in(
    conn: &mut AsyncPgConnection,
    new: NewProduct,
) -> Result<(CatalogProductEntity, InventoryRecordEntity), InventoryError> {
    let product = ProductRef::new(new.kind, new.id);
    if !product.kind.is_stocked() {
        return Err(InventoryError::NotStockable(product));
    }

    let entity = diesel::insert_into(catalog_products::table)
        .values(CreateCatalogProductEntity {
            product_kind: new.kind,
            product_id: new.id,
            name: new.name,
            unit_price: new.unit_price,
            number_of_keys: new.number_of_keys,
        })
        .returning(CatalogProductEntity::as_returning())
        .get_result(conn)
        .await?;

    let record = ledger::create_record(conn, product, new.initial_quantity).await?;

    info!(%product, name = %entity.name, "Product registered");
    Ok((entity, record))
}

async fn find_product(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<CatalogProductEntity, InventoryError> {
    catalog_products::table
        .find((product.kind, product.id))
        .select(CatalogProductEntity::as_select())
        .for_share()
        .get_result(conn)
        .await
        .optional()?
        .ok_or(InventoryError::NotFound)
}

/// Registers a build after checking that its components exist.
pub async fn register_build_in(
    conn: &mut AsyncPgConnection,
    new: NewBuild,
) -> Result<BuildEntity, InventoryError> {
    let kit = find_product(conn, ProductRef::new(ProductKind::Kit, new.kit_id)).await?;
    find_product(conn, ProductRef::new(ProductKind::Switch, new.switch_id)).await?;
    find_product(conn, ProductRef::new(ProductKind::Keycap, new.keycap_id)).await?;

    let switch_quantity = new.switch_quantity.or(kit.number_of_keys).unwrap_or(0);
    if switch_quantity < 1 {
        return Err(InventoryError::InvalidQuantity(i64::from(switch_quantity)));
    }

    let build = diesel::insert_into(builds::table)
        .values(CreateBuildEntity {
            name: new.name,
            unit_price: new.unit_price,
            kit_id: new.kit_id,
            switch_id: new.switch_id,
            keycap_id: new.keycap_id,
            switch_quantity,
        })
        .returning(BuildEntity::as_returning())
        .get_result(conn)
        .await?;

    info!(build_id = build.id, switch_quantity, "Build registered");
    Ok(build)
}

/// Order states whose lines may still be deducted or restored.
const OPEN_ORDER_STATUSES: [OrderStatus; 3] =
    [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Delivered];

/// Fails with `ProductInUse` while anything could still resolve `product`:
/// a cart line, a line of an order that is not yet final, or a build using it
/// as a component.
async fn ensure_unreferenced(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<(), InventoryError> {
    // Carts first: a checkout committing after this read leaves its order
    // lines visible to the next one.
    let in_carts: i64 = cart_lines::table
        .filter(cart_lines::product_kind.eq(product.kind))
        .filter(cart_lines::product_id.eq(product.id))
        .count()
        .get_result(conn)
        .await?;

    let in_orders: i64 = order_lines::table
        .inner_join(orders::table)
        .filter(orders::status.eq_any(OPEN_ORDER_STATUSES))
        .filter(order_lines::product_kind.eq(product.kind))
        .filter(order_lines::product_id.eq(product.id))
        .count()
        .get_result(conn)
        .await?;

    let in_builds: i64 = match product.kind {
        ProductKind::Kit => builds::table
            .filter(builds::kit_id.eq(product.id))
            .count()
            .get_result(conn)
            .await?,
        ProductKind::Switch => builds::table
            .filter(builds::switch_id.eq(product.id))
            .count()
            .get_result(conn)
            .await?,
        ProductKind::Keycap => builds::table
            .filter(builds::keycap_id.eq(product.id))
            .count()
            .get_result(conn)
            .await?,
        _ => 0,
    };

    if in_carts + in_orders + in_builds > 0 {
        warn!(%product, in_carts, in_orders, in_builds, "Refusing to remove product in use");
        return Err(InventoryError::ProductInUse(product));
    }
    Ok(())
}

/// Deletes a product nobody references any more. Primitive products lose
/// their ledger row with it.
///
/// The catalog row is locked first; cart adds share-lock the same row, so no
/// claim can appear between the reference check and the delete.
pub async fn remove_product_in(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<(), InventoryError> {
    if product.kind == ProductKind::Build {
        builds::table
            .find(product.id)
            .select(builds::id)
            .for_update()
            .get_result::<i32>(conn)
            .await
            .optional()?
            .ok_or(InventoryError::NotFound)?;
        ensure_unreferenced(conn, product).await?;
        diesel::delete(builds::table.find(product.id))
            .execute(conn)
            .await?;
    } else {
        catalog_products::table
            .find((product.kind, product.id))
            .select(catalog_products::product_id)
            .for_update()
            .get_result::<i32>(conn)
            .await
            .optional()?
            .ok_or(InventoryError::NotFound)?;
        ensure_unreferenced(conn, product).await?;
        ledger::delete_record(conn, product).await?;
        diesel::delete(catalog_products::table.find((product.kind, product.id)))
            .execute(conn)
            .await?;
    }

    info!(%product, "Product removed");
    Ok(())
}

#[instrument(skip(state, new), fields(kind = %new.kind, id = new.id))]
pub async fn register_product(
    state: &AppState,
    new: NewProduct,
) -> Result<(CatalogProductEntity, InventoryRecordEntity), InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;
    conn.transaction(move |conn| Box::pin(async move { register_product_in(conn, new).await }))
        .await
}

#[instrument(skip(state, new), fields(kit_id = new.kit_id))]
pub async fn register_build(state: &AppState, new: NewBuild) -> Result<BuildEntity, InventoryError> {
    let conn = &mut db::connection(&state.db_pool).await?;
    conn.transaction(move |conn| Box::pin(async move { register_build_in(conn, new).await }))
        .await
}

#[instrument(skip(state))]
pub async fn remove_product(state: &AppState, product: ProductRef) -> Result<(), InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    let conn = &mut db::connection(&state.db_pool).await?;
    conn.transaction(move |conn| {
        Box::pin(async move {
            db::set_lock_timeout(conn, lock_timeout_ms).await?;
            remove_product_in(conn, product).await
        })
    })
    .await
}

#[instrument(skip(state))]
pub async fn restock(
    state: &AppState,
    product: ProductRef,
    quantity: i32,
) -> Result<InventoryRecordEntity, InventoryError> {
    let lock_timeout_ms = state.config.database.lock_timeout_ms;
    db::with_retry(&state.config.retry, "restock", move || async move {
        let mut conn = db::connection(&state.db_pool).await?;
        conn.transaction(move |conn| {
            Box::pin(async move {
                db::set_lock_timeout(conn, lock_timeout_ms).await?;
                ledger::restock(conn, product, quantity).await
            })
        })
        .await
    })
    .await
}
