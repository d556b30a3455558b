//! Soft reservations.
//!
//! Cart lines do not touch the ledger. Instead, whenever someone asks for
//! stock we lock the ledger rows involved and subtract everything already
//! claimed: every cart line (of any customer) and every line of an order still
//! waiting for payment. Because the ledger rows stay locked until the caller
//! commits its own claim, two concurrent requests cannot both see the same
//! free units.

use std::collections::{BTreeMap, BTreeSet};

use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use tracing::{debug, warn};

use crate::{
    error::InventoryError,
    inventory::{
        ledger,
        resolver::{self, Component, Recipes},
    },
    models::{CartLineEntity, OrderStatus, ProductKind, ProductRef},
    schema::{cart_lines, order_lines, orders},
};

/// Claims the requester should not count against itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Nothing,
    /// The cart line being edited.
    CartLine { customer_id: i32, product: ProductRef },
    /// Every cart line of this customer (checkout re-validates the whole cart).
    Customer(i32),
}

impl Exclusion {
    fn skips(&self, customer_id: i32, product: ProductRef) -> bool {
        match *self {
            Exclusion::Nothing => false,
            Exclusion::CartLine {
                customer_id: owner,
                product: line,
            } => owner == customer_id && line == product,
            Exclusion::Customer(owner) => owner == customer_id,
        }
    }
}

/// A claim on stock by a cart line or a pending order line.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Claim {
    pub product: ProductRef,
    pub quantity: i32,
}

/// Sums claims onto the primitive components in `targets`.
/// Builds missing from `recipes` do not consume any target and are ignored.
pub(crate) fn tally(
    claims: impl IntoIterator<Item = Claim>,
    recipes: &Recipes,
    targets: &BTreeSet<ProductRef>,
) -> BTreeMap<ProductRef, i64> {
    let mut reserved = BTreeMap::new();
    for claim in claims {
        let Ok(components) = resolver::components_of(claim.product, recipes) else {
            continue;
        };
        for component in components {
            if targets.contains(&component.product) {
                *reserved.entry(component.product).or_insert(0) +=
                    component.multiplier * i64::from(claim.quantity);
            }
        }
    }
    reserved
}

/// On-hand and reserved quantities of a set of locked ledger rows.
#[derive(Debug, Clone, Default)]
pub struct StockPosition {
    on_hand: BTreeMap<ProductRef, i64>,
    reserved: BTreeMap<ProductRef, i64>,
}

impl StockPosition {
    pub fn new(on_hand: BTreeMap<ProductRef, i64>, reserved: BTreeMap<ProductRef, i64>) -> Self {
        Self { on_hand, reserved }
    }

    pub fn on_hand(&self, product: &ProductRef) -> i64 {
        self.on_hand.get(product).copied().unwrap_or(0)
    }

    pub fn reserved(&self, product: &ProductRef) -> i64 {
        self.reserved.get(product).copied().unwrap_or(0)
    }

    /// `on_hand - reserved`, which may be negative after an out-of-band stock write-down.
    pub fn free(&self, product: &ProductRef) -> i64 {
        self.on_hand(product) - self.reserved(product)
    }

    /// Whole units of the parent product that can still be claimed.
    pub fn available_units(&self, components: &[Component]) -> i64 {
        units_from(components, |product| self.free(product))
    }

    pub fn check(
        &self,
        product: ProductRef,
        components: &[Component],
        requested: i32,
    ) -> Result<i64, InventoryError> {
        let available = self.available_units(components);
        if i64::from(requested) > available {
            return Err(InventoryError::InsufficientStock { product, available });
        }
        Ok(available)
    }

    /// Checks several lines against the same free stock, each line consuming
    /// what it needs before the next is checked. The first line that does not
    /// fit is reported.
    pub fn check_lines<'a>(
        &self,
        lines: impl IntoIterator<Item = (ProductRef, i32, &'a [Component])>,
    ) -> Result<(), InventoryError> {
        let mut remaining: BTreeMap<ProductRef, i64> = BTreeMap::new();
        for (product, quantity, components) in lines {
            let available = units_from(components, |component| {
                *remaining
                    .entry(*component)
                    .or_insert_with(|| self.free(component))
            });
            if i64::from(quantity) > available {
                return Err(InventoryError::InsufficientStock { product, available });
            }
            for component in components {
                if let Some(free) = remaining.get_mut(&component.product) {
                    *free -= component.multiplier * i64::from(quantity);
                }
            }
        }
        Ok(())
    }
}

fn units_from(components: &[Component], mut free: impl FnMut(&ProductRef) -> i64) -> i64 {
    components
        .iter()
        .map(|component| free(&component.product).max(0) / component.multiplier.max(1))
        .min()
        .unwrap_or(0)
}

/// Sum of all claims on each of `targets`, except those matched by `exclusion`.
pub async fn reserved_by_others(
    conn: &mut AsyncPgConnection,
    targets: &BTreeSet<ProductRef>,
    exclusion: Exclusion,
) -> Result<BTreeMap<ProductRef, i64>, InventoryError> {
    let recipes = resolver::recipes_touching(conn, targets).await?;

    // Over-fetch by kind and id separately; `tally` keeps only exact matches.
    let mut kinds: Vec<ProductKind> = targets.iter().map(|product| product.kind).collect();
    let mut ids: Vec<i32> = targets.iter().map(|product| product.id).collect();
    if !recipes.is_empty() {
        kinds.push(ProductKind::Build);
        ids.extend(recipes.keys().copied());
    }
    kinds.sort();
    kinds.dedup();
    ids.sort_unstable();
    ids.dedup();

    let cart_claims: Vec<CartLineEntity> = cart_lines::table
        .filter(cart_lines::product_kind.eq_any(&kinds))
        .filter(cart_lines::product_id.eq_any(&ids))
        .select(CartLineEntity::as_select())
        .load(conn)
        .await?;

    let pending_claims: Vec<(ProductKind, i32, i32)> = order_lines::table
        .inner_join(orders::table)
        .filter(orders::status.eq(OrderStatus::Pending))
        .filter(order_lines::product_kind.eq_any(&kinds))
        .filter(order_lines::product_id.eq_any(&ids))
        .select((
            order_lines::product_kind,
            order_lines::product_id,
            order_lines::quantity,
        ))
        .load(conn)
        .await?;

    let claims = cart_claims
        .iter()
        .filter(|line| !exclusion.skips(line.customer_id, line.product()))
        .map(|line| Claim {
            product: line.product(),
            quantity: line.quantity,
        })
        .chain(pending_claims.iter().map(|(kind, id, quantity)| Claim {
            product: ProductRef::new(*kind, *id),
            quantity: *quantity,
        }));

    Ok(tally(claims, &recipes, targets))
}

/// Locks the ledger rows of `targets` and reads what is claimed against them.
/// The locks are held until the caller's transaction ends.
pub async fn lock_position(
    conn: &mut AsyncPgConnection,
    targets: &BTreeSet<ProductRef>,
    exclusion: Exclusion,
) -> Result<StockPosition, InventoryError> {
    let locked = ledger::lock_many(conn, targets.iter().copied()).await?;
    let on_hand = locked
        .iter()
        .map(|(product, record)| (*product, record.quantity()))
        .collect();
    let reserved = reserved_by_others(conn, targets, exclusion).await?;
    Ok(StockPosition::new(on_hand, reserved))
}

/// Units of `product` that can still be claimed by the requester.
pub async fn available(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
    exclusion: Exclusion,
) -> Result<i64, InventoryError> {
    let components = resolver::resolve(conn, product).await?;
    let targets = components.iter().map(|component| component.product).collect();
    let position = lock_position(conn, &targets, exclusion).await?;
    Ok(position.available_units(&components))
}

/// Rejects `requested` units of `product` when they exceed what is available.
/// Must run in the transaction that then writes the claim.
pub async fn check_or_reject(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
    requested: i32,
    exclusion: Exclusion,
) -> Result<i64, InventoryError> {
    let components = resolver::resolve(conn, product).await?;
    let targets = components.iter().map(|component| component.product).collect();
    let position = lock_position(conn, &targets, exclusion).await?;

    match position.check(product, &components, requested) {
        Ok(available) => {
            debug!(%product, requested, available, "Reservation accepted");
            Ok(available)
        }
        Err(err) => {
            warn!(%product, requested, "Reservation rejected: {err}");
            Err(err)
        }
    }
}
