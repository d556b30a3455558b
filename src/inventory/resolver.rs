//! Expands products into the primitive inventory lines they consume.
//!
//! A simple product consumes itself once. A build consumes one kit, one keycap
//! set and `switch_quantity` switches. Every stock check, deduction and
//! restoration goes through [`components_of`], so this is the only place that
//! knows what a build costs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use diesel::{
    BoolExpressionMethods, ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
};
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::{
    error::InventoryError,
    models::{BuildEntity, ProductKind, ProductRef},
    schema::{builds, catalog_products},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub product: ProductRef,
    /// Units of `product` consumed per unit of the parent.
    pub multiplier: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRecipe {
    pub build_id: i32,
    pub kit_id: i32,
    pub switch_id: i32,
    pub keycap_id: i32,
    pub switch_quantity: i32,
}

impl BuildRecipe {
    /// Components in lock order: kit, switch, keycap.
    pub fn components(&self) -> [Component; 3] {
        [
            Component {
                product: ProductRef::new(ProductKind::Kit, self.kit_id),
                multiplier: 1,
            },
            Component {
                product: ProductRef::new(ProductKind::Switch, self.switch_id),
                multiplier: i64::from(self.switch_quantity),
            },
            Component {
                product: ProductRef::new(ProductKind::Keycap, self.keycap_id),
                multiplier: 1,
            },
        ]
    }
}

impl From<&BuildEntity> for BuildRecipe {
    fn from(build: &BuildEntity) -> Self {
        Self {
            build_id: build.id,
            kit_id: build.kit_id,
            switch_id: build.switch_id,
            keycap_id: build.keycap_id,
            switch_quantity: build.switch_quantity,
        }
    }
}

/// Build recipes keyed by build id.
pub type Recipes = HashMap<i32, BuildRecipe>;

pub fn components_of(
    product: ProductRef,
    recipes: &Recipes,
) -> Result<Vec<Component>, InventoryError> {
    match product.kind {
        ProductKind::Build => recipes
            .get(&product.id)
            .map(|recipe| recipe.components().to_vec())
            .ok_or(InventoryError::InventoryNotConfigured(product)),
        _ => Ok(vec![Component {
            product,
            multiplier: 1,
        }]),
    }
}

pub async fn load_recipes(
    conn: &mut AsyncPgConnection,
    build_ids: &[i32],
) -> Result<Recipes, InventoryError> {
    if build_ids.is_empty() {
        return Ok(Recipes::new());
    }

    let builds: Vec<BuildEntity> = builds::table
        .filter(builds::id.eq_any(build_ids))
        .select(BuildEntity::as_select())
        .load(conn)
        .await?;

    Ok(builds
        .iter()
        .map(|build| (build.id, BuildRecipe::from(build)))
        .collect())
}

/// Recipes of every build that consumes at least one of `targets`.
pub async fn recipes_touching(
    conn: &mut AsyncPgConnection,
    targets: &BTreeSet<ProductRef>,
) -> Result<Recipes, InventoryError> {
    let ids_of = |kind: ProductKind| -> Vec<i32> {
        targets
            .iter()
            .filter(|product| product.kind == kind)
            .map(|product| product.id)
            .collect()
    };
    let kits = ids_of(ProductKind::Kit);
    let switches = ids_of(ProductKind::Switch);
    let keycaps = ids_of(ProductKind::Keycap);

    if kits.is_empty() && switches.is_empty() && keycaps.is_empty() {
        return Ok(Recipes::new());
    }

    let builds: Vec<BuildEntity> = builds::table
        .filter(
            builds::kit_id
                .eq_any(&kits)
                .or(builds::switch_id.eq_any(&switches))
                .or(builds::keycap_id.eq_any(&keycaps)),
        )
        .select(BuildEntity::as_select())
        .load(conn)
        .await?;

    Ok(builds
        .iter()
        .map(|build| (build.id, BuildRecipe::from(build)))
        .collect())
}

/// Components of a listed product, or `NotFound` when the catalog has no such
/// product. The catalog row stays share-locked until the caller commits, so
/// the product cannot be removed under a claim being written.
pub async fn resolve(
    conn: &mut AsyncPgConnection,
    product: ProductRef,
) -> Result<Vec<Component>, InventoryError> {
    let recipes = match product.kind {
        ProductKind::Build => {
            let build: BuildEntity = builds::table
                .find(product.id)
                .select(BuildEntity::as_select())
                .for_share()
                .get_result(conn)
                .await
                .optional()?
                .ok_or(InventoryError::NotFound)?;
            Recipes::from([(build.id, BuildRecipe::from(&build))])
        }
        _ => {
            catalog_products::table
                .find((product.kind, product.id))
                .select(catalog_products::product_id)
                .for_share()
                .get_result::<i32>(conn)
                .await
                .optional()?
                .ok_or(InventoryError::NotFound)?;
            Recipes::new()
        }
    };
    components_of(product, &recipes)
}

/// Raw inventory consumed by a set of lines, keyed in lock order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Demand(BTreeMap<ProductRef, i64>);

impl Demand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, components: &[Component], quantity: i32) {
        for component in components {
            *self.0.entry(component.product).or_insert(0) +=
                component.multiplier * i64::from(quantity);
        }
    }

    /// Demand of `quantity` units of `product`.
    pub fn for_line(
        product: ProductRef,
        quantity: i32,
        recipes: &Recipes,
    ) -> Result<Self, InventoryError> {
        let mut demand = Self::new();
        demand.add(&components_of(product, recipes)?, quantity);
        Ok(demand)
    }

    pub fn get(&self, product: &ProductRef) -> i64 {
        self.0.get(product).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProductRef, i64)> + '_ {
        self.0.iter().map(|(product, quantity)| (*product, *quantity))
    }

    pub fn products(&self) -> BTreeSet<ProductRef> {
        self.0.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
