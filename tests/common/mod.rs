#![allow(dead_code)]

use std::{collections::HashMap, str::FromStr};

use bigdecimal::BigDecimal;
use chrono::Utc;
use diesel::{ExpressionMethods, QueryDsl};
use diesel_async::RunQueryDsl;
use keebshop_orderservice::{
    app_state::AppState,
    catalog::{self, NewBuild, NewProduct},
    config, db,
    models::{Actor, PaymentTransactionEntity, ProductKind, ProductRef},
    payments::{self, ConfirmationOutcome, PaymentConfirmation},
    schema::inventory_records,
};
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

/// State backed by `TEST_DATABASE_URL`, or `None` when the variable is unset.
pub async fn state() -> Option<AppState> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };

    MIGRATED
        .get_or_init(|| async {
            db::run_migrations_blocking(&url)
                .await
                .expect("migrations should apply");
        })
        .await;

    let vars: HashMap<&str, String> = HashMap::from([
        ("DATABASE_URL", url.clone()),
        ("DATABASE_MAX_CONNECTIONS", "24".into()),
        ("DATABASE_LOCK_TIMEOUT_MS", "5000".into()),
        ("RETRY_MAX_ATTEMPTS", "10".into()),
        ("RETRY_BASE_DELAY_MS", "5".into()),
    ]);
    let config = config::load_from(|key| vars.get(key).cloned()).expect("test config");
    let pool = db::create_pool(&url, config.database.max_connections)
        .await
        .expect("pool");
    Some(AppState::new(pool, config))
}

/// Ids unique enough to keep concurrent tests and repeated runs apart.
pub fn unique_id() -> i32 {
    (Uuid::new_v4().as_u128() % 1_000_000_000) as i32 + 1
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).expect("decimal literal")
}

pub async fn product(
    state: &AppState,
    kind: ProductKind,
    quantity: i32,
    price: &str,
    number_of_keys: Option<i32>,
) -> ProductRef {
    let id = unique_id();
    catalog::register_product(
        state,
        NewProduct {
            kind,
            id,
            name: format!("{kind} {id}"),
            unit_price: dec(price),
            number_of_keys,
            initial_quantity: quantity,
        },
    )
    .await
    .expect("product registers");
    ProductRef::new(kind, id)
}

/// A build of fresh components: `(build, kit, switch, keycap)`.
pub async fn build(
    state: &AppState,
    kits: i32,
    switches: i32,
    keycaps: i32,
    number_of_keys: i32,
) -> (ProductRef, ProductRef, ProductRef, ProductRef) {
    let kit = product(state, ProductKind::Kit, kits, "120.00", Some(number_of_keys)).await;
    let switch = product(state, ProductKind::Switch, switches, "0.50", None).await;
    let keycap = product(state, ProductKind::Keycap, keycaps, "45.00", None).await;

    let entity = catalog::register_build(
        state,
        NewBuild {
            name: format!("build of {kit}"),
            unit_price: dec("250.00"),
            kit_id: kit.id,
            switch_id: switch.id,
            keycap_id: keycap.id,
            switch_quantity: None,
        },
    )
    .await
    .expect("build registers");

    (
        ProductRef::new(ProductKind::Build, entity.id),
        kit,
        switch,
        keycap,
    )
}

pub async fn on_hand(state: &AppState, product: ProductRef) -> i32 {
    let conn = &mut db::connection(&state.db_pool).await.expect("connection");
    inventory_records::table
        .filter(inventory_records::product_kind.eq(product.kind))
        .filter(inventory_records::product_id.eq(product.id))
        .select(inventory_records::quantity)
        .get_result(conn)
        .await
        .expect("inventory record")
}

pub async fn open_payment(
    state: &AppState,
    order_id: i32,
    customer_id: i32,
) -> PaymentTransactionEntity {
    payments::create_payment_for_order(state, order_id, Actor::Customer(customer_id), "vnpay")
        .await
        .expect("payment opens")
}

pub async fn confirm(
    state: &AppState,
    transaction: &PaymentTransactionEntity,
    result_code: &str,
) -> ConfirmationOutcome {
    payments::apply_confirmation(
        state,
        &transaction.txn_ref,
        &PaymentConfirmation {
            result_code: result_code.into(),
            amount: transaction.amount.clone(),
            paid_at: Utc::now(),
        },
    )
    .await
    .expect("confirmation applies")
}
