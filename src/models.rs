use std::{fmt, io::Write, str::FromStr};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::{
    AsExpression, FromSqlRow, Selectable,
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    prelude::{Associations, Identifiable, Insertable, Queryable},
    serialize::{self, IsNull, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Implements the string mapping of a closed enum plus its diesel `Text` codec.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $ty {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $ty {
            fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
                let text = std::str::from_utf8(value.as_bytes())?;
                Ok(text.parse()?)
            }
        }
    };
}

// Products

/// Every sellable product kind. Declaration order is the ledger lock order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Kit,
    Switch,
    Keycap,
    ArtisanKeycap,
    Accessory,
    /// Virtual product composed of a kit, switches and a keycap set. Has no ledger row.
    Build,
}

text_enum!(ProductKind {
    Kit => "kit",
    Switch => "switch",
    Keycap => "keycap",
    ArtisanKeycap => "artisan_keycap",
    Accessory => "accessory",
    Build => "build",
});

impl ProductKind {
    /// Whether products of this kind own an inventory record.
    pub fn is_stocked(&self) -> bool {
        !matches!(self, ProductKind::Build)
    }
}

/// Identifies one product instance across all kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub struct ProductRef {
    pub kind: ProductKind,
    pub id: i32,
}

impl ProductRef {
    pub fn new(kind: ProductKind, id: i32) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ProductRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::catalog_products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CatalogProductEntity {
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub name: String,
    #[schema(value_type = String)]
    pub unit_price: BigDecimal,
    pub number_of_keys: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::catalog_products)]
pub struct CreateCatalogProductEntity {
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub name: String,
    pub unit_price: BigDecimal,
    pub number_of_keys: Option<i32>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::builds)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BuildEntity {
    pub id: i32,
    pub name: String,
    #[schema(value_type = String)]
    pub unit_price: BigDecimal,
    pub kit_id: i32,
    pub switch_id: i32,
    pub keycap_id: i32,
    pub switch_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::builds)]
pub struct CreateBuildEntity {
    pub name: String,
    pub unit_price: BigDecimal,
    pub kit_id: i32,
    pub switch_id: i32,
    pub keycap_id: i32,
    pub switch_quantity: i32,
}

// Inventory

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, ToSchema)]
#[diesel(table_name = crate::schema::inventory_records)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InventoryRecordEntity {
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRecordEntity {
    pub fn product(&self) -> ProductRef {
        ProductRef::new(self.product_kind, self.product_id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::inventory_records)]
pub struct CreateInventoryRecordEntity {
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub quantity: i32,
}

// Carts

#[derive(Queryable, Selectable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::cart_lines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartLineEntity {
    pub customer_id: i32,
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartLineEntity {
    pub fn product(&self) -> ProductRef {
        ProductRef::new(self.product_kind, self.product_id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::cart_lines)]
pub struct CreateCartLineEntity {
    pub customer_id: i32,
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub quantity: i32,
}

// Orders

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
    Delivered,
}

text_enum!(OrderStatus {
    Pending => "pending",
    Paid => "paid",
    Cancelled => "cancelled",
    Refunded => "refunded",
    Delivered => "delivered",
});

#[derive(Queryable, Serialize, Selectable, Identifiable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub customer_id: i32,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub total_amount: BigDecimal,
    /// Set while a ledger deduction for this order is outstanding.
    pub inventory_deducted: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub customer_id: i32,
    pub status: OrderStatus,
    pub total_amount: BigDecimal,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Serialize, Debug, Clone, ToSchema)]
#[diesel(belongs_to(OrderEntity, foreign_key = order_id))]
#[diesel(table_name = crate::schema::order_lines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderLineEntity {
    pub id: i32,
    pub order_id: i32,
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub name_snapshot: String,
    #[schema(value_type = String)]
    pub price_snapshot: BigDecimal,
    pub quantity: i32,
}

impl OrderLineEntity {
    pub fn product(&self) -> ProductRef {
        ProductRef::new(self.product_kind, self.product_id)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::order_lines)]
pub struct CreateOrderLineEntity {
    pub order_id: i32,
    pub product_kind: ProductKind,
    pub product_id: i32,
    pub name_snapshot: String,
    pub price_snapshot: BigDecimal,
    pub quantity: i32,
}

// Payments

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
    ToSchema,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Cancelled,
}

text_enum!(PaymentStatus {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
    Cancelled => "cancelled",
});

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::payment_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentTransactionEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub txn_ref: String,
    pub status: PaymentStatus,
    #[schema(value_type = String)]
    pub amount: BigDecimal,
    pub provider: String,
    pub result_code: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::payment_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentTransactionEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub txn_ref: String,
    pub status: PaymentStatus,
    pub amount: BigDecimal,
    pub provider: String,
}

// Authority

/// Who is asking for a state change. Passed explicitly into every order operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Customer(i32),
    Staff,
    /// Payment callbacks and the scheduled sweep.
    System,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_kind_round_trips_through_text() {
        for kind in ProductKind::ALL {
            assert_eq!(kind.as_str().parse::<ProductKind>().unwrap(), *kind);
        }
        assert!("keyboard".parse::<ProductKind>().is_err());
    }

    #[test]
    fn lock_order_follows_kit_switch_keycap() {
        let mut refs = vec![
            ProductRef::new(ProductKind::Keycap, 1),
            ProductRef::new(ProductKind::Switch, 9),
            ProductRef::new(ProductKind::Kit, 40),
            ProductRef::new(ProductKind::Kit, 2),
        ];
        refs.sort();
        assert_eq!(
            refs,
            vec![
                ProductRef::new(ProductKind::Kit, 2),
                ProductRef::new(ProductKind::Kit, 40),
                ProductRef::new(ProductKind::Switch, 9),
                ProductRef::new(ProductKind::Keycap, 1),
            ]
        );
    }

    #[test]
    fn only_builds_are_unstocked() {
        assert!(!ProductKind::Build.is_stocked());
        assert!(ProductKind::ArtisanKeycap.is_stocked());
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&ProductKind::ArtisanKeycap).unwrap();
        assert_eq!(json, "\"artisan_keycap\"");
        let status: PaymentStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(status, PaymentStatus::Cancelled);
        assert_eq!(
            ProductRef::new(ProductKind::Switch, 7).to_string(),
            "switch#7"
        );
    }
}
