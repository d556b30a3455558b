use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::models::{OrderStatus, PaymentStatus, ProductRef};

/// Errors raised by the inventory, settlement and payment services.
///
/// Any of these returned from inside a transaction closure rolls the whole
/// transaction back.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Insufficient stock for {product}: {available} available")]
    InsufficientStock { product: ProductRef, available: i64 },

    #[error("No inventory record configured for {0}")]
    InventoryNotConfigured(ProductRef),

    #[error("Unknown payment transaction '{0}'")]
    UnknownTransaction(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Timed out waiting for a lock")]
    LockTimeout,

    #[error("Resource not found")]
    NotFound,

    #[error("{0} is still referenced by carts, open orders or builds")]
    ProductInUse(ProductRef),

    #[error("Not allowed to act on this resource")]
    Forbidden,

    #[error("Invalid order transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Invalid payment transition from {from} to {to}")]
    InvalidPaymentTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Confirmed amount does not match transaction '{txn_ref}'")]
    AmountMismatch { txn_ref: String },

    #[error("Quantity must be at least 1, got {0}")]
    InvalidQuantity(i64),

    #[error("{0} cannot hold stock")]
    NotStockable(ProductRef),

    #[error("{0} is not a valid payment provider")]
    UnsupportedProvider(String),

    #[error("Failed to obtain a DB connection: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Database(DieselError),
}

impl InventoryError {
    /// Transient failures that the caller retries with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::LockTimeout | InventoryError::Pool(_))
    }
}

impl From<DieselError> for InventoryError {
    fn from(err: DieselError) -> Self {
        if is_lock_contention(&err) {
            InventoryError::LockTimeout
        } else {
            InventoryError::Database(err)
        }
    }
}

/// Lock timeouts, deadlocks and serialization failures all mean "another
/// transaction held what we needed"; PostgreSQL reports the first two only
/// through the message text.
fn is_lock_contention(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => true,
        DieselError::DatabaseError(_, info) => {
            let message = info.message();
            message.contains("lock timeout") || message.contains("deadlock detected")
        }
        _ => false,
    }
}
