//! Customer-facing routes. Identity comes from the `X-Customer-Id` header.

pub mod carts;
pub mod orders;
