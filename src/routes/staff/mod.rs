//! Back-office routes, gated on the `X-Staff` header.

pub mod catalog;
pub mod orders;
