//! Stock correctness engine: the ledger of on-hand quantities, the build
//! resolver, and the soft-reservation checker that sits in front of both.
//!
//! Every function here takes a connection that the caller has already put
//! inside a transaction; locks taken here are released at commit or rollback.

pub mod ledger;
pub mod reservation;
pub mod resolver;

pub use ledger::LockedRecord;
pub use reservation::{Exclusion, StockPosition};
pub use resolver::{BuildRecipe, Component, Demand};
