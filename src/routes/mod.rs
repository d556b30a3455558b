pub mod customers;
pub mod payments;
pub mod staff;
