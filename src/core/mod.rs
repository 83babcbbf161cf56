//! Core business logic - framework-agnostic ledger operations.
//! Every function takes a database connection and can be called from the CLI,
//! a web handler or tests alike.

pub mod account;
pub mod audit;
pub mod catalog;
pub mod checkout;
pub mod event;
pub mod ledger;
pub mod money;
pub mod retry;
pub mod roles;
pub mod spots;
pub mod wallet;
