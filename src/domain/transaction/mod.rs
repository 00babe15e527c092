//! Transaction aggregate

pub mod model;

pub use model::{NewTransaction, Transaction, TransactionStatus, TransactionStop};
