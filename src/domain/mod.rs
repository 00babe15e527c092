pub mod charge_point;
pub mod id_tag;
pub mod transaction;

pub use charge_point::ChargePointStatus;
pub use id_tag::{Authorization, IdTag, IdTagStatus};
pub use transaction::{NewTransaction, Transaction, TransactionStatus, TransactionStop};
