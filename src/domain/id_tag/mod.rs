//! IdTag aggregate and authorization outcome

pub mod model;

pub use model::{Authorization, IdTag, IdTagStatus};
