//! Order execution: the dispatcher and its CSV audit trail.

pub mod audit;
pub mod dispatcher;

pub use audit::AuditLog;
pub use dispatcher::{DispatchOutcome, OrderDispatcher};
