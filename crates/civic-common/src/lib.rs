//! Shared domain vocabulary for CivicReport.
//!
//! The closed enumerations used by every layer (issue category, status,
//! priority, audit entry type, notification type) plus the static
//! category → department routing table applied at submission time.

pub mod routing;
pub mod types;

pub use routing::{DEFAULT_DEPARTMENT, ROUTED_DEPARTMENTS, department_for};
pub use types::{Category, NotificationType, ParseError, Priority, Status, UpdateType};
