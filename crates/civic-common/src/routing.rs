//! Category → department routing.
//!
//! Applied exactly once, when a citizen submits an issue. The result is
//! stored on the issue and never recomputed.

use crate::types::Category;

/// Department for `other` reports.
pub const DEFAULT_DEPARTMENT: &str = "Public Works";

/// Every department the routing table can produce, in table order.
pub const ROUTED_DEPARTMENTS: [&str; 5] = [
    "Public Works",
    "Utilities",
    "Sanitation",
    "Transportation",
    "Code Enforcement",
];

pub fn department_for(category: Category) -> &'static str {
    match category {
        Category::Pothole => "Public Works",
        Category::Streetlight => "Utilities",
        Category::Sanitation => "Sanitation",
        Category::Traffic => "Transportation",
        Category::Vandalism => "Code Enforcement",
        Category::Other => DEFAULT_DEPARTMENT,
    }
}
