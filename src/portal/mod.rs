//! CivicReport portal: citizen issue intake and the admin back office.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Citizen  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ / Admin  │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │          └─ auth.rs (CurrentAdmin)     │
//!                       │         │                                        │
//!                       │         ├─ audit.rs  (edit / assign + audit)     │
//!                       │         ├─ bulk.rs   (BulkAction, Selection)     │
//!                       │         ├─ filters.rs (IssueFilters → SQL)       │
//!                       │         ├─ analytics.rs (dashboard, reports)     │
//!                       │         v                                        │
//!                       │  db.rs  (PortalDb behind DbHandle)               │
//!                       │         │ inserted notifications                 │
//!                       │         v                                        │
//!                       │  notifications.rs (NotificationFeed) ── ws.rs    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Typical Request Flow (citizen submits a report)
//!
//! 1. `POST /api/issues` → `api::submit_issue()` validates the form.
//! 2. The category is routed to a department and the row is inserted
//!    with status `submitted`.
//! 3. `notifications::notify_issue_submitted()` writes one row per active
//!    admin whose preferences allow it and publishes each on the feed.
//! 4. Connected admins' `ws.rs` loops receive the row through their
//!    subscription, prepend it and bump the unread counter.

pub mod analytics;
pub mod api;
pub mod audit;
pub mod auth;
pub mod bulk;
pub mod db;
pub mod filters;
pub mod models;
pub mod notifications;
pub mod server;
pub mod ws;
