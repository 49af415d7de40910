use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, RawQuery, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use civic_common::department_for;

use super::analytics;
use super::audit::{self, IssueEdit};
use super::auth::{self, CurrentAdmin, LOGIN_PATH, LoginRequest};
use super::bulk::{self, BulkRequest, Selection};
use super::db::DbHandle;
use super::filters::{FilterChip, FilterParams, IssueFilters};
use super::models::*;
use super::notifications::{self, NotificationFeed};
use super::ws;
use crate::errors::PortalError;

/// Number of issues on the public home page.
pub const HOME_RECENT: usize = 6;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub feed: NotificationFeed,
    pub session_ttl_hours: u32,
    pub recent_limit: usize,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Serialize)]
pub struct SubmittedIssue {
    pub issue: Issue,
    pub tracking_url: String,
}

#[derive(Deserialize)]
pub struct AssignmentRequest {
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Serialize)]
pub struct IssueListResponse {
    pub issues: Vec<IssueWithAssignee>,
    pub filters: FilterParams,
    pub location: String,
    pub active_filters: usize,
    pub chips: Vec<FilterChip>,
}

#[derive(Serialize)]
pub struct NotificationList {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(String),
}

impl ApiError {
    /// Map a portal failure, replacing store errors with `what` so
    /// internals never reach the client.
    fn from_portal(err: PortalError, what: &str) -> Self {
        match err {
            PortalError::Database(_) | PortalError::LockPoisoned | PortalError::Other(_) => {
                error!(error = ?err, "{}", what);
                ApiError::Internal(what.to_string())
            }
            other => other.into(),
        }
    }
}

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        match err {
            PortalError::IssueNotFound { .. }
            | PortalError::NotificationNotFound { .. }
            | PortalError::AdminNotFound { .. } => ApiError::NotFound(err.to_string()),
            PortalError::InvalidAssignee { .. } | PortalError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PortalError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            PortalError::Forbidden(msg) => ApiError::Forbidden(msg),
            PortalError::Database(_) | PortalError::LockPoisoned | PortalError::Other(_) => {
                error!(error = ?err, "Request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({"error": msg})),
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg}))
            }
            ApiError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({"error": msg, "redirect": LOGIN_PATH}),
            ),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, serde_json::json!({"error": msg})),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/issues", post(submit_issue))
        .route("/api/issues/recent", get(recent_issues))
        .route("/api/issues/{id}", get(track_issue))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/admin/dashboard", get(dashboard))
        .route("/api/admin/issues", get(list_issues))
        .route("/api/admin/issues/bulk", post(bulk_action))
        .route(
            "/api/admin/issues/{id}",
            get(get_issue_detail).patch(update_issue),
        )
        .route("/api/admin/issues/{id}/assignment", put(assign_issue))
        .route("/api/admin/admins", get(list_admins))
        .route(
            "/api/admin/departments",
            get(list_departments).post(create_department),
        )
        .route("/api/admin/reports", get(reports))
        .route("/api/admin/notifications", get(list_notifications))
        .route("/api/admin/notifications/read-all", post(mark_all_read))
        .route("/api/admin/notifications/{id}/read", post(mark_read))
        .route(
            "/api/admin/notifications/settings",
            get(get_settings).put(update_settings),
        )
        .route("/api/admin/notifications/ws", get(ws::notifications_ws))
}

// ── Public handlers ───────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn recent_issues(State(state): State<SharedState>) -> Json<Vec<Issue>> {
    let issues = state
        .db
        .call(|db| db.recent_issues(HOME_RECENT))
        .await
        .unwrap_or_else(|e| {
            error!(error = ?e, "Failed to load recent issues");
            Vec::new()
        });
    Json(issues)
}

fn require_text(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", field)));
    }
    Ok(())
}

async fn submit_issue(
    State(state): State<SharedState>,
    payload: Result<Json<NewIssue>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    require_text("title", &new.title)?;
    require_text("description", &new.description)?;
    require_text("location_address", &new.location_address)?;

    let department = department_for(new.category);
    let issue = state
        .db
        .call(move |db| db.insert_issue(&new, department))
        .await
        .map_err(|e| ApiError::from_portal(PortalError::db(e), "Failed to submit issue"))?;

    if let Err(e) = notifications::notify_issue_submitted(&state.db, &state.feed, &issue).await {
        warn!(issue_id = %issue.id, error = %e, "Failed to dispatch new-issue notifications");
    }

    let tracking_url = format!("/track?id={}", issue.id);
    Ok((
        StatusCode::CREATED,
        Json(SubmittedIssue {
            issue,
            tracking_url,
        }),
    ))
}

async fn track_issue(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<IssueDetail>, ApiError> {
    let lookup = id.clone();
    let detail = state
        .db
        .call(move |db| db.get_issue_detail(&lookup))
        .await
        .map_err(|e| ApiError::from_portal(PortalError::db(e), "Failed to load issue"))?;
    detail
        .map(Json)
        .ok_or_else(|| PortalError::IssueNotFound { id }.into())
}

// ── Auth handlers ─────────────────────────────────────────────────────

async fn login(
    State(state): State<SharedState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;
    let resp = auth::login(&state.db, request, state.session_ttl_hours)
        .await
        .map_err(|e| ApiError::from_portal(e, "Failed to sign in"))?;
    let cookie = auth::session_cookie(&resp.token, state.session_ttl_hours);
    Ok(([(SET_COOKIE, cookie)], Json(resp)))
}

async fn logout(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = auth::token_from_headers(&headers) {
        if let Err(e) = auth::logout(&state.db, &token).await {
            warn!(error = %e, "Failed to delete session on sign-out");
        }
    }
    (
        [(SET_COOKIE, auth::expired_session_cookie())],
        Json(serde_json::json!({"redirect": LOGIN_PATH})),
    )
}

async fn me(CurrentAdmin(admin): CurrentAdmin) -> Json<AdminUser> {
    Json(admin)
}

// ── Admin handlers ────────────────────────────────────────────────────

async fn dashboard(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
) -> Result<Json<DashboardStats>, ApiError> {
    analytics::dashboard(&state.db)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to load dashboard"))
}

async fn list_issues(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
    RawQuery(query): RawQuery,
) -> Result<Json<IssueListResponse>, ApiError> {
    let filters = IssueFilters::parse_query(query.as_deref().unwrap_or_default())?;
    let sql = filters.to_sql();
    let (issues, admins) = state
        .db
        .call(move |db| Ok((db.query_issues(&sql)?, db.list_admin_users(true)?)))
        .await
        .unwrap_or_else(|e| {
            error!(error = ?e, "Failed to load issues");
            (Vec::new(), Vec::new())
        });

    Ok(Json(IssueListResponse {
        issues,
        filters: filters.to_params(),
        location: filters.location(),
        active_filters: filters.active_count(),
        chips: filters.chips(&admins),
    }))
}

async fn bulk_action(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
    payload: Result<Json<BulkRequest>, JsonRejection>,
) -> Result<Json<bulk::BulkOutcome>, ApiError> {
    let Json(request) = payload?;
    let selection: Selection = request.issue_ids.into_iter().collect();
    bulk::apply_bulk(&state.db, &admin, request.action, selection)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to apply bulk action"))
}

async fn get_issue_detail(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Path(id): Path<String>,
) -> Result<Json<IssueDetail>, ApiError> {
    let lookup = id.clone();
    let detail = state
        .db
        .call(move |db| db.get_issue_detail(&lookup))
        .await
        .map_err(|e| ApiError::from_portal(PortalError::db(e), "Failed to load issue"))?;
    detail
        .map(Json)
        .ok_or_else(|| PortalError::IssueNotFound { id }.into())
}

async fn update_issue(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<String>,
    payload: Result<Json<IssueEdit>, JsonRejection>,
) -> Result<Json<Issue>, ApiError> {
    let Json(edit) = payload?;
    audit::update_issue(&state.db, &state.feed, &admin, &id, edit)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to update issue"))
}

async fn assign_issue(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<String>,
    payload: Result<Json<AssignmentRequest>, JsonRejection>,
) -> Result<Json<Issue>, ApiError> {
    let Json(request) = payload?;
    let assignee = request.assigned_to.filter(|a| !a.trim().is_empty());
    audit::assign_issue(&state.db, &state.feed, &admin, &id, assignee)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to update assignment"))
}

async fn list_admins(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
) -> Json<Vec<AdminUser>> {
    let admins = state
        .db
        .call(|db| db.list_admin_users(true))
        .await
        .unwrap_or_else(|e| {
            error!(error = ?e, "Failed to load admin users");
            Vec::new()
        });
    Json(admins)
}

async fn list_departments(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
) -> Json<Vec<Department>> {
    let departments = state
        .db
        .call(|db| db.list_departments())
        .await
        .unwrap_or_else(|e| {
            error!(error = ?e, "Failed to load departments");
            Vec::new()
        });
    Json(departments)
}

async fn create_department(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
    payload: Result<Json<NewDepartment>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(mut new) = payload?;
    new.name = new.name.trim().to_string();
    require_text("name", &new.name)?;

    let created = state
        .db
        .call(move |db| {
            if db.find_department(&new.name)?.is_some() {
                return Ok(Err(PortalError::Validation(format!(
                    "Department '{}' already exists",
                    new.name
                ))));
            }
            Ok(Ok(db.create_department(&new)?))
        })
        .await
        .map_err(|e| ApiError::from_portal(PortalError::db(e), "Failed to create department"))??;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn reports(
    State(state): State<SharedState>,
    CurrentAdmin(_admin): CurrentAdmin,
) -> Result<Json<AnalyticsReport>, ApiError> {
    let start = analytics::report_window_start(chrono::Utc::now().naive_utc());
    analytics::report(&state.db, start)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to load reports"))
}

async fn list_notifications(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
) -> Json<NotificationList> {
    let id = admin.id.clone();
    let (notifications, unread_count) = state
        .db
        .call(move |db| {
            Ok((
                db.list_notifications(&id, None)?,
                db.unread_notification_count(&id)?,
            ))
        })
        .await
        .unwrap_or_else(|e| {
            error!(error = ?e, "Failed to load notifications");
            (Vec::new(), 0)
        });
    Json(NotificationList {
        notifications,
        unread_count,
    })
}

async fn mark_read(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
    Path(id): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let changed = notifications::mark_read(&state.db, &admin.id, &id)
        .await
        .map_err(|e| ApiError::from_portal(e, "Failed to mark notification read"))?;
    Ok(Json(MarkReadResponse {
        updated: usize::from(changed),
    }))
}

async fn mark_all_read(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = notifications::mark_all_read(&state.db, &admin.id)
        .await
        .map_err(|e| ApiError::from_portal(e, "Failed to mark notifications read"))?;
    Ok(Json(MarkReadResponse { updated }))
}

async fn get_settings(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
) -> Result<Json<NotificationPreferences>, ApiError> {
    notifications::load_preferences(&state.db, &admin.id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to load notification settings"))
}

async fn update_settings(
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
    payload: Result<Json<NotificationPreferences>, JsonRejection>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    let Json(prefs) = payload?;
    notifications::save_preferences(&state.db, &admin.id, prefs)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_portal(e, "Failed to save notification settings"))
}
