//! Password sign-in, sessions, and the per-request admin check.

use std::sync::Arc;

use anyhow::Context;
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::api::{ApiError, AppState};
use super::db::{DbHandle, PortalDb};
use super::models::AdminUser;
use crate::errors::{PortalError, PortalResult};

pub const SESSION_COOKIE: &str = "civic_session";
pub const LOGIN_PATH: &str = "/admin/login";

pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const NOT_AN_ADMIN: &str = "Access denied. Admin privileges required.";
pub const DEACTIVATED: &str =
    "Your account has been deactivated. Please contact your administrator.";

/// Argon2id PHC string for `password` under a fresh random salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

/// Check `password` against a stored PHC string. Malformed hashes never match.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Sign-in emails are matched without regard to case or surrounding space.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
    pub department_id: Option<i64>,
}

/// Create the sign-in identity and the admin row that shares its id.
pub fn create_admin(db: &PortalDb, new: &NewAdmin) -> anyhow::Result<AdminUser> {
    if new.password.len() < 8 {
        anyhow::bail!("Password must be at least 8 characters");
    }
    let email = normalize_email(&new.email);
    let hash = hash_password(&new.password)?;
    db.create_admin_account(&email, &hash, &new.full_name, &new.role, new.department_id)
        .with_context(|| format!("Failed to create admin {}", email))
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub admin: AdminUser,
}

/// Verify credentials and open a session for an active admin.
pub async fn login(
    db: &DbHandle,
    request: LoginRequest,
    ttl_hours: u32,
) -> PortalResult<LoginResponse> {
    let email = normalize_email(&request.email);
    let outcome = db
        .call(move |db| {
            let creds = match db.get_credentials(&email)? {
                Some(c) if verify_password(&request.password, &c.password_hash) => c,
                _ => return Ok(Err(PortalError::Unauthorized(INVALID_CREDENTIALS.into()))),
            };
            let admin = match db.get_admin_user(&creds.user_id)? {
                Some(a) => a,
                None => return Ok(Err(PortalError::Forbidden(NOT_AN_ADMIN.into()))),
            };
            if !admin.is_active {
                return Ok(Err(PortalError::Forbidden(DEACTIVATED.into())));
            }
            db.purge_expired_sessions()?;
            let token = db.create_session(&admin.id, ttl_hours)?;
            Ok(Ok(LoginResponse { token, admin }))
        })
        .await
        .map_err(PortalError::db)?;

    match &outcome {
        Ok(resp) => info!(admin_id = %resp.admin.id, "Admin signed in"),
        Err(e) => warn!(error = %e, "Sign-in rejected"),
    }
    outcome
}

pub async fn logout(db: &DbHandle, token: &str) -> PortalResult<bool> {
    let token = token.to_string();
    db.call(move |db| db.delete_session(&token))
        .await
        .map_err(PortalError::db)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoSession,
    SessionExpired,
    NotAdmin,
    Deactivated,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoSession => "Authentication required",
            Self::SessionExpired => "Session expired. Please sign in again.",
            Self::NotAdmin => NOT_AN_ADMIN,
            Self::Deactivated => DEACTIVATED,
        }
    }
}

/// Result of checking a request's session once.
#[derive(Debug, Clone, PartialEq)]
pub enum Authorization {
    Admin(AdminUser),
    Denied(DenyReason),
}

pub async fn authorize(db: &DbHandle, token: Option<String>) -> PortalResult<Authorization> {
    let Some(token) = token else {
        return Ok(Authorization::Denied(DenyReason::NoSession));
    };
    db.call(move |db| {
        let session = match db.lookup_session(&token)? {
            Some(s) => s,
            None => return Ok(Authorization::Denied(DenyReason::NoSession)),
        };
        if session.expired {
            return Ok(Authorization::Denied(DenyReason::SessionExpired));
        }
        Ok(match db.get_admin_user(&session.user_id)? {
            None => Authorization::Denied(DenyReason::NotAdmin),
            Some(a) if !a.is_active => Authorization::Denied(DenyReason::Deactivated),
            Some(a) => Authorization::Admin(a),
        })
    })
    .await
    .map_err(PortalError::db)
}

/// Session token from `Authorization: Bearer` or the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        let token = bearer.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().strip_prefix(SESSION_COOKIE)?.strip_prefix('='))
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

pub fn session_cookie(token: &str, ttl_hours: u32) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        u64::from(ttl_hours) * 3600
    )
}

pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Extractor for handlers that require an active admin.
pub struct CurrentAdmin(pub AdminUser);

impl FromRequestParts<Arc<AppState>> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers);
        match authorize(&state.db, token).await? {
            Authorization::Admin(admin) => Ok(CurrentAdmin(admin)),
            Authorization::Denied(reason) => Err(ApiError::Unauthorized(reason.message().into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn setup() -> (DbHandle, AdminUser) {
        let db = PortalDb::new_in_memory().unwrap();
        let admin = create_admin(
            &db,
            &NewAdmin {
                email: "dana@city.gov".into(),
                password: "correct horse".into(),
                full_name: "Dana Reyes".into(),
                role: "admin".into(),
                department_id: None,
            },
        )
        .unwrap();
        (DbHandle::new(db), admin)
    }

    fn creds(password: &str) -> LoginRequest {
        LoginRequest {
            email: "dana@city.gov".into(),
            password: password.into(),
        }
    }

    #[test]
    fn test_hash_is_salted_argon2_phc() {
        let a = hash_password("correct horse").unwrap();
        let b = hash_password("correct horse").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
        assert!(verify_password("correct horse", &a));
        assert!(verify_password("correct horse", &b));
        assert!(!verify_password("correct horsE", &a));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn test_stored_credential_is_not_a_fast_digest() {
        let (db, admin) = setup();
        let stored = db
            .lock_sync()
            .unwrap()
            .get_credentials("dana@city.gov")
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_id, admin.id);
        assert!(stored.password_hash.starts_with("$argon2id$"));
        assert!(!stored.password_hash.contains("correct horse"));
    }

    #[tokio::test]
    async fn test_login_ignores_email_case() {
        let db = PortalDb::new_in_memory().unwrap();
        let admin = create_admin(
            &db,
            &NewAdmin {
                email: " Dana@City.gov ".into(),
                password: "correct horse".into(),
                full_name: "Dana Reyes".into(),
                role: "admin".into(),
                department_id: None,
            },
        )
        .unwrap();
        assert_eq!(admin.email, "dana@city.gov");
        let db = DbHandle::new(db);

        for email in ["dana@city.gov", "DANA@CITY.GOV", "Dana@City.gov"] {
            let req = LoginRequest {
                email: email.into(),
                password: "correct horse".into(),
            };
            let resp = login(&db, req, 12).await.unwrap();
            assert_eq!(resp.admin.id, admin.id);
        }
    }

    #[test]
    fn test_duplicate_email_differing_in_case_is_rejected() {
        let db = PortalDb::new_in_memory().unwrap();
        let new = |email: &str| NewAdmin {
            email: email.into(),
            password: "correct horse".into(),
            full_name: "Dana Reyes".into(),
            role: "admin".into(),
            department_id: None,
        };
        create_admin(&db, &new("dana@city.gov")).unwrap();
        assert!(create_admin(&db, &new("DANA@city.gov")).is_err());
        assert_eq!(db.list_admin_users(false).unwrap().len(), 1);
    }

    #[test]
    fn test_short_password_rejected() {
        let db = PortalDb::new_in_memory().unwrap();
        let err = create_admin(
            &db,
            &NewAdmin {
                email: "x@city.gov".into(),
                password: "short".into(),
                full_name: "X".into(),
                role: "admin".into(),
                department_id: None,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("8 characters"));
    }

    #[tokio::test]
    async fn test_login_and_authorize() {
        let (db, admin) = setup();
        let resp = login(&db, creds("correct horse"), 12).await.unwrap();
        assert_eq!(resp.admin.id, admin.id);

        let auth = authorize(&db, Some(resp.token.clone())).await.unwrap();
        assert_eq!(auth, Authorization::Admin(admin));

        assert!(logout(&db, &resp.token).await.unwrap());
        let auth = authorize(&db, Some(resp.token)).await.unwrap();
        assert_eq!(auth, Authorization::Denied(DenyReason::NoSession));
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (db, _) = setup();
        match login(&db, creds("nope"), 12).await {
            Err(PortalError::Unauthorized(msg)) => assert_eq!(msg, INVALID_CREDENTIALS),
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deactivated_admin_is_forbidden_and_denied() {
        let (db, admin) = setup();
        let token = login(&db, creds("correct horse"), 12).await.unwrap().token;
        db.lock_sync().unwrap().set_admin_active(&admin.id, false).unwrap();

        assert_eq!(
            authorize(&db, Some(token)).await.unwrap(),
            Authorization::Denied(DenyReason::Deactivated)
        );
        match login(&db, creds("correct horse"), 12).await {
            Err(PortalError::Forbidden(msg)) => assert_eq!(msg, DEACTIVATED),
            other => panic!("Expected Forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identity_without_admin_row_is_not_admin() {
        let (db, _) = setup();
        {
            let guard = db.lock_sync().unwrap();
            guard
                .create_auth_user("citizen@mail.com", &hash_password("password1").unwrap())
                .unwrap();
        }
        let req = LoginRequest {
            email: "citizen@mail.com".into(),
            password: "password1".into(),
        };
        match login(&db, req, 12).await {
            Err(PortalError::Forbidden(msg)) => assert_eq!(msg, NOT_AN_ADMIN),
            other => panic!("Expected Forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_denied() {
        let (db, _) = setup();
        assert_eq!(
            authorize(&db, None).await.unwrap(),
            Authorization::Denied(DenyReason::NoSession)
        );
    }

    #[test]
    fn test_token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());

        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; civic_session=abc123"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz"));
    }
}
