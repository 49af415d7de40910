use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use civic_common::ROUTED_DEPARTMENTS;

use super::filters::SqlFilter;
use super::models::*;

/// Async-safe handle to the portal database.
///
/// Wraps `PortalDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<PortalDb>>,
}

impl DbHandle {
    pub fn new(db: PortalDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PortalDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// commands and tests; never from a request handler.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, PortalDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Column assignments for one issue update, shared by single edits,
/// assignment changes and bulk actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldUpdate {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    /// `Some(None)` clears the assignee.
    pub assigned_to: Option<Option<String>>,
    /// Stamp `resolved_at`. Rows that are already resolved keep their
    /// original resolution time.
    pub stamp_resolved: bool,
}

impl FieldUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.assigned_to.is_none()
            && !self.stamp_resolved
    }

    fn set_clauses(&self) -> (Vec<&'static str>, Vec<Value>) {
        let mut sets = Vec::new();
        let mut values = Vec::new();
        if let Some(status) = self.status {
            sets.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            sets.push("priority = ?");
            values.push(Value::Text(priority.as_str().to_string()));
        }
        if let Some(assignee) = &self.assigned_to {
            sets.push("assigned_to = ?");
            values.push(match assignee {
                Some(id) => Value::Text(id.clone()),
                None => Value::Null,
            });
        }
        if self.stamp_resolved {
            // Right-hand expressions see the row as it was before the update.
            sets.push(
                "resolved_at = CASE WHEN status = 'resolved' AND resolved_at IS NOT NULL \
                 THEN resolved_at ELSE datetime('now') END",
            );
        }
        sets.push("updated_at = datetime('now')");
        (sets, values)
    }
}

/// Audit fields shared by every record of one bulk action.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTemplate {
    pub update_type: UpdateType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub updated_by: String,
}

impl AuditTemplate {
    pub fn for_issue(&self, issue_id: &str) -> NewIssueUpdate {
        NewIssueUpdate {
            issue_id: issue_id.to_string(),
            update_type: self.update_type,
            old_value: self.old_value.clone(),
            new_value: self.new_value.clone(),
            comment: self.comment.clone(),
            updated_by: self.updated_by.clone(),
        }
    }
}

/// Credentials row for password sign-in.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    pub user_id: String,
    /// PHC string; carries its own salt and parameters.
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLookup {
    pub user_id: String,
    pub expired: bool,
}

/// Columns analytics may group issues by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueGroup {
    Status,
    Category,
    Department,
}

impl IssueGroup {
    fn column_expr(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Category => "category",
            Self::Department => "COALESCE(assigned_department, 'Unassigned')",
        }
    }
}

const ISSUE_SELECT: &str = "SELECT i.id, i.title, i.description, i.category, i.status, i.priority,
        i.location_address, i.assigned_department, i.assigned_to, i.citizen_name, i.citizen_email,
        i.citizen_phone, i.created_at, i.updated_at, i.resolved_at, a.full_name, a.email, a.role
     FROM issues i LEFT JOIN admin_users a ON a.id = i.assigned_to";

const ADMIN_SELECT: &str = "SELECT u.id, u.full_name, u.email, u.role, u.is_active, u.department_id, d.name
     FROM admin_users u LEFT JOIN departments d ON d.id = u.department_id";

const NOTIFICATION_SELECT: &str = "SELECT n.id, n.recipient_id, n.notification_type, n.title, n.message,
        n.is_read, n.issue_id, n.sent_via_email, n.created_at,
        i.title, i.status, i.category, i.location_address
     FROM notifications n LEFT JOIN issues i ON i.id = n.issue_id";

pub struct PortalDb {
    conn: Connection,
}

impl PortalDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS departments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    contact_email TEXT,
                    contact_phone TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS auth_users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    expires_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS admin_users (
                    id TEXT PRIMARY KEY REFERENCES auth_users(id) ON DELETE CASCADE,
                    full_name TEXT NOT NULL,
                    email TEXT NOT NULL COLLATE NOCASE,
                    role TEXT NOT NULL DEFAULT 'admin',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS issues (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    category TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'submitted',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    location_address TEXT NOT NULL,
                    assigned_department TEXT,
                    assigned_to TEXT REFERENCES admin_users(id) ON DELETE SET NULL,
                    citizen_name TEXT,
                    citizen_email TEXT,
                    citizen_phone TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    resolved_at TEXT
                );

                CREATE TABLE IF NOT EXISTS issue_updates (
                    id TEXT PRIMARY KEY,
                    issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                    update_type TEXT NOT NULL,
                    old_value TEXT,
                    new_value TEXT,
                    comment TEXT,
                    updated_by TEXT NOT NULL REFERENCES admin_users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notifications (
                    id TEXT PRIMARY KEY,
                    recipient_id TEXT NOT NULL REFERENCES admin_users(id) ON DELETE CASCADE,
                    notification_type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    message TEXT NOT NULL,
                    is_read INTEGER NOT NULL DEFAULT 0,
                    issue_id TEXT REFERENCES issues(id) ON DELETE SET NULL,
                    sent_via_email INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS notification_preferences (
                    admin_user_id TEXT PRIMARY KEY REFERENCES admin_users(id) ON DELETE CASCADE,
                    email_notifications INTEGER NOT NULL DEFAULT 1,
                    new_issues INTEGER NOT NULL DEFAULT 1,
                    status_changes INTEGER NOT NULL DEFAULT 1,
                    assignments INTEGER NOT NULL DEFAULT 1,
                    high_priority_only INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_issues_created ON issues(created_at);
                CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
                CREATE INDEX IF NOT EXISTS idx_issues_assigned_to ON issues(assigned_to);
                CREATE INDEX IF NOT EXISTS idx_issue_updates_issue ON issue_updates(issue_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);
                ",
            )
            .context("Failed to create tables")?;

        for name in ROUTED_DEPARTMENTS {
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO departments (name) VALUES (?1)",
                    params![name],
                )
                .with_context(|| format!("Failed to seed department {}", name))?;
        }

        Ok(())
    }

    // ── Auth ──────────────────────────────────────────────────────────

    /// Sign-in identity with no admin profile.
    pub fn create_auth_user(&self, email: &str, password_hash: &str) -> Result<String> {
        insert_auth_user(&self.conn, email, password_hash)
    }

    /// Emails compare case-insensitively.
    pub fn get_credentials(&self, email: &str) -> Result<Option<StoredCredentials>> {
        self.conn
            .query_row(
                "SELECT id, password_hash FROM auth_users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(StoredCredentials {
                        user_id: row.get(0)?,
                        password_hash: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query credentials")
    }

    pub fn create_session(&self, user_id: &str, ttl_hours: u32) -> Result<String> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let modifier = format!("+{} hours", ttl_hours);
        self.conn
            .execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, datetime('now', ?3))",
                params![token, user_id, modifier],
            )
            .context("Failed to insert session")?;
        Ok(token)
    }

    pub fn lookup_session(&self, token: &str) -> Result<Option<SessionLookup>> {
        self.conn
            .query_row(
                "SELECT user_id, expires_at <= datetime('now') FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(SessionLookup {
                        user_id: row.get(0)?,
                        expired: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query session")
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])
            .context("Failed to delete session")?;
        Ok(count > 0)
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE expires_at <= datetime('now')", [])
            .context("Failed to purge expired sessions")
    }

    // ── Admin users ───────────────────────────────────────────────────

    /// Create the sign-in identity and the admin row sharing its id in
    /// one transaction, so a failed profile insert leaves no identity behind.
    pub fn create_admin_account(
        &self,
        email: &str,
        password_hash: &str,
        full_name: &str,
        role: &str,
        department_id: Option<i64>,
    ) -> Result<AdminUser> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let id = insert_auth_user(&tx, email, password_hash)?;
        tx.execute(
            "INSERT INTO admin_users (id, full_name, email, role, department_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, full_name, email, role, department_id],
        )
        .context("Failed to insert admin user")?;
        tx.commit().context("Failed to commit admin account")?;
        self.get_admin_user(&id)?
            .context("Admin user not found after insert")
    }

    pub fn get_admin_user(&self, id: &str) -> Result<Option<AdminUser>> {
        let sql = format!("{} WHERE u.id = ?1", ADMIN_SELECT);
        self.conn
            .query_row(&sql, params![id], map_admin_row)
            .optional()
            .context("Failed to query admin user")
    }

    pub fn find_admin_by_email(&self, email: &str) -> Result<Option<AdminUser>> {
        let sql = format!("{} WHERE u.email = ?1", ADMIN_SELECT);
        self.conn
            .query_row(&sql, params![email], map_admin_row)
            .optional()
            .context("Failed to query admin user by email")
    }

    pub fn list_admin_users(&self, active_only: bool) -> Result<Vec<AdminUser>> {
        let sql = if active_only {
            format!("{} WHERE u.is_active = 1 ORDER BY u.full_name", ADMIN_SELECT)
        } else {
            format!("{} ORDER BY u.full_name", ADMIN_SELECT)
        };
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_admin_users")?;
        let rows = stmt
            .query_map([], map_admin_row)
            .context("Failed to query admin users")?;
        let mut admins = Vec::new();
        for row in rows {
            admins.push(row.context("Failed to read admin user row")?);
        }
        Ok(admins)
    }

    pub fn set_admin_active(&self, id: &str, active: bool) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE admin_users SET is_active = ?1 WHERE id = ?2",
                params![active, id],
            )
            .context("Failed to update admin active flag")?;
        Ok(count > 0)
    }

    // ── Departments ───────────────────────────────────────────────────

    pub fn create_department(&self, dept: &NewDepartment) -> Result<Department> {
        self.conn
            .execute(
                "INSERT INTO departments (name, description, contact_email, contact_phone) VALUES (?1, ?2, ?3, ?4)",
                params![
                    dept.name,
                    dept.description,
                    dept.contact_email,
                    dept.contact_phone
                ],
            )
            .context("Failed to insert department")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT id, name, description, contact_email, contact_phone, created_at FROM departments WHERE id = ?1",
                params![id],
                map_department_row,
            )
            .context("Department not found after insert")
    }

    pub fn find_department(&self, name: &str) -> Result<Option<Department>> {
        self.conn
            .query_row(
                "SELECT id, name, description, contact_email, contact_phone, created_at FROM departments WHERE name = ?1",
                params![name],
                map_department_row,
            )
            .optional()
            .context("Failed to query department")
    }

    pub fn list_departments(&self) -> Result<Vec<Department>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, contact_email, contact_phone, created_at
                 FROM departments ORDER BY name ASC",
            )
            .context("Failed to prepare list_departments")?;
        let rows = stmt
            .query_map([], map_department_row)
            .context("Failed to query departments")?;
        let mut departments = Vec::new();
        for row in rows {
            departments.push(row.context("Failed to read department row")?);
        }
        Ok(departments)
    }

    // ── Issues ────────────────────────────────────────────────────────

    /// Insert a citizen report. Blank contact fields are stored as NULL.
    pub fn insert_issue(&self, issue: &NewIssue, department: &str) -> Result<Issue> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO issues (id, title, description, category, priority, location_address,
                    assigned_department, citizen_name, citizen_email, citizen_phone)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    issue.title,
                    issue.description,
                    issue.category.as_str(),
                    issue.priority.as_str(),
                    issue.location_address,
                    department,
                    non_blank(&issue.citizen_name),
                    non_blank(&issue.citizen_email),
                    non_blank(&issue.citizen_phone),
                ],
            )
            .context("Failed to insert issue")?;
        self.get_issue(&id)?.context("Issue not found after insert")
    }

    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>> {
        Ok(self.get_issue_with_assignee(id)?.map(|row| row.issue))
    }

    pub fn get_issue_with_assignee(&self, id: &str) -> Result<Option<IssueWithAssignee>> {
        let sql = format!("{} WHERE i.id = ?1", ISSUE_SELECT);
        let row = self
            .conn
            .query_row(&sql, params![id], IssueRow::read)
            .optional()
            .context("Failed to query issue")?;
        row.map(IssueRow::into_issue_with_assignee).transpose()
    }

    pub fn get_issue_detail(&self, id: &str) -> Result<Option<IssueDetail>> {
        let row = match self.get_issue_with_assignee(id)? {
            Some(row) => row,
            None => return Ok(None),
        };
        let updates = self.list_issue_updates(id)?;
        Ok(Some(IssueDetail {
            issue: row.issue,
            assignee: row.assignee,
            updates,
        }))
    }

    /// Audit trail for one issue, newest first, with the acting admin's name.
    pub fn list_issue_updates(&self, issue_id: &str) -> Result<Vec<IssueUpdate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.issue_id, u.update_type, u.old_value, u.new_value, u.comment,
                        u.updated_by, a.full_name, u.created_at
                 FROM issue_updates u LEFT JOIN admin_users a ON a.id = u.updated_by
                 WHERE u.issue_id = ?1
                 ORDER BY u.created_at DESC, u.rowid DESC",
            )
            .context("Failed to prepare list_issue_updates")?;
        let rows = stmt
            .query_map(params![issue_id], |row| {
                Ok((
                    row.get::<_, String>(2)?,
                    IssueUpdate {
                        id: row.get(0)?,
                        issue_id: row.get(1)?,
                        update_type: UpdateType::Comment,
                        old_value: row.get(3)?,
                        new_value: row.get(4)?,
                        comment: row.get(5)?,
                        updated_by: row.get(6)?,
                        updated_by_name: row.get(7)?,
                        created_at: row.get(8)?,
                    },
                ))
            })
            .context("Failed to query issue updates")?;
        let mut updates = Vec::new();
        for row in rows {
            let (kind, mut update) = row.context("Failed to read issue update row")?;
            update.update_type = parse_column(&kind, "update type")?;
            updates.push(update);
        }
        Ok(updates)
    }

    /// Issues matching a filter, newest first, with assignee inlined.
    pub fn query_issues(&self, filter: &SqlFilter) -> Result<Vec<IssueWithAssignee>> {
        let mut sql = ISSUE_SELECT.to_string();
        if !filter.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY i.created_at DESC, i.rowid DESC");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare query_issues")?;
        let rows = stmt
            .query_map(params_from_iter(filter.params.iter()), IssueRow::read)
            .context("Failed to query issues")?;
        let mut issues = Vec::new();
        for row in rows {
            let r = row.context("Failed to read issue row")?;
            issues.push(r.into_issue_with_assignee()?);
        }
        Ok(issues)
    }

    pub fn recent_issues(&self, limit: usize) -> Result<Vec<Issue>> {
        let sql = format!("{} ORDER BY i.created_at DESC, i.rowid DESC LIMIT ?1", ISSUE_SELECT);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare recent_issues")?;
        let rows = stmt
            .query_map(params![limit as i64], IssueRow::read)
            .context("Failed to query recent issues")?;
        let mut issues = Vec::new();
        for row in rows {
            let r = row.context("Failed to read issue row")?;
            issues.push(r.into_issue_with_assignee()?.issue);
        }
        Ok(issues)
    }

    /// Distinct departments that issues have been routed to.
    pub fn issue_departments(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT assigned_department FROM issues
                 WHERE assigned_department IS NOT NULL ORDER BY assigned_department",
            )
            .context("Failed to prepare issue_departments")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query issue departments")?;
        let mut departments = Vec::new();
        for row in rows {
            departments.push(row.context("Failed to read department name")?);
        }
        Ok(departments)
    }

    /// Apply one issue's field update and append its audit records in a
    /// single transaction.
    pub fn apply_issue_change(
        &self,
        issue_id: &str,
        update: &FieldUpdate,
        audit: &[NewIssueUpdate],
    ) -> Result<Issue> {
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        if !update.is_empty() {
            let (sets, mut values) = update.set_clauses();
            values.push(Value::Text(issue_id.to_string()));
            let sql = format!("UPDATE issues SET {} WHERE id = ?", sets.join(", "));
            tx.execute(&sql, params_from_iter(values.iter()))
                .context("Failed to update issue")?;
        }
        for record in audit {
            insert_issue_update(&tx, record)?;
        }

        tx.commit().context("Failed to commit issue change")?;
        self.get_issue(issue_id)?
            .context("Issue not found after update")
    }

    /// Apply one field update to every existing issue in `ids` with a
    /// single UPDATE, then write one audit record per updated issue, all
    /// in one transaction. Returns the ids that were updated, in input order.
    pub fn apply_bulk_update(
        &self,
        ids: &[String],
        update: &FieldUpdate,
        audit: &AuditTemplate,
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let existing: Vec<String> = {
            let sql = format!("SELECT id FROM issues WHERE id IN ({})", placeholders);
            let mut stmt = tx.prepare(&sql).context("Failed to prepare bulk lookup")?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), |row| row.get::<_, String>(0))
                .context("Failed to look up selected issues")?;
            let mut found = Vec::new();
            for row in rows {
                found.push(row.context("Failed to read issue id")?);
            }
            found
        };
        let updated: Vec<String> = ids
            .iter()
            .filter(|id| existing.contains(id))
            .cloned()
            .collect();

        if !updated.is_empty() {
            let (sets, mut values) = update.set_clauses();
            values.extend(updated.iter().map(|id| Value::Text(id.clone())));
            let sql = format!(
                "UPDATE issues SET {} WHERE id IN ({})",
                sets.join(", "),
                vec!["?"; updated.len()].join(", ")
            );
            tx.execute(&sql, params_from_iter(values.iter()))
                .context("Failed to apply bulk update")?;
            for id in &updated {
                insert_issue_update(&tx, &audit.for_issue(id))?;
            }
        }

        tx.commit().context("Failed to commit bulk update")?;
        Ok(updated)
    }

    // ── Notifications ─────────────────────────────────────────────────

    pub fn insert_notification(&self, new: &NewNotification) -> Result<Notification> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO notifications (id, recipient_id, notification_type, title, message, issue_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    new.recipient_id,
                    new.notification_type.as_str(),
                    new.title,
                    new.message,
                    new.issue_id
                ],
            )
            .context("Failed to insert notification")?;
        self.get_notification(&id)?
            .context("Notification not found after insert")
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        let sql = format!("{} WHERE n.id = ?1", NOTIFICATION_SELECT);
        let row = self
            .conn
            .query_row(&sql, params![id], NotificationRow::read)
            .optional()
            .context("Failed to query notification")?;
        row.map(NotificationRow::into_notification).transpose()
    }

    /// Notifications for a recipient, newest first. `limit` of `None`
    /// returns all of them.
    pub fn list_notifications(
        &self,
        recipient_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Notification>> {
        let sql = format!(
            "{} WHERE n.recipient_id = ?1 ORDER BY n.created_at DESC, n.rowid DESC LIMIT ?2",
            NOTIFICATION_SELECT
        );
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_notifications")?;
        let rows = stmt
            .query_map(params![recipient_id, limit], NotificationRow::read)
            .context("Failed to query notifications")?;
        let mut notifications = Vec::new();
        for row in rows {
            let r = row.context("Failed to read notification row")?;
            notifications.push(r.into_notification()?);
        }
        Ok(notifications)
    }

    /// Flip one unread notification to read. Returns `false` when the row
    /// does not exist, belongs to someone else, or was already read.
    pub fn mark_notification_read(&self, id: &str, recipient_id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2 AND is_read = 0",
                params![id, recipient_id],
            )
            .context("Failed to mark notification read")?;
        Ok(count > 0)
    }

    pub fn mark_all_notifications_read(&self, recipient_id: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
                params![recipient_id],
            )
            .context("Failed to mark notifications read")
    }

    pub fn unread_notification_count(&self, recipient_id: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
                params![recipient_id],
                |row| row.get(0),
            )
            .context("Failed to count unread notifications")?;
        Ok(count as u64)
    }

    pub fn get_preferences(&self, admin_id: &str) -> Result<Option<NotificationPreferences>> {
        self.conn
            .query_row(
                "SELECT email_notifications, new_issues, status_changes, assignments, high_priority_only
                 FROM notification_preferences WHERE admin_user_id = ?1",
                params![admin_id],
                |row| {
                    Ok(NotificationPreferences {
                        email_notifications: row.get(0)?,
                        new_issues: row.get(1)?,
                        status_changes: row.get(2)?,
                        assignments: row.get(3)?,
                        high_priority_only: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query notification preferences")
    }

    pub fn upsert_preferences(
        &self,
        admin_id: &str,
        prefs: &NotificationPreferences,
    ) -> Result<NotificationPreferences> {
        self.conn
            .execute(
                "INSERT INTO notification_preferences
                    (admin_user_id, email_notifications, new_issues, status_changes, assignments, high_priority_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(admin_user_id) DO UPDATE SET
                    email_notifications = ?2,
                    new_issues = ?3,
                    status_changes = ?4,
                    assignments = ?5,
                    high_priority_only = ?6,
                    updated_at = datetime('now')",
                params![
                    admin_id,
                    prefs.email_notifications,
                    prefs.new_issues,
                    prefs.status_changes,
                    prefs.assignments,
                    prefs.high_priority_only
                ],
            )
            .context("Failed to upsert notification preferences")?;
        self.get_preferences(admin_id)?
            .context("Preferences not found after upsert")
    }

    // ── Analytics ─────────────────────────────────────────────────────

    pub fn count_issues(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM issues", [], |row| row.get(0))
            .context("Failed to count issues")?;
        Ok(count as u64)
    }

    /// Issue counts per group, largest first, ties by key.
    pub fn count_issues_by(&self, group: IssueGroup) -> Result<Vec<CountEntry>> {
        let expr = group.column_expr();
        let sql = format!(
            "SELECT {expr} AS k, COUNT(*) AS c FROM issues GROUP BY k ORDER BY c DESC, k ASC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare count_issues_by")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CountEntry {
                    key: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                })
            })
            .context("Failed to count issues by group")?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row.context("Failed to read count row")?);
        }
        Ok(counts)
    }

    /// `(created_at, status)` for issues created at or after `since`.
    pub fn issue_timeline_since(&self, since: &str) -> Result<Vec<(String, Status)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT created_at, status FROM issues WHERE created_at >= ?1 ORDER BY created_at")
            .context("Failed to prepare issue_timeline_since")?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query issue timeline")?;
        let mut timeline = Vec::new();
        for row in rows {
            let (created_at, status) = row.context("Failed to read timeline row")?;
            timeline.push((created_at, parse_column(&status, "status")?));
        }
        Ok(timeline)
    }

    /// `(created_at, resolved_at)` for every issue that has been resolved.
    pub fn resolution_pairs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT created_at, resolved_at FROM issues WHERE resolved_at IS NOT NULL")
            .context("Failed to prepare resolution_pairs")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query resolution times")?;
        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row.context("Failed to read resolution row")?);
        }
        Ok(pairs)
    }

    /// Test hook: backdate an issue's creation time.
    #[cfg(test)]
    pub(crate) fn set_issue_created_at(&self, id: &str, created_at: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE issues SET created_at = ?1 WHERE id = ?2",
                params![created_at, id],
            )
            .context("Failed to backdate issue")?;
        Ok(())
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_column<T>(value: &str, kind: &str) -> Result<T>
where
    T: FromStr,
{
    value
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("invalid {} in database: '{}'", kind, value))
}

fn insert_issue_update(conn: &Connection, record: &NewIssueUpdate) -> Result<()> {
    conn.execute(
        "INSERT INTO issue_updates (id, issue_id, update_type, old_value, new_value, comment, updated_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uuid::Uuid::new_v4().to_string(),
            record.issue_id,
            record.update_type.as_str(),
            record.old_value,
            record.new_value,
            record.comment,
            record.updated_by
        ],
    )
    .context("Failed to insert issue update")?;
    Ok(())
}

fn insert_auth_user(conn: &Connection, email: &str, password_hash: &str) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO auth_users (id, email, password_hash) VALUES (?1, ?2, ?3)",
        params![id, email, password_hash],
    )
    .context("Failed to insert auth user")?;
    Ok(id)
}

fn map_admin_row(row: &Row<'_>) -> rusqlite::Result<AdminUser> {
    Ok(AdminUser {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
        department_id: row.get(5)?,
        department_name: row.get(6)?,
    })
}

fn map_department_row(row: &Row<'_>) -> rusqlite::Result<Department> {
    Ok(Department {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        contact_email: row.get(3)?,
        contact_phone: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Raw issue row; enum columns are parsed in `into_issue_with_assignee`.
struct IssueRow {
    id: String,
    title: String,
    description: String,
    category: String,
    status: String,
    priority: String,
    location_address: String,
    assigned_department: Option<String>,
    assigned_to: Option<String>,
    citizen_name: Option<String>,
    citizen_email: Option<String>,
    citizen_phone: Option<String>,
    created_at: String,
    updated_at: String,
    resolved_at: Option<String>,
    assignee_name: Option<String>,
    assignee_email: Option<String>,
    assignee_role: Option<String>,
}

impl IssueRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            location_address: row.get(6)?,
            assigned_department: row.get(7)?,
            assigned_to: row.get(8)?,
            citizen_name: row.get(9)?,
            citizen_email: row.get(10)?,
            citizen_phone: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            resolved_at: row.get(14)?,
            assignee_name: row.get(15)?,
            assignee_email: row.get(16)?,
            assignee_role: row.get(17)?,
        })
    }

    fn into_issue_with_assignee(self) -> Result<IssueWithAssignee> {
        let assignee = match (self.assignee_name, self.assignee_email, self.assignee_role) {
            (Some(full_name), Some(email), Some(role)) => Some(AdminSummary {
                full_name,
                email,
                role,
            }),
            _ => None,
        };
        Ok(IssueWithAssignee {
            issue: Issue {
                id: self.id,
                title: self.title,
                description: self.description,
                category: parse_column(&self.category, "category")?,
                status: parse_column(&self.status, "status")?,
                priority: parse_column(&self.priority, "priority")?,
                location_address: self.location_address,
                assigned_department: self.assigned_department,
                assigned_to: self.assigned_to,
                citizen_name: self.citizen_name,
                citizen_email: self.citizen_email,
                citizen_phone: self.citizen_phone,
                created_at: self.created_at,
                updated_at: self.updated_at,
                resolved_at: self.resolved_at,
            },
            assignee,
        })
    }
}

struct NotificationRow {
    id: String,
    recipient_id: String,
    notification_type: String,
    title: String,
    message: String,
    is_read: bool,
    issue_id: Option<String>,
    sent_via_email: bool,
    created_at: String,
    issue_title: Option<String>,
    issue_status: Option<String>,
    issue_category: Option<String>,
    issue_location: Option<String>,
}

impl NotificationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recipient_id: row.get(1)?,
            notification_type: row.get(2)?,
            title: row.get(3)?,
            message: row.get(4)?,
            is_read: row.get(5)?,
            issue_id: row.get(6)?,
            sent_via_email: row.get(7)?,
            created_at: row.get(8)?,
            issue_title: row.get(9)?,
            issue_status: row.get(10)?,
            issue_category: row.get(11)?,
            issue_location: row.get(12)?,
        })
    }

    fn into_notification(self) -> Result<Notification> {
        let issue = match (
            self.issue_title,
            self.issue_status,
            self.issue_category,
            self.issue_location,
        ) {
            (Some(title), Some(status), Some(category), Some(location_address)) => {
                Some(IssueSummary {
                    title,
                    status: parse_column(&status, "status")?,
                    category: parse_column(&category, "category")?,
                    location_address,
                })
            }
            _ => None,
        };
        Ok(Notification {
            id: self.id,
            recipient_id: self.recipient_id,
            notification_type: parse_column(&self.notification_type, "notification type")?,
            title: self.title,
            message: self.message,
            is_read: self.is_read,
            issue_id: self.issue_id,
            sent_via_email: self.sent_via_email,
            created_at: self.created_at,
            issue,
        })
    }
}
