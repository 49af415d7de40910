use serde::{Deserialize, Serialize};

pub use civic_common::{Category, NotificationType, Priority, Status, UpdateType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub status: Status,
    pub priority: Priority,
    pub location_address: String,
    pub assigned_department: Option<String>,
    pub assigned_to: Option<String>,
    pub citizen_name: Option<String>,
    pub citizen_email: Option<String>,
    pub citizen_phone: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_at: Option<String>,
}

/// Fields a citizen provides on the report form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    pub location_address: String,
    #[serde(default)]
    pub citizen_name: Option<String>,
    #[serde(default)]
    pub citizen_email: Option<String>,
    #[serde(default)]
    pub citizen_phone: Option<String>,
}

/// Name and contact of an admin, inlined into joined reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminSummary {
    pub full_name: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueWithAssignee {
    #[serde(flatten)]
    pub issue: Issue,
    pub assignee: Option<AdminSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueUpdate {
    pub id: String,
    pub issue_id: String,
    pub update_type: UpdateType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub updated_by: String,
    pub updated_by_name: Option<String>,
    pub created_at: String,
}

/// An audit record waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssueUpdate {
    pub issue_id: String,
    pub update_type: UpdateType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDetail {
    pub issue: Issue,
    pub assignee: Option<AdminSummary>,
    /// Newest first.
    pub updates: Vec<IssueUpdate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub department_id: Option<i64>,
    pub department_name: Option<String>,
}

impl AdminUser {
    pub fn summary(&self) -> AdminSummary {
        AdminSummary {
            full_name: self.full_name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDepartment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub contact_phone: Option<String>,
}

/// Minimal issue fields shown next to a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueSummary {
    pub title: String,
    pub status: Status,
    pub category: Category,
    pub location_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub issue_id: Option<String>,
    pub sent_via_email: bool,
    pub created_at: String,
    pub issue: Option<IssueSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub issue_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPreferences {
    pub email_notifications: bool,
    pub new_issues: bool,
    pub status_changes: bool,
    pub assignments: bool,
    pub high_priority_only: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            new_issues: true,
            status_changes: true,
            assignments: true,
            high_priority_only: false,
        }
    }
}

impl NotificationPreferences {
    /// Whether a notification of `kind` about an issue at `priority`
    /// should be delivered.
    pub fn allows(&self, kind: NotificationType, priority: Priority) -> bool {
        let wanted = match kind {
            NotificationType::IssueSubmitted => self.new_issues,
            NotificationType::StatusUpdate => self.status_changes,
            NotificationType::Assignment => self.assignments,
        };
        wanted && (!self.high_priority_only || priority.is_high())
    }
}

// Analytics view types

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CountEntry {
    pub key: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_issues: u64,
    pub status_counts: Vec<CountEntry>,
    pub category_counts: Vec<CountEntry>,
    pub recent_issues: Vec<Issue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonthlyStat {
    /// `YYYY-MM`
    pub month: String,
    pub total: u64,
    pub resolved: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub monthly_stats: Vec<MonthlyStat>,
    pub avg_resolution_days: i64,
    pub department_stats: Vec<CountEntry>,
    pub total_issues: u64,
    pub resolved_issues: u64,
    pub resolution_rate: u8,
}
