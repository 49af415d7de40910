//! Single-issue edits with an audit trail.
//!
//! `plan_edit` is pure: it diffs a proposed edit against the current row
//! and yields the column update plus one audit record per changed field
//! (and one for a non-blank comment). The async entry points apply the
//! plan in one transaction and then dispatch notifications.

use serde::Deserialize;
use tracing::{info, warn};

use super::db::{DbHandle, FieldUpdate};
use super::models::*;
use super::notifications::{self, NotificationFeed};
use crate::errors::{PortalError, PortalResult};

/// Proposed changes from the issue update form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueEdit {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Writes needed to apply an edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub update: FieldUpdate,
    pub records: Vec<NewIssueUpdate>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.records.is_empty()
    }

    pub fn status_changed(&self) -> bool {
        self.update.status.is_some()
    }
}

pub fn plan_edit(current: &Issue, edit: &IssueEdit, actor_id: &str) -> ChangeSet {
    let mut plan = ChangeSet::default();
    let record = |update_type, old: Option<String>, new: Option<String>, comment| NewIssueUpdate {
        issue_id: current.id.clone(),
        update_type,
        old_value: old,
        new_value: new,
        comment,
        updated_by: actor_id.to_string(),
    };

    if let Some(status) = edit.status.filter(|s| *s != current.status) {
        plan.update.status = Some(status);
        plan.update.stamp_resolved = status == Status::Resolved;
        plan.records.push(record(
            UpdateType::StatusChange,
            Some(current.status.to_string()),
            Some(status.to_string()),
            None,
        ));
    }

    // Priority changes are filed under `assignment`.
    if let Some(priority) = edit.priority.filter(|p| *p != current.priority) {
        plan.update.priority = Some(priority);
        plan.records.push(record(
            UpdateType::Assignment,
            Some(current.priority.to_string()),
            Some(priority.to_string()),
            None,
        ));
    }

    if let Some(comment) = edit
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        plan.records.push(record(
            UpdateType::Comment,
            None,
            None,
            Some(comment.to_string()),
        ));
    }

    plan
}

async fn load_issue(db: &DbHandle, issue_id: &str) -> PortalResult<Issue> {
    let id = issue_id.to_string();
    db.call(move |db| db.get_issue(&id))
        .await
        .map_err(PortalError::db)?
        .ok_or_else(|| PortalError::IssueNotFound {
            id: issue_id.to_string(),
        })
}

/// Apply a status / priority / comment edit. An edit that changes nothing
/// performs no writes and returns the issue as it is.
pub async fn update_issue(
    db: &DbHandle,
    feed: &NotificationFeed,
    actor: &AdminUser,
    issue_id: &str,
    edit: IssueEdit,
) -> PortalResult<Issue> {
    let current = load_issue(db, issue_id).await?;
    let plan = plan_edit(&current, &edit, &actor.id);
    if plan.is_empty() {
        return Ok(current);
    }

    let id = issue_id.to_string();
    let update = plan.update.clone();
    let records = plan.records.clone();
    let updated = db
        .call(move |db| db.apply_issue_change(&id, &update, &records))
        .await
        .map_err(PortalError::db)?;

    info!(
        issue_id,
        actor = %actor.id,
        records = plan.records.len(),
        "Issue updated"
    );

    if plan.status_changed() {
        if let Err(e) =
            notifications::notify_status_change(db, feed, &updated, current.status, &actor.id).await
        {
            warn!(issue_id, error = %e, "Failed to dispatch status notification");
        }
    }

    Ok(updated)
}

/// Assign an issue to an active admin, or clear the assignee with `None`.
/// Re-assigning to the current assignee is a no-op.
pub async fn assign_issue(
    db: &DbHandle,
    feed: &NotificationFeed,
    actor: &AdminUser,
    issue_id: &str,
    assignee_id: Option<String>,
) -> PortalResult<Issue> {
    let current = load_issue(db, issue_id).await?;
    if current.assigned_to == assignee_id {
        return Ok(current);
    }

    let assignee = match &assignee_id {
        Some(id) => {
            let lookup = id.clone();
            let admin = db
                .call(move |db| db.get_admin_user(&lookup))
                .await
                .map_err(PortalError::db)?;
            match admin {
                Some(a) if a.is_active => Some(a),
                _ => return Err(PortalError::InvalidAssignee { id: id.clone() }),
            }
        }
        None => None,
    };

    let record = NewIssueUpdate {
        issue_id: issue_id.to_string(),
        update_type: UpdateType::Assignment,
        old_value: Some(
            if current.assigned_to.is_some() {
                "Previously assigned"
            } else {
                "Unassigned"
            }
            .to_string(),
        ),
        new_value: Some(
            assignee
                .as_ref()
                .map(|a| a.full_name.clone())
                .unwrap_or_else(|| "Unassigned".to_string()),
        ),
        comment: Some(match &assignee {
            Some(a) => format!("Assigned to {} ({})", a.full_name, a.email),
            None => "Assignment removed".to_string(),
        }),
        updated_by: actor.id.clone(),
    };
    let update = FieldUpdate {
        assigned_to: Some(assignee_id),
        ..Default::default()
    };

    let id = issue_id.to_string();
    let updated = db
        .call(move |db| db.apply_issue_change(&id, &update, &[record]))
        .await
        .map_err(PortalError::db)?;

    info!(
        issue_id,
        actor = %actor.id,
        assignee = ?updated.assigned_to,
        "Issue assignment changed"
    );

    if updated.assigned_to.is_some() {
        if let Err(e) = notifications::notify_assignment(db, feed, &updated, &actor.id).await {
            warn!(issue_id, error = %e, "Failed to dispatch assignment notification");
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::db::PortalDb;
    use crate::portal::db::test_support::{admin, issue};

    struct Fixture {
        db: DbHandle,
        feed: NotificationFeed,
        actor: AdminUser,
        other: AdminUser,
        issue: Issue,
    }

    fn fixture() -> Fixture {
        let db = PortalDb::new_in_memory().unwrap();
        let actor = admin(&db, "Dana Reyes", "dana@city.gov");
        let other = admin(&db, "Sam Ortiz", "sam@city.gov");
        let issue = issue(&db, Category::Pothole);
        Fixture {
            db: DbHandle::new(db),
            feed: NotificationFeed::new(16),
            actor,
            other,
            issue,
        }
    }

    fn history(f: &Fixture) -> Vec<IssueUpdate> {
        f.db.lock_sync().unwrap().list_issue_updates(&f.issue.id).unwrap()
    }

    #[test]
    fn test_plan_edit_only_records_changed_fields() {
        let f = fixture();
        let edit = IssueEdit {
            status: Some(Status::Submitted),
            priority: Some(Priority::High),
            comment: Some("   ".into()),
        };
        let plan = plan_edit(&f.issue, &edit, &f.actor.id);
        assert_eq!(plan.records.len(), 1);
        assert_eq!(plan.records[0].update_type, UpdateType::Assignment);
        assert_eq!(plan.records[0].old_value.as_deref(), Some("medium"));
        assert_eq!(plan.records[0].new_value.as_deref(), Some("high"));
        assert!(!plan.status_changed());
    }

    #[test]
    fn test_plan_edit_empty_when_nothing_changes() {
        let f = fixture();
        let plan = plan_edit(&f.issue, &IssueEdit::default(), &f.actor.id);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_resolving_stamps_resolved_at_and_writes_one_record() {
        let f = fixture();
        let edit = IssueEdit {
            status: Some(Status::Resolved),
            ..Default::default()
        };
        let resolved = update_issue(&f.db, &f.feed, &f.actor, &f.issue.id, edit.clone())
            .await
            .unwrap();
        assert_eq!(resolved.status, Status::Resolved);
        assert!(resolved.resolved_at.is_some());

        let updates = history(&f);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::StatusChange);
        assert_eq!(updates[0].old_value.as_deref(), Some("submitted"));
        assert_eq!(updates[0].new_value.as_deref(), Some("resolved"));

        // resolved -> resolved: no second status record.
        let again = update_issue(&f.db, &f.feed, &f.actor, &f.issue.id, edit)
            .await
            .unwrap();
        assert_eq!(again.resolved_at, resolved.resolved_at);
        assert_eq!(history(&f).len(), 1);
    }

    #[tokio::test]
    async fn test_comment_only_edit_writes_comment_record() {
        let f = fixture();
        let edit = IssueEdit {
            comment: Some("  Crew dispatched  ".into()),
            ..Default::default()
        };
        let after = update_issue(&f.db, &f.feed, &f.actor, &f.issue.id, edit)
            .await
            .unwrap();
        assert_eq!(after.status, Status::Submitted);
        let updates = history(&f);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::Comment);
        assert_eq!(updates[0].comment.as_deref(), Some("Crew dispatched"));
    }

    #[tokio::test]
    async fn test_update_missing_issue_is_not_found() {
        let f = fixture();
        let err = update_issue(&f.db, &f.feed, &f.actor, "missing", IssueEdit::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::IssueNotFound { .. }));
    }

    #[tokio::test]
    async fn test_assign_writes_audit_and_notifies_assignee() {
        let f = fixture();
        let mut sub = f.feed.subscribe(&f.other.id);
        let after = assign_issue(&f.db, &f.feed, &f.actor, &f.issue.id, Some(f.other.id.clone()))
            .await
            .unwrap();
        assert_eq!(after.assigned_to.as_deref(), Some(f.other.id.as_str()));

        let updates = history(&f);
        assert_eq!(updates[0].old_value.as_deref(), Some("Unassigned"));
        assert_eq!(updates[0].new_value.as_deref(), Some("Sam Ortiz"));
        assert_eq!(
            updates[0].comment.as_deref(),
            Some("Assigned to Sam Ortiz (sam@city.gov)")
        );

        let pushed = sub.next().await.unwrap();
        assert_eq!(pushed.notification_type, NotificationType::Assignment);
    }

    #[tokio::test]
    async fn test_unassign_and_same_assignee_noop() {
        let f = fixture();
        let id = Some(f.actor.id.clone());
        assign_issue(&f.db, &f.feed, &f.actor, &f.issue.id, id.clone())
            .await
            .unwrap();
        assign_issue(&f.db, &f.feed, &f.actor, &f.issue.id, id)
            .await
            .unwrap();
        assert_eq!(history(&f).len(), 1);

        let cleared = assign_issue(&f.db, &f.feed, &f.actor, &f.issue.id, None)
            .await
            .unwrap();
        assert!(cleared.assigned_to.is_none());
        let updates = history(&f);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].old_value.as_deref(), Some("Previously assigned"));
        assert_eq!(updates[0].comment.as_deref(), Some("Assignment removed"));
    }

    #[tokio::test]
    async fn test_inactive_admin_cannot_be_assigned() {
        let f = fixture();
        f.db.lock_sync()
            .unwrap()
            .set_admin_active(&f.other.id, false)
            .unwrap();
        let err = assign_issue(&f.db, &f.feed, &f.actor, &f.issue.id, Some(f.other.id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidAssignee { .. }));
        assert!(history(&f).is_empty());
    }
}
