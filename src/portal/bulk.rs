//! Bulk actions over a selected set of issues.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::db::{AuditTemplate, DbHandle, FieldUpdate};
use super::models::*;
use crate::errors::{PortalError, PortalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    MarkInProgress,
    MarkResolved,
    SetHighPriority,
    SetMediumPriority,
    AssignToMe,
}

impl BulkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkInProgress => "mark_in_progress",
            Self::MarkResolved => "mark_resolved",
            Self::SetHighPriority => "set_high_priority",
            Self::SetMediumPriority => "set_medium_priority",
            Self::AssignToMe => "assign_to_me",
        }
    }

    /// Comment stored on every audit record the action writes.
    pub fn comment(&self) -> String {
        format!("Bulk action: {}", self.as_str().replace('_', " "))
    }

    fn update_type(&self) -> UpdateType {
        match self {
            Self::MarkInProgress | Self::MarkResolved => UpdateType::StatusChange,
            Self::SetHighPriority | Self::SetMediumPriority | Self::AssignToMe => {
                UpdateType::Assignment
            }
        }
    }

    /// Column update and the audit `new_value` for `actor`.
    fn plan(&self, actor: &AdminUser) -> (FieldUpdate, String) {
        match self {
            Self::MarkInProgress => (
                FieldUpdate {
                    status: Some(Status::InProgress),
                    ..Default::default()
                },
                Status::InProgress.to_string(),
            ),
            Self::MarkResolved => (
                FieldUpdate {
                    status: Some(Status::Resolved),
                    stamp_resolved: true,
                    ..Default::default()
                },
                Status::Resolved.to_string(),
            ),
            Self::SetHighPriority => (
                FieldUpdate {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
                Priority::High.to_string(),
            ),
            Self::SetMediumPriority => (
                FieldUpdate {
                    priority: Some(Priority::Medium),
                    ..Default::default()
                },
                Priority::Medium.to_string(),
            ),
            Self::AssignToMe => (
                FieldUpdate {
                    assigned_to: Some(Some(actor.id.clone())),
                    ..Default::default()
                },
                actor.full_name.clone(),
            ),
        }
    }
}

/// Issues currently selected in the list. Insertion ordered, no
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    ids: Vec<String>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|s| s == id)
    }

    pub fn select(&mut self, id: &str) {
        if !self.contains(id) {
            self.ids.push(id.to_string());
        }
    }

    pub fn toggle(&mut self, id: &str) {
        if self.contains(id) {
            self.ids.retain(|s| s != id);
        } else {
            self.ids.push(id.to_string());
        }
    }

    /// Select every visible issue, or clear when they are all selected
    /// already.
    pub fn toggle_all(&mut self, visible: &[String]) {
        let all_selected = !visible.is_empty() && visible.iter().all(|id| self.contains(id));
        self.ids.clear();
        if !all_selected {
            for id in visible {
                self.select(id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

impl FromIterator<String> for Selection {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut selection = Selection::new();
        for id in iter {
            selection.select(&id);
        }
        selection
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    pub issue_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkOutcome {
    pub action: BulkAction,
    /// Issues that were updated, each with one audit record.
    pub updated: Vec<String>,
    /// Selected ids with no matching issue.
    pub missing: Vec<String>,
}

/// Apply `action` to every selected issue in one transaction.
pub async fn apply_bulk(
    db: &DbHandle,
    actor: &AdminUser,
    action: BulkAction,
    selection: Selection,
) -> PortalResult<BulkOutcome> {
    if selection.is_empty() {
        return Err(PortalError::Validation(
            "Select at least one issue".to_string(),
        ));
    }

    let (update, new_value) = action.plan(actor);
    let template = AuditTemplate {
        update_type: action.update_type(),
        old_value: None,
        new_value: Some(new_value),
        comment: Some(action.comment()),
        updated_by: actor.id.clone(),
    };

    let ids = selection.ids().to_vec();
    let updated = db
        .call(move |db| db.apply_bulk_update(&ids, &update, &template))
        .await
        .map_err(PortalError::db)?;

    let missing: Vec<String> = selection
        .ids()
        .iter()
        .filter(|id| !updated.contains(id))
        .cloned()
        .collect();

    info!(
        action = action.as_str(),
        actor = %actor.id,
        updated = updated.len(),
        missing = missing.len(),
        "Bulk action applied"
    );

    Ok(BulkOutcome {
        action,
        updated,
        missing,
    })
}
