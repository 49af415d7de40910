//! Notification fan-out and the per-admin notification center.
//!
//! Rows are written to the `notifications` table and then published on a
//! [`NotificationFeed`]. Each connected admin holds a
//! [`NotificationSubscription`] that only yields rows addressed to them;
//! dropping the subscription unsubscribes.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::db::DbHandle;
use super::models::*;
use crate::errors::{PortalError, PortalResult};

pub const DEFAULT_RECENT_LIMIT: usize = 20;

/// In-process change channel for inserted notification rows.
#[derive(Clone)]
pub struct NotificationFeed {
    tx: broadcast::Sender<Notification>,
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push an inserted row to every live subscription. Returns silently
    /// when nobody is listening.
    pub fn publish(&self, notification: &Notification) {
        let delivered = self.tx.send(notification.clone()).unwrap_or(0);
        debug!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            receivers = delivered,
            "Published notification"
        );
    }

    pub fn subscribe(&self, recipient_id: &str) -> NotificationSubscription {
        debug!(recipient_id, "Notification subscription opened");
        NotificationSubscription {
            recipient_id: recipient_id.to_string(),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Insert events scoped to one recipient.
pub struct NotificationSubscription {
    recipient_id: String,
    rx: broadcast::Receiver<Notification>,
}

impl NotificationSubscription {
    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    /// Next notification addressed to this recipient, or `None` once the
    /// feed is gone. Lagged receivers skip ahead.
    pub async fn next(&mut self) -> Option<Notification> {
        loop {
            match self.rx.recv().await {
                Ok(n) if n.recipient_id == self.recipient_id => return Some(n),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        recipient_id = %self.recipient_id,
                        skipped, "Notification subscription lagged"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        debug!(recipient_id = %self.recipient_id, "Notification subscription released");
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct CenterSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: u64,
}

/// Live notification list for one admin: the most recent rows plus an
/// unread counter kept in step with local changes.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    recipient_id: String,
    notifications: Vec<Notification>,
    unread_count: u64,
}

impl NotificationCenter {
    /// Load the `limit` most recent notifications and the unread count.
    pub async fn load(db: &DbHandle, recipient_id: &str, limit: usize) -> PortalResult<Self> {
        let rid = recipient_id.to_string();
        let (notifications, unread_count) = db
            .call(move |db| {
                let list = db.list_notifications(&rid, Some(limit))?;
                let unread = db.unread_notification_count(&rid)?;
                Ok((list, unread))
            })
            .await
            .map_err(PortalError::db)?;
        Ok(Self {
            recipient_id: recipient_id.to_string(),
            notifications,
            unread_count,
        })
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn snapshot(&self) -> CenterSnapshot {
        CenterSnapshot {
            notifications: self.notifications.clone(),
            unread_count: self.unread_count,
        }
    }

    /// Apply a pushed insert without re-fetching.
    pub fn on_inserted(&mut self, notification: Notification) {
        if notification.recipient_id != self.recipient_id {
            return;
        }
        if !notification.is_read {
            self.unread_count += 1;
        }
        self.notifications.insert(0, notification);
    }

    /// Mark one notification read. The counter only moves when the row
    /// was actually unread.
    pub async fn mark_read(&mut self, db: &DbHandle, id: &str) -> PortalResult<bool> {
        let changed = mark_read(db, &self.recipient_id, id).await?;
        if let Some(n) = self.notifications.iter_mut().find(|n| n.id == id) {
            n.is_read = true;
        }
        if changed {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Ok(changed)
    }

    /// Mark everything read. No write happens when nothing is unread.
    pub async fn mark_all_read(&mut self, db: &DbHandle) -> PortalResult<usize> {
        if self.unread_count == 0 {
            return Ok(0);
        }
        let count = mark_all_read(db, &self.recipient_id).await?;
        for n in &mut self.notifications {
            n.is_read = true;
        }
        self.unread_count = 0;
        Ok(count)
    }
}

/// Mark one of `recipient_id`'s notifications read. Returns whether the
/// row changed; a row that is missing or addressed to someone else is
/// `NotificationNotFound`.
pub async fn mark_read(db: &DbHandle, recipient_id: &str, id: &str) -> PortalResult<bool> {
    let rid = recipient_id.to_string();
    let nid = id.to_string();
    let outcome = db
        .call(move |db| match db.get_notification(&nid)? {
            Some(n) if n.recipient_id == rid => Ok(Some(db.mark_notification_read(&nid, &rid)?)),
            _ => Ok(None),
        })
        .await
        .map_err(PortalError::db)?;
    outcome.ok_or_else(|| PortalError::NotificationNotFound { id: id.to_string() })
}

pub async fn mark_all_read(db: &DbHandle, recipient_id: &str) -> PortalResult<usize> {
    let rid = recipient_id.to_string();
    db.call(move |db| db.mark_all_notifications_read(&rid))
        .await
        .map_err(PortalError::db)
}

pub async fn load_preferences(
    db: &DbHandle,
    admin_id: &str,
) -> PortalResult<NotificationPreferences> {
    let id = admin_id.to_string();
    db.call(move |db| Ok(db.get_preferences(&id)?.unwrap_or_default()))
        .await
        .map_err(PortalError::db)
}

pub async fn save_preferences(
    db: &DbHandle,
    admin_id: &str,
    prefs: NotificationPreferences,
) -> PortalResult<NotificationPreferences> {
    let id = admin_id.to_string();
    db.call(move |db| db.upsert_preferences(&id, &prefs))
        .await
        .map_err(PortalError::db)
}

// ── Dispatch ──────────────────────────────────────────────────────────

/// Write a notification for `recipient_id` if their preferences allow it,
/// then publish it. Returns the row when one was created.
async fn deliver(
    db: &DbHandle,
    feed: &NotificationFeed,
    new: NewNotification,
    priority: Priority,
) -> PortalResult<Option<Notification>> {
    let inserted = db
        .call(move |db| {
            let prefs = db.get_preferences(&new.recipient_id)?.unwrap_or_default();
            if !prefs.allows(new.notification_type, priority) {
                return Ok(None);
            }
            Ok(Some(db.insert_notification(&new)?))
        })
        .await
        .map_err(PortalError::db)?;
    if let Some(n) = &inserted {
        feed.publish(n);
    }
    Ok(inserted)
}

/// Notify every active admin who wants new-issue alerts. Returns the
/// number of notifications created.
pub async fn notify_issue_submitted(
    db: &DbHandle,
    feed: &NotificationFeed,
    issue: &Issue,
) -> PortalResult<usize> {
    let admins = db
        .call(|db| db.list_admin_users(true))
        .await
        .map_err(PortalError::db)?;

    let mut sent = 0;
    for admin in admins {
        let new = NewNotification {
            recipient_id: admin.id,
            notification_type: NotificationType::IssueSubmitted,
            title: "New issue reported".to_string(),
            message: format!(
                "New {} issue at {}: {}",
                issue.category, issue.location_address, issue.title
            ),
            issue_id: Some(issue.id.clone()),
        };
        if deliver(db, feed, new, issue.priority).await?.is_some() {
            sent += 1;
        }
    }
    info!(issue_id = %issue.id, sent, "Dispatched new-issue notifications");
    Ok(sent)
}

/// Tell the assignee (if it is not the actor) that the status moved.
pub async fn notify_status_change(
    db: &DbHandle,
    feed: &NotificationFeed,
    issue: &Issue,
    old_status: Status,
    actor_id: &str,
) -> PortalResult<Option<Notification>> {
    let recipient = match &issue.assigned_to {
        Some(id) if id != actor_id => id.clone(),
        _ => return Ok(None),
    };
    let new = NewNotification {
        recipient_id: recipient,
        notification_type: NotificationType::StatusUpdate,
        title: "Issue status updated".to_string(),
        message: format!(
            "\"{}\" moved from {} to {}",
            issue.title, old_status, issue.status
        ),
        issue_id: Some(issue.id.clone()),
    };
    deliver(db, feed, new, issue.priority).await
}

/// Tell a newly assigned admin (if it is not the actor) about the issue.
pub async fn notify_assignment(
    db: &DbHandle,
    feed: &NotificationFeed,
    issue: &Issue,
    actor_id: &str,
) -> PortalResult<Option<Notification>> {
    let recipient = match &issue.assigned_to {
        Some(id) if id != actor_id => id.clone(),
        _ => return Ok(None),
    };
    let new = NewNotification {
        recipient_id: recipient,
        notification_type: NotificationType::Assignment,
        title: "Issue assigned to you".to_string(),
        message: format!(
            "You have been assigned \"{}\" at {}",
            issue.title, issue.location_address
        ),
        issue_id: Some(issue.id.clone()),
    };
    deliver(db, feed, new, issue.priority).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::db::test_support::{admin, issue};
    use crate::portal::db::{FieldUpdate, PortalDb};

    fn setup() -> (DbHandle, NotificationFeed, AdminUser, AdminUser) {
        let db = PortalDb::new_in_memory().unwrap();
        let dana = admin(&db, "Dana Reyes", "dana@city.gov");
        let sam = admin(&db, "Sam Ortiz", "sam@city.gov");
        (DbHandle::new(db), NotificationFeed::new(16), dana, sam)
    }

    fn insert_for(db: &DbHandle, recipient: &str, title: &str) -> Notification {
        db.lock_sync()
            .unwrap()
            .insert_notification(&NewNotification {
                recipient_id: recipient.to_string(),
                notification_type: NotificationType::IssueSubmitted,
                title: title.to_string(),
                message: "m".to_string(),
                issue_id: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscription_only_yields_own_notifications() {
        let (db, feed, dana, sam) = setup();
        let mut sub = feed.subscribe(&dana.id);
        feed.publish(&insert_for(&db, &sam.id, "for sam"));
        feed.publish(&insert_for(&db, &dana.id, "for dana"));
        let got = sub.next().await.unwrap();
        assert_eq!(got.title, "for dana");
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_receiver() {
        let (_db, feed, dana, _) = setup();
        let sub = feed.subscribe(&dana.id);
        assert_eq!(feed.subscriber_count(), 1);
        drop(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_center_load_push_and_mark_read() {
        let (db, _feed, dana, _) = setup();
        let first = insert_for(&db, &dana.id, "first");
        let mut center = NotificationCenter::load(&db, &dana.id, DEFAULT_RECENT_LIMIT)
            .await
            .unwrap();
        assert_eq!(center.unread_count(), 1);

        let second = insert_for(&db, &dana.id, "second");
        center.on_inserted(second.clone());
        assert_eq!(center.unread_count(), 2);
        assert_eq!(center.notifications()[0].id, second.id);

        assert!(center.mark_read(&db, &first.id).await.unwrap());
        assert_eq!(center.unread_count(), 1);
        // Already read: counter stays put.
        assert!(!center.mark_read(&db, &first.id).await.unwrap());
        assert_eq!(center.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_all_read_is_idempotent_at_zero() {
        let (db, _feed, dana, _) = setup();
        insert_for(&db, &dana.id, "a");
        insert_for(&db, &dana.id, "b");
        let mut center = NotificationCenter::load(&db, &dana.id, DEFAULT_RECENT_LIMIT)
            .await
            .unwrap();
        assert_eq!(center.mark_all_read(&db).await.unwrap(), 2);
        assert_eq!(center.unread_count(), 0);
        assert_eq!(center.mark_all_read(&db).await.unwrap(), 0);
        assert!(center.notifications().iter().all(|n| n.is_read));
    }

    #[tokio::test]
    async fn test_mark_read_rejects_other_recipients_rows() {
        let (db, _feed, dana, sam) = setup();
        let n = insert_for(&db, &sam.id, "sam only");
        match mark_read(&db, &dana.id, &n.id).await {
            Err(PortalError::NotificationNotFound { id }) => assert_eq!(id, n.id),
            other => panic!("Expected NotificationNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_submission_respects_preferences() {
        let (db, feed, dana, sam) = setup();
        save_preferences(
            &db,
            &sam.id,
            NotificationPreferences {
                high_priority_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let report = issue(&db.lock_sync().unwrap(), Category::Pothole);
        let mut sub = feed.subscribe(&dana.id);
        let sent = notify_issue_submitted(&db, &feed, &report).await.unwrap();
        assert_eq!(sent, 1);
        assert_eq!(sub.next().await.unwrap().issue_id.as_deref(), Some(report.id.as_str()));
        assert_eq!(
            db.lock_sync().unwrap().unread_notification_count(&sam.id).unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_status_change_notifies_assignee_but_not_actor() {
        let (db, feed, dana, sam) = setup();
        let assigned = {
            let guard = db.lock_sync().unwrap();
            let i = issue(&guard, Category::Traffic);
            guard
                .apply_issue_change(
                    &i.id,
                    &FieldUpdate {
                        status: Some(Status::InProgress),
                        assigned_to: Some(Some(sam.id.clone())),
                        ..Default::default()
                    },
                    &[],
                )
                .unwrap()
        };
        let by_dana = notify_status_change(&db, &feed, &assigned, Status::Submitted, &dana.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_dana.recipient_id, sam.id);
        assert_eq!(by_dana.notification_type, NotificationType::StatusUpdate);

        let by_sam = notify_status_change(&db, &feed, &assigned, Status::Submitted, &sam.id)
            .await
            .unwrap();
        assert!(by_sam.is_none());
    }
}
