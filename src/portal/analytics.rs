//! Dashboard counters and the six-month report.

use std::collections::BTreeMap;

use chrono::{Months, NaiveDateTime};

use super::db::{DbHandle, IssueGroup};
use super::models::*;
use crate::errors::{PortalError, PortalResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DASHBOARD_RECENT: usize = 10;
pub const REPORT_MONTHS: u32 = 6;

/// Start of the report window: `REPORT_MONTHS` before `now`, in stored
/// timestamp format.
pub fn report_window_start(now: NaiveDateTime) -> String {
    now.checked_sub_months(Months::new(REPORT_MONTHS))
        .unwrap_or(now)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Totals and resolved counts per `YYYY-MM`, oldest month first.
pub fn monthly_stats(timeline: &[(String, Status)]) -> Vec<MonthlyStat> {
    let mut months: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for (created_at, status) in timeline {
        let Some(month) = created_at.get(..7) else {
            continue;
        };
        let entry = months.entry(month).or_default();
        entry.0 += 1;
        if *status == Status::Resolved {
            entry.1 += 1;
        }
    }
    months
        .into_iter()
        .map(|(month, (total, resolved))| MonthlyStat {
            month: month.to_string(),
            total,
            resolved,
        })
        .collect()
}

/// Mean of per-issue resolution times, each rounded up to whole days;
/// the mean is rounded to the nearest day. Unparseable rows are skipped.
pub fn average_resolution_days(pairs: &[(String, String)]) -> i64 {
    let days: Vec<i64> = pairs
        .iter()
        .filter_map(|(created, resolved)| {
            let created = NaiveDateTime::parse_from_str(created, TIMESTAMP_FORMAT).ok()?;
            let resolved = NaiveDateTime::parse_from_str(resolved, TIMESTAMP_FORMAT).ok()?;
            let secs = (resolved - created).num_seconds();
            Some((secs as f64 / 86_400.0).ceil() as i64)
        })
        .collect();
    if days.is_empty() {
        return 0;
    }
    (days.iter().sum::<i64>() as f64 / days.len() as f64).round() as i64
}

/// Whole percent, capped at 100.
pub fn resolution_rate(resolved: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((resolved as f64 / total as f64) * 100.0).round().min(100.0) as u8
}

pub async fn dashboard(db: &DbHandle) -> PortalResult<DashboardStats> {
    db.call(|db| {
        Ok(DashboardStats {
            total_issues: db.count_issues()?,
            status_counts: db.count_issues_by(IssueGroup::Status)?,
            category_counts: db.count_issues_by(IssueGroup::Category)?,
            recent_issues: db.recent_issues(DASHBOARD_RECENT)?,
        })
    })
    .await
    .map_err(PortalError::db)
}

/// Report over issues created since `window_start`. Resolution time and
/// the department breakdown cover every issue.
pub async fn report(db: &DbHandle, window_start: String) -> PortalResult<AnalyticsReport> {
    let (timeline, pairs, department_stats) = db
        .call(move |db| {
            Ok((
                db.issue_timeline_since(&window_start)?,
                db.resolution_pairs()?,
                db.count_issues_by(IssueGroup::Department)?,
            ))
        })
        .await
        .map_err(PortalError::db)?;

    let total_issues = timeline.len() as u64;
    let resolved_issues = pairs.len() as u64;
    Ok(AnalyticsReport {
        monthly_stats: monthly_stats(&timeline),
        avg_resolution_days: average_resolution_days(&pairs),
        department_stats,
        total_issues,
        resolved_issues,
        resolution_rate: resolution_rate(resolved_issues, total_issues),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::db::PortalDb;
    use crate::portal::db::test_support::issue;

    fn ts(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn test_window_start_is_six_months_back() {
        let now = NaiveDateTime::parse_from_str("2024-08-31 12:00:00", TIMESTAMP_FORMAT).unwrap();
        assert_eq!(report_window_start(now), "2024-02-29 12:00:00");
    }

    #[test]
    fn test_monthly_stats_groups_and_sorts() {
        let timeline = vec![
            (ts("2024-03-02 10:00:00"), Status::Resolved),
            (ts("2024-01-15 09:00:00"), Status::Submitted),
            (ts("2024-03-20 08:00:00"), Status::InProgress),
        ];
        assert_eq!(
            monthly_stats(&timeline),
            vec![
                MonthlyStat { month: "2024-01".into(), total: 1, resolved: 0 },
                MonthlyStat { month: "2024-03".into(), total: 2, resolved: 1 },
            ]
        );
    }

    #[test]
    fn test_average_resolution_rounds_up_each_issue() {
        let pairs = vec![
            // 1 hour -> 1 day
            (ts("2024-01-01 00:00:00"), ts("2024-01-01 01:00:00")),
            // 2 days + 1 second -> 3 days
            (ts("2024-01-01 00:00:00"), ts("2024-01-03 00:00:01")),
        ];
        assert_eq!(average_resolution_days(&pairs), 2);
        assert_eq!(average_resolution_days(&[]), 0);
    }

    #[test]
    fn test_resolution_rate() {
        assert_eq!(resolution_rate(0, 0), 0);
        assert_eq!(resolution_rate(1, 3), 33);
        assert_eq!(resolution_rate(2, 3), 67);
        assert_eq!(resolution_rate(5, 3), 100);
    }

    #[tokio::test]
    async fn test_dashboard_and_report_from_store() {
        let db = PortalDb::new_in_memory().unwrap();
        let old = issue(&db, Category::Pothole);
        issue(&db, Category::Pothole);
        issue(&db, Category::Sanitation);
        db.set_issue_created_at(&old.id, "2000-01-01 00:00:00").unwrap();
        let handle = DbHandle::new(db);

        let stats = dashboard(&handle).await.unwrap();
        assert_eq!(stats.total_issues, 3);
        assert_eq!(stats.status_counts, vec![CountEntry { key: "submitted".into(), count: 3 }]);
        assert_eq!(stats.category_counts[0], CountEntry { key: "pothole".into(), count: 2 });
        assert_eq!(stats.recent_issues.len(), 3);

        let start = report_window_start(chrono::Utc::now().naive_utc());
        let report = report(&handle, start).await.unwrap();
        assert_eq!(report.total_issues, 2);
        assert_eq!(report.resolved_issues, 0);
        assert_eq!(report.resolution_rate, 0);
        assert_eq!(report.department_stats[0].key, "Public Works");
        assert_eq!(report.monthly_stats.len(), 1);
    }
}
