//! Admin issue-list filters.
//!
//! `IssueFilters` is the typed filter state. It converts to and from the
//! `/admin/issues?...` query string (`FilterParams`) and compiles to a SQL
//! predicate list (`SqlFilter`) for `PortalDb::query_issues`. Only
//! non-default fields are ever serialized, so a cleared filter is the bare
//! `/admin/issues` location.

use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use super::models::{AdminUser, Category, Priority, Status};
use crate::errors::{PortalError, PortalResult};

pub const ISSUES_PATH: &str = "/admin/issues";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Value used by the filter form for "no restriction".
const ALL: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AssigneeFilter {
    #[default]
    Any,
    Unassigned,
    Admin(String),
}

impl AssigneeFilter {
    fn param(&self) -> Option<String> {
        match self {
            Self::Any => None,
            Self::Unassigned => Some("unassigned".to_string()),
            Self::Admin(id) => Some(id.clone()),
        }
    }
}

/// Query-string form of the filters. Field order is the serialization
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Search,
    Status,
    Category,
    Priority,
    Department,
    AssignedTo,
    DateFrom,
    DateTo,
}

impl FilterField {
    pub const ALL: [FilterField; 8] = [
        Self::Search,
        Self::Status,
        Self::Category,
        Self::Priority,
        Self::Department,
        Self::AssignedTo,
        Self::DateFrom,
        Self::DateTo,
    ];

    /// Query-string key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Status => "status",
            Self::Category => "category",
            Self::Priority => "priority",
            Self::Department => "department",
            Self::AssignedTo => "assignedTo",
            Self::DateFrom => "dateFrom",
            Self::DateTo => "dateTo",
        }
    }
}

/// One removable "active filter" badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterChip {
    pub key: &'static str,
    pub label: String,
}

/// WHERE clauses (joined with AND) and their positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFilter {
    pub clauses: Vec<String>,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilters {
    pub search: String,
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub priority: Option<Priority>,
    pub department: Option<String>,
    pub assigned_to: AssigneeFilter,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl IssueFilters {
    /// Build filters from query parameters. `all` and empty values mean
    /// "no restriction"; anything else must parse.
    pub fn from_params(params: FilterParams) -> PortalResult<Self> {
        Ok(Self {
            search: params
                .search
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            status: selected(params.status)
                .map(|s| s.parse())
                .transpose()?,
            category: selected(params.category)
                .map(|s| s.parse())
                .transpose()?,
            priority: selected(params.priority)
                .map(|s| s.parse())
                .transpose()?,
            department: selected(params.department),
            assigned_to: match selected(params.assigned_to) {
                None => AssigneeFilter::Any,
                Some(v) if v == "unassigned" => AssigneeFilter::Unassigned,
                Some(id) => AssigneeFilter::Admin(id),
            },
            date_from: selected(params.date_from)
                .map(|d| parse_date("dateFrom", &d))
                .transpose()?,
            date_to: selected(params.date_to)
                .map(|d| parse_date("dateTo", &d))
                .transpose()?,
        })
    }

    pub fn parse_query(query: &str) -> PortalResult<Self> {
        let params: FilterParams = serde_urlencoded::from_str(query)
            .map_err(|e| PortalError::Validation(format!("Invalid filter query: {}", e)))?;
        Self::from_params(params)
    }

    pub fn to_params(&self) -> FilterParams {
        FilterParams {
            search: Some(self.search.trim().to_string()).filter(|s| !s.is_empty()),
            status: self.status.map(|s| s.as_str().to_string()),
            category: self.category.map(|c| c.as_str().to_string()),
            priority: self.priority.map(|p| p.as_str().to_string()),
            department: self.department.clone(),
            assigned_to: self.assigned_to.param(),
            date_from: self.date_from.map(|d| d.format(DATE_FORMAT).to_string()),
            date_to: self.date_to.map(|d| d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Encoded query string without the leading `?`; empty when no field
    /// is set.
    pub fn to_query_string(&self) -> String {
        serde_urlencoded::to_string(self.to_params()).unwrap_or_default()
    }

    /// Addressable location of the filtered list.
    pub fn location(&self) -> String {
        let query = self.to_query_string();
        if query.is_empty() {
            ISSUES_PATH.to_string()
        } else {
            format!("{}?{}", ISSUES_PATH, query)
        }
    }

    pub fn is_default(&self) -> bool {
        self.active_count() == 0
    }

    /// Number of fields that differ from their default.
    pub fn active_count(&self) -> usize {
        FilterField::ALL
            .iter()
            .filter(|f| self.display_value(**f).is_some())
            .count()
    }

    /// Badges for every active field. Assignee ids are shown as the
    /// admin's full name when `admins` knows them.
    pub fn chips(&self, admins: &[AdminUser]) -> Vec<FilterChip> {
        FilterField::ALL
            .iter()
            .filter_map(|field| {
                let mut value = self.display_value(*field)?;
                if let (FilterField::AssignedTo, AssigneeFilter::Admin(id)) =
                    (field, &self.assigned_to)
                {
                    if let Some(admin) = admins.iter().find(|a| &a.id == id) {
                        value = admin.full_name.clone();
                    }
                }
                Some(FilterChip {
                    key: field.key(),
                    label: format!("{}: {}", field.key(), value),
                })
            })
            .collect()
    }

    /// Reset one field to its default (removing its chip).
    pub fn clear_field(&mut self, field: FilterField) {
        match field {
            FilterField::Search => self.search.clear(),
            FilterField::Status => self.status = None,
            FilterField::Category => self.category = None,
            FilterField::Priority => self.priority = None,
            FilterField::Department => self.department = None,
            FilterField::AssignedTo => self.assigned_to = AssigneeFilter::Any,
            FilterField::DateFrom => self.date_from = None,
            FilterField::DateTo => self.date_to = None,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    fn display_value(&self, field: FilterField) -> Option<String> {
        let params = self.to_params();
        match field {
            FilterField::Search => params.search,
            FilterField::Status => params.status,
            FilterField::Category => params.category,
            FilterField::Priority => params.priority,
            FilterField::Department => params.department,
            FilterField::AssignedTo => params.assigned_to,
            FilterField::DateFrom => params.date_from,
            FilterField::DateTo => params.date_to,
        }
    }

    /// Compile to predicates over `issues i`.
    pub fn to_sql(&self) -> SqlFilter {
        let mut sql = SqlFilter::default();

        let search = self.search.trim();
        if !search.is_empty() {
            let pattern = format!("%{}%", escape_like(search));
            sql.clauses.push(
                "(i.title LIKE ? ESCAPE '\\' OR i.description LIKE ? ESCAPE '\\')".to_string(),
            );
            sql.params.push(Value::Text(pattern.clone()));
            sql.params.push(Value::Text(pattern));
        }
        if let Some(status) = self.status {
            sql.clauses.push("i.status = ?".to_string());
            sql.params.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(category) = self.category {
            sql.clauses.push("i.category = ?".to_string());
            sql.params.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(priority) = self.priority {
            sql.clauses.push("i.priority = ?".to_string());
            sql.params.push(Value::Text(priority.as_str().to_string()));
        }
        if let Some(department) = &self.department {
            sql.clauses.push("i.assigned_department = ?".to_string());
            sql.params.push(Value::Text(department.clone()));
        }
        match &self.assigned_to {
            AssigneeFilter::Any => {}
            AssigneeFilter::Unassigned => sql.clauses.push("i.assigned_to IS NULL".to_string()),
            AssigneeFilter::Admin(id) => {
                sql.clauses.push("i.assigned_to = ?".to_string());
                sql.params.push(Value::Text(id.clone()));
            }
        }
        if let Some(from) = self.date_from {
            sql.clauses.push("date(i.created_at) >= ?".to_string());
            sql.params
                .push(Value::Text(from.format(DATE_FORMAT).to_string()));
        }
        if let Some(to) = self.date_to {
            sql.clauses.push("date(i.created_at) <= ?".to_string());
            sql.params.push(Value::Text(to.format(DATE_FORMAT).to_string()));
        }
        sql
    }
}

/// `None` for missing, blank and `all` values.
fn selected(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != ALL)
}

fn parse_date(key: &str, value: &str) -> PortalResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| PortalError::Validation(format!("Invalid {}: '{}'", key, value)))
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::db::PortalDb;
    use crate::portal::db::test_support::{admin, issue};
    use crate::portal::db::FieldUpdate;

    fn sample() -> IssueFilters {
        IssueFilters {
            search: "main st".to_string(),
            status: Some(Status::InProgress),
            category: None,
            priority: Some(Priority::Urgent),
            department: Some("Public Works".to_string()),
            assigned_to: AssigneeFilter::Unassigned,
            date_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            date_to: None,
        }
    }

    #[test]
    fn test_default_filters_serialize_to_bare_location() {
        let filters = IssueFilters::default();
        assert_eq!(filters.to_query_string(), "");
        assert_eq!(filters.location(), "/admin/issues");
        assert_eq!(filters.active_count(), 0);
    }

    #[test]
    fn test_serialization_excludes_defaults_in_key_order() {
        let filters = sample();
        assert_eq!(
            filters.location(),
            "/admin/issues?search=main+st&status=in_progress&priority=urgent\
             &department=Public+Works&assignedTo=unassigned&dateFrom=2024-03-01"
        );
        assert_eq!(filters.active_count(), 6);
    }

    #[test]
    fn test_query_round_trip_reproduces_filters() {
        let filters = sample();
        let parsed = IssueFilters::parse_query(&filters.to_query_string()).unwrap();
        assert_eq!(parsed, filters);
    }

    #[test]
    fn test_all_and_blank_values_are_defaults() {
        let parsed =
            IssueFilters::parse_query("status=all&category=&assignedTo=all&search=").unwrap();
        assert!(parsed.is_default());
    }

    #[test]
    fn test_invalid_values_are_validation_errors() {
        for query in ["status=open", "priority=critical", "dateTo=03/01/2024"] {
            match IssueFilters::parse_query(query) {
                Err(PortalError::Validation(_)) => {}
                other => panic!("{query}: expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_chips_use_admin_names_and_clear_one_field() {
        let dana = AdminUser {
            id: "a-1".into(),
            full_name: "Dana Reyes".into(),
            email: "dana@city.gov".into(),
            role: "admin".into(),
            is_active: true,
            department_id: None,
            department_name: None,
        };
        let mut filters = IssueFilters {
            status: Some(Status::Resolved),
            assigned_to: AssigneeFilter::Admin("a-1".into()),
            ..Default::default()
        };
        let chips = filters.chips(std::slice::from_ref(&dana));
        assert_eq!(
            chips.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
            vec!["status: resolved", "assignedTo: Dana Reyes"]
        );

        filters.clear_field(FilterField::Status);
        assert_eq!(filters.active_count(), 1);
        assert_eq!(filters.location(), "/admin/issues?assignedTo=a-1");
        filters.clear();
        assert!(filters.is_default());
    }

    #[test]
    fn test_like_wildcards_are_escaped() {
        let filters = IssueFilters {
            search: "100%_off".into(),
            ..Default::default()
        };
        let sql = filters.to_sql();
        assert_eq!(sql.params[0], Value::Text("%100\\%\\_off%".into()));
    }

    #[test]
    fn test_sql_filter_matches_expected_rows() {
        let db = PortalDb::new_in_memory().unwrap();
        let dana = admin(&db, "Dana Reyes", "dana@city.gov");
        let pothole = issue(&db, Category::Pothole);
        let light = issue(&db, Category::Streetlight);
        db.apply_issue_change(
            &light.id,
            &FieldUpdate {
                assigned_to: Some(Some(dana.id.clone())),
                ..Default::default()
            },
            &[],
        )
        .unwrap();

        let unassigned = IssueFilters {
            assigned_to: AssigneeFilter::Unassigned,
            ..Default::default()
        };
        let rows = db.query_issues(&unassigned.to_sql()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].issue.id, pothole.id);

        let search = IssueFilters {
            search: "STREETLIGHT".into(),
            ..Default::default()
        };
        let rows = db.query_issues(&search.to_sql()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].assignee.as_ref().unwrap().full_name, "Dana Reyes");

        let today = chrono::Utc::now().date_naive();
        let same_day = IssueFilters {
            date_from: Some(today),
            date_to: Some(today),
            ..Default::default()
        };
        assert_eq!(db.query_issues(&same_day.to_sql()).unwrap().len(), 2);
    }
}
