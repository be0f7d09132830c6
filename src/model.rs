use chrono::NaiveDateTime;
use serde::Serialize;

/// One synchronized incident, keyed by `incident_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidentRecord {
    pub incident_number: String,
    pub assigned_to: String,
    pub assignment_group: String,
    pub subject: String,
    pub priority: String,
    pub severity: String,
    pub status: String,
    pub created_on: NaiveDateTime,
    pub updated_on: NaiveDateTime,
}

/// Response/resolution thresholds for one priority level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseSlaConfig {
    pub id: i64,
    pub priority: String,
    pub response_minutes: i64,
    pub resolution_minutes: i64,
}
