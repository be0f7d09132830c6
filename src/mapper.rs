use serde::Deserialize;
use serde_json::Value;

use crate::date_util::parse_remote_timestamp;
use crate::error::{Error, Result};
use crate::lookup::status_name;
use crate::model::IncidentRecord;
use crate::remote::extract_display_value;

/// Shape of one element of the remote `result` array. Only the fields the
/// local record needs are declared; everything else is ignored.
#[derive(Debug, Deserialize)]
struct RawIncident {
    number: String,
    #[serde(default)]
    assigned_to: Option<Value>,
    #[serde(default)]
    assignment_group: Option<Value>,
    short_description: String,
    priority: String,
    severity: String,
    state: StateCode,
    sys_created_on: String,
    sys_updated_on: String,
}

/// The table API returns `state` as a number or as a numeric string
/// depending on instance settings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateCode {
    Int(i64),
    Text(String),
}

impl StateCode {
    fn code(&self) -> Option<i64> {
        match self {
            StateCode::Int(n) => Some(*n),
            StateCode::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Convert one remote incident object into an `IncidentRecord`.
pub fn map_incident(raw: &Value) -> Result<IncidentRecord> {
    let number_hint = raw
        .get("number")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let malformed = |reason: String| Error::MalformedIncident {
        number: number_hint.clone(),
        reason,
    };

    let incident = RawIncident::deserialize(raw).map_err(|e| malformed(e.to_string()))?;

    if incident.number.is_empty() {
        return Err(malformed("empty `number`".into()));
    }

    let code = incident
        .state
        .code()
        .ok_or_else(|| malformed(format!("non-numeric `state`: {:?}", incident.state)))?;
    let status = status_name(code).map_err(|e| malformed(e.to_string()))?;

    let created_on = parse_remote_timestamp(&incident.sys_created_on).ok_or_else(|| {
        malformed(format!(
            "unparseable `sys_created_on`: {:?}",
            incident.sys_created_on
        ))
    })?;
    let updated_on = parse_remote_timestamp(&incident.sys_updated_on).ok_or_else(|| {
        malformed(format!(
            "unparseable `sys_updated_on`: {:?}",
            incident.sys_updated_on
        ))
    })?;

    Ok(IncidentRecord {
        incident_number: incident.number,
        assigned_to: extract_display_value(incident.assigned_to.as_ref()),
        assignment_group: extract_display_value(incident.assignment_group.as_ref()),
        subject: incident.short_description,
        priority: incident.priority,
        severity: incident.severity,
        status: status.to_string(),
        created_on,
        updated_on,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    const REQUIRED: [&str; 7] = [
        "number",
        "short_description",
        "priority",
        "severity",
        "state",
        "sys_created_on",
        "sys_updated_on",
    ];

    fn sample() -> Value {
        json!({
            "number": "INC001",
            "assigned_to": "",
            "assignment_group": {"value": "rpa_team", "display_value": "RPA Team"},
            "short_description": "disk full",
            "priority": "2",
            "severity": "1",
            "state": 2,
            "sys_created_on": "2024-01-01 10:00:00",
            "sys_updated_on": "2024-01-02 09:00:00"
        })
    }

    fn assert_malformed(raw: &Value) -> String {
        match map_incident(raw) {
            Err(Error::MalformedIncident { reason, .. }) => reason,
            other => panic!("expected MalformedIncident, got {other:?}"),
        }
    }

    #[test]
    fn test_map_sample() {
        let record = map_incident(&sample()).unwrap();
        assert_eq!(record.incident_number, "INC001");
        assert_eq!(record.assigned_to, "");
        assert_eq!(record.assignment_group, "RPA Team");
        assert_eq!(record.subject, "disk full");
        assert_eq!(record.priority, "2");
        assert_eq!(record.severity, "1");
        assert_eq!(record.status, status_name(2).unwrap());
        assert_eq!(
            record.created_on,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
        );
        assert_eq!(
            record.updated_on,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_strings_pass_through_verbatim() {
        let mut raw = sample();
        raw["number"] = json!("INC0010042 ");
        raw["short_description"] = json!("  Bot «Ärger» fails\twith 500\n");
        raw["priority"] = json!("1 - Critical");
        raw["severity"] = json!("3 - Low");
        let record = map_incident(&raw).unwrap();
        assert_eq!(record.incident_number, "INC0010042 ");
        assert_eq!(record.subject, "  Bot «Ärger» fails\twith 500\n");
        assert_eq!(record.priority, "1 - Critical");
        assert_eq!(record.severity, "3 - Low");
    }

    #[test]
    fn test_missing_required_field() {
        for field in REQUIRED {
            let mut raw = sample();
            raw.as_object_mut().unwrap().remove(field);
            let reason = assert_malformed(&raw);
            assert!(reason.contains(field), "reason {reason:?} should name {field}");
        }
    }

    #[test]
    fn test_null_required_field() {
        for field in REQUIRED {
            let mut raw = sample();
            raw[field] = Value::Null;
            assert_malformed(&raw);
        }
    }

    #[test]
    fn test_wrong_type() {
        let mut raw = sample();
        raw["priority"] = json!(2);
        assert_malformed(&raw);

        let mut raw = sample();
        raw["state"] = json!({"value": 2});
        assert_malformed(&raw);
    }

    #[test]
    fn test_not_an_object() {
        assert_malformed(&json!("INC001"));
        assert_malformed(&json!(null));
    }

    #[test]
    fn test_empty_number() {
        let mut raw = sample();
        raw["number"] = json!("");
        assert_malformed(&raw);
    }

    #[test]
    fn test_state_as_numeric_string() {
        let mut raw = sample();
        raw["state"] = json!("7");
        assert_eq!(map_incident(&raw).unwrap().status, "Closed");
    }

    #[test]
    fn test_unknown_state() {
        let mut raw = sample();
        raw["state"] = json!(-1);
        let reason = assert_malformed(&raw);
        assert!(reason.contains("-1"));

        let mut raw = sample();
        raw["state"] = json!("pending");
        assert_malformed(&raw);
    }

    #[test]
    fn test_bad_timestamps() {
        for field in ["sys_created_on", "sys_updated_on"] {
            let mut raw = sample();
            raw[field] = json!("2024-01-02T09:00:00Z");
            let reason = assert_malformed(&raw);
            assert!(reason.contains(field));
        }
    }

    #[test]
    fn test_error_carries_incident_number() {
        let mut raw = sample();
        raw["state"] = json!(99);
        match map_incident(&raw) {
            Err(Error::MalformedIncident { number, .. }) => assert_eq!(number, "INC001"),
            other => panic!("expected MalformedIncident, got {other:?}"),
        }
    }

    #[test]
    fn test_optional_references_absent() {
        let mut raw = sample();
        let obj = raw.as_object_mut().unwrap();
        obj.remove("assigned_to");
        obj.remove("assignment_group");
        let record = map_incident(&raw).unwrap();
        assert_eq!(record.assigned_to, "");
        assert_eq!(record.assignment_group, "");
    }

    #[test]
    fn test_string_encoded_assignee() {
        let mut raw = sample();
        raw["assigned_to"] = json!(r#"{"value":"u1","display_value":"Ada Lovelace"}"#);
        assert_eq!(map_incident(&raw).unwrap().assigned_to, "Ada Lovelace");
    }

    #[test]
    fn test_extra_fields_ignored() {
        let mut raw = sample();
        raw["sys_id"] = json!("abc");
        raw["urgency"] = json!(3);
        assert!(map_incident(&raw).is_ok());
    }
}
