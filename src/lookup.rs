//! Fixed lookup tables shared with the remote system.
//!
//! Values returned here end up inside encoded queries and persisted rows, so
//! they must not change between releases.

use crate::error::{Error, Result};

/// Incident lifecycle states as encoded in the remote `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentStatus {
    New,
    InProgress,
    OnHold,
    Resolved,
    Closed,
    Canceled,
}

impl IncidentStatus {
    pub const ALL: [IncidentStatus; 6] = [
        IncidentStatus::New,
        IncidentStatus::InProgress,
        IncidentStatus::OnHold,
        IncidentStatus::Resolved,
        IncidentStatus::Closed,
        IncidentStatus::Canceled,
    ];

    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            1 => Ok(IncidentStatus::New),
            2 => Ok(IncidentStatus::InProgress),
            3 => Ok(IncidentStatus::OnHold),
            6 => Ok(IncidentStatus::Resolved),
            7 => Ok(IncidentStatus::Closed),
            8 => Ok(IncidentStatus::Canceled),
            other => Err(Error::UnknownStatusCode(other)),
        }
    }

    pub const fn code(self) -> i64 {
        match self {
            IncidentStatus::New => 1,
            IncidentStatus::InProgress => 2,
            IncidentStatus::OnHold => 3,
            IncidentStatus::Resolved => 6,
            IncidentStatus::Closed => 7,
            IncidentStatus::Canceled => 8,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            IncidentStatus::New => "New",
            IncidentStatus::InProgress => "In Progress",
            IncidentStatus::OnHold => "On Hold",
            IncidentStatus::Resolved => "Resolved",
            IncidentStatus::Closed => "Closed",
            IncidentStatus::Canceled => "Canceled",
        }
    }
}

/// Local status name for a remote state code.
pub fn status_name(code: i64) -> Result<&'static str> {
    IncidentStatus::from_code(code).map(IncidentStatus::name)
}

/// Assignment groups whose incidents are synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentGroup {
    ChatBot,
    Rpa,
}

impl AssignmentGroup {
    pub const ALL: [AssignmentGroup; 2] = [AssignmentGroup::ChatBot, AssignmentGroup::Rpa];

    /// The group's `sys_id` on the remote instance.
    pub const fn remote_id(self) -> &'static str {
        match self {
            AssignmentGroup::ChatBot => "3f1dd0320a0a0b99000a53f7604a2ef9",
            AssignmentGroup::Rpa => "8a4dde73c6112278017a6a4baf547aa7",
        }
    }
}

/// Logical connectives of the encoded-query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOperator {
    And,
    Or,
}

impl QueryOperator {
    pub const fn token(self) -> &'static str {
        match self {
            QueryOperator::And => "^",
            QueryOperator::Or => "^OR",
        }
    }
}
