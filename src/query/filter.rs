use chrono::NaiveDateTime;

use crate::date_util::split_date_time;
use crate::lookup::{AssignmentGroup, QueryOperator};

pub const ASSIGNMENT_GROUP: &str = "assignment_group";
pub const SYS_UPDATED_ON: &str = "sys_updated_on";

/// Builder for the remote `sysparm_query` expression selecting incidents of
/// the watched assignment groups updated at or after a watermark.
///
/// In the encoded-query language `^OR` binds tighter than `^`, so
/// `g=A^ORg=B^t>=T` reads as `(g=A OR g=B) AND t>=T`. The group clauses are
/// therefore emitted first and the time clause last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterQuery {
    groups: Vec<AssignmentGroup>,
    updated_since: NaiveDateTime,
}

impl FilterQuery {
    /// A query over every watched group.
    pub fn new(updated_since: NaiveDateTime) -> Self {
        Self {
            groups: AssignmentGroup::ALL.to_vec(),
            updated_since,
        }
    }

    /// Restrict the query to the given groups, in order.
    pub fn groups(mut self, groups: &[AssignmentGroup]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    pub fn build(&self) -> String {
        let mut query = self
            .groups
            .iter()
            .map(|g| format!("{ASSIGNMENT_GROUP}={}", g.remote_id()))
            .collect::<Vec<_>>()
            .join(QueryOperator::Or.token());

        if !query.is_empty() {
            query.push_str(QueryOperator::And.token());
        }
        query.push_str(&self.time_clause());
        query
    }

    fn time_clause(&self) -> String {
        let (date, time) = split_date_time(self.updated_since);
        format!("{SYS_UPDATED_ON}>='{date}','{time}'")
    }
}
