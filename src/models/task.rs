use serde::{Deserialize, Serialize};

use super::{clock_started_at, ContributorSummary, EventKind, Link, StatusEvent, Trainee};

/// The assignee as embedded in a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraineeSummary {
    pub id: String,
    pub email: String,
    pub fullname: String,
}

impl From<&Trainee> for TraineeSummary {
    fn from(t: &Trainee) -> Self {
        Self {
            id: t.id.clone(),
            email: t.email.clone(),
            fullname: t.fullname.clone(),
        }
    }
}

/// A task assigned to exactly one trainee.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndividualTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub skill: String,
    pub mentors: Vec<ContributorSummary>,
    pub references: Vec<Link>,
    pub assigned_to: TraineeSummary,
    pub channel: String,
    /// Hours the assignee has to deliver once the task is sent.
    pub expires_after: u32,
    pub statuses: Vec<StatusEvent>,
    pub current_status: EventKind,
    #[serde(default)]
    pub answers: Vec<Link>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl IndividualTask {
    pub fn expires_after_in_seconds(&self) -> u64 {
        u64::from(self.expires_after) * 3600
    }

    /// Millisecond timestamp after which a sent task counts as overdue.
    pub fn deadline(&self) -> Option<i64> {
        clock_started_at(&self.statuses)
            .map(|start| start.saturating_add(i64::from(self.expires_after) * 3_600_000))
    }
}
