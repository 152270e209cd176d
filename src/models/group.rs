use serde::{Deserialize, Serialize};

use super::{clock_started_at, ContributorSummary, EventKind, Link, StatusEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Leader,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: String,
    pub email: String,
    pub fullname: String,
    pub role: MemberRole,
}

/// A set of trainees working together; the first member leads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub members: Vec<GroupMember>,
    pub statuses: Vec<StatusEvent>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Group {
    pub fn leader(&self) -> Option<&GroupMember> {
        self.members
            .iter()
            .find(|member| member.role == MemberRole::Leader)
    }

    pub fn is_member(&self, trainee_id: &str) -> bool {
        self.members.iter().any(|member| member.id == trainee_id)
    }
}

/// Skills the leader awards to one member on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRating {
    pub id: String,
    pub skills: Vec<String>,
}

/// A task assigned to a whole group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTask {
    pub id: String,
    pub group_id: String,
    /// Snapshot of the group taken when the task was created.
    pub group: Group,
    pub title: String,
    pub description: String,
    pub mentors: Vec<ContributorSummary>,
    pub skills: Vec<String>,
    pub references: Vec<Link>,
    pub public_channel: String,
    pub private_channel: String,
    pub expires_after: u32,
    pub statuses: Vec<StatusEvent>,
    pub current_status: EventKind,
    #[serde(default)]
    pub answers: Vec<Link>,
    #[serde(default)]
    pub ratings: Vec<MemberRating>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl GroupTask {
    pub fn expires_after_in_seconds(&self) -> u64 {
        u64::from(self.expires_after) * 3600
    }

    pub fn deadline(&self) -> Option<i64> {
        clock_started_at(&self.statuses)
            .map(|start| start.saturating_add(i64::from(self.expires_after) * 3_600_000))
    }

    pub fn member_emails(&self) -> Vec<String> {
        self.group
            .members
            .iter()
            .map(|member| member.email.clone())
            .collect()
    }
}
