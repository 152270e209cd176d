pub mod contributor;
pub mod group;
pub mod task;
pub mod trainee;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use contributor::{Contributor, ContributorSummary};
pub use group::{Group, GroupMember, GroupTask, MemberRating, MemberRole};
pub use task::{IndividualTask, TraineeSummary};
pub use trainee::Trainee;

/// Milliseconds since the unix epoch, the timestamp unit of every record.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Every kind of transition recorded in a status history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Applied,
    VoteAdded,
    VotesCalculated,
    InitiallyAccepted,
    InitiallyRejected,
    Accepted,
    Rejected,
    KickedOut,
    DroppedOut,
    Created,
    Sent,
    Delivered,
    Expired,
    Extended,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::VoteAdded => "voteAdded",
            Self::VotesCalculated => "votesCalculated",
            Self::InitiallyAccepted => "initiallyAccepted",
            Self::InitiallyRejected => "initiallyRejected",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::KickedOut => "kickedOut",
            Self::DroppedOut => "droppedOut",
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Expired => "expired",
            Self::Extended => "extended",
        }
    }

    /// Task states from which no further transition is allowed.
    pub fn is_graded(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contributor's opinion on an applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

impl Rating {
    /// Anything other than `"up"` counts as a down vote.
    pub fn normalize(raw: &str) -> Self {
        if raw == "up" {
            Rating::Up
        } else {
            Rating::Down
        }
    }
}

/// One immutable entry of a status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub event: EventKind,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_votes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down_votes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_votes_percentage: Option<f64>,
}

impl StatusEvent {
    pub fn new(event: EventKind) -> Self {
        Self {
            event,
            created_at: now_millis(),
            created_by: None,
            rating: None,
            up_votes: None,
            down_votes: None,
            up_votes_percentage: None,
        }
    }

    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.created_by = Some(actor_id.into());
        self
    }

    pub fn with_rating(mut self, rating: Rating) -> Self {
        self.rating = Some(rating);
        self
    }
}

/// A titled link, used for task references and delivered answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub title: String,
    pub url: String,
}

pub fn has_event(statuses: &[StatusEvent], kind: EventKind) -> bool {
    statuses.iter().any(|status| status.event == kind)
}

/// When the delivery clock last started: the latest `sent` or `extended` entry.
pub fn clock_started_at(statuses: &[StatusEvent]) -> Option<i64> {
    statuses
        .iter()
        .rev()
        .find(|status| matches!(status.event, EventKind::Sent | EventKind::Extended))
        .map(|status| status.created_at)
}

/// Rebuilds the trainee `currentStatus` from its history. Votes and the tally
/// marker never change it.
pub fn derive_trainee_status(statuses: &[StatusEvent]) -> Option<EventKind> {
    statuses
        .iter()
        .rev()
        .map(|status| status.event)
        .find(|kind| !matches!(kind, EventKind::VoteAdded | EventKind::VotesCalculated))
}

/// Rebuilds a task `currentStatus` from its history; an extension puts the
/// task back into the delivery window.
pub fn derive_task_status(statuses: &[StatusEvent]) -> Option<EventKind> {
    statuses.last().map(|status| match status.event {
        EventKind::Extended => EventKind::Sent,
        other => other,
    })
}
