use serde::{Deserialize, Serialize};

use super::{EventKind, StatusEvent};

/// An applicant, tracked from application to the end of the program.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trainee {
    pub id: String,
    pub program: String,
    pub fullname: String,
    pub gender: String,
    pub email: String,
    pub mobile: String,
    pub university: String,
    pub major: String,
    pub place: String,
    pub expected_graduation_date: String,
    pub youtube_video_url: String,
    pub how_did_you_know_about_us: String,
    pub statuses: Vec<StatusEvent>,
    pub current_status: EventKind,
    #[serde(default)]
    pub skills: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Trainee {
    pub fn has_voted(&self, contributor_id: &str) -> bool {
        self.statuses.iter().any(|status| {
            status.event == EventKind::VoteAdded
                && status.created_by.as_deref() == Some(contributor_id)
        })
    }
}
