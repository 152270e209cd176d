use serde::{Deserialize, Serialize};

/// A mentor who votes on applicants and administers tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub id: String,
    /// Capability secret used in place of a session.
    pub access_token: String,
    pub fullname: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

/// What a task keeps about each of its mentors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorSummary {
    pub id: String,
    pub email: String,
    pub fullname: String,
}

impl From<&Contributor> for ContributorSummary {
    fn from(c: &Contributor) -> Self {
        Self {
            id: c.id.clone(),
            email: c.email.clone(),
            fullname: c.fullname.clone(),
        }
    }
}
