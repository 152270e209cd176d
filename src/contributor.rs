use actix_web::{web, HttpRequest, HttpResponse};
use log::{error, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{WorkflowError, WorkflowResult};
use crate::identity::current_identity;
use crate::models::{now_millis, Contributor, ContributorSummary};
use crate::services::Deps;
use crate::store::{find_as, find_one_as, insert_as, Filter, RecordStore, Table};
use crate::validation::{is_valid_email, present};

const ACCESS_TOKEN_LENGTH: usize = 96;

fn generate_access_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Resolves a capability token to its contributor.
pub async fn contributor_by_token(
    store: &dyn RecordStore,
    access_token: &str,
) -> WorkflowResult<Contributor> {
    if access_token.is_empty() {
        return Err(WorkflowError::Unauthorized);
    }
    let filter = Filter::all().eq("accessToken", access_token);
    find_one_as::<Contributor>(store, Table::Contributors, &filter)
        .await?
        .ok_or(WorkflowError::Unauthorized)
}

/// Maps an identity-provider email to its contributor.
pub async fn contributor_by_email(
    store: &dyn RecordStore,
    email: &str,
) -> WorkflowResult<Contributor> {
    find_one_as::<Contributor>(store, Table::Contributors, &Filter::all().eq("email", email))
        .await?
        .ok_or(WorkflowError::Unauthorized)
}

pub struct ContributorService {
    deps: Deps,
}

impl ContributorService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Registers a contributor. The access token is minted here and never
    /// changes afterwards.
    pub async fn register(
        &self,
        fullname: &str,
        email: &str,
        picture_url: Option<String>,
    ) -> WorkflowResult<Contributor> {
        let store = self.deps.store.as_ref();
        if !is_valid_email(email) {
            return Err(WorkflowError::Format(format!("invalid email {email}")));
        }
        if find_one_as::<Contributor>(store, Table::Contributors, &Filter::all().eq("email", email))
            .await?
            .is_some()
        {
            return Err(WorkflowError::Conflict(format!("contributor {email} already exists")));
        }

        let mut access_token = generate_access_token();
        while store
            .find_one(Table::Contributors, &Filter::all().eq("accessToken", access_token.as_str()))
            .await?
            .is_some()
        {
            access_token = generate_access_token();
        }

        let timestamp = now_millis();
        let contributor = Contributor {
            id: Uuid::new_v4().to_string(),
            access_token,
            fullname: fullname.to_string(),
            email: email.to_string(),
            picture_url,
            created_at: timestamp,
            updated_at: timestamp,
            deleted_at: None,
        };
        insert_as(store, Table::Contributors, &contributor).await?;
        info!("Contributor registered: {}", contributor.id);
        Ok(contributor)
    }

    pub async fn by_email(&self, email: &str) -> WorkflowResult<Contributor> {
        contributor_by_email(self.deps.store.as_ref(), email).await
    }

    pub async fn all(&self) -> WorkflowResult<Vec<Contributor>> {
        Ok(find_as(self.deps.store.as_ref(), Table::Contributors, &Filter::all()).await?)
    }
}

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContributorRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub picture_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorProfile {
    pub id: String,
    pub fullname: String,
    pub email: String,
    pub access_token: String,
    pub picture_url: Option<String>,
}

impl From<Contributor> for ContributorProfile {
    fn from(c: Contributor) -> Self {
        Self {
            id: c.id,
            fullname: c.fullname,
            email: c.email,
            access_token: c.access_token,
            picture_url: c.picture_url,
        }
    }
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// GET /contributors/me
// Maps the caller's identity to their contributor record, token included.
pub async fn get_me(req: HttpRequest, data: web::Data<AppState>) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let mut contributor = data.services.contributors.by_email(&identity.email).await?;
    if contributor.picture_url.is_none() {
        contributor.picture_url = identity.picture_url;
    }
    Ok(HttpResponse::Ok().json(ContributorProfile::from(contributor)))
}

// GET /contributors
// Mentor picker for task creation.
pub async fn list_contributors(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    data.services.contributors.by_email(&identity.email).await?;
    let contributors = data.services.contributors.all().await?;
    let summaries: Vec<ContributorSummary> =
        contributors.iter().map(ContributorSummary::from).collect();
    Ok(HttpResponse::Ok().json(summaries))
}

// POST /contributors
// An existing contributor registers a new one.
pub async fn register_contributor(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<RegisterContributorRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let inviter = data.services.contributors.by_email(&identity.email).await?;

    let (Some(fullname), Some(email)) = (present(&payload.fullname), present(&payload.email)) else {
        return Err(WorkflowError::Validation("fullname and email are required".to_string()));
    };

    match data
        .services
        .contributors
        .register(fullname, email, payload.picture_url.clone())
        .await
    {
        Ok(contributor) => {
            info!("{} registered contributor {}", inviter.id, contributor.id);
            Ok(HttpResponse::Ok().json(ContributorProfile::from(contributor)))
        }
        Err(e) => {
            error!("Error registering contributor: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn registration_mints_a_unique_token() {
        let h = Harness::new();
        let contributors = &h.services.contributors;
        let first = contributors.register("One", "one@program.org", None).await.unwrap();
        let second = contributors.register("Two", "two@program.org", None).await.unwrap();

        assert_eq!(first.access_token.len(), ACCESS_TOKEN_LENGTH);
        assert!(first.access_token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first.access_token, second.access_token);

        let resolved = contributor_by_token(h.store.as_ref(), &second.access_token).await.unwrap();
        assert_eq!(resolved.id, second.id);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let h = Harness::new();
        h.services.contributors.register("One", "one@program.org", None).await.unwrap();
        let err = h
            .services
            .contributors
            .register("Again", "one@program.org", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_or_empty_tokens_are_unauthorized() {
        let h = Harness::new();
        h.seed_contributor("c-1", "c1@program.org").await;
        for token in ["", "not-a-token"] {
            let err = contributor_by_token(h.store.as_ref(), token).await.unwrap_err();
            assert!(matches!(err, WorkflowError::Unauthorized));
        }
    }
}
