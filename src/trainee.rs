use std::collections::HashMap;
use std::time::Duration;

use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::contributor::contributor_by_token;
use crate::emails;
use crate::error::{WorkflowError, WorkflowResult};
use crate::identity::current_identity;
use crate::jobs::Job;
use crate::models::{
    has_event, now_millis, Contributor, EventKind, IndividualTask, Rating, StatusEvent, Trainee,
};
use crate::services::Deps;
use crate::store::{find_as, find_one_as, insert_as, Clause, Filter, Table, Update};
use crate::tally::tally;
use crate::validation::{
    is_valid_date, is_valid_email, is_valid_mobile, is_valid_youtube_url, present,
};

/// Conditional writes that lose a race are re-read and retried this often.
const WRITE_ATTEMPTS: usize = 3;

/// A complete, validated application.
#[derive(Debug, Clone)]
pub struct Application {
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
}

impl TryFrom<&ApplyRequest> for Application {
    type Error = WorkflowError;

    fn try_from(req: &ApplyRequest) -> Result<Self, Self::Error> {
        let field = |value: &Option<String>, name: &str| {
            present(value)
                .map(str::to_string)
                .ok_or_else(|| WorkflowError::Validation(format!("{name} is required")))
        };
        let application = Application {
            fullname: field(&req.fullname, "fullname")?,
            gender: field(&req.gender, "gender")?,
            email: field(&req.email, "email")?,
            mobile: field(&req.mobile, "mobile")?,
            university: field(&req.university, "university")?,
            major: field(&req.major, "major")?,
            place: field(&req.place, "place")?,
            expected_graduation_date: field(
                &req.expected_graduation_date,
                "expectedGraduationDate",
            )?,
            youtube_video_url: field(&req.youtube_video_url, "youtubeVideoUrl")?,
            how_did_you_know_about_us: field(
                &req.how_did_you_know_about_us,
                "howDidYouKnowAboutUs",
            )?,
        };

        if !is_valid_email(&application.email) {
            return Err(WorkflowError::Format("email".to_string()));
        }
        if !is_valid_mobile(&application.mobile) {
            return Err(WorkflowError::Format("mobile".to_string()));
        }
        if !is_valid_date(&application.expected_graduation_date) {
            return Err(WorkflowError::Format("expectedGraduationDate".to_string()));
        }
        if !is_valid_youtube_url(&application.youtube_video_url) {
            return Err(WorkflowError::Format("youtubeVideoUrl".to_string()));
        }
        Ok(application)
    }
}

/// Owns the trainee status machine.
pub struct TraineeService {
    deps: Deps,
}

impl TraineeService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    pub async fn get(&self, id: &str) -> WorkflowResult<Trainee> {
        find_one_as::<Trainee>(self.deps.store.as_ref(), Table::Trainees, &Filter::by_id(id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("trainee {id}")))
    }

    /// Maps an identity-provider email to an accepted trainee of this program.
    pub async fn accepted_by_email(&self, email: &str) -> WorkflowResult<Trainee> {
        let filter = Filter::all()
            .eq("program", self.deps.settings.program.as_str())
            .eq("email", email)
            .eq("currentStatus", EventKind::Accepted.as_str());
        find_one_as::<Trainee>(self.deps.store.as_ref(), Table::Trainees, &filter)
            .await?
            .ok_or(WorkflowError::Unauthorized)
    }

    /// Appends events and moves `currentStatus`, provided nobody else appended
    /// to the history since `trainee` was read. Returns false when someone did.
    async fn try_transition(
        &self,
        trainee: &Trainee,
        events: &[StatusEvent],
        current: EventKind,
    ) -> WorkflowResult<bool> {
        let update = Update::new()
            .transition(events, current)?
            .expect_len("statuses", trainee.statuses.len());
        match self
            .deps
            .store
            .update(Table::Trainees, &trainee.id, &update)
            .await
        {
            Ok(applied) => Ok(applied),
            Err(e) => {
                error!("Error updating trainee {}: {}", trainee.id, e);
                Err(e.into())
            }
        }
    }

    async fn transition(
        &self,
        trainee: &Trainee,
        events: &[StatusEvent],
        current: EventKind,
    ) -> WorkflowResult<()> {
        if self.try_transition(trainee, events, current).await? {
            Ok(())
        } else {
            Err(WorkflowError::Conflict(format!(
                "trainee {} changed concurrently",
                trainee.id
            )))
        }
    }

    pub async fn apply(&self, application: Application) -> WorkflowResult<String> {
        let store = self.deps.store.as_ref();
        let program = self.deps.settings.program.as_str();

        let duplicate = Filter::all().eq("program", program).any_of(vec![
            Clause::eq("email", application.email.as_str()),
            Clause::eq("mobile", application.mobile.as_str()),
        ]);
        if store.find_one(Table::Trainees, &duplicate).await?.is_some() {
            return Err(WorkflowError::Conflict(
                "a trainee with this email or mobile already applied".to_string(),
            ));
        }

        let timestamp = now_millis();
        let gender = if application.gender == "male" { "male" } else { "female" };
        let trainee = Trainee {
            id: Uuid::new_v4().to_string(),
            program: program.to_string(),
            fullname: application.fullname,
            gender: gender.to_string(),
            email: application.email,
            mobile: application.mobile,
            university: application.university,
            major: application.major,
            place: application.place,
            expected_graduation_date: application.expected_graduation_date,
            youtube_video_url: application.youtube_video_url,
            how_did_you_know_about_us: application.how_did_you_know_about_us,
            statuses: vec![StatusEvent::new(EventKind::Applied)],
            current_status: EventKind::Applied,
            skills: Vec::new(),
            created_at: timestamp,
            updated_at: timestamp,
            deleted_at: None,
        };
        if let Err(e) = insert_as(store, Table::Trainees, &trainee).await {
            error!("Error adding trainee: {}", e);
            return Err(e.into());
        }
        info!("Trainee applied: {}", trainee.id);

        let job = Job::AfterTraineeApplies {
            id: trainee.id.clone(),
        };
        if let Err(e) = self.deps.jobs.start(job).await {
            warn!("{}", e);
        }
        Ok(trainee.id)
    }

    pub async fn vote(
        &self,
        access_token: &str,
        trainee_id: &str,
        rating: &str,
    ) -> WorkflowResult<()> {
        let contributor = contributor_by_token(self.deps.store.as_ref(), access_token).await?;
        let rating = Rating::normalize(rating);

        for _ in 0..WRITE_ATTEMPTS {
            let trainee = self.get(trainee_id).await?;
            if has_event(&trainee.statuses, EventKind::VotesCalculated) {
                return Err(WorkflowError::Conflict(format!(
                    "votes for {trainee_id} were already calculated"
                )));
            }
            if trainee.has_voted(&contributor.id) {
                return Err(WorkflowError::Conflict(format!(
                    "{} already voted for {trainee_id}",
                    contributor.id
                )));
            }

            let event = StatusEvent::new(EventKind::VoteAdded)
                .by(&contributor.id)
                .with_rating(rating);
            if self
                .try_transition(&trainee, &[event], trainee.current_status)
                .await?
            {
                debug!("{} voted on {}", contributor.id, trainee_id);
                return Ok(());
            }
            debug!("Vote on {} raced another write, retrying", trainee_id);
        }
        Err(WorkflowError::Conflict(format!(
            "trainee {trainee_id} kept changing concurrently"
        )))
    }

    /// Decides an application from its votes. Runs at most once per trainee;
    /// votes landing mid-tally make it re-read and count again.
    pub async fn tally_votes(&self, trainee_id: &str) -> WorkflowResult<String> {
        let contributors: Vec<Contributor> =
            find_as(self.deps.store.as_ref(), Table::Contributors, &Filter::all()).await?;

        for _ in 0..WRITE_ATTEMPTS {
            let trainee = self.get(trainee_id).await?;
            if has_event(&trainee.statuses, EventKind::VotesCalculated) {
                return Err(WorkflowError::Conflict(format!(
                    "votes for {trainee_id} were already calculated"
                )));
            }

            let result = tally(&trainee.statuses, contributors.len());
            let decision = result.decision.event();
            let events = [result.to_event(), StatusEvent::new(decision)];
            if !self.try_transition(&trainee, &events, decision).await? {
                debug!("Tally of {} raced another write, retrying", trainee_id);
                continue;
            }
            info!(
                "Votes calculated for {}: {} up, {} down, {}",
                trainee_id, result.up_votes, result.down_votes, decision
            );

            if let Err(e) = self.deps.notifier.send_one(emails::decision(&trainee, &result)).await {
                error!("Decision email to {} failed: {}", trainee.email, e);
            }
            let job = Job::AfterVotesCalculated {
                id: trainee.id.clone(),
            };
            if let Err(e) = self.deps.jobs.start(job).await {
                warn!("{}", e);
            }
            return Ok(trainee.id);
        }
        Err(WorkflowError::Conflict(format!(
            "trainee {trainee_id} kept changing concurrently"
        )))
    }

    /// Tallies applications whose voting window closed without a tally having
    /// run. Returns the ids that were decided.
    pub async fn tally_overdue(&self, voting_window: Duration) -> WorkflowResult<Vec<String>> {
        let pending: Vec<Trainee> = find_as(
            self.deps.store.as_ref(),
            Table::Trainees,
            &Filter::all()
                .eq("program", self.deps.settings.program.as_str())
                .eq("currentStatus", EventKind::Applied.as_str()),
        )
        .await?;

        let window = i64::try_from(voting_window.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(window);
        let mut decided = Vec::new();
        for trainee in pending.iter().filter(|trainee| trainee.created_at <= cutoff) {
            match self.tally_votes(&trainee.id).await {
                Ok(id) => decided.push(id),
                Err(e) => error!("Could not tally overdue votes for {}: {}", trainee.id, e),
            }
        }
        Ok(decided)
    }

    /// Final acceptance after the initial decision. `accepted_by` is `None`
    /// for internal calls.
    pub async fn accept(&self, trainee_id: &str, accepted_by: Option<&str>) -> WorkflowResult<()> {
        let trainee = self.get(trainee_id).await?;
        if has_event(&trainee.statuses, EventKind::Accepted) {
            return Err(WorkflowError::Conflict(format!("{trainee_id} is already accepted")));
        }
        if !matches!(
            trainee.current_status,
            EventKind::InitiallyAccepted | EventKind::InitiallyRejected
        ) {
            return Err(WorkflowError::InvalidState(format!(
                "{trainee_id} is {} and cannot be accepted",
                trainee.current_status
            )));
        }

        let mut event = StatusEvent::new(EventKind::Accepted);
        event.created_by = accepted_by.map(str::to_string);
        self.transition(&trainee, &[event], EventKind::Accepted).await?;
        info!("Trainee accepted: {}", trainee_id);
        Ok(())
    }

    pub async fn accept_with_token(
        &self,
        access_token: &str,
        trainee_id: &str,
    ) -> WorkflowResult<()> {
        let contributor = contributor_by_token(self.deps.store.as_ref(), access_token).await?;
        self.accept(trainee_id, Some(&contributor.id)).await
    }

    pub async fn kick_out(&self, trainee_id: &str) -> WorkflowResult<()> {
        let trainee = self.get(trainee_id).await?;
        if trainee.current_status == EventKind::KickedOut {
            return Err(WorkflowError::Conflict(format!("{trainee_id} is already kicked out")));
        }
        if trainee.current_status != EventKind::Accepted {
            return Err(WorkflowError::InvalidState(format!(
                "{trainee_id} is {} and cannot be kicked out",
                trainee.current_status
            )));
        }

        self.transition(&trainee, &[StatusEvent::new(EventKind::KickedOut)], EventKind::KickedOut)
            .await?;
        info!("Trainee kicked out: {}", trainee_id);
        if let Err(e) = self.deps.notifier.send_one(emails::kicked_out(&trainee)).await {
            error!("Kick-out email to {} failed: {}", trainee.email, e);
        }
        Ok(())
    }

    pub async fn drop_out(&self, access_token: &str, trainee_id: &str) -> WorkflowResult<()> {
        let contributor = contributor_by_token(self.deps.store.as_ref(), access_token).await?;
        let trainee = self.get(trainee_id).await?;
        if trainee.current_status == EventKind::DroppedOut {
            return Err(WorkflowError::Conflict(format!("{trainee_id} already dropped out")));
        }
        if trainee.current_status != EventKind::Accepted {
            return Err(WorkflowError::InvalidState(format!(
                "{trainee_id} is {} and cannot drop out",
                trainee.current_status
            )));
        }
        let event = StatusEvent::new(EventKind::DroppedOut).by(&contributor.id);
        self.transition(&trainee, &[event], EventKind::DroppedOut).await?;
        info!("Trainee dropped out: {}", trainee_id);
        Ok(())
    }

    /// Kicks out every accepted trainee who let too many tasks expire.
    /// Returns the ids that were kicked out.
    pub async fn inactivity_sweep(&self) -> WorkflowResult<Vec<String>> {
        let store = self.deps.store.as_ref();
        let settings = &self.deps.settings;

        let accepted: Vec<Trainee> = find_as(
            store,
            Table::Trainees,
            &Filter::all()
                .eq("program", settings.program.as_str())
                .eq("currentStatus", EventKind::Accepted.as_str()),
        )
        .await?;
        let expired: Vec<IndividualTask> = find_as(
            store,
            Table::Tasks,
            &Filter::all().eq("currentStatus", EventKind::Expired.as_str()),
        )
        .await?;

        let mut expired_per_trainee: HashMap<&str, usize> = HashMap::new();
        for task in &expired {
            *expired_per_trainee.entry(task.assigned_to.id.as_str()).or_default() += 1;
        }

        let test_domain = format!("@{}", settings.test_email_domain);
        let mut kicked = Vec::new();
        for trainee in accepted {
            let count = expired_per_trainee.get(trainee.id.as_str()).copied().unwrap_or(0);
            if count < settings.kick_out_threshold || trainee.email.ends_with(&test_domain) {
                continue;
            }
            match self.kick_out(&trainee.id).await {
                Ok(()) => kicked.push(trainee.id),
                Err(e) => error!("Could not kick out {}: {}", trainee.id, e),
            }
        }
        Ok(kicked)
    }

    async fn notify_contributors(&self, trainee_id: &str, template: &str) -> WorkflowResult<()> {
        let trainee = self.get(trainee_id).await?;
        let contributors: Vec<Contributor> =
            find_as(self.deps.store.as_ref(), Table::Contributors, &Filter::all()).await?;
        let summary = match template {
            emails::TRAINEE_APPLIED_TEMPLATE => {
                emails::applicant_summary(&trainee, &self.deps.settings.app_url)
            }
            _ => emails::decision_summary(&trainee),
        };
        let to: Vec<String> = contributors.into_iter().map(|c| c.email).collect();
        let data = vec![summary; to.len()];
        self.deps
            .notifier
            .send_bulk(to, template, data)
            .await
            .map_err(|e| WorkflowError::Downstream(e.to_string()))
    }

    pub async fn notify_contributors_of_application(&self, trainee_id: &str) -> WorkflowResult<()> {
        self.notify_contributors(trainee_id, emails::TRAINEE_APPLIED_TEMPLATE).await
    }

    pub async fn notify_contributors_of_decision(&self, trainee_id: &str) -> WorkflowResult<()> {
        self.notify_contributors(trainee_id, emails::VOTES_CALCULATED_TEMPLATE).await
    }
}

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    pub fullname: Option<String>,
    pub gender: Option<String>,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub university: Option<String>,
    pub major: Option<String>,
    pub place: Option<String>,
    pub expected_graduation_date: Option<String>,
    pub youtube_video_url: Option<String>,
    pub how_did_you_know_about_us: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub access_token: Option<String>,
    pub rating: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub access_token: Option<String>,
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// POST /trainees
pub async fn apply(
    data: web::Data<AppState>,
    payload: web::Json<ApplyRequest>,
) -> WorkflowResult<HttpResponse> {
    let application = Application::try_from(&*payload)?;
    data.services.trainees.apply(application).await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /trainees/{trainee_id}/votes
pub async fn vote(
    data: web::Data<AppState>,
    trainee_id: web::Path<String>,
    payload: web::Json<VoteRequest>,
) -> WorkflowResult<HttpResponse> {
    let (Some(token), Some(rating)) = (present(&payload.access_token), present(&payload.rating))
    else {
        return Err(WorkflowError::Validation("accessToken and rating are required".to_string()));
    };
    data.services.trainees.vote(token, &trainee_id, rating).await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /trainees/{trainee_id}/accept
pub async fn accept(
    data: web::Data<AppState>,
    trainee_id: web::Path<String>,
    payload: web::Json<TokenRequest>,
) -> WorkflowResult<HttpResponse> {
    let token = present(&payload.access_token).ok_or(WorkflowError::Unauthorized)?;
    data.services.trainees.accept_with_token(token, &trainee_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /trainees/{trainee_id}/drop-out
pub async fn drop_out(
    data: web::Data<AppState>,
    trainee_id: web::Path<String>,
    payload: web::Json<TokenRequest>,
) -> WorkflowResult<HttpResponse> {
    let token = present(&payload.access_token).ok_or(WorkflowError::Unauthorized)?;
    data.services.trainees.drop_out(token, &trainee_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// GET /trainees/{trainee_id}
// Contributors only.
pub async fn get_trainee(
    req: HttpRequest,
    data: web::Data<AppState>,
    trainee_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    data.services.contributors.by_email(&identity.email).await?;
    let trainee = data.services.trainees.get(&trainee_id).await?;
    Ok(HttpResponse::Ok().json(trainee))
}
