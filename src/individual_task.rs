use actix_web::{web, HttpRequest, HttpResponse};
use futures::future::join_all;
use log::{error, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::emails;
use crate::error::{WorkflowError, WorkflowResult};
use crate::identity::current_identity;
use crate::jobs::Job;
use crate::models::{
    now_millis, Contributor, ContributorSummary, EventKind, IndividualTask, Link, StatusEvent,
    Trainee,
};
use crate::services::Deps;
use crate::store::{find_as, find_one_as, insert_as, Filter, StoreError, Table, Update};
use crate::validation::{parse_references, present};

/// Fields shared by every task a single `create` call fans out.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub mentor_emails: Vec<String>,
    pub skill: String,
    pub references: Vec<Link>,
    pub channel: String,
    pub expires_after: u32,
}

/// Resolves mentor emails to contributor summaries, keeping the given order.
pub(crate) async fn resolve_mentors(
    deps: &Deps,
    emails: &[String],
) -> WorkflowResult<Vec<ContributorSummary>> {
    let found: Vec<Contributor> = find_as(
        deps.store.as_ref(),
        Table::Contributors,
        &Filter::all().is_in("email", emails.iter().map(String::as_str)),
    )
    .await?;
    let mentors: Vec<ContributorSummary> = emails
        .iter()
        .filter_map(|email| found.iter().find(|c| &c.email == email))
        .map(ContributorSummary::from)
        .collect();
    if mentors.is_empty() {
        return Err(WorkflowError::NoMentorsFound);
    }
    Ok(mentors)
}

pub struct IndividualTaskService {
    deps: Deps,
}

impl IndividualTaskService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    pub async fn get(&self, id: &str) -> WorkflowResult<IndividualTask> {
        find_one_as::<IndividualTask>(self.deps.store.as_ref(), Table::Tasks, &Filter::by_id(id))
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(id.to_string()))
    }

    pub async fn expires_after_in_seconds(&self, id: &str) -> WorkflowResult<u64> {
        Ok(self.get(id).await?.expires_after_in_seconds())
    }

    async fn commit(&self, task: &IndividualTask, update: Update) -> WorkflowResult<()> {
        let update = update.expect_len("statuses", task.statuses.len());
        match self.deps.store.update(Table::Tasks, &task.id, &update).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(WorkflowError::Conflict(format!(
                "task {} changed concurrently",
                task.id
            ))),
            Err(e) => {
                error!("Error updating task {}: {}", task.id, e);
                Err(e.into())
            }
        }
    }

    /// Creates one task per accepted trainee. Tasks that were stored stay
    /// stored even when others fail.
    pub async fn create(&self, created_by: &str, draft: TaskDraft) -> WorkflowResult<Vec<String>> {
        let mentors = resolve_mentors(&self.deps, &draft.mentor_emails).await?;
        let candidates: Vec<Trainee> = find_as(
            self.deps.store.as_ref(),
            Table::Trainees,
            &Filter::all()
                .eq("program", self.deps.settings.program.as_str())
                .eq("currentStatus", EventKind::Accepted.as_str()),
        )
        .await?;
        if candidates.is_empty() {
            return Err(WorkflowError::Validation("there are no accepted trainees".to_string()));
        }

        let timestamp = now_millis();
        let tasks: Vec<IndividualTask> = candidates
            .iter()
            .map(|trainee| IndividualTask {
                id: Uuid::new_v4().to_string(),
                title: draft.title.clone(),
                description: draft.description.clone(),
                skill: draft.skill.clone(),
                mentors: mentors.clone(),
                references: draft.references.clone(),
                assigned_to: trainee.into(),
                channel: draft.channel.clone(),
                expires_after: draft.expires_after,
                statuses: vec![StatusEvent::new(EventKind::Created).by(created_by)],
                current_status: EventKind::Created,
                answers: Vec::new(),
                created_by: created_by.to_string(),
                created_at: timestamp,
                updated_at: timestamp,
                deleted_at: None,
            })
            .collect();

        let store = self.deps.store.as_ref();
        let jobs = self.deps.jobs.as_ref();
        let results = join_all(tasks.iter().map(|task| async move {
            insert_as(store, Table::Tasks, task).await?;
            if let Err(e) = jobs.start(Job::AfterTaskCreated { id: task.id.clone() }).await {
                warn!("{}", e);
            }
            Ok::<_, StoreError>(task.id.clone())
        }))
        .await;

        let mut created = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(id) => created.push(id),
                Err(e) => failures.push(e.to_string()),
            }
        }
        if !failures.is_empty() {
            error!(
                "Created {} of {} tasks: {}",
                created.len(),
                tasks.len(),
                failures.join("; ")
            );
            return Err(WorkflowError::Persistence(format!(
                "{} of {} tasks could not be created",
                failures.len(),
                tasks.len()
            )));
        }
        info!("Created {} tasks \"{}\"", created.len(), draft.title);
        Ok(created)
    }

    /// Hands a created task to its assignee. Returns the delivery window in
    /// seconds.
    pub async fn send(&self, id: &str) -> WorkflowResult<u64> {
        let task = self.get(id).await?;
        if task.current_status != EventKind::Created {
            return Err(WorkflowError::InvalidState(format!(
                "task {id} is {} and cannot be sent",
                task.current_status
            )));
        }

        let sent = StatusEvent::new(EventKind::Sent);
        if let Err(e) = self
            .deps
            .notifier
            .send_one(emails::task_sent(&task, sent.created_at))
            .await
        {
            error!("Task email to {} failed: {}", task.assigned_to.email, e);
        }
        self.commit(&task, Update::new().transition(&[sent], EventKind::Sent)?)
            .await?;
        info!("Task sent: {}", id);
        Ok(task.expires_after_in_seconds())
    }

    pub async fn expire(&self, id: &str) -> WorkflowResult<()> {
        let task = self.get(id).await?;
        if task.current_status != EventKind::Sent {
            return Err(WorkflowError::TaskHasNotExpired(id.to_string()));
        }

        if let Err(e) = self.deps.notifier.send_one(emails::task_expired(&task)).await {
            error!("Expiry email to {} failed: {}", task.assigned_to.email, e);
        }
        let expired = StatusEvent::new(EventKind::Expired);
        let update = Update::new().transition(&[expired], EventKind::Expired)?;
        self.commit(&task, update).await?;
        info!("Task expired: {}", id);
        Ok(())
    }

    /// Expires sent tasks whose deadline passed without an expiry check
    /// having run. Returns the ids that were expired.
    pub async fn expire_overdue(&self) -> WorkflowResult<Vec<String>> {
        let sent: Vec<IndividualTask> = find_as(
            self.deps.store.as_ref(),
            Table::Tasks,
            &Filter::all().eq("currentStatus", EventKind::Sent.as_str()),
        )
        .await?;

        let now = now_millis();
        let mut expired = Vec::new();
        for task in sent.iter().filter(|task| task.deadline().is_some_and(|at| at <= now)) {
            match self.expire(&task.id).await {
                Ok(()) => expired.push(task.id.clone()),
                Err(e) => error!("Could not expire overdue task {}: {}", task.id, e),
            }
        }
        Ok(expired)
    }

    pub async fn deliver(
        &self,
        task_id: &str,
        requester_id: &str,
        answers_text: &str,
    ) -> WorkflowResult<()> {
        let answers = parse_references(answers_text);
        if task_id.is_empty() || requester_id.is_empty() || answers.is_empty() {
            return Err(WorkflowError::Validation(
                "taskId, requester and at least one answer are required".to_string(),
            ));
        }

        let mut task = self.get(task_id).await?;
        match task.current_status {
            EventKind::Delivered | EventKind::Accepted | EventKind::Rejected => {
                return Err(WorkflowError::Conflict(format!(
                    "task {task_id} was already delivered"
                )));
            }
            _ if task.assigned_to.id != requester_id => {
                return Err(WorkflowError::Forbidden(format!("task {task_id} is not yours")));
            }
            EventKind::Expired => return Err(WorkflowError::Expired),
            EventKind::Sent => {}
            other => {
                return Err(WorkflowError::InvalidState(format!(
                    "task {task_id} is {other} and cannot be delivered"
                )));
            }
        }

        let delivered = StatusEvent::new(EventKind::Delivered).by(requester_id);
        let update = Update::new()
            .set("answers", serde_json::to_value(&answers).map_err(StoreError::from)?)
            .transition(&[delivered], EventKind::Delivered)?;
        self.commit(&task, update).await?;
        info!("Task delivered: {}", task_id);
        task.answers = answers;

        let app_url = self.deps.settings.app_url.as_str();
        let notifier = self.deps.notifier.as_ref();
        let results = join_all(task.mentors.iter().map(|mentor| {
            notifier.send_one(emails::task_delivered(&task, &mentor.email, app_url))
        }))
        .await;
        let failed: Vec<String> = results
            .into_iter()
            .filter_map(Result::err)
            .map(|e| e.to_string())
            .collect();
        if !failed.is_empty() {
            error!("Delivery emails for {} failed: {}", task_id, failed.join("; "));
            return Err(WorkflowError::Downstream(format!(
                "{} mentor notifications failed",
                failed.len()
            )));
        }
        Ok(())
    }

    pub async fn correct(&self, task_id: &str, actor_id: &str, accept: bool) -> WorkflowResult<()> {
        let store = self.deps.store.as_ref();
        let task = find_one_as::<IndividualTask>(store, Table::Tasks, &Filter::by_id(task_id))
            .await?
            .ok_or_else(|| WorkflowError::Validation(format!("task {task_id} does not exist")))?;
        if task.current_status.is_graded() {
            return Err(WorkflowError::Conflict(format!("task {task_id} was already corrected")));
        }
        if task.current_status == EventKind::Expired {
            return Err(WorkflowError::Expired);
        }
        if task.current_status != EventKind::Delivered {
            return Err(WorkflowError::InvalidState(format!(
                "task {task_id} is {} and cannot be corrected",
                task.current_status
            )));
        }

        let verdict = if accept { EventKind::Accepted } else { EventKind::Rejected };
        let update = Update::new().transition(&[StatusEvent::new(verdict).by(actor_id)], verdict)?;
        self.commit(&task, update).await?;
        info!("Task {} corrected: {}", task_id, verdict);

        if let Err(e) = self
            .deps
            .notifier
            .send_one(emails::task_corrected(&task, accept))
            .await
        {
            error!("Correction email to {} failed: {}", task.assigned_to.email, e);
        }

        if accept {
            let skills = Update::new().add_to_set("skills", [task.skill.as_str()]);
            match store.update(Table::Trainees, &task.assigned_to.id, &skills).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(WorkflowError::Downstream(format!(
                        "trainee {} no longer exists",
                        task.assigned_to.id
                    )));
                }
                Err(e) => {
                    error!("Error adding skill to {}: {}", task.assigned_to.id, e);
                    return Err(WorkflowError::Downstream(e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Reopens an expired task for another full window.
    pub async fn extend(&self, task_id: &str, actor_id: &str) -> WorkflowResult<()> {
        let task = self.get(task_id).await?;
        if task.current_status != EventKind::Expired {
            return Err(WorkflowError::Conflict(format!("task {task_id} has not expired")));
        }

        let extended = StatusEvent::new(EventKind::Extended).by(actor_id);
        let extended_at = extended.created_at;
        self.commit(&task, Update::new().transition(&[extended], EventKind::Sent)?)
            .await?;
        info!("Task extended: {}", task_id);

        if let Err(e) = self
            .deps
            .notifier
            .send_one(emails::task_extended(&task, extended_at))
            .await
        {
            error!("Extension email to {} failed: {}", task.assigned_to.email, e);
        }
        let job = Job::AfterTaskExtended {
            id: task_id.to_string(),
        };
        if let Err(e) = self.deps.jobs.start(job).await {
            warn!("{}", e);
        }
        Ok(())
    }
}

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub mentors: Vec<String>,
    pub skill: Option<String>,
    #[serde(default)]
    pub references: String,
    pub channel: Option<String>,
    pub expires_after: Option<u32>,
}

impl TryFrom<&CreateTaskRequest> for TaskDraft {
    type Error = WorkflowError;

    fn try_from(req: &CreateTaskRequest) -> Result<Self, Self::Error> {
        let (Some(title), Some(description), Some(skill), Some(channel)) = (
            present(&req.title),
            present(&req.description),
            present(&req.skill),
            present(&req.channel),
        ) else {
            return Err(WorkflowError::Validation(
                "title, description, skill and channel are required".to_string(),
            ));
        };
        let expires_after = req
            .expires_after
            .filter(|hours| *hours > 0)
            .ok_or_else(|| WorkflowError::Validation("expiresAfter must be positive".to_string()))?;
        Ok(TaskDraft {
            title: title.to_string(),
            description: description.to_string(),
            mentor_emails: req.mentors.clone(),
            skill: skill.to_string(),
            references: parse_references(&req.references),
            channel: channel.to_string(),
            expires_after,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliverRequest {
    #[serde(default)]
    pub answers: String,
}

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub action: Option<String>,
}

/// `accept` or `reject`; anything else is a bad request.
pub(crate) fn parse_action(action: &Option<String>) -> WorkflowResult<bool> {
    match present(action) {
        Some("accept") => Ok(true),
        Some("reject") => Ok(false),
        _ => Err(WorkflowError::Validation("action must be accept or reject".to_string())),
    }
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// POST /tasks
pub async fn create_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let creator = data.services.contributors.by_email(&identity.email).await?;
    let draft = TaskDraft::try_from(&*payload)?;
    let ids = data.services.tasks.create(&creator.id, draft).await?;
    Ok(HttpResponse::Ok().json(ids))
}

// GET /tasks/{task_id}
// Contributors see every task; trainees only their own.
pub async fn get_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let task = data.services.tasks.get(&task_id).await?;
    if data.services.contributors.by_email(&identity.email).await.is_err() {
        let trainee = data.services.trainees.accepted_by_email(&identity.email).await?;
        if trainee.id != task.assigned_to.id {
            return Err(WorkflowError::Forbidden(format!("task {} is not yours", task.id)));
        }
    }
    Ok(HttpResponse::Ok().json(task))
}

// POST /tasks/{task_id}/deliver
pub async fn deliver_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<DeliverRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let trainee = data.services.trainees.accepted_by_email(&identity.email).await?;
    data.services
        .tasks
        .deliver(&task_id, &trainee.id, &payload.answers)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /tasks/{task_id}/correct
pub async fn correct_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<CorrectRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let mentor = data.services.contributors.by_email(&identity.email).await?;
    let accept = parse_action(&payload.action)?;
    data.services.tasks.correct(&task_id, &mentor.id, accept).await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /tasks/{task_id}/extend
pub async fn extend_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let mentor = data.services.contributors.by_email(&identity.email).await?;
    data.services.tasks.extend(&task_id, &mentor.id).await?;
    Ok(HttpResponse::NoContent().finish())
}
