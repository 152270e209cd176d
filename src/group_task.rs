use std::collections::HashSet;

use actix_web::{web, HttpRequest, HttpResponse};
use futures::future::join_all;
use log::{error, info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::emails;
use crate::error::{WorkflowError, WorkflowResult};
use crate::identity::current_identity;
use crate::individual_task::{parse_action, resolve_mentors};
use crate::jobs::Job;
use crate::models::{
    now_millis, EventKind, Group, GroupMember, GroupTask, Link, MemberRating, MemberRole,
    StatusEvent, Trainee,
};
use crate::notifier::Email;
use crate::services::{Deps, Services};
use crate::store::{find_as, find_one_as, insert_as, Filter, StoreError, Table, Update};
use crate::validation::{parse_references, present};

#[derive(Debug, Clone)]
pub struct GroupTaskDraft {
    pub title: String,
    pub description: String,
    pub mentor_emails: Vec<String>,
    pub skills: Vec<String>,
    pub references: Vec<Link>,
    pub public_channel: String,
    pub private_channel: String,
    pub expires_after: u32,
}

/// Ratings must be non-empty and may only name members of the group.
fn check_ratings(group: &Group, ratings: &[MemberRating]) -> WorkflowResult<()> {
    if ratings.is_empty() {
        return Err(WorkflowError::InvalidRatings("no ratings given".to_string()));
    }
    match ratings.iter().find(|rating| !group.is_member(&rating.id)) {
        Some(stranger) => Err(WorkflowError::InvalidRatings(format!(
            "{} is not a member of {}",
            stranger.id, group.name
        ))),
        None => Ok(()),
    }
}

pub struct GroupTaskService {
    deps: Deps,
}

impl GroupTaskService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    pub async fn get(&self, id: &str) -> WorkflowResult<GroupTask> {
        find_one_as::<GroupTask>(self.deps.store.as_ref(), Table::GroupTasks, &Filter::by_id(id))
            .await?
            .ok_or_else(|| WorkflowError::TaskNotFound(id.to_string()))
    }

    pub async fn expires_after_in_seconds(&self, id: &str) -> WorkflowResult<u64> {
        Ok(self.get(id).await?.expires_after_in_seconds())
    }

    async fn commit(&self, task: &GroupTask, update: Update) -> WorkflowResult<()> {
        let update = update.expect_len("statuses", task.statuses.len());
        match self.deps.store.update(Table::GroupTasks, &task.id, &update).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(WorkflowError::Conflict(format!(
                "group task {} changed concurrently",
                task.id
            ))),
            Err(e) => {
                error!("Error updating group task {}: {}", task.id, e);
                Err(e.into())
            }
        }
    }

    /// Emails every member of the task's group. Failures are only logged.
    async fn email_members<F>(&self, task: &GroupTask, build: F)
    where
        F: Fn(&str) -> Email,
    {
        let notifier = self.deps.notifier.as_ref();
        let results = join_all(
            task.member_emails()
                .iter()
                .map(|to| notifier.send_one(build(to.as_str()))),
        )
        .await;
        for e in results.into_iter().filter_map(Result::err) {
            error!("Group task {} email failed: {}", task.id, e);
        }
    }

    /// Creates one task per existing group.
    pub async fn create(
        &self,
        created_by: &str,
        draft: GroupTaskDraft,
    ) -> WorkflowResult<Vec<String>> {
        let mentors = resolve_mentors(&self.deps, &draft.mentor_emails).await?;
        let groups: Vec<Group> =
            find_as(self.deps.store.as_ref(), Table::Groups, &Filter::all()).await?;
        if groups.is_empty() {
            return Err(WorkflowError::Validation("there are no groups".to_string()));
        }

        let timestamp = now_millis();
        let tasks: Vec<GroupTask> = groups
            .into_iter()
            .map(|group| GroupTask {
                id: Uuid::new_v4().to_string(),
                group_id: group.id.clone(),
                group,
                title: draft.title.clone(),
                description: draft.description.clone(),
                mentors: mentors.clone(),
                skills: draft.skills.clone(),
                references: draft.references.clone(),
                public_channel: draft.public_channel.clone(),
                private_channel: draft.private_channel.clone(),
                expires_after: draft.expires_after,
                statuses: vec![StatusEvent::new(EventKind::Created).by(created_by)],
                current_status: EventKind::Created,
                answers: Vec::new(),
                ratings: Vec::new(),
                created_by: created_by.to_string(),
                created_at: timestamp,
                updated_at: timestamp,
                deleted_at: None,
            })
            .collect();

        let store = self.deps.store.as_ref();
        let jobs = self.deps.jobs.as_ref();
        let results = join_all(tasks.iter().map(|task| async move {
            insert_as(store, Table::GroupTasks, task).await?;
            if let Err(e) = jobs.start(Job::AfterGroupTaskCreated { id: task.id.clone() }).await {
                warn!("{}", e);
            }
            Ok::<_, StoreError>(task.id.clone())
        }))
        .await;

        let (created, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
        if !failures.is_empty() {
            for e in failures.into_iter().filter_map(Result::err) {
                error!("Error adding group task: {}", e);
            }
            return Err(WorkflowError::Persistence(format!(
                "only {} of {} group tasks were created",
                created.len(),
                tasks.len()
            )));
        }
        let ids: Vec<String> = created.into_iter().filter_map(Result::ok).collect();
        info!("Created {} group tasks \"{}\"", ids.len(), draft.title);
        Ok(ids)
    }

    pub async fn send(&self, id: &str) -> WorkflowResult<u64> {
        let task = self.get(id).await?;
        if task.current_status != EventKind::Created {
            return Err(WorkflowError::InvalidState(format!(
                "group task {id} is {} and cannot be sent",
                task.current_status
            )));
        }

        let sent = StatusEvent::new(EventKind::Sent);
        let sent_at = sent.created_at;
        self.email_members(&task, |to| emails::group_task_sent(&task, to, sent_at))
            .await;
        self.commit(&task, Update::new().transition(&[sent], EventKind::Sent)?)
            .await?;
        info!("Group task sent: {}", id);
        Ok(task.expires_after_in_seconds())
    }

    pub async fn expire(&self, id: &str) -> WorkflowResult<()> {
        let task = self.get(id).await?;
        if task.current_status != EventKind::Sent {
            return Err(WorkflowError::TaskHasNotExpired(id.to_string()));
        }

        self.email_members(&task, |to| emails::group_task_expired(&task, to))
            .await;
        let expired = StatusEvent::new(EventKind::Expired);
        let update = Update::new().transition(&[expired], EventKind::Expired)?;
        self.commit(&task, update).await?;
        info!("Group task expired: {}", id);
        Ok(())
    }

    pub async fn expire_overdue(&self) -> WorkflowResult<Vec<String>> {
        let sent: Vec<GroupTask> = find_as(
            self.deps.store.as_ref(),
            Table::GroupTasks,
            &Filter::all().eq("currentStatus", EventKind::Sent.as_str()),
        )
        .await?;

        let now = now_millis();
        let mut expired = Vec::new();
        for task in sent.iter().filter(|task| task.deadline().is_some_and(|at| at <= now)) {
            match self.expire(&task.id).await {
                Ok(()) => expired.push(task.id.clone()),
                Err(e) => error!("Could not expire overdue group task {}: {}", task.id, e),
            }
        }
        Ok(expired)
    }

    /// Only the group leader delivers, rating each member's skills.
    pub async fn deliver(
        &self,
        task_id: &str,
        requester_id: &str,
        answers_text: &str,
        ratings: Vec<MemberRating>,
    ) -> WorkflowResult<()> {
        let answers = parse_references(answers_text);
        if task_id.is_empty() || requester_id.is_empty() || answers.is_empty() {
            return Err(WorkflowError::Validation(
                "taskId, requester and at least one answer are required".to_string(),
            ));
        }

        let mut task = self.get(task_id).await?;
        if matches!(
            task.current_status,
            EventKind::Delivered | EventKind::Accepted | EventKind::Rejected
        ) {
            return Err(WorkflowError::Conflict(format!(
                "group task {task_id} was already delivered"
            )));
        }
        if task.group.leader().map(|leader| leader.id.as_str()) != Some(requester_id) {
            return Err(WorkflowError::Forbidden(format!(
                "only the leader of {} can deliver",
                task.group.name
            )));
        }
        if task.current_status == EventKind::Expired {
            return Err(WorkflowError::Expired);
        }
        if task.current_status != EventKind::Sent {
            return Err(WorkflowError::InvalidState(format!(
                "group task {task_id} is {} and cannot be delivered",
                task.current_status
            )));
        }
        check_ratings(&task.group, &ratings)?;

        let delivered = StatusEvent::new(EventKind::Delivered).by(requester_id);
        let update = Update::new()
            .set("answers", serde_json::to_value(&answers).map_err(StoreError::from)?)
            .set("ratings", serde_json::to_value(&ratings).map_err(StoreError::from)?)
            .transition(&[delivered], EventKind::Delivered)?;
        self.commit(&task, update).await?;
        info!("Group task delivered: {}", task_id);
        task.answers = answers;
        task.ratings = ratings;

        let app_url = self.deps.settings.app_url.as_str();
        let notifier = self.deps.notifier.as_ref();
        let results = join_all(task.mentors.iter().map(|mentor| {
            notifier.send_one(emails::group_task_delivered(&task, &mentor.email, app_url))
        }))
        .await;
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            for e in results.into_iter().filter_map(Result::err) {
                error!("Delivery email for {} failed: {}", task_id, e);
            }
            return Err(WorkflowError::Downstream(format!("{failed} mentor notifications failed")));
        }
        Ok(())
    }

    /// Grades a delivery. On accept, each rated member gains the skills
    /// they were rated for; without `ratings` the delivered ones apply.
    pub async fn correct(
        &self,
        task_id: &str,
        actor_id: &str,
        accept: bool,
        ratings: Option<Vec<MemberRating>>,
    ) -> WorkflowResult<()> {
        let store = self.deps.store.as_ref();
        let task = find_one_as::<GroupTask>(store, Table::GroupTasks, &Filter::by_id(task_id))
            .await?
            .ok_or_else(|| {
                WorkflowError::Validation(format!("group task {task_id} does not exist"))
            })?;
        if task.current_status.is_graded() {
            return Err(WorkflowError::Conflict(format!(
                "group task {task_id} was already corrected"
            )));
        }
        if task.current_status == EventKind::Expired {
            return Err(WorkflowError::Expired);
        }
        if task.current_status != EventKind::Delivered {
            return Err(WorkflowError::InvalidState(format!(
                "group task {task_id} is {} and cannot be corrected",
                task.current_status
            )));
        }
        let ratings = match ratings {
            Some(ratings) if !ratings.is_empty() => {
                check_ratings(&task.group, &ratings)?;
                ratings
            }
            _ => task.ratings.clone(),
        };

        let verdict = if accept { EventKind::Accepted } else { EventKind::Rejected };
        let update = Update::new().transition(&[StatusEvent::new(verdict).by(actor_id)], verdict)?;
        self.commit(&task, update).await?;
        info!("Group task {} corrected: {}", task_id, verdict);
        self.email_members(&task, |to| emails::group_task_corrected(&task, to, accept))
            .await;

        if !accept {
            return Ok(());
        }
        let results = join_all(ratings.iter().map(|rating| async move {
            let skills = rating.skills.iter().map(String::as_str);
            let update = Update::new().add_to_set("skills", skills);
            match store.update(Table::Trainees, &rating.id, &update).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(format!("trainee {} no longer exists", rating.id)),
                Err(e) => Err(e.to_string()),
            }
        }))
        .await;
        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();
        if !failures.is_empty() {
            error!("Skill updates for {} failed: {}", task_id, failures.join("; "));
            return Err(WorkflowError::CannotUpdateDatabase(failures.join("; ")));
        }
        Ok(())
    }

    pub async fn extend(&self, task_id: &str, actor_id: &str) -> WorkflowResult<()> {
        let task = self.get(task_id).await?;
        if task.current_status != EventKind::Expired {
            return Err(WorkflowError::Conflict(format!("group task {task_id} has not expired")));
        }

        let extended = StatusEvent::new(EventKind::Extended).by(actor_id);
        let extended_at = extended.created_at;
        self.commit(&task, Update::new().transition(&[extended], EventKind::Sent)?)
            .await?;
        info!("Group task extended: {}", task_id);
        self.email_members(&task, |to| emails::group_task_extended(&task, to, extended_at))
            .await;

        let job = Job::AfterGroupTaskExtended {
            id: task_id.to_string(),
        };
        if let Err(e) = self.deps.jobs.start(job).await {
            warn!("{}", e);
        }
        Ok(())
    }
}

pub struct GroupService {
    deps: Deps,
}

impl GroupService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    pub async fn get(&self, id: &str) -> WorkflowResult<Group> {
        find_one_as::<Group>(self.deps.store.as_ref(), Table::Groups, &Filter::by_id(id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("group {id}")))
    }

    /// Forms a group of accepted trainees; the first member leads.
    pub async fn create(&self, name: &str, member_ids: &[String]) -> WorkflowResult<Group> {
        let unique: HashSet<&str> = member_ids.iter().map(String::as_str).collect();
        if name.is_empty() || member_ids.is_empty() || unique.len() != member_ids.len() {
            return Err(WorkflowError::Validation(
                "a group needs a name and distinct members".to_string(),
            ));
        }

        let trainees: Vec<Trainee> = find_as(
            self.deps.store.as_ref(),
            Table::Trainees,
            &Filter::all()
                .is_in("id", member_ids.iter().map(String::as_str))
                .eq("program", self.deps.settings.program.as_str())
                .eq("currentStatus", EventKind::Accepted.as_str()),
        )
        .await?;

        let mut members = Vec::with_capacity(member_ids.len());
        for (position, id) in member_ids.iter().enumerate() {
            let trainee = trainees.iter().find(|t| &t.id == id).ok_or_else(|| {
                WorkflowError::Validation(format!("{id} is not an accepted trainee"))
            })?;
            members.push(GroupMember {
                id: trainee.id.clone(),
                email: trainee.email.clone(),
                fullname: trainee.fullname.clone(),
                role: if position == 0 { MemberRole::Leader } else { MemberRole::Member },
            });
        }

        let timestamp = now_millis();
        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            members,
            statuses: vec![StatusEvent::new(EventKind::Created)],
            created_at: timestamp,
            updated_at: timestamp,
            deleted_at: None,
        };
        if let Err(e) = insert_as(self.deps.store.as_ref(), Table::Groups, &group).await {
            error!("Error adding group: {}", e);
            return Err(e.into());
        }
        info!("Group created: {} ({} members)", group.id, group.members.len());
        Ok(group)
    }
}

// ─── REQUEST PAYLOADS ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub mentors: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub references: String,
    pub public_channel: Option<String>,
    pub private_channel: Option<String>,
    pub expires_after: Option<u32>,
}

impl TryFrom<&CreateGroupTaskRequest> for GroupTaskDraft {
    type Error = WorkflowError;

    fn try_from(req: &CreateGroupTaskRequest) -> Result<Self, Self::Error> {
        let (Some(title), Some(description), Some(public_channel), Some(private_channel)) = (
            present(&req.title),
            present(&req.description),
            present(&req.public_channel),
            present(&req.private_channel),
        ) else {
            return Err(WorkflowError::Validation(
                "title, description and both channels are required".to_string(),
            ));
        };
        if req.skills.is_empty() {
            return Err(WorkflowError::Validation("skills are required".to_string()));
        }
        let expires_after = req
            .expires_after
            .filter(|hours| *hours > 0)
            .ok_or_else(|| WorkflowError::Validation("expiresAfter must be positive".to_string()))?;
        Ok(GroupTaskDraft {
            title: title.to_string(),
            description: description.to_string(),
            mentor_emails: req.mentors.clone(),
            skills: req.skills.clone(),
            references: parse_references(&req.references),
            public_channel: public_channel.to_string(),
            private_channel: private_channel.to_string(),
            expires_after,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliverGroupTaskRequest {
    #[serde(default)]
    pub answers: String,
    #[serde(default)]
    pub ratings: Vec<MemberRating>,
}

#[derive(Debug, Deserialize)]
pub struct CorrectGroupTaskRequest {
    pub action: Option<String>,
    pub ratings: Option<Vec<MemberRating>>,
}

/// Contributors read any group; trainees only the groups they belong to.
pub(crate) async fn authorize_reader(
    services: &Services,
    email: &str,
    group: &Group,
) -> WorkflowResult<()> {
    if services.contributors.by_email(email).await.is_ok() {
        return Ok(());
    }
    let trainee = services.trainees.accepted_by_email(email).await?;
    if !group.is_member(&trainee.id) {
        return Err(WorkflowError::Forbidden(format!("not a member of {}", group.name)));
    }
    Ok(())
}

// ─── ENDPOINTS ────────────────────────────────────────────────────────────────

// POST /groups
pub async fn create_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateGroupRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    data.services.contributors.by_email(&identity.email).await?;
    let name = present(&payload.name).unwrap_or_default();
    let group = data.services.groups.create(name, &payload.members).await?;
    Ok(HttpResponse::Ok().json(group))
}

// GET /groups/{group_id}
pub async fn get_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let group = data.services.groups.get(&group_id).await?;
    authorize_reader(&data.services, &identity.email, &group).await?;
    Ok(HttpResponse::Ok().json(group))
}

// POST /group-tasks
pub async fn create_group_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateGroupTaskRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let creator = data.services.contributors.by_email(&identity.email).await?;
    let draft = GroupTaskDraft::try_from(&*payload)?;
    let ids = data.services.group_tasks.create(&creator.id, draft).await?;
    Ok(HttpResponse::Ok().json(ids))
}

// GET /group-tasks/{task_id}
pub async fn get_group_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let task = data.services.group_tasks.get(&task_id).await?;
    authorize_reader(&data.services, &identity.email, &task.group).await?;
    Ok(HttpResponse::Ok().json(task))
}

// POST /group-tasks/{task_id}/deliver
pub async fn deliver_group_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<DeliverGroupTaskRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let trainee = data.services.trainees.accepted_by_email(&identity.email).await?;
    let payload = payload.into_inner();
    data.services
        .group_tasks
        .deliver(&task_id, &trainee.id, &payload.answers, payload.ratings)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /group-tasks/{task_id}/correct
pub async fn correct_group_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
    payload: web::Json<CorrectGroupTaskRequest>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let mentor = data.services.contributors.by_email(&identity.email).await?;
    let payload = payload.into_inner();
    let accept = parse_action(&payload.action)?;
    data.services
        .group_tasks
        .correct(&task_id, &mentor.id, accept, payload.ratings)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

// POST /group-tasks/{task_id}/extend
pub async fn extend_group_task(
    req: HttpRequest,
    data: web::Data<AppState>,
    task_id: web::Path<String>,
) -> WorkflowResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let mentor = data.services.contributors.by_email(&identity.email).await?;
    data.services.group_tasks.extend(&task_id, &mentor.id).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::derive_task_status;
    use crate::testing::{group_task_fixture, history, Harness};

    const ANSWERS: &str = "- Repo (https://git.example.org/team/task).";

    fn rating(id: &str, skills: &[&str]) -> MemberRating {
        MemberRating {
            id: id.to_string(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Mentor, a two-member group led by `lead` and one task in the given states.
    async fn seeded(h: &Harness, states: &[EventKind]) -> GroupTask {
        let mentor = h.seed_contributor("c-1", "mentor@program.org").await;
        let lead = h.seed_accepted_trainee("lead", "lead@mail.com").await;
        let member = h.seed_accepted_trainee("member", "member@mail.com").await;
        let group = h.seed_group("g-1", &[&lead, &member]).await;
        let task = group_task_fixture("gt-1", &group, &[&mentor], history(states));
        h.insert(Table::GroupTasks, &task).await;
        task
    }

    fn draft() -> GroupTaskDraft {
        GroupTaskDraft {
            title: "Chat server".to_string(),
            description: "Build a chat server together".to_string(),
            mentor_emails: vec!["mentor@program.org".to_string()],
            skills: vec!["actix".to_string()],
            references: Vec::new(),
            public_channel: "#chat".to_string(),
            private_channel: "#chat-team".to_string(),
            expires_after: 72,
        }
    }

    #[tokio::test]
    async fn create_fans_out_per_group() {
        let h = Harness::new();
        h.seed_contributor("c-1", "mentor@program.org").await;
        let err = h.services.group_tasks.create("c-1", draft()).await.unwrap_err();
        assert_eq!(err.http_status().as_u16(), 400);

        let a = h.seed_accepted_trainee("a", "a@mail.com").await;
        let b = h.seed_accepted_trainee("b", "b@mail.com").await;
        h.seed_group("g-1", &[&a]).await;
        h.seed_group("g-2", &[&b]).await;

        let ids = h.services.group_tasks.create("c-1", draft()).await.unwrap();
        assert_eq!(ids.len(), 2);
        let task: GroupTask = h.load(Table::GroupTasks, &ids[0]).await;
        assert_eq!(task.current_status, EventKind::Created);
        assert_eq!(task.group.members.len(), 1);
        assert_eq!(h.trigger.started().len(), 2);
    }

    #[tokio::test]
    async fn send_and_expire_email_every_member() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created]).await;

        assert_eq!(h.services.group_tasks.send("gt-1").await.unwrap(), 72 * 3600);
        h.services.group_tasks.expire("gt-1").await.unwrap();
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Expired);
        assert_eq!(derive_task_status(&task.statuses), Some(task.current_status));
        assert_eq!(h.notifier.sent_to("lead@mail.com").len(), 2);
        assert_eq!(h.notifier.sent_to("member@mail.com").len(), 2);

        let err = h.services.group_tasks.expire("gt-1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::TaskHasNotExpired(_)));
    }

    #[tokio::test]
    async fn only_the_leader_delivers() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent]).await;

        let err = h
            .services
            .group_tasks
            .deliver("gt-1", "member", ANSWERS, vec![rating("lead", &["rust"])])
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 403);
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Sent);
    }

    #[tokio::test]
    async fn ratings_must_name_members() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent]).await;

        for ratings in [vec![], vec![rating("stranger", &["rust"])]] {
            let err = h
                .services
                .group_tasks
                .deliver("gt-1", "lead", ANSWERS, ratings)
                .await
                .unwrap_err();
            assert!(matches!(err, WorkflowError::InvalidRatings(_)));
            assert_eq!(err.http_status().as_u16(), 400);
        }
    }

    #[tokio::test]
    async fn accepted_delivery_spreads_skills_from_stored_ratings() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent]).await;

        h.services
            .group_tasks
            .deliver(
                "gt-1",
                "lead",
                ANSWERS,
                vec![rating("lead", &["rust", "leadership"]), rating("member", &["rust"])],
            )
            .await
            .unwrap();
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Delivered);
        assert_eq!(task.ratings.len(), 2);
        assert_eq!(h.notifier.sent_to("mentor@program.org").len(), 1);

        h.services.group_tasks.correct("gt-1", "c-1", true, None).await.unwrap();
        let lead: Trainee = h.load(Table::Trainees, "lead").await;
        assert_eq!(lead.skills, vec!["rust".to_string(), "leadership".to_string()]);
        let member: Trainee = h.load(Table::Trainees, "member").await;
        assert_eq!(member.skills, vec!["rust".to_string()]);

        let again = h.services.group_tasks.correct("gt-1", "c-1", true, None).await.unwrap_err();
        assert!(matches!(again, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejected_delivery_grants_nothing() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent, EventKind::Delivered]).await;

        h.services
            .group_tasks
            .correct("gt-1", "c-1", false, Some(vec![rating("member", &["rust"])]))
            .await
            .unwrap();
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Rejected);
        let member: Trainee = h.load(Table::Trainees, "member").await;
        assert!(member.skills.is_empty());
    }

    #[tokio::test]
    async fn failed_skill_update_cannot_update_database() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent, EventKind::Delivered]).await;
        h.store.fail_updates_on(Table::Trainees);

        let err = h
            .services
            .group_tasks
            .correct("gt-1", "c-1", true, Some(vec![rating("member", &["rust"])]))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::CannotUpdateDatabase(_)));
        assert_eq!(err.http_status().as_u16(), 410);
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Accepted);
    }

    #[tokio::test]
    async fn extension_requires_expiry() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent, EventKind::Expired]).await;

        let err = h
            .services
            .group_tasks
            .deliver("gt-1", "lead", ANSWERS, vec![rating("lead", &["rust"])])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Expired));

        h.services.group_tasks.extend("gt-1", "c-1").await.unwrap();
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Sent);
        assert!(h
            .trigger
            .started()
            .contains(&Job::AfterGroupTaskExtended { id: "gt-1".into() }));

        let err = h.services.group_tasks.extend("gt-1", "c-1").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[tokio::test]
    async fn groups_are_made_of_accepted_trainees() {
        let h = Harness::new();
        h.seed_accepted_trainee("a", "a@mail.com").await;
        h.seed_accepted_trainee("b", "b@mail.com").await;
        h.seed_trainee("c", "c@mail.com", history(&[EventKind::Applied])).await;

        let ids = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let err = h.services.groups.create("Crabs", &ids(&["a", "c"])).await.unwrap_err();
        assert_eq!(err.http_status().as_u16(), 400);

        let group = h.services.groups.create("Crabs", &ids(&["b", "a"])).await.unwrap();
        assert_eq!(group.leader().map(|m| m.id.as_str()), Some("b"));
        assert_eq!(group.members[1].role, MemberRole::Member);
        let stored: Group = h.load(Table::Groups, &group.id).await;
        assert_eq!(stored.statuses[0].event, EventKind::Created);
    }

    #[tokio::test]
    async fn expiry_is_reported_before_ratings() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent, EventKind::Expired]).await;

        let err = h
            .services
            .group_tasks
            .deliver("gt-1", "lead", ANSWERS, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Expired));
        assert_eq!(err.http_status().as_u16(), 408);
    }

    #[tokio::test]
    async fn second_delivery_conflicts() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent, EventKind::Delivered]).await;

        let err = h
            .services
            .group_tasks
            .deliver("gt-1", "lead", ANSWERS, vec![rating("lead", &["rust"])])
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 409);
    }

    #[tokio::test]
    async fn bounced_mentor_email_is_reported_after_delivery() {
        let h = Harness::new();
        seeded(&h, &[EventKind::Created, EventKind::Sent]).await;
        h.notifier.fail_for("mentor@program.org");

        let err = h
            .services
            .group_tasks
            .deliver("gt-1", "lead", ANSWERS, vec![rating("lead", &["rust"])])
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Downstream(_)));
        assert_eq!(err.http_status().as_u16(), 410);
        let task: GroupTask = h.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Delivered);
    }

    #[tokio::test]
    async fn correction_needs_a_delivery() {
        let expired = Harness::new();
        seeded(&expired, &[EventKind::Created, EventKind::Sent, EventKind::Expired]).await;
        let err = expired
            .services
            .group_tasks
            .correct("gt-1", "c-1", true, None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 408);

        let sent = Harness::new();
        seeded(&sent, &[EventKind::Created, EventKind::Sent]).await;
        let err = sent
            .services
            .group_tasks
            .correct("gt-1", "c-1", true, None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 406);
        let task: GroupTask = sent.load(Table::GroupTasks, "gt-1").await;
        assert_eq!(task.current_status, EventKind::Sent);
    }

    #[tokio::test]
    async fn groups_are_readable_by_contributors_and_members_only() {
        let h = Harness::new();
        let task = seeded(&h, &[EventKind::Created]).await;
        h.seed_accepted_trainee("outsider", "outsider@mail.com").await;

        for reader in ["mentor@program.org", "lead@mail.com", "member@mail.com"] {
            assert!(authorize_reader(&h.services, reader, &task.group).await.is_ok());
        }
        let err = authorize_reader(&h.services, "outsider@mail.com", &task.group)
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 403);
        let err = authorize_reader(&h.services, "stranger@nowhere.io", &task.group)
            .await
            .unwrap_err();
        assert_eq!(err.http_status().as_u16(), 401);
    }
}
