//! In-process fakes for the workflow's collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::config::WorkflowSettings;
use crate::jobs::{Job, JobTrigger, TriggerError};
use crate::models::{
    derive_task_status, derive_trainee_status, now_millis, Contributor, ContributorSummary,
    EventKind, Group, GroupMember, GroupTask, IndividualTask, Link, MemberRole, StatusEvent,
    Trainee,
};
use crate::notifier::{Email, Notifier, NotifyError};
use crate::services::{Deps, Services};
use crate::store::{
    find_one_as, insert_as, Filter, MemoryStore, RecordStore, StoreError, StoreResult, Table,
    Update,
};

/// Memory store that can be told to fail selected writes, or to let another
/// writer slip in just before one.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_updates: Mutex<HashSet<Table>>,
    failing_inserts: Mutex<Option<(Table, Filter)>>,
    interloper: Mutex<Option<(Table, Update)>>,
}

impl FlakyStore {
    pub fn fail_updates_on(&self, table: Table) {
        self.failing_updates.lock().unwrap().insert(table);
    }

    pub fn fail_inserts_matching(&self, table: Table, filter: Filter) {
        *self.failing_inserts.lock().unwrap() = Some((table, filter));
    }

    /// Applies `update` to the same record right before the next update on
    /// `table`, as a concurrent writer would.
    pub fn race_next_update(&self, table: Table, update: Update) {
        *self.interloper.lock().unwrap() = Some((table, update));
    }

    fn take_interloper(&self, table: Table) -> Option<Update> {
        let mut slot = self.interloper.lock().unwrap();
        match slot.take() {
            Some((raced, update)) if raced == table => Some(update),
            other => {
                *slot = other;
                None
            }
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn find(&self, table: Table, filter: &Filter) -> StoreResult<Vec<Value>> {
        self.inner.find(table, filter).await
    }

    async fn find_one(&self, table: Table, filter: &Filter) -> StoreResult<Option<Value>> {
        self.inner.find_one(table, filter).await
    }

    async fn insert(&self, table: Table, record: Value) -> StoreResult<()> {
        let rejected = matches!(
            &*self.failing_inserts.lock().unwrap(),
            Some((failing, filter)) if *failing == table && filter.matches(&record)
        );
        if rejected {
            return Err(StoreError::Backend("insert refused".to_string()));
        }
        self.inner.insert(table, record).await
    }

    async fn update(&self, table: Table, id: &str, update: &Update) -> StoreResult<bool> {
        if self.failing_updates.lock().unwrap().contains(&table) {
            return Err(StoreError::Backend("update refused".to_string()));
        }
        if let Some(interloper) = self.take_interloper(table) {
            self.inner.update(table, id, &interloper).await?;
        }
        self.inner.update(table, id, update).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Email>>,
    pub bulk: Mutex<Vec<(Vec<String>, String, Vec<Value>)>>,
    failing: Mutex<HashSet<String>>,
    failing_bulk: AtomicBool,
}

impl RecordingNotifier {
    pub fn fail_for(&self, address: &str) {
        self.failing.lock().unwrap().insert(address.to_string());
    }

    pub fn fail_bulk(&self) {
        self.failing_bulk.store(true, Ordering::SeqCst);
    }

    pub fn sent_to(&self, address: &str) -> Vec<Email> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|email| email.to == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_one(&self, email: Email) -> Result<(), NotifyError> {
        if self.failing.lock().unwrap().contains(&email.to) {
            return Err(NotifyError(format!("bounced: {}", email.to)));
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }

    async fn send_bulk(
        &self,
        to: Vec<String>,
        template: &str,
        data: Vec<Value>,
    ) -> Result<(), NotifyError> {
        if self.failing_bulk.load(Ordering::SeqCst) {
            return Err(NotifyError(format!("bulk {template} rejected")));
        }
        self.bulk
            .lock()
            .unwrap()
            .push((to, template.to_string(), data));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTrigger {
    pub jobs: Mutex<Vec<Job>>,
    failing: AtomicBool,
}

impl RecordingTrigger {
    pub fn fail_all(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn started(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobTrigger for RecordingTrigger {
    async fn start(&self, job: Job) -> Result<(), TriggerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TriggerError {
                job: job.name(),
                reason: "trigger offline".to_string(),
            });
        }
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// Services wired to fakes, plus seeding helpers.
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub trigger: Arc<RecordingTrigger>,
    pub services: Services,
}

pub const PROGRAM: &str = "summer-test";

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(FlakyStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let trigger = Arc::new(RecordingTrigger::default());
        let settings = WorkflowSettings {
            program: PROGRAM.to_string(),
            app_url: "https://app.test".to_string(),
            contact_email: "contact@program.org".to_string(),
            kick_out_threshold: 7,
            test_email_domain: "example.com".to_string(),
        };
        let services = Services::new(Deps {
            store: store.clone(),
            notifier: notifier.clone(),
            jobs: trigger.clone(),
            settings: Arc::new(settings),
        });
        Self {
            store,
            notifier,
            trigger,
            services,
        }
    }

    pub async fn insert<T: Serialize + Sync>(&self, table: Table, record: &T) {
        insert_as(self.store.as_ref(), table, record).await.unwrap();
    }

    pub async fn load<T: DeserializeOwned>(&self, table: Table, id: &str) -> T {
        find_one_as(self.store.as_ref(), table, &Filter::by_id(id))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn seed_contributor(&self, id: &str, email: &str) -> Contributor {
        let contributor = Contributor {
            id: id.to_string(),
            access_token: format!("token-{id}"),
            fullname: format!("Mentor {id}"),
            email: email.to_string(),
            picture_url: None,
            created_at: now_millis(),
            updated_at: now_millis(),
            deleted_at: None,
        };
        self.insert(Table::Contributors, &contributor).await;
        contributor
    }

    pub async fn seed_trainee(&self, id: &str, email: &str, statuses: Vec<StatusEvent>) -> Trainee {
        let trainee = trainee_fixture(id, email, statuses);
        self.insert(Table::Trainees, &trainee).await;
        trainee
    }

    pub async fn seed_accepted_trainee(&self, id: &str, email: &str) -> Trainee {
        let statuses = history(&[
            EventKind::Applied,
            EventKind::VotesCalculated,
            EventKind::InitiallyAccepted,
            EventKind::Accepted,
        ]);
        self.seed_trainee(id, email, statuses).await
    }

    pub async fn seed_group(&self, id: &str, members: &[&Trainee]) -> Group {
        let group = group_fixture(id, members);
        self.insert(Table::Groups, &group).await;
        group
    }
}

pub fn history(kinds: &[EventKind]) -> Vec<StatusEvent> {
    kinds.iter().map(|kind| StatusEvent::new(*kind)).collect()
}

pub fn trainee_fixture(id: &str, email: &str, statuses: Vec<StatusEvent>) -> Trainee {
    Trainee {
        id: id.to_string(),
        program: PROGRAM.to_string(),
        fullname: format!("Trainee {id}"),
        gender: "female".to_string(),
        email: email.to_string(),
        mobile: format!("+1{}", id.bytes().map(u32::from).sum::<u32>()),
        university: "University".to_string(),
        major: "CS".to_string(),
        place: "Amman".to_string(),
        expected_graduation_date: "2019-06-30".to_string(),
        youtube_video_url: "https://youtu.be/x".to_string(),
        how_did_you_know_about_us: "friends".to_string(),
        current_status: derive_trainee_status(&statuses).unwrap_or(EventKind::Applied),
        statuses,
        skills: Vec::new(),
        created_at: now_millis(),
        updated_at: now_millis(),
        deleted_at: None,
    }
}

pub fn task_fixture(
    id: &str,
    assignee: &Trainee,
    mentors: &[&Contributor],
    statuses: Vec<StatusEvent>,
) -> IndividualTask {
    IndividualTask {
        id: id.to_string(),
        title: format!("Task {id}"),
        description: "Build it".to_string(),
        skill: "rust".to_string(),
        mentors: mentors.iter().map(|m| ContributorSummary::from(*m)).collect(),
        references: vec![Link {
            title: "Book".to_string(),
            url: "https://doc.rust-lang.org/book".to_string(),
        }],
        assigned_to: assignee.into(),
        channel: "#tasks".to_string(),
        expires_after: 48,
        current_status: derive_task_status(&statuses).unwrap_or(EventKind::Created),
        statuses,
        answers: Vec::new(),
        created_by: mentors.first().map(|m| m.id.clone()).unwrap_or_default(),
        created_at: now_millis(),
        updated_at: now_millis(),
        deleted_at: None,
    }
}

pub fn group_fixture(id: &str, members: &[&Trainee]) -> Group {
    Group {
        id: id.to_string(),
        name: format!("Group {id}"),
        members: members
            .iter()
            .enumerate()
            .map(|(i, t)| GroupMember {
                id: t.id.clone(),
                email: t.email.clone(),
                fullname: t.fullname.clone(),
                role: if i == 0 { MemberRole::Leader } else { MemberRole::Member },
            })
            .collect(),
        statuses: history(&[EventKind::Created]),
        created_at: now_millis(),
        updated_at: now_millis(),
        deleted_at: None,
    }
}

pub fn group_task_fixture(
    id: &str,
    group: &Group,
    mentors: &[&Contributor],
    statuses: Vec<StatusEvent>,
) -> GroupTask {
    GroupTask {
        id: id.to_string(),
        group_id: group.id.clone(),
        group: group.clone(),
        title: format!("Group task {id}"),
        description: "Build it together".to_string(),
        mentors: mentors.iter().map(|m| ContributorSummary::from(*m)).collect(),
        skills: vec!["rust".to_string(), "teamwork".to_string()],
        references: Vec::new(),
        public_channel: "#public".to_string(),
        private_channel: "#private".to_string(),
        expires_after: 72,
        current_status: derive_task_status(&statuses).unwrap_or(EventKind::Created),
        statuses,
        answers: Vec::new(),
        ratings: Vec::new(),
        created_by: mentors.first().map(|m| m.id.clone()).unwrap_or_default(),
        created_at: now_millis(),
        updated_at: now_millis(),
        deleted_at: None,
    }
}
