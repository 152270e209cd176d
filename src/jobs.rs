use std::time::Duration;

use actix::prelude::*;
use async_trait::async_trait;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::error::WorkflowError;
use crate::services::Services;

/// Named asynchronous jobs the workflow starts after committing its own state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", content = "input", rename_all = "camelCase")]
pub enum Job {
    AfterTraineeApplies { id: String },
    TallyVotes { id: String },
    AfterVotesCalculated { id: String },
    AfterTaskCreated { id: String },
    AfterTaskExtended { id: String },
    TaskExpiryCheck { id: String },
    AfterGroupTaskCreated { id: String },
    AfterGroupTaskExtended { id: String },
    GroupTaskExpiryCheck { id: String },
    InactivitySweep,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::AfterTraineeApplies { .. } => "afterTraineeApplies",
            Job::TallyVotes { .. } => "tallyVotes",
            Job::AfterVotesCalculated { .. } => "afterVotesCalculated",
            Job::AfterTaskCreated { .. } => "afterTaskCreated",
            Job::AfterTaskExtended { .. } => "afterTaskExtended",
            Job::TaskExpiryCheck { .. } => "taskExpiryCheck",
            Job::AfterGroupTaskCreated { .. } => "afterGroupTaskCreated",
            Job::AfterGroupTaskExtended { .. } => "afterGroupTaskExtended",
            Job::GroupTaskExpiryCheck { .. } => "groupTaskExpiryCheck",
            Job::InactivitySweep => "inactivitySweep",
        }
    }
}

#[derive(Debug, Error)]
#[error("job {job} could not be started: {reason}")]
pub struct TriggerError {
    pub job: &'static str,
    pub reason: String,
}

/// Fire-and-forget job start; callers never await completion.
#[async_trait]
pub trait JobTrigger: Send + Sync {
    async fn start(&self, job: Job) -> Result<(), TriggerError>;
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct StartJob(pub Job);

/// Runs jobs against the lifecycle managers and schedules the delayed
/// follow-ups (vote tally, expiry checks, inactivity sweep).
pub struct JobRunner {
    services: Services,
    voting_window: Duration,
    sweep_interval: Duration,
}

impl JobRunner {
    pub fn new(services: Services, config: &Config) -> Self {
        Self {
            services,
            voting_window: config.voting_window,
            sweep_interval: config.sweep_interval,
        }
    }
}

impl Actor for JobRunner {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Job runner started, sweeping every {:?}", self.sweep_interval);
        // Timers from a previous run are gone; catch up right away.
        ctx.notify(StartJob(Job::InactivitySweep));
        ctx.run_interval(self.sweep_interval, |_act, ctx| {
            ctx.notify(StartJob(Job::InactivitySweep));
        });
    }
}

impl Handler<StartJob> for JobRunner {
    type Result = ();

    fn handle(&mut self, msg: StartJob, ctx: &mut Self::Context) {
        let services = self.services.clone();
        let voting_window = self.voting_window;
        let job = msg.0;

        ctx.spawn(
            run(services, job, voting_window)
                .into_actor(self)
                .map(|follow_up, _act, ctx| {
                    if let Some((job, delay)) = follow_up {
                        info!("Scheduling {} in {:?}", job.name(), delay);
                        ctx.notify_later(StartJob(job), delay);
                    }
                }),
        );
    }
}

fn log_failure(job: &str, err: &WorkflowError) {
    match err {
        WorkflowError::TaskHasNotExpired(_) => info!("{}: {}", job, err),
        _ => error!("{} failed: {}", job, err),
    }
}

/// Runs the delayed steps whose in-memory timers did not survive a restart.
async fn recover_overdue(services: &Services, voting_window: Duration) {
    match services.trainees.tally_overdue(voting_window).await {
        Ok(ids) if !ids.is_empty() => info!("Tallied {} overdue applications", ids.len()),
        Ok(_) => {}
        Err(e) => log_failure("tallyVotes", &e),
    }
    match services.tasks.expire_overdue().await {
        Ok(ids) if !ids.is_empty() => info!("Expired {} overdue tasks", ids.len()),
        Ok(_) => {}
        Err(e) => log_failure("taskExpiryCheck", &e),
    }
    match services.group_tasks.expire_overdue().await {
        Ok(ids) if !ids.is_empty() => info!("Expired {} overdue group tasks", ids.len()),
        Ok(_) => {}
        Err(e) => log_failure("groupTaskExpiryCheck", &e),
    }
}

/// Executes one job and returns the job to schedule next, if any.
async fn run(services: Services, job: Job, voting_window: Duration) -> Option<(Job, Duration)> {
    let name = job.name();
    info!("Running job {}", name);

    match job {
        Job::AfterTraineeApplies { id } => {
            if let Err(e) = services.trainees.notify_contributors_of_application(&id).await {
                warn!("{}: contributors not notified: {}", name, e);
            }
            Some((Job::TallyVotes { id }, voting_window))
        }
        Job::TallyVotes { id } => {
            if let Err(e) = services.trainees.tally_votes(&id).await {
                log_failure(name, &e);
            }
            None
        }
        Job::AfterVotesCalculated { id } => {
            if let Err(e) = services.trainees.notify_contributors_of_decision(&id).await {
                log_failure(name, &e);
            }
            None
        }
        Job::AfterTaskCreated { id } => match services.tasks.send(&id).await {
            Ok(seconds) => Some((Job::TaskExpiryCheck { id }, Duration::from_secs(seconds))),
            Err(e) => {
                log_failure(name, &e);
                None
            }
        },
        Job::AfterTaskExtended { id } => match services.tasks.expires_after_in_seconds(&id).await {
            Ok(seconds) => Some((Job::TaskExpiryCheck { id }, Duration::from_secs(seconds))),
            Err(e) => {
                log_failure(name, &e);
                None
            }
        },
        Job::TaskExpiryCheck { id } => {
            if let Err(e) = services.tasks.expire(&id).await {
                log_failure(name, &e);
            }
            None
        }
        Job::AfterGroupTaskCreated { id } => match services.group_tasks.send(&id).await {
            Ok(seconds) => Some((Job::GroupTaskExpiryCheck { id }, Duration::from_secs(seconds))),
            Err(e) => {
                log_failure(name, &e);
                None
            }
        },
        Job::AfterGroupTaskExtended { id } => {
            match services.group_tasks.expires_after_in_seconds(&id).await {
                Ok(seconds) => {
                    Some((Job::GroupTaskExpiryCheck { id }, Duration::from_secs(seconds)))
                }
                Err(e) => {
                    log_failure(name, &e);
                    None
                }
            }
        }
        Job::GroupTaskExpiryCheck { id } => {
            if let Err(e) = services.group_tasks.expire(&id).await {
                log_failure(name, &e);
            }
            None
        }
        Job::InactivitySweep => {
            recover_overdue(&services, voting_window).await;
            match services.trainees.inactivity_sweep().await {
                Ok(kicked) if !kicked.is_empty() => info!("Kicked out {} trainees", kicked.len()),
                Ok(_) => {}
                Err(e) => log_failure(name, &e),
            }
            None
        }
    }
}

/// `JobTrigger` backed by the in-process `JobRunner` actor.
pub struct ActorJobTrigger {
    runner: Addr<JobRunner>,
}

impl ActorJobTrigger {
    pub fn new(runner: Addr<JobRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl JobTrigger for ActorJobTrigger {
    async fn start(&self, job: Job) -> Result<(), TriggerError> {
        let name = job.name();
        self.runner
            .try_send(StartJob(job))
            .map_err(|e| TriggerError {
                job: name,
                reason: e.to_string(),
            })
    }
}
