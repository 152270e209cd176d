use std::sync::Arc;

use crate::config::WorkflowSettings;
use crate::contact::ContactService;
use crate::contributor::ContributorService;
use crate::group_task::{GroupService, GroupTaskService};
use crate::individual_task::IndividualTaskService;
use crate::jobs::JobTrigger;
use crate::notifier::Notifier;
use crate::store::RecordStore;
use crate::trainee::TraineeService;

/// Collaborators every lifecycle manager is built from.
#[derive(Clone)]
pub struct Deps {
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<dyn Notifier>,
    pub jobs: Arc<dyn JobTrigger>,
    pub settings: Arc<WorkflowSettings>,
}

#[derive(Clone)]
pub struct Services {
    pub trainees: Arc<TraineeService>,
    pub contributors: Arc<ContributorService>,
    pub tasks: Arc<IndividualTaskService>,
    pub group_tasks: Arc<GroupTaskService>,
    pub groups: Arc<GroupService>,
    pub contact: Arc<ContactService>,
}

impl Services {
    pub fn new(deps: Deps) -> Self {
        Self {
            trainees: Arc::new(TraineeService::new(deps.clone())),
            contributors: Arc::new(ContributorService::new(deps.clone())),
            tasks: Arc::new(IndividualTaskService::new(deps.clone())),
            group_tasks: Arc::new(GroupTaskService::new(deps.clone())),
            groups: Arc::new(GroupService::new(deps.clone())),
            contact: Arc::new(ContactService::new(deps)),
        }
    }
}
