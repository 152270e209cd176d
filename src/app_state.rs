use crate::services::Services;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}
