use actix_web::{web, HttpResponse};
use log::{error, info};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::emails;
use crate::error::{WorkflowError, WorkflowResult};
use crate::services::Deps;
use crate::validation::{is_valid_email, present};

/// Relays messages from the public contact form to the program inbox.
pub struct ContactService {
    deps: Deps,
}

impl ContactService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    pub async fn contact_us(&self, req: &ContactRequest) -> WorkflowResult<()> {
        let (Some(name), Some(email), Some(subject), Some(message)) = (
            present(&req.name),
            present(&req.email),
            present(&req.subject),
            present(&req.message),
        ) else {
            return Err(WorkflowError::Validation(
                "name, email, subject and message are required".to_string(),
            ));
        };
        if !is_valid_email(email) {
            return Err(WorkflowError::Format("email".to_string()));
        }

        let to = self.deps.settings.contact_email.as_str();
        let email = emails::contact_message(name, email, subject, message, to);
        if let Err(e) = self.deps.notifier.send_one(email).await {
            error!("Contact message from {} not sent: {}", name, e);
            return Err(WorkflowError::Persistence(e.to_string()));
        }
        info!("Contact message relayed to {}", to);
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ContactRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

// POST /contact
pub async fn contact_us(
    data: web::Data<AppState>,
    payload: web::Json<ContactRequest>,
) -> WorkflowResult<HttpResponse> {
    data.services.contact.contact_us(&payload).await?;
    Ok(HttpResponse::NoContent().finish())
}
