use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::store::StoreError;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Every way a workflow operation can fail.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid format: {0}")]
    Format(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("task has expired")]
    Expired,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("committed, but a follow-up failed: {0}")]
    Downstream(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("task {0} has not expired")]
    TaskHasNotExpired(String),

    #[error("no mentors found")]
    NoMentorsFound,

    #[error("invalid ratings: {0}")]
    InvalidRatings(String),

    #[error("cannot update database: {0}")]
    CannotUpdateDatabase(String),
}

impl WorkflowError {
    /// Transport status for each error kind.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidRatings(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::TaskNotFound(_) | Self::NoMentorsFound => {
                StatusCode::NOT_FOUND
            }
            Self::Format(_) | Self::InvalidState(_) | Self::TaskHasNotExpired(_) => {
                StatusCode::NOT_ACCEPTABLE
            }
            Self::Expired | Self::Persistence(_) => StatusCode::REQUEST_TIMEOUT,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Downstream(_) | Self::CannotUpdateDatabase(_) => StatusCode::GONE,
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        WorkflowError::Persistence(err.to_string())
    }
}

impl ResponseError for WorkflowError {
    fn status_code(&self) -> StatusCode {
        self.http_status()
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.http_status()).body(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_transport_codes() {
        let cases = [
            (WorkflowError::Validation("x".into()), 400),
            (WorkflowError::Unauthorized, 401),
            (WorkflowError::Forbidden("x".into()), 403),
            (WorkflowError::NoMentorsFound, 404),
            (WorkflowError::Format("x".into()), 406),
            (WorkflowError::InvalidState("x".into()), 406),
            (WorkflowError::Expired, 408),
            (WorkflowError::Persistence("x".into()), 408),
            (WorkflowError::Conflict("x".into()), 409),
            (WorkflowError::Downstream("x".into()), 410),
            (WorkflowError::CannotUpdateDatabase("x".into()), 410),
        ];
        for (err, code) in cases {
            assert_eq!(err.http_status().as_u16(), code, "{err}");
        }
    }
}
