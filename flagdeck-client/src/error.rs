//! Error taxonomy surfaced to callers.
//!
//! Every failure a caller sees is a [`ClientError`]. [`ClientError::kind`]
//! tells the front end how to react; [`ClientError::user_message`] is the text
//! to show.

use crate::api::ApiClientError;
use crate::config::ConfigError;
use flagdeck_cache::CacheError;
use flagdeck_core::{FieldError, ProblemDetails, ValidationError};

const GENERIC_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Reaction class for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected before it reached the network.
    Validation,
    /// Server-side uniqueness failure; shown against a form field.
    Conflict,
    Forbidden,
    /// Session expired; triggers global sign-out.
    Unauthorized,
    NotFound,
    Server,
    Network,
    Decode,
    Cache,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Conflict: {}", problem_text(.problem))]
    Conflict {
        problem: Option<ProblemDetails>,
        /// Form field the conflict applies to, when known.
        field: Option<FieldError>,
    },

    #[error("Forbidden: {}", problem_text(.problem))]
    Forbidden { problem: Option<ProblemDetails> },

    #[error("Unauthorized: {}", problem_text(.problem))]
    Unauthorized { problem: Option<ProblemDetails> },

    #[error("Not found: {}", problem_text(.problem))]
    NotFound { problem: Option<ProblemDetails> },

    /// Any other non-success status.
    #[error("HTTP {status}: {}", problem_text(.problem))]
    Server {
        status: u16,
        problem: Option<ProblemDetails>,
    },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

fn problem_text(problem: &Option<ProblemDetails>) -> String {
    problem
        .as_ref()
        .and_then(|p| p.message())
        .unwrap_or("no details")
        .to_string()
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Server { .. } => ErrorKind::Server,
            Self::Transport(_) => ErrorKind::Network,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Cache(_) => ErrorKind::Cache,
        }
    }

    pub fn problem(&self) -> Option<&ProblemDetails> {
        match self {
            Self::Conflict { problem, .. }
            | Self::Forbidden { problem }
            | Self::Unauthorized { problem }
            | Self::NotFound { problem }
            | Self::Server { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Conflict { .. } => Some(409),
            Self::Forbidden { .. } => Some(403),
            Self::Unauthorized { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text for the front end: the problem's `detail`, then its `title`,
    /// then a generic sentence.
    pub fn user_message(&self) -> String {
        if let Some(message) = self.problem().and_then(|p| p.message()) {
            return message.to_string();
        }
        match self {
            Self::Validation(err) => err
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| GENERIC_MESSAGE.to_string()),
            Self::Conflict { field: Some(field), .. } => field.message.clone(),
            Self::Forbidden { .. } => {
                "You do not have permission to perform this action".to_string()
            }
            Self::Unauthorized { .. } => "Your session has expired. Please sign in again".to_string(),
            Self::NotFound { .. } => "The requested item no longer exists".to_string(),
            Self::Transport(_) => "Unable to reach the server".to_string(),
            _ => GENERIC_MESSAGE.to_string(),
        }
    }

    /// Attach a form field to a conflict.
    pub fn with_conflict_field(self, field: &str, message: &str) -> Self {
        match self {
            Self::Conflict { problem, .. } => Self::Conflict {
                problem,
                field: Some(FieldError::new(field, message)),
            },
            other => other,
        }
    }

    /// The field-level error to show on a form, if any.
    pub fn field_error(&self) -> Option<&FieldError> {
        match self {
            Self::Validation(err) => err.errors.first(),
            Self::Conflict { field, .. } => field.as_ref(),
            _ => None,
        }
    }
}

impl From<ApiClientError> for ClientError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::Status { status, problem } => match status {
                401 => Self::Unauthorized { problem },
                403 => Self::Forbidden { problem },
                404 => Self::NotFound { problem },
                409 => Self::Conflict {
                    problem,
                    field: None,
                },
                _ => Self::Server { status, problem },
            },
            ApiClientError::Http(err) if err.is_decode() => Self::Decode(err.to_string()),
            ApiClientError::Http(err) => Self::Transport(err.to_string()),
            ApiClientError::Serde(err) => Self::Decode(err.to_string()),
            ApiClientError::Config(msg) => Self::Transport(msg),
        }
    }
}

/// Error type of the `flagdeck` binary's setup path.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use flagdeck_core::EntityType;

    fn status(code: u16) -> ClientError {
        ApiClientError::Status {
            status: code,
            problem: None,
        }
        .into()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(status(401).kind(), ErrorKind::Unauthorized);
        assert_eq!(status(403).kind(), ErrorKind::Forbidden);
        assert_eq!(status(404).kind(), ErrorKind::NotFound);
        assert_eq!(status(409).kind(), ErrorKind::Conflict);
        assert_eq!(status(500).kind(), ErrorKind::Server);
        assert_eq!(status(400).status(), Some(400));
    }

    #[test]
    fn test_user_message_prefers_detail_then_title() {
        let err: ClientError = ApiClientError::Status {
            status: 500,
            problem: Some(ProblemDetails {
                title: Some("Internal Server Error".to_string()),
                ..Default::default()
            }),
        }
        .into();
        assert_eq!(err.user_message(), "Internal Server Error");

        let err: ClientError = ApiClientError::status(409, "Alias already in use").into();
        assert_eq!(err.user_message(), "Alias already in use");

        assert_eq!(status(502).user_message(), GENERIC_MESSAGE);
    }

    #[test]
    fn test_conflict_field() {
        let err = status(409).with_conflict_field("username", "This username is already taken");
        let field = err.field_error().unwrap();
        assert_eq!(field.field, "username");
        assert_eq!(err.user_message(), "This username is already taken");

        // Non-conflicts are left alone.
        let err = status(500).with_conflict_field("username", "taken");
        assert!(err.field_error().is_none());
    }

    #[test]
    fn test_validation_message() {
        let err: ClientError = ValidationError {
            entity_type: EntityType::Scope,
            errors: vec![FieldError::new("name", "Name must be at least 2 characters")],
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.user_message(), "Name must be at least 2 characters");
    }

    #[test]
    fn test_serde_failure_is_decode() {
        let serde_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ClientError = ApiClientError::from(serde_err).into();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
