//! Error types for flagdeck core operations

use crate::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single failed form rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Wire name of the offending field (camelCase, as the form knows it).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Client-side validation failure. Never reaches the network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Validation failed for {entity_type}: {}", join_fields(.errors))]
pub struct ValidationError {
    pub entity_type: EntityType,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// The message for `field`, if that field failed.
    pub fn message_for(&self, field: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.message.as_str())
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.message_for(field).is_some()
    }
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Problem-details error body (RFC 7807 shape). Every member is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    pub problem_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub instance: Option<String>,
}

impl ProblemDetails {
    /// The text a UI should surface: `detail`, falling back to `title`.
    pub fn message(&self) -> Option<&str> {
        non_blank(self.detail.as_deref()).or_else(|| non_blank(self.title.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Master error type for core operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization error for {entity_type}: {reason}")]
    Serialization {
        entity_type: EntityType,
        reason: String,
    },
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
