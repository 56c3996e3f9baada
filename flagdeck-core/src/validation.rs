//! Client-side form validation.
//!
//! Every request body is checked before it is sent. Failures are collected
//! per field so a form can show all of them at once.

use crate::dtos::*;
use crate::{EntityType, FieldError, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;

pub const DESCRIPTION_MAX: usize = 1000;
pub const NAME_MAX: usize = 255;
pub const PROJECT_NAME_MIN: usize = 3;
pub const PROJECT_ALIAS_MIN: usize = 3;
pub const SCOPE_NAME_MIN: usize = 2;
pub const FLAG_NAME_MIN: usize = 2;
pub const FLAG_KEY_MIN: usize = 2;
pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 100;

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static username pattern"));

/// Form-level validation of a request body.
pub trait Validate {
    /// Check every rule, reporting all failing fields together.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Accumulates field failures for one entity.
struct Rules {
    entity_type: EntityType,
    errors: Vec<FieldError>,
}

impl Rules {
    fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn length(&mut self, field: &str, label: &str, value: &str, min: usize, max: usize) {
        let len = value.trim().chars().count();
        if len < min {
            if min == 1 {
                self.fail(field, format!("{} is required", label));
            } else {
                self.fail(field, format!("{} must be at least {} characters", label, min));
            }
        } else if len > max {
            self.fail(field, format!("{} must not exceed {} characters", label, max));
        }
    }

    fn description(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            if value.chars().count() > DESCRIPTION_MAX {
                self.fail(
                    "description",
                    format!("Description must not exceed {} characters", DESCRIPTION_MAX),
                );
            }
        }
    }

    fn password(&mut self, field: &str, value: &str) {
        let len = value.chars().count();
        if len < PASSWORD_MIN {
            self.fail(field, format!("Password must be at least {} characters", PASSWORD_MIN));
        } else if len > PASSWORD_MAX {
            self.fail(field, format!("Password must not exceed {} characters", PASSWORD_MAX));
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                entity_type: self.entity_type,
                errors: self.errors,
            })
        }
    }
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Session);
        rules.length("username", "Username", &self.username, 1, USERNAME_MAX);
        if self.password.is_empty() {
            rules.fail("password", "Password is required");
        }
        rules.finish()
    }
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Session);
        if self.current_password.is_empty() {
            rules.fail("currentPassword", "Current password is required");
        }
        rules.password("newPassword", &self.new_password);
        if self.new_password != self.confirm_password {
            rules.fail("confirmPassword", "Passwords don't match");
        }
        rules.finish()
    }
}

impl Validate for CreateProjectRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Project);
        rules.length("name", "Name", &self.name, PROJECT_NAME_MIN, NAME_MAX);
        rules.length("alias", "Alias", &self.alias, PROJECT_ALIAS_MIN, NAME_MAX);
        if self.alias.chars().any(char::is_whitespace) {
            rules.fail("alias", "Alias must not contain spaces");
        }
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for UpdateProjectRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Project);
        rules.length("name", "Name", &self.name, PROJECT_NAME_MIN, NAME_MAX);
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for CreateScopeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Scope);
        rules.length("name", "Name", &self.name, SCOPE_NAME_MIN, NAME_MAX);
        if let Some(alias) = &self.alias {
            rules.length("alias", "Alias", alias, SCOPE_NAME_MIN, NAME_MAX);
            if alias.chars().any(char::is_whitespace) {
                rules.fail("alias", "Alias must not contain spaces");
            }
        }
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for UpdateScopeRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::Scope);
        rules.length("name", "Name", &self.name, SCOPE_NAME_MIN, NAME_MAX);
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for CreateFeatureFlagRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::FeatureFlag);
        rules.length("name", "Name", &self.name, FLAG_NAME_MIN, NAME_MAX);
        if let Some(key) = &self.key {
            rules.length("key", "Key", key, FLAG_KEY_MIN, NAME_MAX);
        }
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for UpdateFeatureFlagRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::FeatureFlag);
        rules.length("name", "Name", &self.name, FLAG_NAME_MIN, NAME_MAX);
        rules.length("key", "Key", &self.key, FLAG_KEY_MIN, NAME_MAX);
        rules.description(self.description.as_deref());
        rules.finish()
    }
}

impl Validate for UpdateFeatureFlagValueRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for InviteUserRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::ProjectUser);
        if self.total_permissions() == 0 {
            rules.fail("permissions", "Please assign at least one permission");
        }
        rules.finish()
    }
}

impl Validate for UpdateUserPermissionsRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::User);
        rules.length("username", "Username", &self.username, USERNAME_MIN, USERNAME_MAX);
        if !self.username.is_empty() && !USERNAME_PATTERN.is_match(&self.username) {
            rules.fail(
                "username",
                "Username can only contain letters, numbers, hyphens, and underscores",
            );
        }
        rules.length("fullName", "Full name", &self.full_name, 1, NAME_MAX);
        rules.password("temporaryPassword", &self.temporary_password);
        rules.finish()
    }
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut rules = Rules::new(EntityType::User);
        rules.length("fullName", "Full name", &self.full_name, 1, NAME_MAX);
        rules.finish()
    }
}
