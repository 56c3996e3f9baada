//! FLAGDECK Core - Entity Types
//!
//! Data structures shared by every other crate: typed ids, entities, request
//! bodies, form validation and the permission evaluator. No I/O.

pub mod dtos;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;
pub mod permission;
pub mod validation;

pub use dtos::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use permission::{
    can_perform_project_action, can_perform_scope_action, has_project_permission,
    has_scope_permission, is_admin, PermissionContext, PermissionSet,
};
pub use validation::Validate;
