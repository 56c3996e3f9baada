//! User-facing notifications.
//!
//! Messages follow two fixed patterns: `"{Entity} {action} successfully"` and
//! `"Failed to {action} {entity}. {reason}"`.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Retry,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    /// `"{Entity} {action} successfully"`, e.g. `success("project", "created")`.
    pub fn success(entity: &str, action: &str) -> Self {
        Self::new(
            NotificationLevel::Success,
            format!("{} {} successfully", capitalize(entity), action),
        )
    }

    /// `"Failed to {action} {entity}. {reason}"`; the reason is optional.
    pub fn error(entity: &str, action: &str, reason: Option<&str>) -> Self {
        let message = match reason.filter(|r| !r.trim().is_empty()) {
            Some(reason) => format!("Failed to {} {}. {}", action, entity, reason),
            None => format!("Failed to {} {}", action, entity),
        };
        Self::new(NotificationLevel::Error, message).with_action(NotificationAction::Dismiss)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Bounded queue of pending notifications. The oldest is dropped when full.
#[derive(Debug)]
pub struct NotificationCenter {
    queue: VecDeque<Notification>,
    capacity: usize,
}

impl NotificationCenter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, notification: Notification) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(notification);
    }

    pub fn dismiss(&mut self, index: usize) -> Option<Notification> {
        self.queue.remove(index)
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        self.queue.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notification> {
        self.queue.iter()
    }

    pub fn latest(&self) -> Option<&Notification> {
        self.queue.back()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
