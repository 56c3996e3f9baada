//! The signed-in session.
//!
//! A [`Session`] owns the current [`User`] and ties the cache's lifetime to
//! it: signing in starts with an empty cache and signing out (explicitly or
//! through an expired cookie) clears it.

use crate::api::FlagApi;
use crate::error::{ClientError, ClientResult, ErrorKind};
use flagdeck_cache::CacheStore;
use flagdeck_core::{ChangePasswordRequest, LoginRequest, User, Validate};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Why the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutReason {
    /// The user asked to log out.
    Logout,
    /// The server answered 401.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SignedIn(User),
    /// The front end should send the user to the login screen.
    SignedOut(SignOutReason),
}

pub struct Session {
    api: Arc<dyn FlagApi>,
    cache: Arc<CacheStore>,
    user: RwLock<Option<User>>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.current_user())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(api: Arc<dyn FlagApi>, cache: Arc<CacheStore>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            api,
            cache,
            user: RwLock::new(None),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The signed-in user must pick a new password before doing anything else.
    pub fn needs_password_change(&self) -> bool {
        self.user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|u| u.must_change_password)
    }

    fn set_user(&self, user: Option<User>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Sign in. A 401 here means bad credentials, not an expired session.
    pub async fn login(&self, username: &str, password: &str) -> ClientResult<User> {
        let req = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        req.validate()?;

        let user = self.api.login(&req).await?;
        self.cache.clear()?;
        self.set_user(Some(user.clone()));
        tracing::info!(username = %user.username, "signed in");
        self.publish(SessionEvent::SignedIn(user.clone()));
        Ok(user)
    }

    /// Sign out. Local state is dropped even when the server call fails.
    pub async fn logout(&self) -> ClientResult<()> {
        let result = self.api.logout().await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, "logout request failed; clearing local session anyway");
        }
        self.sign_out(SignOutReason::Logout);
        result.map_err(ClientError::from)
    }

    /// Ask the server who is signed in. Any failure counts as signed out.
    pub async fn check_auth(&self) -> Option<User> {
        match self.api.me().await {
            Ok(user) => {
                self.set_user(Some(user.clone()));
                Some(user)
            }
            Err(err) => {
                tracing::debug!(error = %err, "no active session");
                if self.is_authenticated() {
                    self.sign_out(SignOutReason::Expired);
                }
                None
            }
        }
    }

    pub async fn change_password(&self, req: &ChangePasswordRequest) -> ClientResult<()> {
        req.validate()?;
        match self.api.change_password(req).await {
            Ok(()) => {
                if let Some(user) = self
                    .user
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .as_mut()
                {
                    user.must_change_password = false;
                }
                Ok(())
            }
            Err(err) => {
                let err = ClientError::from(err);
                self.handle_error(&err);
                Err(err)
            }
        }
    }

    /// Global reaction to a failed request.
    ///
    /// 401 ends the session. 403 is logged and left to the caller.
    pub fn handle_error(&self, err: &ClientError) {
        match err.kind() {
            ErrorKind::Unauthorized => {
                tracing::info!("session expired; signing out");
                self.sign_out(SignOutReason::Expired);
            }
            ErrorKind::Forbidden => {
                let message = err
                    .problem()
                    .and_then(|p| p.message())
                    .unwrap_or("You do not have permission to perform this action");
                tracing::warn!(message, "request forbidden");
            }
            _ => {}
        }
    }

    fn sign_out(&self, reason: SignOutReason) {
        self.set_user(None);
        if let Err(err) = self.cache.clear() {
            tracing::warn!(error = %err, "failed to clear cache on sign-out");
        }
        self.publish(SessionEvent::SignedOut(reason));
    }
}
