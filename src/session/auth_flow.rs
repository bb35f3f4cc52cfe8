//! Sign-in progress that survives full-page redirects.
//!
//! The host records which step it is on before navigating away and resumes from
//! the stored marker when it comes back. Re-entering the same step counts as a
//! hop; too many hops means the identity provider is bouncing us in a loop.

use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::models::AppSettings;
use crate::utils::{AppError, AppResult};

const MARKER_KEY: &str = "auth_step_marker";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthStep {
    #[default]
    None,
    LoginRedirect,
    AcquiringPlatformScope,
    AcquiringAdminScope,
}

impl AuthStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthStep::None => "none",
            AuthStep::LoginRedirect => "login_redirect",
            AuthStep::AcquiringPlatformScope => "acquiring_platform_scope",
            AuthStep::AcquiringAdminScope => "acquiring_admin_scope",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepMarker {
    pub step: AuthStep,
    pub hops: u32,
}

/// Durable home for the step marker.
pub trait StepStore {
    fn load_marker(&self) -> AppResult<Option<StepMarker>>;
    fn save_marker(&self, marker: &StepMarker) -> AppResult<()>;
    fn clear_marker(&self) -> AppResult<()>;
}

impl StepStore for Database {
    fn load_marker(&self) -> AppResult<Option<StepMarker>> {
        match self.get_setting(MARKER_KEY)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(marker) => Ok(Some(marker)),
                Err(e) => {
                    log::warn!("Discarding unreadable auth step marker: {}", e);
                    self.delete_setting(MARKER_KEY)?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    fn save_marker(&self, marker: &StepMarker) -> AppResult<()> {
        self.set_setting(MARKER_KEY, &serde_json::to_string(marker)?)
    }

    fn clear_marker(&self) -> AppResult<()> {
        self.delete_setting(MARKER_KEY)
    }
}

pub struct AuthStepMachine<'a> {
    store: &'a dyn StepStore,
    max_hops: u32,
}

impl<'a> AuthStepMachine<'a> {
    pub fn new(store: &'a dyn StepStore, max_hops: u32) -> Self {
        Self { store, max_hops }
    }

    /// Machine bounded by the configured `maxAuthHops`.
    pub fn from_settings(store: &'a dyn StepStore, settings: &AppSettings) -> Self {
        Self::new(store, settings.max_auth_hops)
    }

    /// Record that `step` is about to start (usually right before a redirect).
    /// Fails with `AuthLoop` once the same step has been entered more than
    /// `max_hops` times in a row; the marker is cleared so the next attempt
    /// starts fresh.
    pub fn begin(&self, step: AuthStep) -> AppResult<StepMarker> {
        let hops = match self.store.load_marker()? {
            Some(current) if current.step == step => current.hops + 1,
            _ => 1,
        };
        if hops > self.max_hops {
            self.store.clear_marker()?;
            log::warn!("Sign-in stuck at {} after {} hops", step.as_str(), self.max_hops);
            return Err(AppError::AuthLoop(self.max_hops));
        }
        let marker = StepMarker { step, hops };
        self.store.save_marker(&marker)?;
        log::debug!("Auth step {} (hop {})", step.as_str(), hops);
        Ok(marker)
    }

    /// Step to continue from after a redirect; `None` when no flow is in progress.
    pub fn resume(&self) -> AppResult<AuthStep> {
        Ok(self.store.load_marker()?.map(|m| m.step).unwrap_or_default())
    }

    pub fn complete(&self) -> AppResult<()> {
        self.store.clear_marker()?;
        log::info!("Sign-in complete");
        Ok(())
    }

    pub fn reset(&self) -> AppResult<()> {
        self.store.clear_marker()
    }
}
