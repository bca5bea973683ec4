//! Session gate: resolves who is opening a booking workflow
//!
//! The identity claims are read from an [`IdentityProvider`]. The file-backed
//! provider stores unvalidated role claims, the same way the web client kept
//! them in local storage; it is a convenience, not an access-control layer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::workflow::WorkflowError;

/// Role claimed by the signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        }
    }
}

/// Identity the workflow runs on behalf of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
}

/// Source of the current session
pub trait IdentityProvider: Send + Sync {
    /// Current session, or `None` when nobody is signed in
    fn current_session(&self) -> Result<Option<SessionContext>>;
}

/// Resolve the session a workflow may start for.
///
/// Read-only. A missing session and an unreadable session store both map to
/// `Unauthenticated`, which callers answer by sending the user to sign in.
pub fn resolve_session(provider: &dyn IdentityProvider) -> Result<SessionContext, WorkflowError> {
    match provider.current_session() {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(WorkflowError::Unauthenticated),
        Err(e) => {
            tracing::warn!("Could not read session: {:#}", e);
            Err(WorkflowError::Unauthenticated)
        }
    }
}

/// Session claims stored as JSON in the data directory
pub struct FileIdentityProvider {
    path: PathBuf,
}

impl FileIdentityProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store the claims, replacing any previous session
    pub fn sign_in(&self, session: &SessionContext) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write session file: {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the stored claims. Returns whether a session existed.
    pub fn sign_out(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&self.path)
            .with_context(|| format!("Failed to remove session file: {}", self.path.display()))?;
        Ok(true)
    }
}

impl IdentityProvider for FileIdentityProvider {
    fn current_session(&self) -> Result<Option<SessionContext>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session file: {}", self.path.display()))?;
        let session: SessionContext = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", self.path.display()))?;

        Ok(Some(session))
    }
}

/// Fixed session, for embedding and tests
pub struct StaticIdentityProvider(pub Option<SessionContext>);

impl IdentityProvider for StaticIdentityProvider {
    fn current_session(&self) -> Result<Option<SessionContext>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn patient() -> SessionContext {
        SessionContext {
            user_id: "p-100".to_string(),
            display_name: "Ada Patient".to_string(),
            role: Role::Patient,
        }
    }

    #[test]
    fn missing_session_is_unauthenticated() {
        let provider = StaticIdentityProvider(None);
        assert_eq!(
            resolve_session(&provider),
            Err(WorkflowError::Unauthenticated)
        );
    }

    #[test]
    fn file_provider_round_trips_claims() {
        let tmp = tempdir().unwrap();
        let provider = FileIdentityProvider::new(tmp.path().join("session.json"));

        assert!(provider.current_session().unwrap().is_none());

        provider.sign_in(&patient()).unwrap();
        assert_eq!(resolve_session(&provider).unwrap(), patient());

        assert!(provider.sign_out().unwrap());
        assert!(!provider.sign_out().unwrap());
        assert_eq!(
            resolve_session(&provider),
            Err(WorkflowError::Unauthenticated)
        );
    }

    #[test]
    fn corrupt_session_file_is_unauthenticated() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let provider = FileIdentityProvider::new(path);
        assert_eq!(
            resolve_session(&provider),
            Err(WorkflowError::Unauthenticated)
        );
    }
}
