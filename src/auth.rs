//! Signed-in identity with an explicit hydration lifecycle.
//!
//! LIFECYCLE
//! =========
//! `Uninitialized -> Hydrating -> Ready`. The persisted session file is read
//! once by [`AuthStore::hydrate`]; until then [`AuthSnapshot::credential`]
//! is `None`, so nothing acts on auth flags that have not been loaded yet.
//!
//! Every change is published on a `watch` channel. The chat session reacts
//! to it: a cleared credential tears the realtime connection down, a new
//! identity rebuilds it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::ChatError;
use crate::model::StaffUser;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthPhase {
    #[default]
    Uninitialized,
    Hydrating,
    Ready,
}

/// A staff member and the bearer credential issued to them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthIdentity {
    pub user: StaffUser,
    pub access_token: String,
}

/// What observers see of the auth store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub identity: Option<AuthIdentity>,
}

impl AuthSnapshot {
    /// The identity, once hydrated and only when both the user id and the
    /// token are non-empty.
    #[must_use]
    pub fn credential(&self) -> Option<&AuthIdentity> {
        if self.phase != AuthPhase::Ready {
            return None;
        }
        self.identity
            .as_ref()
            .filter(|identity| !identity.access_token.is_empty() && !identity.user.id.is_empty())
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credential().is_some()
    }
}

/// On-disk shape of the session file.
#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedAuth {
    #[serde(default)]
    user: Option<StaffUser>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    is_authenticated: bool,
}

pub struct AuthStore {
    path: PathBuf,
    state: watch::Sender<AuthSnapshot>,
}

impl AuthStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self { path: path.into(), state }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn phase(&self) -> AuthPhase {
        self.state.borrow().phase
    }

    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn credential(&self) -> Option<AuthIdentity> {
        self.state.borrow().credential().cloned()
    }

    /// Load the persisted session.
    ///
    /// A missing file means signed out. An unreadable or corrupt file also
    /// means signed out, with a warning; hydration itself never fails.
    pub fn hydrate(&self) -> AuthSnapshot {
        self.state.send_modify(|snapshot| snapshot.phase = AuthPhase::Hydrating);

        let identity = match read_persisted(&self.path) {
            Ok(Some(persisted)) => identity_from(persisted),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable auth file");
                None
            }
        };
        tracing::info!(signed_in = identity.is_some(), "auth hydrated");
        self.publish(identity)
    }

    /// Store a credential issued elsewhere and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error when the session file cannot be written; the
    /// in-memory state is left unchanged in that case.
    pub fn set_auth(&self, user: StaffUser, access_token: String) -> Result<AuthSnapshot, ChatError> {
        let persisted = PersistedAuth {
            user: Some(user.clone()),
            access_token: Some(access_token.clone()),
            is_authenticated: true,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(&persisted)?)?;
        tracing::info!(user_id = %user.id, "credential stored");
        Ok(self.publish(Some(AuthIdentity { user, access_token })))
    }

    /// Forget the credential and remove the session file.
    ///
    /// # Errors
    ///
    /// Returns an error when an existing session file cannot be removed.
    /// The in-memory credential is cleared regardless.
    pub fn clear_auth(&self) -> Result<AuthSnapshot, ChatError> {
        let snapshot = self.publish(None);
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!("credential cleared");
        Ok(snapshot)
    }

    fn publish(&self, identity: Option<AuthIdentity>) -> AuthSnapshot {
        let snapshot = AuthSnapshot { phase: AuthPhase::Ready, identity };
        self.state.send_replace(snapshot.clone());
        snapshot
    }
}

fn read_persisted(path: &Path) -> Result<Option<PersistedAuth>, ChatError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn identity_from(persisted: PersistedAuth) -> Option<AuthIdentity> {
    if !persisted.is_authenticated {
        return None;
    }
    let user = persisted.user?;
    let access_token = persisted.access_token.filter(|token| !token.is_empty())?;
    Some(AuthIdentity { user, access_token })
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
