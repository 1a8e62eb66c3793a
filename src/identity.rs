//! Clock identity and its on-disk persistence.
//!
//! DESIGN
//! ======
//! Each installation owns one `ClockIdentity`: an opaque id used by the
//! relay to tell clocks apart, and an operator-editable display name. The
//! identity is created on first start, persisted as JSON, and rewritten in
//! place when renamed or when the relay reports an id clash.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("identity file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockIdentity {
    #[serde(rename = "clockID")]
    pub id: String,
    #[serde(rename = "clockName")]
    pub display_name: String,
}

impl ClockIdentity {
    /// Fresh identity with a random id.
    #[must_use]
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self { id: generate_clock_id(), display_name: display_name.into() }
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Random 16-byte hex clock id.
#[must_use]
pub fn generate_clock_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Owner of this clock's identity.
pub struct IdentityStore {
    path: Option<PathBuf>,
    identity: ClockIdentity,
}

impl IdentityStore {
    /// Load the identity stored at `path`, creating and persisting a new one
    /// named `default_name` if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] if the file cannot be read, parsed, or
    /// (on first start) written.
    pub fn load_or_create(path: impl AsRef<Path>, default_name: &str) -> Result<Self, IdentityError> {
        let path = path.as_ref().to_path_buf();
        match std::fs::read(&path) {
            Ok(bytes) => {
                let identity: ClockIdentity =
                    serde_json::from_slice(&bytes).map_err(|source| IdentityError::Json { path: path.clone(), source })?;
                info!(clock_id = %identity.id, path = %path.display(), "identity: loaded");
                Ok(Self { path: Some(path), identity })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let store = Self { path: Some(path), identity: ClockIdentity::generate(default_name) };
                store.persist(&store.identity)?;
                info!(clock_id = %store.identity.id, "identity: created");
                Ok(store)
            }
            Err(source) => Err(IdentityError::Io { path, source }),
        }
    }

    /// Identity kept only in memory. Used by tests and ephemeral clocks.
    #[must_use]
    pub fn in_memory(identity: ClockIdentity) -> Self {
        Self { path: None, identity }
    }

    #[must_use]
    pub fn current(&self) -> &ClockIdentity {
        &self.identity
    }

    /// Change the display name. The id is untouched.
    ///
    /// The new identity is written before it replaces the current one, so a
    /// failed write leaves the store as it was.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] if the identity cannot be persisted.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), IdentityError> {
        let next = ClockIdentity { id: self.identity.id.clone(), display_name: name.into() };
        self.commit(next)
    }

    /// Replace the id with a new random one and persist it.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] if the identity cannot be persisted. The
    /// current id is kept in that case.
    pub fn regenerate_id(&mut self) -> Result<String, IdentityError> {
        let mut id = generate_clock_id();
        while id == self.identity.id {
            id = generate_clock_id();
        }
        self.commit(ClockIdentity { id: id.clone(), display_name: self.identity.display_name.clone() })?;
        Ok(id)
    }

    fn commit(&mut self, next: ClockIdentity) -> Result<(), IdentityError> {
        self.persist(&next)?;
        self.identity = next;
        Ok(())
    }

    fn persist(&self, identity: &ClockIdentity) -> Result<(), IdentityError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(identity)
            .map_err(|source| IdentityError::Json { path: path.clone(), source })?;
        std::fs::write(path, json).map_err(|source| IdentityError::Io { path: path.clone(), source })
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
