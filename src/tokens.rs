//! Authorized token store
//!
//! The daemon keeps the tokens it accepts in a JSON array of objects, each
//! with at least a `token` field. Revocation edits that file in place under
//! an exclusive lock.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One stored token with whatever else the daemon keeps next to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Result of a revocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// Tokens that were present and have been removed
    pub removed: BTreeSet<String>,
    /// Requested tokens that were not in the store
    pub not_found: BTreeSet<String>,
}

impl RevokeOutcome {
    /// True when every requested token was found
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty()
    }
}

/// File-backed token store
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Revoke every token by replacing the store with an empty list
    pub fn revoke_all(&self) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| self.edit_error(e))?;
        lock_exclusive(&file).map_err(|e| self.edit_error(e))?;

        rewrite(&mut file, b"[]").map_err(|e| self.edit_error(e))?;
        tracing::info!("Revoked all tokens in {:?}", self.path);
        Ok(())
    }

    /// Remove the given tokens, keeping every other entry untouched.
    ///
    /// Tokens that are found are removed even when others are missing; the
    /// missing ones are listed in the outcome. The file is only rewritten
    /// when something was removed.
    pub fn revoke(&self, tokens: &[String]) -> Result<RevokeOutcome> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.edit_error(e))?;
        lock_exclusive(&file).map_err(|e| self.edit_error(e))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| self.edit_error(e))?;
        let entries: Vec<TokenEntry> =
            serde_json::from_str(&content).map_err(|e| Error::TokenStoreParse {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let requested: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
        let mut outcome = RevokeOutcome::default();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            if requested.contains(entry.token.as_str()) {
                outcome.removed.insert(entry.token);
            } else {
                kept.push(entry);
            }
        }

        outcome.not_found = requested
            .into_iter()
            .filter(|t| !outcome.removed.contains(*t))
            .map(str::to_string)
            .collect();

        if !outcome.removed.is_empty() {
            let data = serde_json::to_string_pretty(&kept)?;
            rewrite(&mut file, data.as_bytes()).map_err(|e| self.edit_error(e))?;
            tracing::info!("Removed {} token(s) from {:?}", outcome.removed.len(), self.path);
        }

        for token in &outcome.not_found {
            tracing::warn!("Token '{}' was not found in {:?}", token, self.path);
        }

        Ok(outcome)
    }

    /// Read the current entries
    #[cfg(test)]
    pub fn entries(&self) -> Result<Vec<TokenEntry>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.edit_error(e))?;
        serde_json::from_str(&content).map_err(|e| Error::TokenStoreParse {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn edit_error(&self, source: std::io::Error) -> Error {
        Error::TokenStoreEdit {
            path: self.path.clone(),
            source,
        }
    }
}

/// Take an exclusive advisory lock, released when the file is closed
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    flock(file.as_raw_fd(), FlockArg::LockExclusive).map_err(std::io::Error::from)
}

/// Truncate and rewrite through the already open handle
fn rewrite(file: &mut File, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.set_len(0)?;
    file.write_all(data)?;
    file.sync_all()
}
