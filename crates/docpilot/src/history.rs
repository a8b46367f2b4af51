//! Session history archive.
//!
//! Persists each conversation session as one JSON file under
//! `[history].dir` so history survives restarts:
//!
//! ```text
//! conversation_history/
//!   session_<sha256(key) hex>.json    ← ConversationSession
//! ```
//!
//! Writes go to a temporary file that is then renamed over the target, so
//! readers never see a half-written session. Saves are serialized through
//! one lock and always write the store's latest snapshot.
//!
//! A file that cannot be loaded is renamed to
//! `session_<hex>.json.corrupt-<uuid>` before the key gets a fresh
//! session. If it cannot be moved either, the key is held and never saved,
//! so an unreadable archive is never overwritten.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};

use anyhow::{bail, Context, Result};
use docpilot_core::{ConversationSession, SessionStore};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

pub struct HistoryArchive {
    dir: PathBuf,
    write_lock: Mutex<()>,
    /// Keys whose unreadable file is still in place.
    held: StdMutex<HashSet<String>>,
}

impl HistoryArchive {
    /// Open (creating if needed) the archive directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create history dir: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
            held: StdMutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir
            .join(format!("session_{}.json", hex::encode(hasher.finalize())))
    }

    /// Load the archived session for `key`, if one exists.
    pub async fn load(&self, key: &str) -> Result<Option<ConversationSession>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let session: ConversationSession = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        if session.key != key {
            bail!(
                "{} holds session '{}', expected '{}'",
                path.display(),
                session.key,
                key
            );
        }
        session
            .validate()
            .with_context(|| format!("Invalid archived session in {}", path.display()))?;
        Ok(Some(session))
    }

    /// Rename the file for `key` out of the way.
    ///
    /// Returns the new path, or `None` when there was no file.
    pub async fn quarantine(&self, key: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(key);
        let target = path.with_extension(format!("json.corrupt-{}", uuid::Uuid::new_v4()));
        match tokio::fs::rename(&path, &target).await {
            Ok(()) => Ok(Some(target)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to move aside {}", path.display())),
        }
    }

    /// Stop saving `key` until restart.
    pub fn hold(&self, key: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Write the latest snapshot of `key` from `sessions`.
    ///
    /// Fails without writing when `key` is held.
    pub async fn persist_latest(&self, sessions: &SessionStore, key: &str) -> Result<()> {
        if self.is_held(key) {
            bail!(
                "archive for session '{}' could not be read or moved aside; not overwriting it",
                key
            );
        }
        let _guard = self.write_lock.lock().await;
        let Some(session) = sessions.snapshot(key) else {
            return Ok(());
        };
        self.write(&session).await
    }

    async fn write(&self, session: &ConversationSession) -> Result<()> {
        let path = self.path_for(&session.key);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(session)?;

        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to replace {}", path.display()));
        }

        debug!(session = %session.key, turns = session.len(), path = %path.display(), "session archived");
        Ok(())
    }
}
