//! Revocation registry for refresh tokens.
//!
//! A refresh token is only honoured while its JTI has an unexpired entry here.
//! Logout deletes one entry, logout-everywhere deletes every entry for a
//! subject. Backends: [`MemoryRegistry`] and the SQLite
//! [`TokenStore`](crate::db::TokenStore).

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// A registered refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub jti: String,
    /// Subject (user UUID) the token was issued to
    pub subject: String,
    /// Issued at (Unix timestamp)
    pub issued_at: u64,
    /// Expiration time (Unix timestamp)
    pub expires_at: u64,
}

impl RegistryEntry {
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// Key-value contract every registry backend satisfies.
///
/// Any storage failure is reported as [`RegistryError::Unavailable`] and must
/// never be read as "valid" or "invalid".
#[async_trait]
pub trait RefreshRegistry: Send + Sync {
    /// Insert or overwrite an entry.
    async fn put(&self, entry: RegistryEntry) -> Result<(), RegistryError>;

    /// Look up an entry by JTI, expired or not.
    async fn lookup(&self, jti: &str) -> Result<Option<RegistryEntry>, RegistryError>;

    /// Remove one entry. Returns whether anything was removed.
    async fn revoke(&self, jti: &str) -> Result<bool, RegistryError>;

    /// Remove every entry for a subject. Returns the number removed.
    async fn revoke_all(&self, subject: &str) -> Result<u64, RegistryError>;

    /// Swap `old_jti` for `new` in one step, with no window in which neither
    /// is valid. Returns false and registers nothing if `old_jti` is no longer
    /// present, so a revocation that lands first always wins.
    async fn replace(&self, new: RegistryEntry, old_jti: &str) -> Result<bool, RegistryError>;

    /// Unexpired entries for a subject, newest first.
    async fn list(&self, subject: &str, now: u64) -> Result<Vec<RegistryEntry>, RegistryError>;

    /// Delete entries that expired at or before `now`. Returns the number removed.
    async fn sweep_expired(&self, now: u64) -> Result<u64, RegistryError>;

    /// True iff an entry exists and has not expired.
    async fn is_valid(&self, jti: &str, now: u64) -> Result<bool, RegistryError> {
        Ok(self
            .lookup(jti)
            .await?
            .is_some_and(|entry| entry.is_live(now)))
    }
}

/// In-memory registry.
///
/// One lock guards both the JTI map and the per-subject index, so every
/// operation is linearizable. Lookups take the read lock and never block
/// each other.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    by_jti: HashMap<String, RegistryEntry>,
    by_subject: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn insert(&mut self, entry: RegistryEntry) {
        if let Some(previous) = self.by_jti.get(&entry.jti) {
            if previous.subject != entry.subject {
                let previous_subject = previous.subject.clone();
                self.unindex(&previous_subject, &entry.jti);
            }
        }
        self.by_subject
            .entry(entry.subject.clone())
            .or_default()
            .insert(entry.jti.clone());
        self.by_jti.insert(entry.jti.clone(), entry);
    }

    fn remove(&mut self, jti: &str) -> bool {
        match self.by_jti.remove(jti) {
            Some(entry) => {
                self.unindex(&entry.subject, jti);
                true
            }
            None => false,
        }
    }

    fn unindex(&mut self, subject: &str, jti: &str) {
        if let Some(set) = self.by_subject.get_mut(subject) {
            set.remove(jti);
            if set.is_empty() {
                self.by_subject.remove(subject);
            }
        }
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, RegistryError> {
        self.inner
            .read()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, RegistryError> {
        self.inner
            .write()
            .map_err(|_| RegistryError::Unavailable("registry lock poisoned".into()))
    }
}

#[async_trait]
impl RefreshRegistry for MemoryRegistry {
    async fn put(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        self.write()?.insert(entry);
        Ok(())
    }

    async fn lookup(&self, jti: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        Ok(self.read()?.by_jti.get(jti).cloned())
    }

    async fn revoke(&self, jti: &str) -> Result<bool, RegistryError> {
        Ok(self.write()?.remove(jti))
    }

    async fn revoke_all(&self, subject: &str) -> Result<u64, RegistryError> {
        let mut state = self.write()?;
        let Some(jtis) = state.by_subject.remove(subject) else {
            return Ok(0);
        };
        for jti in &jtis {
            state.by_jti.remove(jti);
        }
        Ok(jtis.len() as u64)
    }

    async fn replace(&self, new: RegistryEntry, old_jti: &str) -> Result<bool, RegistryError> {
        let mut state = self.write()?;
        if !state.remove(old_jti) {
            return Ok(false);
        }
        state.insert(new);
        Ok(true)
    }

    async fn list(&self, subject: &str, now: u64) -> Result<Vec<RegistryEntry>, RegistryError> {
        let state = self.read()?;
        let mut entries: Vec<RegistryEntry> = state
            .by_subject
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(|jti| state.by_jti.get(jti))
            .filter(|entry| entry.is_live(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(entries)
    }

    async fn sweep_expired(&self, now: u64) -> Result<u64, RegistryError> {
        let mut state = self.write()?;
        let expired: Vec<String> = state
            .by_jti
            .values()
            .filter(|entry| !entry.is_live(now))
            .map(|entry| entry.jti.clone())
            .collect();
        for jti in &expired {
            state.remove(jti);
        }
        Ok(expired.len() as u64)
    }
}

/// Registry failures. Always fail closed.
#[derive(Debug)]
pub enum RegistryError {
    /// The backing store could not answer
    Unavailable(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Unavailable(e) => write!(f, "Registry unavailable: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Unavailable(e.to_string())
    }
}
