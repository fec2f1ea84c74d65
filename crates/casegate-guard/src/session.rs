//! Session guard: persisted idempotency tokens for case openings.
//!
//! A token is minted when a case opening is dispatched and written through
//! to a [`SessionStore`] before the ledger is called. If the page reloads
//! (or a second tab starts) while the first request is still unresolved,
//! the hydrated guard finds the live token and refuses a second dispatch
//! with [`CasegateError::SessionInFlight`], handing back the session id so
//! the caller can reattach instead.
//!
//! Tokens are keyed by `(user, resource)`. A consumed or expired token no
//! longer blocks a fresh attempt.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use casegate_types::{CasegateError, IdempotencyToken, Result, SessionId, UserId};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

/// Durable backing for session tokens, shared by every guard opened on it.
pub trait SessionStore: Send + Sync {
    /// Read every stored token. An empty store yields an empty vec.
    fn load(&self) -> Result<Vec<IdempotencyToken>>;

    /// Replace the stored snapshot.
    fn persist(&self, tokens: &[IdempotencyToken]) -> Result<()>;

    /// Read, modify, and write back the stored snapshot. `apply` returns
    /// whether it changed anything; nothing is written otherwise, nor when
    /// it fails.
    ///
    /// The default reads and writes separately, so two processes updating
    /// one file can still race between the two.
    fn update(&self, apply: &mut dyn FnMut(&mut Vec<IdempotencyToken>) -> Result<bool>) -> Result<()> {
        let mut tokens = self.load()?;
        if apply(&mut tokens)? {
            self.persist(&tokens)?;
        }
        Ok(())
    }
}

/// Process-local store. Survives guard re-creation, not process restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    tokens: Mutex<Vec<IdempotencyToken>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<IdempotencyToken>>> {
        self.tokens
            .lock()
            .map_err(|_| CasegateError::Internal("session store poisoned".to_string()))
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Vec<IdempotencyToken>> {
        Ok(self.lock()?.clone())
    }

    fn persist(&self, tokens: &[IdempotencyToken]) -> Result<()> {
        *self.lock()? = tokens.to_vec();
        Ok(())
    }

    /// Holds the store lock across the whole update.
    fn update(&self, apply: &mut dyn FnMut(&mut Vec<IdempotencyToken>) -> Result<bool>) -> Result<()> {
        let mut stored = self.lock()?;
        let mut tokens = stored.clone();
        if apply(&mut tokens)? {
            *stored = tokens;
        }
        Ok(())
    }
}

impl<S: SessionStore + ?Sized> SessionStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Vec<IdempotencyToken>> {
        (**self).load()
    }

    fn persist(&self, tokens: &[IdempotencyToken]) -> Result<()> {
        (**self).persist(tokens)
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Vec<IdempotencyToken>) -> Result<bool>) -> Result<()> {
        (**self).update(apply)
    }
}

/// JSON file store. A missing file is an empty store.
///
/// Writes go to a sibling `.tmp` file and are renamed into place so a crash
/// mid-write never leaves a truncated snapshot.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Vec<IdempotencyToken>> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, tokens: &[IdempotencyToken]) -> Result<()> {
        let json = serde_json::to_vec_pretty(tokens)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

type TokenKey = (UserId, Uuid);

fn key_of(token: &IdempotencyToken) -> TokenKey {
    (token.user_id, token.resource_id)
}

/// Issues, tracks, and consumes idempotency tokens, writing through to a
/// [`SessionStore`].
///
/// The store is the source of truth: every operation re-reads it, so guards
/// sharing one store (a reloaded page next to the old one, two tabs) see
/// each other's tokens. The in-memory map is the snapshot from the last
/// operation.
#[derive(Debug)]
pub struct SessionGuard<S> {
    store: S,
    ttl_ms: u64,
    tokens: Mutex<HashMap<TokenKey, IdempotencyToken>>,
}

impl<S: SessionStore> SessionGuard<S> {
    /// Hydrate a guard from `store`. Tokens already expired at `now_ms` are
    /// dropped on load.
    ///
    /// # Errors
    /// Propagates store read failures.
    pub fn open(store: S, ttl_ms: u64, now_ms: u64) -> Result<Self> {
        let loaded = store.load()?;
        let total = loaded.len();
        let tokens: HashMap<_, _> = loaded
            .into_iter()
            .filter(|t| !t.is_expired(now_ms))
            .map(|t| (key_of(&t), t))
            .collect();

        tracing::debug!(loaded = total, kept = tokens.len(), "Session guard hydrated");

        Ok(Self {
            store,
            ttl_ms,
            tokens: Mutex::new(tokens),
        })
    }

    /// Token lifetime applied to newly issued tokens.
    #[must_use]
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TokenKey, IdempotencyToken>>> {
        self.tokens
            .lock()
            .map_err(|_| CasegateError::Internal("session guard poisoned".to_string()))
    }

    /// Run `apply` against the stored snapshot and mirror the result into
    /// `cache`.
    fn update(
        &self,
        cache: &mut HashMap<TokenKey, IdempotencyToken>,
        apply: &mut dyn FnMut(&mut Vec<IdempotencyToken>) -> Result<bool>,
    ) -> Result<()> {
        let mut snapshot = None;
        self.store.update(&mut |stored: &mut Vec<IdempotencyToken>| {
            let changed = apply(stored)?;
            snapshot = Some(stored.clone());
            Ok(changed)
        })?;
        if let Some(stored) = snapshot {
            *cache = stored.into_iter().map(|t| (key_of(&t), t)).collect();
        }
        Ok(())
    }

    /// Re-read the store into the cache and return it.
    fn refresh(&self) -> Result<MutexGuard<'_, HashMap<TokenKey, IdempotencyToken>>> {
        let mut cache = self.lock()?;
        *cache = self.store.load()?.into_iter().map(|t| (key_of(&t), t)).collect();
        Ok(cache)
    }

    /// Mint a token for `(user, resource)` and persist it.
    ///
    /// # Errors
    /// - [`CasegateError::SessionInFlight`] if a live token already exists,
    ///   whichever guard on this store issued it
    /// - store write failures (the token is not kept)
    pub fn begin(&self, user_id: UserId, resource_id: Uuid, now_ms: u64) -> Result<IdempotencyToken> {
        let mut cache = self.lock()?;
        let key = (user_id, resource_id);
        let ttl_ms = self.ttl_ms;
        let mut issued = None;

        self.update(&mut cache, &mut |stored: &mut Vec<IdempotencyToken>| {
            stored.retain(|t| !t.is_expired(now_ms));
            if let Some(existing) = stored.iter().find(|t| key_of(t) == key && t.is_live(now_ms)) {
                tracing::info!(
                    user = %user_id,
                    session = %existing.session_id,
                    "Session already in flight"
                );
                return Err(CasegateError::SessionInFlight {
                    session_id: existing.session_id,
                });
            }
            stored.retain(|t| key_of(t) != key);
            let token = IdempotencyToken::issue(user_id, resource_id, now_ms, ttl_ms);
            stored.push(token.clone());
            issued = Some(token);
            Ok(true)
        })?;

        let token = issued.ok_or_else(|| CasegateError::Internal("session token not issued".to_string()))?;
        tracing::debug!(user = %user_id, session = %token.session_id, "Session issued");
        Ok(token)
    }

    /// Mark the token with `session_id` consumed and persist.
    ///
    /// Consuming a token that has already expired and been swept is a no-op.
    ///
    /// # Errors
    /// - [`CasegateError::SessionAlreadyConsumed`] on a second consume
    /// - store write failures
    pub fn consume(&self, session_id: SessionId) -> Result<()> {
        let mut cache = self.lock()?;
        let mut found = false;
        self.update(&mut cache, &mut |stored: &mut Vec<IdempotencyToken>| {
            let Some(token) = stored.iter_mut().find(|t| t.session_id == session_id) else {
                return Ok(false);
            };
            token.consume()?;
            found = true;
            Ok(true)
        })?;

        if found {
            tracing::debug!(session = %session_id, "Session consumed");
        } else {
            tracing::debug!(session = %session_id, "Consume of unknown session ignored");
        }
        Ok(())
    }

    /// The live token for `(user, resource)`, if any. Read-only.
    pub fn live(&self, user_id: UserId, resource_id: Uuid, now_ms: u64) -> Result<Option<IdempotencyToken>> {
        let tokens = self.refresh()?;
        Ok(tokens
            .get(&(user_id, resource_id))
            .filter(|t| t.is_live(now_ms))
            .cloned())
    }

    /// Look up a token by session id regardless of state. Read-only.
    pub fn get(&self, session_id: SessionId) -> Result<Option<IdempotencyToken>> {
        let tokens = self.refresh()?;
        Ok(tokens.values().find(|t| t.session_id == session_id).cloned())
    }

    /// Drop expired and consumed tokens and persist if anything changed.
    /// Returns how many were removed.
    pub fn sweep(&self, now_ms: u64) -> Result<usize> {
        let mut cache = self.lock()?;
        let mut removed = 0;
        self.update(&mut cache, &mut |stored: &mut Vec<IdempotencyToken>| {
            let before = stored.len();
            stored.retain(|t| t.is_live(now_ms));
            removed = before - stored.len();
            Ok(removed > 0)
        })?;
        Ok(removed)
    }

    /// Number of tokens held as of the last operation (live, consumed, or
    /// not yet swept).
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}
