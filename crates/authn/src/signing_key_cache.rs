//! Cache of the identity provider's signing keys.
//!
//! This module provides [`SigningKeyCache`], which resolves token key ids
//! against the identity provider's published key set while avoiding a
//! network round-trip on every verification.
//!
//! # Architecture
//!
//! ```text
//! JWT arrives → extract kid
//!              → current key set fresh and holds kid? → return key
//!              → otherwise refresh (coalesced, time-bounded)
//!              → refresh ok?   → new set replaces old set atomically → look up kid
//!              → refresh down? → previous set younger than fallback TTL holds kid? → return key
//!              → otherwise fail closed
//! ```
//!
//! # Cache Strategy
//!
//! - **Whole-set replacement**: the key set is an immutable
//!   [`SigningKeySet`] behind an `Arc`; a refresh swaps the pointer, so
//!   readers see either the old set or the new one, never a mix.
//! - **Key TTL**: default 300 seconds. A set older than this is re-fetched
//!   on next use.
//! - **Fallback TTL**: default 3600 seconds. While the endpoint is
//!   unreachable, the previous set keeps serving the kids it holds until
//!   it is this old.
//! - **Coalescing**: concurrent misses share a single fetch. Callers that
//!   waited on an in-flight fetch reuse its outcome, success or failure.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use gatekeeper_authn::{SigningKeyCache, VerifierConfig};
//!
//! # async fn example(config: VerifierConfig) -> Result<(), gatekeeper_authn::AuthError> {
//! let cache = Arc::new(SigningKeyCache::from_config(&config)?);
//! let key = cache.get_key("gq3ZkKpvVAKVL6dsJx4eJnv1bMZl2rM1KDeqL8o7pzA").await?;
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use fail::fail_point;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DEFAULT_FALLBACK_TTL, DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_TTL, VerifierConfig},
    error::AuthError,
    jwks::{HttpKeySetSource, JwkSet, KeySetSource, SigningKeySet, VerificationKey},
    validation::{AlgorithmPolicy, validate_kid},
};

/// Default key set TTL (5 minutes).
///
/// Balances rotation pickup (new keys are seen within this window even
/// without a miss) against load on the identity provider.
pub const DEFAULT_CACHE_TTL: Duration = DEFAULT_KEY_TTL;

/// The installed key set and when it was loaded.
#[derive(Clone)]
struct Installed {
    keys: Arc<SigningKeySet>,
    loaded_at: Instant,
}

#[derive(Default)]
struct CacheState {
    installed: Option<Installed>,
    /// Outcome of the most recent fetch attempt; `None` after a success.
    last_error: Option<AuthError>,
}

/// Point-in-time counters for a [`SigningKeyCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheMetrics {
    /// Fetch attempts made against the key source.
    pub fetches: u64,
    /// Fetch attempts that failed.
    pub fetch_errors: u64,
    /// Keys served from a stale set while the source was unreachable.
    pub fallback_hits: u64,
    /// Number of key sets installed so far.
    pub generation: u64,
    /// Usable keys in the current set.
    pub key_count: usize,
}

/// Cache for the identity provider's public signing keys.
///
/// Cheap to share behind an `Arc`. Reads take a short read lock to clone
/// the current set pointer; only a refresh writes, and it swaps the whole
/// set. An optional background task (see
/// [`with_refresh_interval`](Self::with_refresh_interval)) keeps the set
/// warm so that request paths rarely wait on the network.
///
/// # Failure semantics
///
/// Key fetch failures never produce a key. Transient failures (timeouts,
/// unreachable endpoint) may be bridged by the previous set for at most the
/// fallback TTL; everything else fails the lookup.
pub struct SigningKeyCache {
    source: Arc<dyn KeySetSource>,
    policy: AlgorithmPolicy,
    key_ttl: Duration,
    fallback_ttl: Duration,
    fetch_timeout: Duration,
    state: RwLock<CacheState>,
    /// Serializes fetches; waiters reuse the outcome of the fetch they waited on.
    refresh_lock: tokio::sync::Mutex<()>,
    /// Completed fetch attempts, successful or not.
    attempts: AtomicU64,
    generation: AtomicU64,
    fetch_errors: AtomicU64,
    fallback_hits: AtomicU64,
    cancel_token: CancellationToken,
    refresh_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SigningKeyCache {
    /// Creates a cache over `source` with default TTLs and fetch timeout.
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>, policy: AlgorithmPolicy) -> Self {
        Self {
            source,
            policy,
            key_ttl: DEFAULT_CACHE_TTL,
            fallback_ttl: DEFAULT_FALLBACK_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            state: RwLock::new(CacheState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            fallback_hits: AtomicU64::new(0),
            cancel_token: CancellationToken::new(),
            refresh_handle: Mutex::new(None),
        }
    }

    /// Creates a cache fetching from the configured key endpoint over HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the HTTP client cannot be built.
    pub fn from_config(config: &VerifierConfig) -> Result<Self, AuthError> {
        let source = HttpKeySetSource::new(config.jwks_url().clone(), config.fetch_timeout())?;
        Ok(Self::new(Arc::new(source), config.algorithms().clone())
            .with_key_ttl(config.key_ttl())
            .with_fallback_ttl(config.fallback_ttl())
            .with_fetch_timeout(config.fetch_timeout()))
    }

    /// Sets the age after which the key set is re-fetched on next use.
    #[must_use]
    pub fn with_key_ttl(mut self, ttl: Duration) -> Self {
        self.key_ttl = ttl;
        self
    }

    /// Sets the maximum age of a set served while the source is unreachable.
    ///
    /// # Security Trade-off
    ///
    /// - **Shorter**: a key removed by the provider stops being trusted sooner during an outage,
    ///   but verification fails outright if the outage lasts longer
    /// - **Longer**: more availability, but removed keys stay trusted longer during outages
    #[must_use]
    pub fn with_fallback_ttl(mut self, ttl: Duration) -> Self {
        self.fallback_ttl = ttl;
        self
    }

    /// Sets the upper bound on a single fetch.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Returns the verification key for `kid`.
    ///
    /// Serves from the current set when it is fresh and holds `kid`.
    /// Otherwise performs at most one refresh, shared with any concurrent
    /// callers, and looks `kid` up in the result.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if `kid` fails [`validate_kid`]
    /// - [`AuthError::UnknownKey`] if `kid` is absent after the refresh
    /// - [`AuthError::KeyFetch`] if the refresh failed and no fallback applies
    #[tracing::instrument(skip(self))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<VerificationKey>, AuthError> {
        validate_kid(kid)?;

        let seen_attempts = self.attempts.load(Ordering::Acquire);
        let installed = self.installed();

        if let Some(current) = &installed {
            if current.loaded_at.elapsed() < self.key_ttl
                && let Some(key) = current.keys.get(kid)
            {
                tracing::debug!(cache = "hit", "key set lookup");
                return Ok(key);
            }
            tracing::debug!(
                cache = "miss",
                stale = current.loaded_at.elapsed() >= self.key_ttl,
                "key set lookup"
            );
        } else {
            tracing::debug!(cache = "empty", "key set lookup");
        }

        match self.refresh_after(seen_attempts).await {
            Ok(keys) => keys.get(kid).ok_or_else(|| AuthError::unknown_key(kid)),
            Err(err) if err.is_transient() => {
                if let Some(previous) = self.installed()
                    && previous.loaded_at.elapsed() < self.fallback_ttl
                    && let Some(key) = previous.keys.get(kid)
                {
                    self.fallback_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        cache = "fallback",
                        fallback_age_secs = previous.loaded_at.elapsed().as_secs(),
                        error = %err,
                        "serving key from previous key set; key endpoint unavailable"
                    );
                    return Ok(key);
                }
                Err(err)
            },
            Err(err) => Err(err),
        }
    }

    /// Fetches a new key set now, sharing the fetch with concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the fetch failed or timed out.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<SigningKeySet>, AuthError> {
        let seen = self.attempts.load(Ordering::Acquire);
        self.refresh_after(seen).await
    }

    /// The currently installed key set, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<SigningKeySet>> {
        self.installed().map(|i| i.keys)
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let key_count = self.installed().map_or(0, |i| i.keys.len());
        CacheMetrics {
            fetches: self.attempts.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Relaxed),
            key_count,
        }
    }

    /// When the current set was fetched.
    #[must_use]
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.installed().map(|i| i.keys.fetched_at())
    }

    /// Enables periodic background refresh of the key set.
    ///
    /// The spawned task refreshes every `interval` until
    /// [`shutdown`](Self::shutdown) is called or the cache is dropped.
    /// Failures are logged; the request path handles fallback.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn with_refresh_interval(self: Arc<Self>, interval: Duration) -> Arc<Self> {
        let cache: Weak<Self> = Arc::downgrade(&self);
        let token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; start with a full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("background key refresh shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        match cache.refresh().await {
                            Ok(keys) => {
                                tracing::debug!(
                                    keys = keys.len(),
                                    "background key refresh complete"
                                );
                            },
                            Err(err) => {
                                tracing::warn!(error = %err, "background key refresh failed");
                            },
                        }
                    }
                }
            }
        });

        *self.refresh_handle.lock() = Some(handle);
        self
    }

    /// Stops the background refresh task, if running, and waits for it.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.refresh_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "background key refresh task panicked");
        }
    }

    /// Cancellation token of the background refresh task.
    ///
    /// Callers can tie it to an external shutdown signal.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    fn installed(&self) -> Option<Installed> {
        self.state.read().installed.clone()
    }

    /// Runs one fetch unless another caller completed one after `seen_attempts`.
    async fn refresh_after(&self, seen_attempts: u64) -> Result<Arc<SigningKeySet>, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        if self.attempts.load(Ordering::Acquire) != seen_attempts {
            let state = self.state.read();
            tracing::debug!("reusing outcome of concurrent key fetch");
            return match (&state.last_error, &state.installed) {
                (Some(err), _) => Err(err.clone()),
                (None, Some(installed)) => Ok(Arc::clone(&installed.keys)),
                (None, None) => Err(AuthError::key_fetch("no key set available")),
            };
        }

        // A document that fails to build leaves the installed set in place.
        let result = self
            .fetch_document()
            .await
            .and_then(|jwks| SigningKeySet::from_jwks(&jwks, &self.policy, Utc::now()));
        let outcome = match result {
            Ok(keys) => {
                let keys = Arc::new(keys);
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                {
                    let mut state = self.state.write();
                    state.installed =
                        Some(Installed { keys: Arc::clone(&keys), loaded_at: Instant::now() });
                    state.last_error = None;
                }
                tracing::info!(
                    generation,
                    keys = keys.len(),
                    source = %self.source.describe(),
                    "installed signing key set"
                );
                Ok(keys)
            },
            Err(err) => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    error = %err,
                    transient = err.is_transient(),
                    source = %self.source.describe(),
                    "signing key fetch failed"
                );
                self.state.write().last_error = Some(err.clone());
                Err(err)
            },
        };

        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch_document(&self) -> Result<JwkSet, AuthError> {
        fail_point!("key-cache-before-fetch", |_| {
            Err(AuthError::key_fetch_transient("injected failure before key fetch"))
        });

        match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::key_fetch_transient(format!(
                "key fetch timed out after {}",
                humantime::format_duration(self.fetch_timeout)
            ))),
        }
    }
}

impl Drop for SigningKeyCache {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
