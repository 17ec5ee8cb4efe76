//! Retrieval and caching of an issuer's key set
//!
//! A [`KeySetResolver`] holds the last key set it fetched behind an
//! [`ArcSwapOption`], so readers always see either the previous set or the
//! next one in full. Refreshes are single-flight: one task fetches while
//! other callers wait on the same lock and then reuse its result. A failed
//! fetch is shared the same way, so callers that were waiting on it fail
//! with it rather than fetching again.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::{config::IssuerConfig, error::FetchError, jwk::KeyIdRef, jwks::KeySet};

/// How long a fetched key set is used before it is revalidated
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on a single key set fetch
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum time between fetches triggered by unknown key ids or failures
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Cached {
    keys: Arc<KeySet>,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    attempted_at: Instant,
    expires_at: Option<Instant>,
}

impl Cached {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// When the last fetch failed with nothing cached to fall back on
#[derive(Debug)]
struct Failed {
    at: Instant,
}

#[derive(Debug)]
struct Remote {
    jwks_url: String,
    client: Client,
}

#[derive(Debug)]
struct Shared {
    cache: ArcSwapOption<Cached>,
    failed: ArcSwapOption<Failed>,
    remote: Option<Remote>,
    refresh_lock: Arc<Mutex<()>>,
}

enum Fetched {
    Updated {
        keys: KeySet,
        etag: Option<HeaderValue>,
        last_modified: Option<HeaderValue>,
    },
    NotModified,
}

/// Resolves the current key set for an issuer
///
/// Cloning a resolver is cheap; clones share the same cache.
#[derive(Debug, Clone)]
#[must_use]
pub struct KeySetResolver {
    shared: Arc<Shared>,
    ttl: Duration,
    timeout: Duration,
    min_refresh_interval: Duration,
}

impl KeySetResolver {
    /// A resolver for the key set published at the issuer's well-known
    /// JWKS location
    ///
    /// Nothing is fetched until a key set is first requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: &IssuerConfig) -> Result<Self, FetchError> {
        Self::from_url(config.jwks_url())
    }

    /// A resolver for the key set published at `jwks_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn from_url(jwks_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_shared(Shared {
            cache: ArcSwapOption::empty(),
            failed: ArcSwapOption::empty(),
            remote: Some(Remote {
                jwks_url: jwks_url.into(),
                client,
            }),
            refresh_lock: Arc::new(Mutex::new(())),
        }))
    }

    /// A resolver that serves a fixed key set and never touches the network
    pub fn from_key_set(keys: KeySet) -> Self {
        let cached = Cached {
            keys: Arc::new(keys),
            etag: None,
            last_modified: None,
            attempted_at: Instant::now(),
            expires_at: None,
        };

        Self::with_shared(Shared {
            cache: ArcSwapOption::new(Some(Arc::new(cached))),
            failed: ArcSwapOption::empty(),
            remote: None,
            refresh_lock: Arc::new(Mutex::new(())),
        })
    }

    fn with_shared(shared: Shared) -> Self {
        Self {
            shared: Arc::new(shared),
            ttl: DEFAULT_TTL,
            timeout: DEFAULT_TIMEOUT,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    /// Sets how long a fetched key set is served before being revalidated
    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Sets the upper bound on a single fetch
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Sets the minimum time between fetches caused by an unknown key id
    /// or by a failed refresh
    pub fn with_min_refresh_interval(self, interval: Duration) -> Self {
        Self {
            min_refresh_interval: interval,
            ..self
        }
    }

    /// The location the key set is fetched from, if it is remote
    #[must_use]
    pub fn jwks_url(&self) -> Option<&str> {
        self.shared.remote.as_ref().map(|r| r.jwks_url.as_str())
    }

    /// The most recently resolved key set, without fetching
    #[must_use]
    pub fn cached(&self) -> Option<Arc<KeySet>> {
        self.shared.cache.load_full().map(|c| Arc::clone(&c.keys))
    }

    /// Replaces the key set wholesale
    ///
    /// For a remote resolver the new set is treated as freshly fetched.
    pub fn set_key_set(&self, keys: KeySet) {
        let now = Instant::now();
        let expires_at = match self.shared.remote {
            Some(_) => now.checked_add(self.ttl),
            None => None,
        };

        self.store(Cached {
            keys: Arc::new(keys),
            etag: None,
            last_modified: None,
            attempted_at: now,
            expires_at,
        });
    }

    /// The current key set, fetching it if the cached set has expired
    ///
    /// If a refresh fails but an earlier set is cached, the earlier set is
    /// returned. If nothing is cached, a failed fetch is not retried until
    /// the minimum refresh interval has passed.
    ///
    /// # Errors
    ///
    /// Returns an error only if no key set could be obtained at all.
    /// [`FetchError::RecentlyFailed`] means another caller's fetch failed
    /// and this call did not try again.
    pub async fn key_set(&self) -> Result<Arc<KeySet>, FetchError> {
        if let Some(cached) = self.shared.cache.load_full() {
            if cached.is_fresh(Instant::now()) {
                return Ok(Arc::clone(&cached.keys));
            }
        }

        self.refresh_unless(|cached, now| cached.is_fresh(now), true)
            .await
    }

    /// The current key set, refreshed once if it does not contain `kid`
    ///
    /// The extra refresh only happens if nothing has been fetched within the
    /// minimum refresh interval. The returned set may still lack `kid`.
    ///
    /// # Errors
    ///
    /// Returns an error only if no key set could be obtained at all.
    pub async fn key_set_for(&self, kid: &KeyIdRef) -> Result<Arc<KeySet>, FetchError> {
        let keys = self.key_set().await?;
        if keys.get(kid).is_some() || self.shared.remote.is_none() {
            return Ok(keys);
        }

        tracing::debug!(%kid, "key id not in cached key set");
        let interval = self.min_refresh_interval;
        self.refresh_unless(
            move |cached, now| now.saturating_duration_since(cached.attempted_at) < interval,
            true,
        )
        .await
    }

    /// Fetches the key set now, unless a fetch started after this call did
    ///
    /// No retries are attempted. If the fetch fails, the previous key set
    /// stays in place and is returned. The minimum refresh interval does not
    /// apply.
    ///
    /// # Errors
    ///
    /// Returns an error only if no key set could be obtained at all.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, FetchError> {
        let requested_at = Instant::now();
        self.refresh_unless(move |cached, _| cached.attempted_at >= requested_at, false)
            .await
    }

    /// Refreshes the key set in the background every `interval`
    ///
    /// Failures are logged and retried on the next tick. Abort the returned
    /// handle to stop refreshing.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero.
    pub fn spawn_refresh(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                timer.tick().await;
                let _ = this.refresh().await;
            }
        })
    }

    async fn refresh_unless<F>(
        &self,
        satisfied: F,
        back_off: bool,
    ) -> Result<Arc<KeySet>, FetchError>
    where
        F: Fn(&Cached, Instant) -> bool,
    {
        if self.shared.remote.is_none() {
            return self.cached().ok_or(FetchError::NotConfigured);
        }

        let requested_at = Instant::now();
        let guard = Arc::clone(&self.shared.refresh_lock).lock_owned().await;
        let now = Instant::now();

        let previous = self.shared.cache.load_full();
        match &previous {
            Some(cached) if satisfied(cached, now) => return Ok(Arc::clone(&cached.keys)),
            Some(_) => {}
            None => {
                if let Some(failed) = self.shared.failed.load_full() {
                    let backing_off = back_off
                        && now.saturating_duration_since(failed.at) < self.min_refresh_interval;
                    if failed.at >= requested_at || backing_off {
                        tracing::debug!("JWKS fetch failed recently; not retrying");
                        return Err(FetchError::RecentlyFailed);
                    }
                }
            }
        }

        // The fetch must outlive this caller if it is cancelled
        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                this.fetch_and_store(previous).await
            }
            .in_current_span(),
        );

        task.await?
    }

    #[tracing::instrument(skip(self, previous), fields(jwks.url = tracing::field::Empty))]
    async fn fetch_and_store(
        &self,
        previous: Option<Arc<Cached>>,
    ) -> Result<Arc<KeySet>, FetchError> {
        let Some(remote) = &self.shared.remote else {
            return Err(FetchError::NotConfigured);
        };

        tracing::Span::current().record("jwks.url", remote.jwks_url.as_str());
        tracing::debug!("refreshing JWKS");

        let outcome = tokio::time::timeout(self.timeout, self.fetch(remote, previous.as_deref()))
            .await
            .unwrap_or(Err(FetchError::TimedOut));
        let now = Instant::now();

        match outcome {
            Ok(Fetched::Updated {
                keys,
                etag,
                last_modified,
            }) => {
                let keys = Arc::new(keys);
                tracing::info!(jwks.keys = keys.len(), "JWKS refreshed");
                self.store(Cached {
                    keys: Arc::clone(&keys),
                    etag,
                    last_modified,
                    attempted_at: now,
                    expires_at: now.checked_add(self.ttl),
                });
                Ok(keys)
            }
            Ok(Fetched::NotModified) => match previous {
                Some(prev) => {
                    tracing::debug!("JWKS not modified");
                    self.store(Cached {
                        keys: Arc::clone(&prev.keys),
                        etag: prev.etag.clone(),
                        last_modified: prev.last_modified.clone(),
                        attempted_at: now,
                        expires_at: now.checked_add(self.ttl),
                    });
                    Ok(Arc::clone(&prev.keys))
                }
                None => {
                    self.shared.failed.store(Some(Arc::new(Failed { at: now })));
                    Err(FetchError::UnexpectedStatus(StatusCode::NOT_MODIFIED))
                }
            },
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                match previous {
                    Some(prev) => {
                        tracing::warn!(error, "JWKS refresh failed; continuing with previous key set");
                        self.store(Cached {
                            keys: Arc::clone(&prev.keys),
                            etag: prev.etag.clone(),
                            last_modified: prev.last_modified.clone(),
                            attempted_at: now,
                            expires_at: now.checked_add(self.min_refresh_interval),
                        });
                        Ok(Arc::clone(&prev.keys))
                    }
                    None => {
                        tracing::warn!(error, "JWKS refresh failed; no key set available");
                        self.shared.failed.store(Some(Arc::new(Failed { at: now })));
                        Err(err)
                    }
                }
            }
        }
    }

    async fn fetch(&self, remote: &Remote, previous: Option<&Cached>) -> Result<Fetched, FetchError> {
        let mut request = remote.client.get(&remote.jwks_url).timeout(self.timeout);

        if let Some(prev) = previous {
            if let Some(etag) = &prev.etag {
                request = request.header(header::IF_NONE_MATCH, etag);
            } else if let Some(last_modified) = &prev.last_modified {
                request = request.header(header::IF_MODIFIED_SINCE, last_modified);
            }
        }

        let response = request.send().await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }

        let response = response.error_for_status()?;

        let etag = response.headers().get(header::ETAG).map(ToOwned::to_owned);
        let last_modified = response
            .headers()
            .get(header::LAST_MODIFIED)
            .map(ToOwned::to_owned);

        let body = response.bytes().await?;
        let keys = KeySet::from_json(&body)?;

        Ok(Fetched::Updated {
            keys,
            etag,
            last_modified,
        })
    }

    fn store(&self, cached: Cached) {
        self.shared.cache.store(Some(Arc::new(cached)));
        self.shared.failed.store(None);
    }
}
