//! Expiring credential cache with single-flight refresh.
//!
//! A `CredentialCache` holds one credential value and the instant it turns
//! stale. Reads of a valid credential return synchronously. Reads of a stale
//! credential run the installed refresh operation, and concurrent reads
//! collapse into one refresh cycle whose outcome every waiter shares.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::error::CacheError;
use crate::cache::kind::{AccessTokenKind, CredentialKind, TicketKind};
use crate::helpers::time::{expiry_from, Clock, SystemClock};
use crate::observability::metrics::get_metrics;
use crate::parser::refresh_result::{parse_refresh_result, RefreshResult};

pub type RefreshFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Performs the actual renewal against the remote authority.
pub type RefreshOperation = Arc<dyn Fn() -> RefreshFuture + Send + Sync>;

/// Plain or stable access token cache.
pub type AccessToken<C = SystemClock> = CredentialCache<AccessTokenKind, C>;

/// Ticket cache.
pub type Ticket<C = SystemClock> = CredentialCache<TicketKind, C>;

type RefreshCycle = Shared<BoxFuture<'static, Result<String, CacheError>>>;

struct InFlight {
    cycle: u64,
    handle: RefreshCycle,
}

struct CredentialState {
    value: Option<String>,
    expires_at: DateTime<Utc>,
    refresh_operation: Option<RefreshOperation>,
    refresh_timeout: Option<Duration>,
    in_flight: Option<InFlight>,
    cycles_started: u64,
}

impl CredentialState {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

struct Inner<C> {
    name: String,
    window_seconds: u64,
    clock: C,
    state: Mutex<CredentialState>,
}

impl<C: Clock> Inner<C> {
    fn lock_state(&self) -> MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit or discard the outcome of `cycle` and release the in-flight slot
    /// under one lock.
    fn settle(
        &self,
        cycle: u64,
        outcome: Result<RefreshResult, CacheError>,
    ) -> Result<(String, DateTime<Utc>), CacheError> {
        let mut state = self.lock_state();
        if state.in_flight.as_ref().is_some_and(|f| f.cycle == cycle) {
            state.in_flight = None;
        }
        let (value, expires_in) = outcome?.into_parts();
        let expires_at = expiry_from(self.clock.now(), expires_in, self.window_seconds);
        state.value = Some(value.clone());
        state.expires_at = expires_at;
        Ok((value, expires_at))
    }
}

enum Step {
    Ready(String),
    Await { cycle: u64, handle: RefreshCycle, joined: bool },
}

/// Cached credential of kind `K`.
///
/// Cloning yields another handle to the same credential.
pub struct CredentialCache<K, C = SystemClock> {
    inner: Arc<Inner<C>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, C> Clone for CredentialCache<K, C> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), _kind: PhantomData }
    }
}

impl<K: CredentialKind> CredentialCache<K, SystemClock> {
    pub fn new(name: impl Into<String>, window_seconds: u64) -> Self {
        Self::with_clock(name, window_seconds, SystemClock)
    }
}

impl<K: CredentialKind, C: Clock> CredentialCache<K, C> {
    /// Starts expired and empty, so the first read refreshes.
    pub fn with_clock(name: impl Into<String>, window_seconds: u64, clock: C) -> Self {
        let state = CredentialState {
            value: None,
            // Unix epoch
            expires_at: DateTime::<Utc>::default(),
            refresh_operation: None,
            refresh_timeout: None,
            in_flight: None,
            cycles_started: 0,
        };
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                window_seconds,
                clock,
                state: Mutex::new(state),
            }),
            _kind: PhantomData,
        }
    }

    /// Bound every subsequent refresh cycle by `timeout`.
    pub fn with_refresh_timeout(self, timeout: Duration) -> Self {
        self.inner.lock_state().refresh_timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    pub fn window_seconds(&self) -> u64 {
        self.inner.window_seconds
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.inner.lock_state().expires_at
    }

    /// Install the operation used by the next refresh cycle.
    ///
    /// A cycle already running keeps the operation it started with, and
    /// callers that joined it receive that cycle's outcome. Swapping the
    /// operation per request (to pass a caller-supplied upstream credential,
    /// say) is not synchronised with other requests: whichever operation is
    /// installed when the next cycle starts is the one that runs.
    pub fn set_refresh_operation<F, Fut>(&self, operation: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let operation: RefreshOperation = Arc::new(move || operation().boxed());
        self.inner.lock_state().refresh_operation = Some(operation);
    }

    /// Store a credential fetched by the caller itself.
    pub fn set_value(&self, value: impl Into<String>, expires_in: i64) {
        let expires_at = expiry_from(self.inner.clock.now(), expires_in, self.inner.window_seconds);
        let mut state = self.inner.lock_state();
        state.value = Some(value.into());
        state.expires_at = expires_at;
        debug!(
            credential = %self.inner.name,
            kind = K::NAME,
            %expires_at,
            "credential set directly"
        );
    }

    /// The cached value if still valid. Never refreshes.
    pub fn peek_value(&self) -> Option<String> {
        let state = self.inner.lock_state();
        if state.is_expired(self.inner.clock.now()) {
            return None;
        }
        state.value.clone()
    }

    pub fn is_expired(&self) -> bool {
        self.inner.lock_state().is_expired(self.inner.clock.now())
    }

    /// Return the cached credential, refreshing it first when stale or when
    /// `force_refresh` is set.
    ///
    /// A forced read is only satisfied by a refresh cycle that started after
    /// the read arrived; it joins an earlier in-flight cycle, then starts one
    /// more.
    pub async fn get_value(&self, force_refresh: bool) -> Result<String, CacheError> {
        let forced_after = force_refresh.then(|| self.inner.lock_state().cycles_started);

        loop {
            match self.next_step(forced_after)? {
                Step::Ready(value) => return Ok(value),
                Step::Await { cycle, handle, joined } => {
                    if joined {
                        debug!(
                            credential = %self.inner.name,
                            kind = K::NAME,
                            cycle,
                            "joining in-flight refresh"
                        );
                        get_metrics()
                            .await
                            .refresh_joins
                            .with_label_values(&[self.inner.name.as_str(), K::NAME])
                            .inc();
                    }
                    // outcome of a cycle older than a forced read is dropped, success or not
                    let outcome = handle.await;
                    if forced_after.map_or(true, |mark| cycle > mark) {
                        return outcome;
                    }
                    debug!(
                        credential = %self.inner.name,
                        kind = K::NAME,
                        cycle,
                        failed = outcome.is_err(),
                        "joined refresh predates forced read"
                    );
                }
            }
        }
    }

    /// Decide under the state lock whether to serve, join or start a cycle.
    /// Starting marks the cycle in flight before any suspension point.
    fn next_step(&self, forced_after: Option<u64>) -> Result<Step, CacheError> {
        let mut state = self.inner.lock_state();

        if forced_after.is_none() && !state.is_expired(self.inner.clock.now()) {
            return Ok(Step::Ready(state.value.clone().unwrap_or_default()));
        }

        if let Some(in_flight) = &state.in_flight {
            return Ok(Step::Await {
                cycle: in_flight.cycle,
                handle: in_flight.handle.clone(),
                joined: true,
            });
        }

        let operation = state
            .refresh_operation
            .clone()
            .ok_or_else(|| CacheError::RefreshNotConfigured {
                credential: self.inner.name.clone(),
            })?;
        state.cycles_started += 1;
        let cycle = state.cycles_started;
        let handle = Self::run_cycle(
            Arc::downgrade(&self.inner),
            self.inner.name.clone(),
            operation,
            state.refresh_timeout,
            cycle,
        )
        .boxed()
        .shared();
        state.in_flight = Some(InFlight { cycle, handle: handle.clone() });

        Ok(Step::Await { cycle, handle, joined: false })
    }

    async fn run_cycle(
        inner: Weak<Inner<C>>,
        credential: String,
        operation: RefreshOperation,
        timeout: Option<Duration>,
        cycle: u64,
    ) -> Result<String, CacheError> {
        let metrics = get_metrics().await;
        metrics.refresh_total.with_label_values(&[credential.as_str(), K::NAME]).inc();
        debug!(credential = %credential, kind = K::NAME, cycle, "refresh started");
        let start = Instant::now();

        let outcome = invoke(&credential, operation, timeout)
            .await
            .and_then(|payload| parse_refresh_result(&credential, &payload));
        metrics
            .refresh_duration
            .with_label_values(&[credential.as_str()])
            .observe(start.elapsed().as_secs_f64());

        // every handle dropped while the cycle ran
        let Some(inner) = inner.upgrade() else {
            return outcome.map(|result| result.into_parts().0);
        };

        match inner.settle(cycle, outcome) {
            Ok((value, expires_at)) => {
                metrics
                    .credential_expiry_unix
                    .with_label_values(&[credential.as_str(), K::NAME])
                    .set(expires_at.timestamp());
                info!(
                    credential = %credential,
                    kind = K::NAME,
                    cycle,
                    %expires_at,
                    "credential refreshed"
                );
                Ok(value)
            }
            Err(e) => {
                metrics
                    .refresh_failures
                    .with_label_values(&[credential.as_str(), K::NAME, e.reason()])
                    .inc();
                warn!(
                    credential = %credential,
                    kind = K::NAME,
                    cycle,
                    error = %e,
                    "refresh failed"
                );
                Err(e)
            }
        }
    }
}

/// Run the operation once, turning rejection, panic and timeout into
/// `CacheError`s.
async fn invoke(
    credential: &str,
    operation: RefreshOperation,
    timeout: Option<Duration>,
) -> Result<Value, CacheError> {
    let call = AssertUnwindSafe(async move { operation().await }).catch_unwind();
    let settled = match timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
            CacheError::RefreshTimedOut { credential: credential.to_owned(), timeout: limit }
        })?,
        None => call.await,
    };

    match settled {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(e)) => Err(CacheError::UpstreamRefreshFailed {
            credential: credential.to_owned(),
            reason: format!("{:#}", e),
        }),
        Err(_) => Err(CacheError::UpstreamRefreshFailed {
            credential: credential.to_owned(),
            reason: "refresh operation panicked".to_owned(),
        }),
    }
}

impl<K: CredentialKind, C: Clock> fmt::Debug for CredentialCache<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("CredentialCache")
            .field("name", &self.inner.name)
            .field("kind", &K::NAME)
            .field("window_seconds", &self.inner.window_seconds)
            .field("expires_at", &state.expires_at)
            .field("has_value", &state.value.is_some())
            .field("refresh_in_flight", &state.in_flight.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::helpers::time::ManualClock;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn fresh_cache_is_expired_and_empty() {
        let token: AccessToken = CredentialCache::new("token", 300);
        assert!(token.is_expired());
        assert_eq!(token.peek_value(), None);
        assert_eq!(token.expires_at(), DateTime::<Utc>::default());
    }

    #[test]
    fn set_value_applies_window() {
        let clock = ManualClock::new(at(1_000_000));
        let token: AccessToken<ManualClock> =
            CredentialCache::with_clock("token", 300, clock.clone());
        token.set_value("abc", 7200);
        assert_eq!(token.expires_at(), at(1_000_000 + 6900));
        assert_eq!(token.peek_value().as_deref(), Some("abc"));

        clock.advance_secs(6900);
        assert!(!token.is_expired());
        clock.advance_secs(1);
        assert!(token.is_expired());
        assert_eq!(token.peek_value(), None);
    }

    #[test]
    fn lifetime_within_window_is_stale_immediately() {
        let clock = ManualClock::new(at(1_000_000));
        let ticket: Ticket<ManualClock> = CredentialCache::with_clock("jsapi", 300, clock);
        ticket.set_value("tkt", 200);
        assert!(ticket.is_expired());
    }

    #[tokio::test]
    async fn unconfigured_cache_fails() {
        let token: AccessToken = CredentialCache::new("token", 300);
        let err = token.get_value(false).await.unwrap_err();
        assert_eq!(err, CacheError::RefreshNotConfigured { credential: "token".into() });
    }

    #[tokio::test]
    async fn directly_set_value_is_served_without_refresh_operation() {
        let token: AccessToken = CredentialCache::new("token", 300);
        token.set_value("legacy", 7200);
        assert_eq!(token.get_value(false).await.unwrap(), "legacy");
    }

    #[tokio::test]
    async fn valid_value_is_served_from_cache() {
        let token: AccessToken = CredentialCache::new("token", 300);
        token.set_refresh_operation(|| async {
            Ok(json!({"accessToken": "abc", "expiresIn": 7200}))
        });
        assert_eq!(token.get_value(false).await.unwrap(), "abc");

        token.set_refresh_operation(|| async {
            Ok(json!({"accessToken": "other", "expiresIn": 7200}))
        });
        assert_eq!(token.get_value(false).await.unwrap(), "abc");
        assert_eq!(token.get_value(true).await.unwrap(), "other");
    }

    async fn exploding() -> anyhow::Result<Value> {
        panic!("collaborator bug")
    }

    #[tokio::test]
    async fn panicking_operation_does_not_wedge_the_cache() {
        let token: AccessToken = CredentialCache::new("token", 300);
        token.set_refresh_operation(exploding);
        let err = token.get_value(false).await.unwrap_err();
        assert_eq!(err.reason(), "upstream");

        token.set_refresh_operation(|| async {
            Ok(json!({"access_token": "abc", "expires_in": 7200}))
        });
        assert_eq!(token.get_value(false).await.unwrap(), "abc");
    }

    #[test]
    fn debug_output_hides_value() {
        let token: AccessToken = CredentialCache::new("token", 300);
        token.set_value("s3cret", 7200);
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("has_value: true"));
    }
}
