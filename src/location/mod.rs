//! Position acquisition.
//!
//! Wraps a host [`PositionProvider`] with the fix policy (high accuracy,
//! timeout, acceptable cached age) and two operating modes:
//!
//! - single-shot: [`LocationService::current_position`]
//! - continuous: [`LocationService::start_watch`], replace-only, at most one
//!   live subscription per service
//!
//! Every failure surfaces as a [`LocationError`] carrying the platform's
//! numeric code and message, whichever mode produced it.

pub mod history;
pub mod share;
pub mod simulated;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::constants::*;
use crate::models::LocationSample;
use crate::utils::lock;

pub use history::{LocationHistory, SharedHistory};

/// Typed positioning failure. Codes follow the platform convention.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("geolocation is not supported (code {code}): {message}")]
    Unsupported { code: u16, message: String },

    #[error("location permission denied (code {code}): {message}")]
    PermissionDenied { code: u16, message: String },

    #[error("timed out waiting for a position fix (code {code}): {message}")]
    Timeout { code: u16, message: String },

    #[error("position unavailable (code {code}): {message}")]
    PositionUnavailable { code: u16, message: String },
}

impl LocationError {
    pub fn unsupported() -> Self {
        LocationError::Unsupported {
            code: GEO_CODE_UNSUPPORTED,
            message: "Geolocation is not supported".to_string(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        LocationError::Timeout {
            code: GEO_CODE_TIMEOUT,
            message: message.into(),
        }
    }

    /// Map a platform error code onto a variant. Unknown codes are treated
    /// as an unavailable position.
    pub fn from_platform(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            GEO_CODE_UNSUPPORTED => LocationError::Unsupported { code, message },
            GEO_CODE_PERMISSION_DENIED => LocationError::PermissionDenied { code, message },
            GEO_CODE_TIMEOUT => LocationError::Timeout { code, message },
            _ => LocationError::PositionUnavailable { code, message },
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            LocationError::Unsupported { code, .. }
            | LocationError::PermissionDenied { code, .. }
            | LocationError::Timeout { code, .. }
            | LocationError::PositionUnavailable { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LocationError::Unsupported { message, .. }
            | LocationError::PermissionDenied { message, .. }
            | LocationError::Timeout { message, .. }
            | LocationError::PositionUnavailable { message, .. } => message,
        }
    }
}

pub type LocationResult = Result<LocationSample, LocationError>;

/// Fix policy passed to the provider.
#[derive(Debug, Clone)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(DEFAULT_LOCATION_TIMEOUT_SECS),
            maximum_age: Duration::from_secs(DEFAULT_LOCATION_MAX_AGE_SECS),
        }
    }
}

/// Host positioning capability.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Resolve one fix. May never resolve; the service applies the timeout.
    async fn current_position(&self, options: &PositionOptions) -> LocationResult;

    /// Open a standing subscription. Dropping the receiver ends it.
    fn watch_position(&self, options: &PositionOptions) -> mpsc::UnboundedReceiver<LocationResult>;
}

struct CachedFix {
    sample: LocationSample,
    at: Instant,
}

#[derive(Default)]
struct WatchSlot {
    /// Bumped on every start/stop; forwarding tasks only deliver while
    /// their generation is current.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl WatchSlot {
    fn release(&mut self) -> bool {
        self.generation += 1;
        match self.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

pub struct LocationService {
    provider: Arc<dyn PositionProvider>,
    options: PositionOptions,
    supported: bool,
    last_fix: Arc<Mutex<Option<CachedFix>>>,
    watch: Arc<Mutex<WatchSlot>>,
}

impl LocationService {
    /// `supported` comes from the capability table; when false every
    /// request fails with [`LocationError::Unsupported`].
    pub fn new(provider: Arc<dyn PositionProvider>, options: PositionOptions, supported: bool) -> Self {
        Self {
            provider,
            options,
            supported,
            last_fix: Arc::new(Mutex::new(None)),
            watch: Arc::new(Mutex::new(WatchSlot::default())),
        }
    }

    /// Single-shot fix. A remembered fix younger than `maximum_age` is
    /// returned without asking the provider.
    pub async fn current_position(&self) -> LocationResult {
        if !self.supported {
            return Err(LocationError::unsupported());
        }
        if let Some(sample) = self.cached_fix() {
            debug!("serving cached position fix");
            return Ok(sample);
        }

        let request = self.provider.current_position(&self.options);
        let result = match tokio::time::timeout(self.options.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::timeout(format!(
                "no fix within {}s",
                self.options.timeout.as_secs()
            ))),
        };

        if let Ok(sample) = &result {
            remember(&self.last_fix, sample);
        }
        result
    }

    fn cached_fix(&self) -> Option<LocationSample> {
        let cached = lock(&self.last_fix);
        cached
            .as_ref()
            .filter(|fix| fix.at.elapsed() <= self.options.maximum_age)
            .map(|fix| fix.sample.clone())
    }

    /// Start continuous updates, replacing any watch already running. The
    /// replaced watch's stream ends and never yields again.
    pub fn start_watch(&self) -> LocationWatch {
        let (tx, rx) = mpsc::unbounded_channel();

        if !self.supported {
            let _ = tx.send(Err(LocationError::unsupported()));
            return LocationWatch {
                updates: rx,
                _guard: WatchGuard {
                    slot: Arc::clone(&self.watch),
                    generation: None,
                },
            };
        }

        let mut upstream = self.provider.watch_position(&self.options);
        let slot = Arc::clone(&self.watch);
        let last_fix = Arc::clone(&self.last_fix);

        let mut current = lock(&self.watch);
        if current.release() {
            info!("replacing active location watch");
        }
        let generation = current.generation;

        let task = tokio::spawn(async move {
            while let Some(update) = upstream.recv().await {
                if let Ok(sample) = &update {
                    remember(&last_fix, sample);
                }
                let state = lock(&slot);
                if state.generation != generation || tx.send(update).is_err() {
                    break;
                }
            }
        });
        current.task = Some(task);
        drop(current);

        debug!(generation, "location watch started");
        LocationWatch {
            updates: rx,
            _guard: WatchGuard {
                slot: Arc::clone(&self.watch),
                generation: Some(generation),
            },
        }
    }

    /// Stop the active watch, if any.
    pub fn stop_watch(&self) -> bool {
        let stopped = lock(&self.watch).release();
        if stopped {
            info!("location watch stopped");
        }
        stopped
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watch)
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for LocationService {
    fn drop(&mut self) {
        lock(&self.watch).release();
    }
}

fn remember(cache: &Mutex<Option<CachedFix>>, sample: &LocationSample) {
    *lock(cache) = Some(CachedFix {
        sample: sample.clone(),
        at: Instant::now(),
    });
}

/// Releases its subscription on drop, unless a newer watch replaced it.
struct WatchGuard {
    slot: Arc<Mutex<WatchSlot>>,
    generation: Option<u64>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(generation) = self.generation {
            let mut slot = lock(&self.slot);
            if slot.generation == generation {
                slot.release();
            }
        }
    }
}

/// A live continuous-mode subscription.
pub struct LocationWatch {
    updates: mpsc::UnboundedReceiver<LocationResult>,
    _guard: WatchGuard,
}

impl LocationWatch {
    /// Next update, or `None` once the watch was stopped or replaced.
    pub async fn next(&mut self) -> Option<LocationResult> {
        self.updates.recv().await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable provider for tests.

    use super::*;

    pub struct ManualProvider {
        pub fix: Mutex<Option<LocationResult>>,
        pub delay: Duration,
        pub calls: Mutex<u32>,
        pub watchers: Mutex<Vec<mpsc::UnboundedSender<LocationResult>>>,
    }

    impl ManualProvider {
        pub fn resolving(sample: LocationSample, delay: Duration) -> Self {
            Self {
                fix: Mutex::new(Some(Ok(sample))),
                delay,
                calls: Mutex::new(0),
                watchers: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(err: LocationError, delay: Duration) -> Self {
            let p = Self::resolving(sample(0.0, 0.0), delay);
            *lock(&p.fix) = Some(Err(err));
            p
        }

        /// Never resolves.
        pub fn hanging() -> Self {
            let p = Self::resolving(sample(0.0, 0.0), Duration::ZERO);
            *lock(&p.fix) = None;
            p
        }

        pub fn calls(&self) -> u32 {
            *lock(&self.calls)
        }

        pub fn push_to_watcher(&self, index: usize, update: LocationResult) -> bool {
            lock(&self.watchers)[index].send(update).is_ok()
        }
    }

    #[async_trait]
    impl PositionProvider for ManualProvider {
        async fn current_position(&self, _options: &PositionOptions) -> LocationResult {
            *lock(&self.calls) += 1;
            tokio::time::sleep(self.delay).await;
            let fix = lock(&self.fix).clone();
            match fix {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        fn watch_position(&self, _options: &PositionOptions) -> mpsc::UnboundedReceiver<LocationResult> {
            let (tx, rx) = mpsc::unbounded_channel();
            lock(&self.watchers).push(tx);
            rx
        }
    }

    pub fn sample(lat: f64, lng: f64) -> LocationSample {
        LocationSample {
            latitude: lat,
            longitude: lng,
            accuracy_meters: 8.0,
            captured_at_epoch_ms: 1_700_000_000_000,
        }
    }
}
