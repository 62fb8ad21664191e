//! Viewport session: the debouncer and fetch coordinator wired together
//!
//! This is the surface the map view talks to: it reports raw viewport changes and
//! reads back the geometries, loading state and error of the current viewport.

use crate::debounce::{DEFAULT_DEBOUNCE_DELAY, ViewportDebouncer};
use crate::fetch::{FetchSnapshot, GeometryFetchCoordinator};
use crate::viewport::DEFAULT_BUFFER_FACTOR;
use crate::{GeometryCache, GeometrySource, Track, TrackGeometry, ViewportBounds};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Tuning knobs for a [`ViewportSession`]
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Quiet period before a viewport counts as settled
    pub debounce_delay: Duration,
    /// Fraction of the viewport size added on each side before filtering tracks
    pub buffer_factor: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            buffer_factor: DEFAULT_BUFFER_FACTOR,
        }
    }
}

/// Debounced, cache-aware geometry loading for one map view
pub struct ViewportSession {
    debouncer: ViewportDebouncer,
    coordinator: Arc<GeometryFetchCoordinator>,
    driver: JoinHandle<()>,
}

impl ViewportSession {
    /// Create a session. Must be called from within a tokio runtime.
    pub fn new(
        source: Arc<dyn GeometrySource>,
        cache: Arc<dyn GeometryCache>,
        config: SyncConfig,
    ) -> Self {
        let coordinator = Arc::new(GeometryFetchCoordinator::new(
            source,
            cache,
            config.buffer_factor,
        ));
        let (debouncer, settled) = ViewportDebouncer::new(config.debounce_delay);
        let driver = coordinator.spawn_driver(settled);
        Self {
            debouncer,
            coordinator,
            driver,
        }
    }

    /// Report a raw viewport change (pan/zoom in progress)
    pub fn on_viewport_change(&self, bounds: ViewportBounds) {
        self.debouncer.on_viewport_change(bounds);
    }

    /// Re-run the last settled viewport, e.g. after a failed fetch
    pub fn retry_fetch(&self) -> bool {
        self.debouncer.retry()
    }

    pub fn set_tracks(&self, tracks: Vec<Track>) {
        self.coordinator.set_tracks(tracks);
    }

    /// Evict cached geometries of deleted tracks
    pub fn forget_hashes(&self, hashes: &[String]) {
        self.coordinator.forget_hashes(hashes);
    }

    pub fn geometries(&self) -> Arc<Vec<TrackGeometry>> {
        Arc::clone(&self.coordinator.snapshot().geometries)
    }

    pub fn is_loading(&self) -> bool {
        self.coordinator.snapshot().is_loading()
    }

    pub fn loading_count(&self) -> usize {
        self.coordinator.snapshot().loading_count()
    }

    pub fn error(&self) -> Option<String> {
        self.coordinator.snapshot().error().map(str::to_string)
    }

    pub fn snapshot(&self) -> FetchSnapshot {
        self.coordinator.snapshot()
    }

    /// Watch for state changes
    pub fn subscribe(&self) -> watch::Receiver<FetchSnapshot> {
        self.coordinator.subscribe()
    }

    pub fn last_settled(&self) -> Option<ViewportBounds> {
        self.debouncer.last_settled()
    }

    pub fn coordinator(&self) -> &Arc<GeometryFetchCoordinator> {
        &self.coordinator
    }

    /// Stop the session: pending timers and in-flight fetches are cancelled
    pub fn shutdown(&self) {
        self.debouncer.shutdown();
        self.driver.abort();
        self.coordinator.cancel_in_flight();
    }
}

impl Drop for ViewportSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
