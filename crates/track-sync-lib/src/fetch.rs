//! Geometry fetch coordinator
//!
//! For every settled viewport: filter the visible tracks, serve what the cache has,
//! fetch only the missing geometries, and publish the combined result.
//!
//! Each cycle owns a cancellation token. Starting a cycle cancels the previous one,
//! so at most one geometry request is in flight, and a superseded cycle never commits
//! state or writes to the cache. Commits happen under the same lock that starts new
//! cycles, which makes "still current" and "publish" a single step. Cache reads and
//! writes run on the blocking pool, never under that lock.

use crate::utils::{lock, read, write};
use crate::viewport::filter_visible;
use crate::{
    CachedGeometry, FetchError, GeometryCache, GeometrySource, Track, TrackGeometry, TrackId,
    ViewportBounds,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Loading state exposed to the UI
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FetchStatus {
    #[default]
    Idle,
    /// A network request for `count` missing geometries is in flight
    Loading { count: usize },
    /// The last fetch failed. Already published geometries are kept.
    Error { message: String },
}

/// Published coordinator state
#[derive(Debug, Clone, Default)]
pub struct FetchSnapshot {
    /// Geometries for the tracks visible in the current viewport
    pub geometries: Arc<Vec<TrackGeometry>>,
    pub status: FetchStatus,
    /// Viewport the geometries belong to
    pub viewport: Option<ViewportBounds>,
}

impl FetchSnapshot {
    pub fn is_loading(&self) -> bool {
        matches!(self.status, FetchStatus::Loading { .. })
    }

    pub fn loading_count(&self) -> usize {
        match self.status {
            FetchStatus::Loading { count } => count,
            _ => 0,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            FetchStatus::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// How a single viewport cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No track intersects the viewport
    Empty,
    /// Every visible geometry came from the cache
    Cached { hits: usize },
    Fetched {
        hits: usize,
        fetched: usize,
        /// Returned geometries with an unknown track identifier
        dropped: usize,
    },
    /// Superseded by a newer cycle; nothing was committed
    Cancelled,
    Failed { message: String },
}

/// Handle on the cycle that currently owns the outcome
struct CurrentCycle {
    generation: u64,
    token: CancellationToken,
}

/// Ticket for one viewport cycle, obtained from [`GeometryFetchCoordinator::begin_cycle`]
#[derive(Debug, Clone)]
pub struct CycleTicket {
    pub generation: u64,
    pub token: CancellationToken,
}

/// Orchestrates cache lookups and network fetches per settled viewport
pub struct GeometryFetchCoordinator {
    source: Arc<dyn GeometrySource>,
    cache: Arc<dyn GeometryCache>,
    tracks: RwLock<Arc<Vec<Track>>>,
    buffer_factor: f64,
    state: watch::Sender<FetchSnapshot>,
    current: Mutex<CurrentCycle>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GeometryFetchCoordinator {
    pub fn new(
        source: Arc<dyn GeometrySource>,
        cache: Arc<dyn GeometryCache>,
        buffer_factor: f64,
    ) -> Self {
        let (state, _) = watch::channel(FetchSnapshot::default());
        Self {
            source,
            cache,
            tracks: RwLock::new(Arc::new(Vec::new())),
            buffer_factor,
            state,
            current: Mutex::new(CurrentCycle {
                generation: 0,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Replace the track list supplied by the metadata provider.
    ///
    /// Takes effect on the next cycle.
    pub fn set_tracks(&self, tracks: Vec<Track>) {
        *write(&self.tracks) = Arc::new(tracks);
    }

    pub fn tracks(&self) -> Arc<Vec<Track>> {
        Arc::clone(&read(&self.tracks))
    }

    pub fn cache(&self) -> &Arc<dyn GeometryCache> {
        &self.cache
    }

    /// Evict cache entries of tracks that no longer exist
    pub fn forget_hashes(&self, hashes: &[String]) {
        if !hashes.is_empty() {
            tracing::debug!(count = hashes.len(), "Evicting deleted track geometries");
            self.cache.delete_many(hashes);
        }
    }

    pub fn snapshot(&self) -> FetchSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchSnapshot> {
        self.state.subscribe()
    }

    /// Cancel the current cycle and hand out a ticket for a new one
    pub fn begin_cycle(&self) -> CycleTicket {
        let mut current = lock(&self.current);
        current.token.cancel();
        current.generation += 1;
        current.token = CancellationToken::new();
        CycleTicket {
            generation: current.generation,
            token: current.token.clone(),
        }
    }

    /// Cancel whatever cycle is in flight without starting a new one
    pub fn cancel_in_flight(&self) {
        lock(&self.current).token.cancel();
    }

    /// Run `f` only if `ticket` still owns the outcome
    fn commit(&self, ticket: &CycleTicket, f: impl FnOnce()) -> bool {
        let current = lock(&self.current);
        if current.generation != ticket.generation || ticket.token.is_cancelled() {
            return false;
        }
        f();
        true
    }

    /// Run a cache operation on the blocking pool. `None` if the task died.
    async fn with_cache<T, F>(&self, f: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn GeometryCache) -> T + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        match tokio::task::spawn_blocking(move || f(cache.as_ref())).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Geometry cache task failed: {}", e);
                None
            }
        }
    }

    fn publish(&self, geometries: Vec<TrackGeometry>, viewport: ViewportBounds) {
        self.state.send_modify(|s| {
            s.geometries = Arc::new(geometries);
            s.status = FetchStatus::Idle;
            s.viewport = Some(viewport);
        });
    }

    /// Start a new cycle for `viewport` and run it to completion
    pub async fn load_viewport(&self, viewport: ViewportBounds) -> CycleOutcome {
        let ticket = self.begin_cycle();
        self.run_cycle(viewport, ticket).await
    }

    /// Run the cycle described by `ticket` for `viewport`
    pub async fn run_cycle(&self, viewport: ViewportBounds, ticket: CycleTicket) -> CycleOutcome {
        if ticket.token.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let tracks = self.tracks();
        let shown: Vec<Track> = tracks.iter().filter(|t| t.visible).cloned().collect();
        let visible = filter_visible(&shown, &viewport, self.buffer_factor);

        if visible.is_empty() {
            return if self.commit(&ticket, || self.publish(Vec::new(), viewport)) {
                tracing::debug!(generation = ticket.generation, "No visible tracks");
                CycleOutcome::Empty
            } else {
                CycleOutcome::Cancelled
            };
        }

        let hash_by_id: HashMap<TrackId, String> =
            visible.iter().map(|t| (t.id, t.hash.clone())).collect();
        let hashes: Vec<String> = visible.iter().map(|t| t.hash.clone()).collect();
        let cached = self
            .with_cache(move |cache| cache.get(&hashes))
            .await
            .unwrap_or_default();

        let mut by_id: HashMap<TrackId, TrackGeometry> = HashMap::new();
        let mut id_by_hash: HashMap<&str, Vec<TrackId>> = HashMap::new();
        for track in &visible {
            id_by_hash.entry(&track.hash).or_default().push(track.id);
        }
        for entry in cached {
            for &id in id_by_hash.get(entry.hash.as_str()).into_iter().flatten() {
                let mut geometry = entry.geometry.clone();
                geometry.track_id = id;
                by_id.insert(id, geometry);
            }
        }
        let hits = by_id.len();

        let missing_ids: Vec<TrackId> = visible
            .iter()
            .map(|t| t.id)
            .filter(|id| !by_id.contains_key(id))
            .collect();

        if missing_ids.is_empty() {
            let geometries = ordered(&visible, &mut by_id);
            return if self.commit(&ticket, || self.publish(geometries, viewport)) {
                tracing::debug!(generation = ticket.generation, hits, "Served from cache");
                CycleOutcome::Cached { hits }
            } else {
                CycleOutcome::Cancelled
            };
        }

        let count = missing_ids.len();
        let still_current = self.commit(&ticket, || {
            self.state.send_modify(|s| s.status = FetchStatus::Loading { count });
        });
        if !still_current {
            return CycleOutcome::Cancelled;
        }
        tracing::debug!(
            generation = ticket.generation,
            hits,
            missing = count,
            "Fetching missing geometries"
        );

        let result = self
            .source
            .fetch_geometries(&missing_ids, &ticket.token)
            .await;

        match result {
            Ok(fetched) => {
                let mut entries = Vec::with_capacity(fetched.len());
                let mut dropped = 0;
                for geometry in fetched {
                    match hash_by_id.get(&geometry.track_id) {
                        Some(hash) => entries.push(CachedGeometry::new(hash.clone(), geometry)),
                        None => {
                            dropped += 1;
                            tracing::warn!(
                                track_id = geometry.track_id,
                                "Fetched geometry for unknown track, dropping"
                            );
                        }
                    }
                }
                let fetched_count = entries.len();
                if fetched_count < count {
                    tracing::debug!(
                        requested = count,
                        received = fetched_count,
                        "Server returned fewer geometries than requested"
                    );
                }

                for entry in &entries {
                    by_id.insert(entry.geometry.track_id, entry.geometry.clone());
                }
                let geometries = ordered(&visible, &mut by_id);

                if self.commit(&ticket, || self.publish(geometries, viewport)) {
                    // Entries are keyed by content hash, so a write that lands after
                    // a newer cycle started is still valid
                    self.with_cache(move |cache| cache.set_many(entries)).await;
                    CycleOutcome::Fetched {
                        hits,
                        fetched: fetched_count,
                        dropped,
                    }
                } else {
                    tracing::debug!(generation = ticket.generation, "Discarding superseded fetch");
                    CycleOutcome::Cancelled
                }
            }
            Err(FetchError::Cancelled) => CycleOutcome::Cancelled,
            Err(e) => {
                let message = e.to_string();
                let committed = self.commit(&ticket, || {
                    self.state.send_modify(|s| {
                        s.status = FetchStatus::Error {
                            message: message.clone(),
                        }
                    });
                });
                if committed {
                    tracing::warn!("Geometry fetch failed: {}", message);
                    CycleOutcome::Failed { message }
                } else {
                    CycleOutcome::Cancelled
                }
            }
        }
    }

    /// Drive cycles from a stream of settled viewports.
    ///
    /// Every settled viewport supersedes the previous cycle before its own cycle is
    /// spawned, so a slow response can never overtake a newer one.
    pub fn spawn_driver(
        self: &Arc<Self>,
        mut settled: mpsc::UnboundedReceiver<ViewportBounds>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(viewport) = settled.recv().await {
                let ticket = this.begin_cycle();
                let cycle = Arc::clone(&this);
                tokio::spawn(async move {
                    let outcome = cycle.run_cycle(viewport, ticket).await;
                    tracing::trace!(?outcome, "Viewport cycle finished");
                });
            }
            this.cancel_in_flight();
        })
    }
}

/// Geometries in the order of `visible`
fn ordered(visible: &[Track], by_id: &mut HashMap<TrackId, TrackGeometry>) -> Vec<TrackGeometry> {
    visible.iter().filter_map(|t| by_id.remove(&t.id)).collect()
}
