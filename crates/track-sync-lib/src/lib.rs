//! Track Sync Library - Viewport-driven geometry loading for large GPS track collections
//!
//! This library keeps an interactive map consistent with a large, growing collection of
//! recorded tracks. Only tracks whose bounding box intersects the current view get their
//! full path geometry loaded, geometries are cached on-device by content hash, and the
//! map's drawing primitives are diffed instead of rebuilt.
//!
//! # Architecture
//!
//! - **[`viewport`]**: Spatial filter over track bounding boxes
//! - **[`ViewportDebouncer`]**: Collapses bursts of viewport changes into a settled viewport
//! - **[`GeometryCache`]**: Best-effort persistent cache keyed by content hash
//! - **[`GeometryFetchCoordinator`]**: Cache-then-network loading with cancellation
//! - **[`ViewportSession`]**: Debouncer and coordinator wired together
//! - **[`render`]**: Minimal add/remove/restyle diffing against a [`MapEngine`]
//! - **[`speed_color`]**: Speed to colour gradients for the optional overlay
//!
//! # Data flow
//!
//! viewport events → debouncer → spatial filter → fetch coordinator (cache, then network)
//! → geometry result → render sync → map engine calls.

pub mod cache;
mod debounce;
mod fetch;
pub mod render;
mod selection;
mod session;
pub mod source;
pub mod speed_color;
pub mod storage;
mod track;
mod utils;
pub mod viewport;
mod viewport_store;

// Public API exports
pub use cache::{
    GeometryCache, NoopGeometryCache, PersistentGeometryCache, default_cache_path,
    open_geometry_cache,
};
pub use debounce::{DEFAULT_DEBOUNCE_DELAY, ViewportDebouncer};
pub use fetch::{CycleOutcome, FetchSnapshot, FetchStatus, GeometryFetchCoordinator};
pub use render::{MapEngine, RenderSet, SpeedScaleMode};
pub use selection::{SelectionSource, SelectionState};
pub use session::{SyncConfig, ViewportSession};
pub use source::{FetchError, GeometrySource};
pub use speed_color::{GradientStops, Rgb};
pub use storage::{StorageBackend, StorageError};
pub use track::{BoundingBox, CachedGeometry, Track, TrackGeometry, TrackId};
pub use viewport::ViewportBounds;
pub use viewport_store::ViewportStore;

pub use tokio_util::sync::CancellationToken;

/// Error types for the track sync library
#[derive(Debug, thiserror::Error)]
pub enum TrackSyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Geometry fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Render error: {0}")]
    Render(#[from] render::RenderError),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),
}

pub type Result<T> = std::result::Result<T, TrackSyncError>;
