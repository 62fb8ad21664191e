//! Last-viewport persistence
//!
//! The map view restores the viewport it was closed on. Failures are logged and
//! otherwise ignored: a missing viewport only means the default view is shown.

use crate::ViewportBounds;
use crate::storage::{StorageBackend, load_json_backend, save_json_backend};

const LAST_VIEWPORT_KEY: &str = "last_viewport";

pub struct ViewportStore<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> ViewportStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn save(&self, bounds: &ViewportBounds) {
        if let Err(e) = save_json_backend(&self.backend, LAST_VIEWPORT_KEY, bounds) {
            tracing::warn!("Failed to save viewport: {}", e);
        }
    }

    /// The last saved viewport, if one was saved and is still readable
    pub fn load(&self) -> Option<ViewportBounds> {
        match load_json_backend::<ViewportBounds>(&self.backend, LAST_VIEWPORT_KEY) {
            // Re-normalise in case the file was edited by hand
            Ok(bounds) => {
                bounds.map(|b| ViewportBounds::new(b.min_lat, b.max_lat, b.min_lon, b.max_lon))
            }
            Err(e) => {
                tracing::warn!("Failed to load saved viewport: {}", e);
                None
            }
        }
    }

    /// Forget the saved viewport
    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(LAST_VIEWPORT_KEY) {
            tracing::warn!("Failed to clear saved viewport: {}", e);
        }
    }
}
