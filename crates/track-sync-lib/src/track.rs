//! Track metadata and geometry types
//!
//! Tracks are owned by the metadata provider and are read-only here. Geometry is
//! the full polyline of a track, loaded lazily and cached by the track's content hash.

use crate::{Result, TrackSyncError};
use geo::{BoundingRect, Coord, LineString, Rect};
use serde::{Deserialize, Serialize};

/// Numeric track identifier assigned by the metadata provider
pub type TrackId = u64;

/// Track bounding box in WGS84 degrees.
///
/// Every bound is optional: tracks without resolvable geometry have none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    #[serde(rename = "bounds_min_lat")]
    pub min_lat: Option<f64>,
    #[serde(rename = "bounds_max_lat")]
    pub max_lat: Option<f64>,
    #[serde(rename = "bounds_min_lon")]
    pub min_lon: Option<f64>,
    #[serde(rename = "bounds_max_lon")]
    pub max_lon: Option<f64>,
}

impl BoundingBox {
    /// Create a fully specified bounding box
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat: Some(min_lat),
            max_lat: Some(max_lat),
            min_lon: Some(min_lon),
            max_lon: Some(max_lon),
        }
    }

    /// Convert to a `geo::Rect` (x = longitude, y = latitude).
    ///
    /// Returns `None` if any bound is missing.
    pub fn to_rect(&self) -> Option<Rect<f64>> {
        Some(Rect::new(
            Coord {
                x: self.min_lon?,
                y: self.min_lat?,
            },
            Coord {
                x: self.max_lon?,
                y: self.max_lat?,
            },
        ))
    }
}

/// Track metadata as supplied by the metadata provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Content hash of the track's geometry, stable across renames
    pub hash: String,
    #[serde(flatten)]
    pub bounds: BoundingBox,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Track {
    pub fn new(id: TrackId, hash: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            id,
            hash: hash.into(),
            bounds,
            visible: true,
        }
    }
}

/// Full path geometry of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackGeometry {
    pub track_id: TrackId,
    /// Ordered `[lon, lat]` pairs forming a polyline
    pub coordinates: Vec<[f64; 2]>,
    /// Per-segment speeds in m/s, one per consecutive coordinate pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_speeds: Option<Vec<f64>>,
}

impl TrackGeometry {
    pub fn new(track_id: TrackId, coordinates: Vec<[f64; 2]>) -> Self {
        Self {
            track_id,
            coordinates,
            segment_speeds: None,
        }
    }

    pub fn with_speeds(mut self, speeds: Vec<f64>) -> Self {
        self.segment_speeds = Some(speeds);
        self
    }

    /// Check the per-segment speed count against the coordinate count
    pub fn validate(&self) -> Result<()> {
        if let Some(speeds) = &self.segment_speeds {
            let expected = self.coordinates.len().saturating_sub(1);
            if speeds.len() != expected {
                return Err(TrackSyncError::InvalidGeometry(format!(
                    "track {} has {} segment speeds for {} coordinates",
                    self.track_id,
                    speeds.len(),
                    self.coordinates.len()
                )));
            }
        }
        Ok(())
    }

    /// Segment speeds, if present and consistent with the coordinates
    pub fn valid_speeds(&self) -> Option<&[f64]> {
        match (&self.segment_speeds, self.validate()) {
            (Some(speeds), Ok(())) if !speeds.is_empty() => Some(speeds),
            _ => None,
        }
    }

    /// Polyline as a `geo::LineString` (x = longitude, y = latitude)
    pub fn line_string(&self) -> LineString<f64> {
        self.coordinates
            .iter()
            .map(|&[lon, lat]| Coord { x: lon, y: lat })
            .collect()
    }

    /// Bounding box derived from the coordinates
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let rect = self.line_string().bounding_rect()?;
        Some(BoundingBox::new(
            rect.min().y,
            rect.max().y,
            rect.min().x,
            rect.max().x,
        ))
    }
}

/// A geometry tagged with the owning track's content hash (the cache key)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedGeometry {
    pub hash: String,
    pub geometry: TrackGeometry,
}

impl CachedGeometry {
    pub fn new(hash: impl Into<String>, geometry: TrackGeometry) -> Self {
        Self {
            hash: hash.into(),
            geometry,
        }
    }
}
