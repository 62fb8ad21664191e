//! Spatial filter: viewport bounds and bounding-box intersection
//!
//! Everything here is pure. The buffer applied by [`filter_visible`] grows the
//! viewport beyond what is literally on screen so that small pans do not refetch.

use crate::{Track, track::BoundingBox};
use geo::{Coord, Intersects, Rect};
use serde::{Deserialize, Serialize};

/// Default buffer factor applied around the viewport when filtering
pub const DEFAULT_BUFFER_FACTOR: f64 = 0.5;

/// Minimum axis range (degrees) used when expanding, so a zero-size viewport still grows
pub const MIN_EXPAND_RANGE: f64 = 1e-6;

/// Rectangular lat/lon region currently visible on the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl ViewportBounds {
    /// Create viewport bounds, swapping any inverted axis so that min <= max
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat: min_lat.min(max_lat),
            max_lat: min_lat.max(max_lat),
            min_lon: min_lon.min(max_lon),
            max_lon: min_lon.max(max_lon),
        }
    }

    #[inline]
    pub fn lat_range(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    #[inline]
    pub fn lon_range(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Convert to a `geo::Rect` (x = longitude, y = latitude)
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
    }
}

/// Whether a bounding box overlaps the viewport.
///
/// Intervals are closed: boxes that only touch along an edge or corner intersect.
/// Always false when any bound is missing.
#[inline]
pub fn bbox_intersects(bounds: &BoundingBox, viewport: &ViewportBounds) -> bool {
    match bounds.to_rect() {
        Some(rect) => rect.intersects(&viewport.to_rect()),
        None => false,
    }
}

/// Whether a track's bounding box overlaps the viewport
#[inline]
pub fn intersects(track: &Track, viewport: &ViewportBounds) -> bool {
    bbox_intersects(&track.bounds, viewport)
}

/// Grow each axis by `factor × max(range, ε)` on each side
pub fn expand(viewport: &ViewportBounds, factor: f64) -> ViewportBounds {
    if factor == 0.0 {
        return *viewport;
    }

    let lat_pad = factor * viewport.lat_range().max(MIN_EXPAND_RANGE);
    let lon_pad = factor * viewport.lon_range().max(MIN_EXPAND_RANGE);

    ViewportBounds {
        min_lat: viewport.min_lat - lat_pad,
        max_lat: viewport.max_lat + lat_pad,
        min_lon: viewport.min_lon - lon_pad,
        max_lon: viewport.max_lon + lon_pad,
    }
}

/// Tracks whose bounding box intersects the viewport expanded by `factor`.
///
/// Input order is preserved.
pub fn filter_visible(tracks: &[Track], viewport: &ViewportBounds, factor: f64) -> Vec<Track> {
    #[cfg(feature = "profiling")]
    profiling::scope!("viewport::filter_visible");

    let expanded = expand(viewport, factor);
    tracks
        .iter()
        .filter(|track| intersects(track, &expanded))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u64, min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Track {
        Track::new(
            id,
            format!("h{id}"),
            BoundingBox::new(min_lat, max_lat, min_lon, max_lon),
        )
    }

    fn london() -> ViewportBounds {
        ViewportBounds::new(51.4, 51.6, -0.3, 0.0)
    }

    #[test]
    fn test_new_normalizes_inverted_axes() {
        let v = ViewportBounds::new(10.0, 5.0, 3.0, -3.0);
        assert_eq!(v.min_lat, 5.0);
        assert_eq!(v.max_lat, 10.0);
        assert_eq!(v.min_lon, -3.0);
        assert_eq!(v.max_lon, 3.0);
    }

    #[test]
    fn test_missing_bound_never_intersects() {
        let world = ViewportBounds::new(-90.0, 90.0, -180.0, 180.0);
        let full = BoundingBox::new(51.5, 51.55, -0.2, -0.1);

        for i in 0..4 {
            let mut bounds = full;
            match i {
                0 => bounds.min_lat = None,
                1 => bounds.max_lat = None,
                2 => bounds.min_lon = None,
                _ => bounds.max_lon = None,
            }
            let t = Track::new(1, "h", bounds);
            assert!(!intersects(&t, &world));
            assert!(!intersects(&t, &london()));
        }
        assert!(!intersects(&Track::new(2, "h", BoundingBox::default()), &world));
    }

    #[test]
    fn test_overlap_and_disjoint() {
        assert!(intersects(&track(1, 51.5, 51.55, -0.2, -0.1), &london()));
        // Tokyo
        assert!(!intersects(&track(2, 35.0, 36.0, 139.0, 140.0), &london()));
        // Overlaps in latitude only
        assert!(!intersects(&track(3, 51.5, 51.55, 1.0, 2.0), &london()));
    }

    #[test]
    fn test_touching_edges_intersect() {
        // Shares only the northern edge
        assert!(intersects(&track(1, 51.6, 51.7, -0.2, -0.1), &london()));
        // Shares only a corner
        assert!(intersects(&track(2, 51.6, 51.7, 0.0, 0.1), &london()));
    }

    #[test]
    fn test_expand_zero_is_identity() {
        let v = london();
        assert_eq!(expand(&v, 0.0), v);
    }

    #[test]
    fn test_expand_grows_each_side() {
        let v = ViewportBounds::new(0.0, 2.0, 10.0, 14.0);
        let e = expand(&v, 0.5);
        assert_eq!(e, ViewportBounds::new(-1.0, 3.0, 8.0, 16.0));
    }

    #[test]
    fn test_expand_degenerate_viewport() {
        let point = ViewportBounds::new(10.0, 10.0, 20.0, 20.0);
        let e = expand(&point, 1.0);
        assert!(e.lat_range() > 0.0);
        assert!(e.lon_range() > 0.0);
        assert!((e.lat_range() - 2.0 * MIN_EXPAND_RANGE).abs() < 1e-12);
    }

    #[test]
    fn test_expand_monotonic_in_factor() {
        let v = london();
        let mut prev = expand(&v, 0.0);
        for step in 1..20 {
            let next = expand(&v, step as f64 * 0.25);
            assert!(next.lat_range() >= prev.lat_range());
            assert!(next.lon_range() >= prev.lon_range());
            assert!(next.min_lat <= prev.min_lat && next.max_lat >= prev.max_lat);
            prev = next;
        }
    }

    #[test]
    fn test_filter_visible_uses_buffer_and_preserves_order() {
        let tracks = vec![
            track(3, 51.5, 51.55, -0.2, -0.1),
            // Just north of the viewport, inside the 0.5 buffer (lat range 0.2 -> pad 0.1)
            track(1, 51.65, 51.68, -0.2, -0.1),
            track(2, 35.0, 36.0, 139.0, 140.0),
            Track::new(4, "h4", BoundingBox::default()),
            track(5, 51.4, 51.45, -0.25, -0.2),
        ];

        let visible = filter_visible(&tracks, &london(), DEFAULT_BUFFER_FACTOR);
        let ids: Vec<u64> = visible.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 1, 5]);

        let unbuffered = filter_visible(&tracks, &london(), 0.0);
        let ids: Vec<u64> = unbuffered.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn test_filter_visible_empty_input() {
        assert!(filter_visible(&[], &london(), DEFAULT_BUFFER_FACTOR).is_empty());
    }
}
