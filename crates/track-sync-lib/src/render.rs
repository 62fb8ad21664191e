//! Render sync engine
//!
//! Keeps the map engine's drawing primitives in step with the loaded geometries,
//! the selection and the speed colouring flag. The engine is treated as a
//! write-only sink: what is drawn is mirrored in a [`RenderSet`] that the caller
//! passes in and gets back from every sync call.
//!
//! Per track the engine holds one line source (`track-<id>`) and either
//!
//! - the deselected layer `track-<id>-line`, or
//! - the selected layers `track-<id>-halo` and `track-<id>-selected`.
//!
//! Failures are per track: they are logged and the loop moves on.

use crate::speed_color::{self, GradientStops, Rgb};
use crate::{SelectionState, TrackGeometry, TrackId};
use geo::LineString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

pub const LINE_COLOR_PROPERTY: &str = "line-color";
pub const LINE_GRADIENT_PROPERTY: &str = "line-gradient";

pub const DESELECTED_COLOR: Rgb = Rgb::new(100, 116, 139);
pub const SELECTED_COLOR: Rgb = Rgb::new(249, 115, 22);
pub const HALO_COLOR: Rgb = Rgb::new(255, 255, 255);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("{op} failed for {id}: {message}")]
    Engine {
        op: &'static str,
        id: String,
        message: String,
    },
}

impl RenderError {
    pub fn engine(op: &'static str, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            op,
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Value for [`MapEngine::set_paint_property`]
#[derive(Debug, Clone, PartialEq)]
pub enum PaintValue {
    Color(Rgb),
    Gradient(GradientStops),
    /// Reset the property to the layer's default
    Unset,
}

/// A line layer drawing one track source
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub color: Rgb,
    pub width: f64,
    pub opacity: f64,
}

/// Drawing primitives exposed by the map rendering engine.
///
/// Callers never add an existing id or remove a missing one; the [`RenderSet`]
/// mirror guards every call.
pub trait MapEngine {
    fn add_source(&mut self, id: &str, line: &LineString<f64>) -> Result<(), RenderError>;

    fn remove_source(&mut self, id: &str) -> Result<(), RenderError>;

    fn add_layer(&mut self, spec: &LayerSpec) -> Result<(), RenderError>;

    fn remove_layer(&mut self, id: &str) -> Result<(), RenderError>;

    fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        value: PaintValue,
    ) -> Result<(), RenderError>;
}

impl<E: MapEngine + ?Sized> MapEngine for Box<E> {
    fn add_source(&mut self, id: &str, line: &LineString<f64>) -> Result<(), RenderError> {
        (**self).add_source(id, line)
    }

    fn remove_source(&mut self, id: &str) -> Result<(), RenderError> {
        (**self).remove_source(id)
    }

    fn add_layer(&mut self, spec: &LayerSpec) -> Result<(), RenderError> {
        (**self).add_layer(spec)
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), RenderError> {
        (**self).remove_layer(id)
    }

    fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        value: PaintValue,
    ) -> Result<(), RenderError> {
        (**self).set_paint_property(layer_id, property, value)
    }
}

pub fn source_id(id: TrackId) -> String {
    format!("track-{id}")
}

pub fn line_layer_id(id: TrackId) -> String {
    format!("track-{id}-line")
}

pub fn halo_layer_id(id: TrackId) -> String {
    format!("track-{id}-halo")
}

pub fn selected_layer_id(id: TrackId) -> String {
    format!("track-{id}-selected")
}

/// Which set of layers a drawn track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStyle {
    Deselected,
    Selected,
}

impl TrackStyle {
    fn of(selected: bool) -> Self {
        if selected {
            Self::Selected
        } else {
            Self::Deselected
        }
    }

    /// Layers in draw order (bottom first)
    fn layers(self, id: TrackId) -> Vec<LayerSpec> {
        let source = source_id(id);
        match self {
            Self::Deselected => vec![LayerSpec {
                id: line_layer_id(id),
                source,
                color: DESELECTED_COLOR,
                width: 3.0,
                opacity: 0.8,
            }],
            Self::Selected => vec![
                LayerSpec {
                    id: halo_layer_id(id),
                    source: source.clone(),
                    color: HALO_COLOR,
                    width: 8.0,
                    opacity: 0.9,
                },
                LayerSpec {
                    id: selected_layer_id(id),
                    source,
                    color: SELECTED_COLOR,
                    width: 4.0,
                    opacity: 1.0,
                },
            ],
        }
    }

    /// Layer that carries the track's colour
    fn foreground_layer(self, id: TrackId) -> String {
        match self {
            Self::Deselected => line_layer_id(id),
            Self::Selected => selected_layer_id(id),
        }
    }

    fn flat_color(self) -> Rgb {
        match self {
            Self::Deselected => DESELECTED_COLOR,
            Self::Selected => SELECTED_COLOR,
        }
    }
}

/// How gradients are scaled when speed colouring is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeedScaleMode {
    /// Each track from its own minimum to its own maximum speed
    #[default]
    PerTrack,
    /// Every track from 0 to the highest speed among the drawn tracks
    Global,
}

#[derive(Debug, Clone, PartialEq)]
struct DrawnTrack {
    style: TrackStyle,
    /// Gradient currently painted on the foreground layer
    gradient: Option<GradientStops>,
}

impl DrawnTrack {
    fn new(style: TrackStyle) -> Self {
        Self {
            style,
            gradient: None,
        }
    }
}

/// Mirror of the tracks currently drawn on the map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderSet {
    drawn: BTreeMap<TrackId, DrawnTrack>,
}

impl RenderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.drawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawn.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: TrackId) -> bool {
        self.drawn.contains_key(&id)
    }

    /// Drawn track ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.drawn.keys().copied()
    }

    pub fn style(&self, id: TrackId) -> Option<TrackStyle> {
        self.drawn.get(&id).map(|t| t.style)
    }

    pub fn gradient(&self, id: TrackId) -> Option<&GradientStops> {
        self.drawn.get(&id).and_then(|t| t.gradient.as_ref())
    }
}

/// Per-track speeds of the geometries that carry consistent speed data
pub fn speeds_by_track(geometries: &[TrackGeometry]) -> HashMap<TrackId, Vec<f64>> {
    geometries
        .iter()
        .filter_map(|g| Some((g.track_id, g.valid_speeds()?.to_vec())))
        .collect()
}

/// Add the layers of `style`, rolling back already added ones on failure
fn add_layers<E: MapEngine + ?Sized>(
    engine: &mut E,
    id: TrackId,
    style: TrackStyle,
) -> Result<(), RenderError> {
    let layers = style.layers(id);
    for (i, spec) in layers.iter().enumerate() {
        if let Err(e) = engine.add_layer(spec) {
            for added in layers[..i].iter().rev() {
                if let Err(cleanup) = engine.remove_layer(&added.id) {
                    tracing::warn!("Failed to roll back layer {}: {}", added.id, cleanup);
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Remove every layer of `style`, returning the first failure
fn remove_layers<E: MapEngine + ?Sized>(
    engine: &mut E,
    id: TrackId,
    style: TrackStyle,
) -> Result<(), RenderError> {
    let mut first_error = None;
    for spec in style.layers(id).iter().rev() {
        if let Err(e) = engine.remove_layer(&spec.id) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn add_track<E: MapEngine + ?Sized>(
    engine: &mut E,
    geometry: &TrackGeometry,
    style: TrackStyle,
) -> Result<(), RenderError> {
    let source = source_id(geometry.track_id);
    engine.add_source(&source, &geometry.line_string())?;
    if let Err(e) = add_layers(engine, geometry.track_id, style) {
        if let Err(cleanup) = engine.remove_source(&source) {
            tracing::warn!("Failed to roll back source {}: {}", source, cleanup);
        }
        return Err(e);
    }
    Ok(())
}

fn remove_track<E: MapEngine + ?Sized>(engine: &mut E, id: TrackId, style: TrackStyle) {
    if let Err(e) = remove_layers(engine, id, style) {
        tracing::warn!("Failed to remove layers of track {}: {}", id, e);
    }
    if let Err(e) = engine.remove_source(&source_id(id)) {
        tracing::warn!("Failed to remove source of track {}: {}", id, e);
    }
}

/// Draw the new geometry set: remove tracks that left it, add tracks that joined it.
///
/// Tracks in both the previous and the new set are not touched. A track that fails
/// to draw is left out of the returned set.
pub fn sync_sources<E: MapEngine + ?Sized>(
    engine: &mut E,
    mut render_set: RenderSet,
    geometries: &[TrackGeometry],
    selection: &SelectionState,
) -> RenderSet {
    #[cfg(feature = "profiling")]
    profiling::scope!("render::sync_sources");

    let wanted: HashSet<TrackId> = geometries.iter().map(|g| g.track_id).collect();
    let stale: Vec<TrackId> = render_set
        .ids()
        .filter(|id| !wanted.contains(id))
        .collect();

    for id in stale {
        if let Some(track) = render_set.drawn.remove(&id) {
            remove_track(engine, id, track.style);
        }
    }

    let mut added = 0usize;
    for geometry in geometries {
        let id = geometry.track_id;
        if render_set.contains(id) {
            continue;
        }
        let style = TrackStyle::of(selection.contains(id));
        match add_track(engine, geometry, style) {
            Ok(()) => {
                render_set.drawn.insert(id, DrawnTrack::new(style));
                added += 1;
            }
            Err(e) => tracing::warn!("Failed to draw track {}: {}", id, e),
        }
    }

    tracing::trace!(added, drawn = render_set.len(), "Synced track sources");
    render_set
}

/// Swap style primitives for the drawn tracks whose selection changed
pub fn sync_selection<E: MapEngine + ?Sized>(
    engine: &mut E,
    mut render_set: RenderSet,
    selection: &SelectionState,
    previous: &SelectionState,
) -> RenderSet {
    #[cfg(feature = "profiling")]
    profiling::scope!("render::sync_selection");

    for (&id, track) in render_set.drawn.iter_mut() {
        let selected = selection.contains(id);
        if selected == previous.contains(id) {
            continue;
        }
        let target = TrackStyle::of(selected);
        if track.style == target {
            continue;
        }
        restyle(engine, id, track, target);
    }
    render_set
}

/// Replace the layers of one track. The new layers go in before the old ones come
/// out, so a failed add leaves the track as it was.
fn restyle<E: MapEngine + ?Sized>(
    engine: &mut E,
    id: TrackId,
    track: &mut DrawnTrack,
    target: TrackStyle,
) {
    if let Err(e) = add_layers(engine, id, target) {
        tracing::warn!("Failed to restyle track {}: {}", id, e);
        return;
    }
    if let Err(e) = remove_layers(engine, id, track.style) {
        tracing::warn!("Failed to remove previous style of track {}: {}", id, e);
    }
    track.style = target;

    // Carry an active gradient over to the new foreground layer
    if let Some(stops) = track.gradient.take() {
        let layer = target.foreground_layer(id);
        match engine.set_paint_property(
            &layer,
            LINE_GRADIENT_PROPERTY,
            PaintValue::Gradient(stops.clone()),
        ) {
            Ok(()) => track.gradient = Some(stops),
            Err(e) => tracing::warn!("Failed to reapply gradient on {}: {}", layer, e),
        }
    }
}

fn speed_range(speeds: &[f64]) -> (f64, f64) {
    let min = speeds.iter().copied().fold(f64::INFINITY, f64::min);
    let max = speeds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

/// Paint or clear speed gradients on the drawn tracks.
///
/// Tracks without speed data are left alone. The drawn style in the render set
/// decides which layer is painted.
pub fn sync_speed_coloring<E: MapEngine + ?Sized>(
    engine: &mut E,
    mut render_set: RenderSet,
    enabled: bool,
    speed_by_track: &HashMap<TrackId, Vec<f64>>,
    selection: &SelectionState,
    mode: SpeedScaleMode,
) -> RenderSet {
    #[cfg(feature = "profiling")]
    profiling::scope!("render::sync_speed_coloring");

    let global_max = render_set
        .ids()
        .filter_map(|id| speed_by_track.get(&id))
        .flatten()
        .copied()
        .fold(0.0, f64::max);

    for (&id, track) in render_set.drawn.iter_mut() {
        let Some(speeds) = speed_by_track.get(&id).filter(|s| !s.is_empty()) else {
            continue;
        };
        if selection.contains(id) != (track.style == TrackStyle::Selected) {
            tracing::debug!(id, "Selection not synced yet, colouring the drawn style");
        }
        let layer = track.style.foreground_layer(id);

        if enabled {
            let stops = match mode {
                SpeedScaleMode::PerTrack => {
                    let (min, max) = speed_range(speeds);
                    speed_color::gradient_stops(speeds, max, min)
                }
                SpeedScaleMode::Global => speed_color::gradient_stops(speeds, global_max, 0.0),
            };
            if track.gradient.as_ref() == Some(&stops) {
                continue;
            }
            match engine.set_paint_property(
                &layer,
                LINE_GRADIENT_PROPERTY,
                PaintValue::Gradient(stops.clone()),
            ) {
                Ok(()) => track.gradient = Some(stops),
                Err(e) => tracing::warn!("Failed to apply speed gradient to {}: {}", layer, e),
            }
        } else if track.gradient.is_some() {
            let restored = engine
                .set_paint_property(&layer, LINE_GRADIENT_PROPERTY, PaintValue::Unset)
                .and_then(|()| {
                    engine.set_paint_property(
                        &layer,
                        LINE_COLOR_PROPERTY,
                        PaintValue::Color(track.style.flat_color()),
                    )
                });
            match restored {
                Ok(()) => track.gradient = None,
                Err(e) => tracing::warn!("Failed to restore flat colour on {}: {}", layer, e),
            }
        }
    }
    render_set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelectionSource;

    /// Engine that records every call and rejects duplicate adds and missing removes
    #[derive(Default)]
    struct RecordingEngine {
        pub ops: Vec<String>,
        pub sources: HashSet<String>,
        pub layers: Vec<String>,
        pub paint: HashMap<(String, String), PaintValue>,
        /// Primitive ids whose next operation fails
        pub fail: HashSet<String>,
    }

    impl RecordingEngine {
        fn check_fail(&self, op: &'static str, id: &str) -> Result<(), RenderError> {
            if self.fail.contains(id) {
                return Err(RenderError::engine(op, id, "injected failure"));
            }
            Ok(())
        }

        fn take_ops(&mut self) -> Vec<String> {
            std::mem::take(&mut self.ops)
        }
    }

    impl MapEngine for RecordingEngine {
        fn add_source(&mut self, id: &str, _line: &LineString<f64>) -> Result<(), RenderError> {
            self.ops.push(format!("add_source {id}"));
            self.check_fail("add_source", id)?;
            assert!(self.sources.insert(id.to_string()), "duplicate source {id}");
            Ok(())
        }

        fn remove_source(&mut self, id: &str) -> Result<(), RenderError> {
            self.ops.push(format!("remove_source {id}"));
            self.check_fail("remove_source", id)?;
            assert!(self.sources.remove(id), "missing source {id}");
            Ok(())
        }

        fn add_layer(&mut self, spec: &LayerSpec) -> Result<(), RenderError> {
            self.ops.push(format!("add_layer {}", spec.id));
            self.check_fail("add_layer", &spec.id)?;
            assert!(self.sources.contains(&spec.source), "layer without source");
            assert!(!self.layers.contains(&spec.id), "duplicate layer {}", spec.id);
            self.layers.push(spec.id.clone());
            Ok(())
        }

        fn remove_layer(&mut self, id: &str) -> Result<(), RenderError> {
            self.ops.push(format!("remove_layer {id}"));
            self.check_fail("remove_layer", id)?;
            let pos = self.layers.iter().position(|l| l == id);
            assert!(pos.is_some(), "missing layer {id}");
            if let Some(pos) = pos {
                self.layers.remove(pos);
            }
            Ok(())
        }

        fn set_paint_property(
            &mut self,
            layer_id: &str,
            property: &str,
            value: PaintValue,
        ) -> Result<(), RenderError> {
            self.ops.push(format!("paint {layer_id} {property}"));
            self.check_fail("set_paint_property", layer_id)?;
            assert!(self.layers.iter().any(|l| l == layer_id), "paint on missing layer");
            self.paint
                .insert((layer_id.to_string(), property.to_string()), value);
            Ok(())
        }
    }

    fn line(id: TrackId) -> TrackGeometry {
        let x = id as f64;
        TrackGeometry::new(id, vec![[x, 0.0], [x + 0.1, 0.1], [x + 0.2, 0.1]])
    }

    fn selected(ids: &[TrackId]) -> SelectionState {
        SelectionState::from_ids(ids.iter().copied(), SelectionSource::Map)
    }

    #[test]
    fn test_adds_styled_primitives() {
        let mut engine = RecordingEngine::default();
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1), line(2)], &selected(&[2]));

        assert_eq!(
            engine.take_ops(),
            vec![
                "add_source track-1",
                "add_layer track-1-line",
                "add_source track-2",
                "add_layer track-2-halo",
                "add_layer track-2-selected",
            ]
        );
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(set.style(1), Some(TrackStyle::Deselected));
        assert_eq!(set.style(2), Some(TrackStyle::Selected));
    }

    #[test]
    fn test_second_identical_sync_is_a_noop() {
        let mut engine = RecordingEngine::default();
        let geometries = [line(1), line(2), line(3)];
        let selection = selected(&[3]);

        let set = sync_sources(&mut engine, RenderSet::new(), &geometries, &selection);
        engine.take_ops();
        let again = sync_sources(&mut engine, set.clone(), &geometries, &selection);

        assert!(engine.ops.is_empty());
        assert_eq!(again, set);
    }

    #[test]
    fn test_removes_tracks_that_left_the_result() {
        let mut engine = RecordingEngine::default();
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1), line(2)], &selected(&[1]));
        engine.take_ops();

        let set = sync_sources(&mut engine, set, &[line(2), line(3)], &selected(&[1]));
        assert_eq!(
            engine.take_ops(),
            vec![
                "remove_layer track-1-selected",
                "remove_layer track-1-halo",
                "remove_source track-1",
                "add_source track-3",
                "add_layer track-3-line",
            ]
        );
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![2, 3]);
        assert!(engine.layers.iter().all(|l| !l.starts_with("track-1-")));
    }

    #[test]
    fn test_creation_failure_excludes_only_that_track() {
        let mut engine = RecordingEngine::default();
        engine.fail.insert("track-2-selected".into());

        let set = sync_sources(
            &mut engine,
            RenderSet::new(),
            &[line(1), line(2), line(3)],
            &selected(&[2]),
        );

        assert_eq!(set.ids().collect::<Vec<_>>(), vec![1, 3]);
        // Partially created primitives were rolled back
        assert!(!engine.sources.contains("track-2"));
        assert!(!engine.layers.contains(&"track-2-halo".to_string()));

        // The failed track is retried on the next sync
        engine.fail.clear();
        let set = sync_sources(&mut engine, set, &[line(1), line(2), line(3)], &selected(&[2]));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_removal_failure_does_not_stop_others() {
        let mut engine = RecordingEngine::default();
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1), line(2)], &selected(&[]));
        engine.fail.insert("track-1-line".into());

        let set = sync_sources(&mut engine, set, &[], &selected(&[]));
        assert!(set.is_empty());
        assert!(!engine.sources.contains("track-2"));
        assert!(!engine.layers.contains(&"track-2-line".to_string()));
    }

    #[test]
    fn test_selection_swaps_only_changed_tracks() {
        let mut engine = RecordingEngine::default();
        let previous = selected(&[1]);
        let set = sync_sources(
            &mut engine,
            RenderSet::new(),
            &[line(1), line(2), line(3)],
            &previous,
        );
        engine.take_ops();

        let next = selected(&[2]);
        let set = sync_selection(&mut engine, set, &next, &previous);
        assert_eq!(
            engine.take_ops(),
            vec![
                "add_layer track-1-line",
                "remove_layer track-1-selected",
                "remove_layer track-1-halo",
                "add_layer track-2-halo",
                "add_layer track-2-selected",
                "remove_layer track-2-line",
            ]
        );
        assert_eq!(set.style(1), Some(TrackStyle::Deselected));
        assert_eq!(set.style(2), Some(TrackStyle::Selected));
        assert_eq!(set.style(3), Some(TrackStyle::Deselected));

        // Unchanged selection touches nothing
        let set = sync_selection(&mut engine, set, &next, &next);
        assert!(engine.ops.is_empty());
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_failed_restyle_keeps_previous_style() {
        let mut engine = RecordingEngine::default();
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1)], &selected(&[]));
        engine.fail.insert("track-1-selected".into());

        let set = sync_selection(&mut engine, set, &selected(&[1]), &selected(&[]));
        assert_eq!(set.style(1), Some(TrackStyle::Deselected));
        assert_eq!(engine.layers, vec!["track-1-line".to_string()]);
    }

    #[test]
    fn test_speed_coloring_per_track() {
        let mut engine = RecordingEngine::default();
        let selection = selected(&[2]);
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1), line(2)], &selection);
        engine.take_ops();

        let speeds = HashMap::from([(1, vec![2.0, 4.0]), (2, vec![1.0, 9.0])]);
        let set = sync_speed_coloring(
            &mut engine,
            set,
            true,
            &speeds,
            &selection,
            SpeedScaleMode::PerTrack,
        );

        assert_eq!(
            engine.take_ops(),
            vec![
                "paint track-1-line line-gradient",
                "paint track-2-selected line-gradient",
            ]
        );
        // Each track spans its own range
        let stops = set.gradient(1).unwrap();
        assert_eq!(stops.stops[0].1, speed_color::SLOW_COLOR);
        assert_eq!(stops.stops[1].1, speed_color::FAST_COLOR);

        // Same inputs, nothing to repaint
        let set = sync_speed_coloring(
            &mut engine,
            set,
            true,
            &speeds,
            &selection,
            SpeedScaleMode::PerTrack,
        );
        assert!(engine.ops.is_empty());

        // Global scale: track 1 tops out well below the shared max
        let set = sync_speed_coloring(
            &mut engine,
            set,
            true,
            &speeds,
            &selection,
            SpeedScaleMode::Global,
        );
        assert_eq!(engine.take_ops().len(), 2);
        let stops = set.gradient(1).unwrap();
        assert_eq!(stops.stops[1].1, speed_color::color_for(4.0, 9.0, 0.0));
    }

    #[test]
    fn test_disabling_restores_flat_color() {
        let mut engine = RecordingEngine::default();
        let selection = selected(&[]);
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1), line(2)], &selection);
        let speeds = HashMap::from([(1, vec![2.0, 4.0])]);
        let set = sync_speed_coloring(
            &mut engine,
            set,
            true,
            &speeds,
            &selection,
            SpeedScaleMode::PerTrack,
        );
        engine.take_ops();

        let set = sync_speed_coloring(
            &mut engine,
            set,
            false,
            &speeds,
            &selection,
            SpeedScaleMode::PerTrack,
        );
        assert_eq!(
            engine.take_ops(),
            vec![
                "paint track-1-line line-gradient",
                "paint track-1-line line-color",
            ]
        );
        assert_eq!(set.gradient(1), None);
        assert_eq!(
            engine.paint.get(&("track-1-line".to_string(), LINE_COLOR_PROPERTY.to_string())),
            Some(&PaintValue::Color(DESELECTED_COLOR))
        );

        // Already flat
        sync_speed_coloring(
            &mut engine,
            set,
            false,
            &speeds,
            &selection,
            SpeedScaleMode::PerTrack,
        );
        assert!(engine.ops.is_empty());
    }

    #[test]
    fn test_tracks_without_speed_data_are_untouched() {
        let mut engine = RecordingEngine::default();
        let selection = selected(&[]);
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1)], &selection);
        engine.take_ops();

        let speeds = HashMap::from([(1, vec![]), (7, vec![3.0])]);
        let set = sync_speed_coloring(
            &mut engine,
            set,
            true,
            &speeds,
            &selection,
            SpeedScaleMode::Global,
        );
        assert!(engine.ops.is_empty());
        assert_eq!(set.gradient(1), None);
    }

    #[test]
    fn test_restyle_carries_gradient() {
        let mut engine = RecordingEngine::default();
        let none = selected(&[]);
        let set = sync_sources(&mut engine, RenderSet::new(), &[line(1)], &none);
        let speeds = HashMap::from([(1, vec![2.0, 4.0])]);
        let set = sync_speed_coloring(&mut engine, set, true, &speeds, &none, SpeedScaleMode::PerTrack);
        let gradient = set.gradient(1).cloned();

        let set = sync_selection(&mut engine, set, &selected(&[1]), &none);
        assert_eq!(set.gradient(1).cloned(), gradient);
        assert!(matches!(
            engine
                .paint
                .get(&("track-1-selected".to_string(), LINE_GRADIENT_PROPERTY.to_string())),
            Some(PaintValue::Gradient(_))
        ));
    }

    #[test]
    fn test_speeds_by_track_skips_inconsistent_data() {
        let good = line(1).with_speeds(vec![1.0, 2.0]);
        let bad = line(2).with_speeds(vec![1.0]);
        let speeds = speeds_by_track(&[good, bad, line(3)]);
        assert_eq!(speeds.len(), 1);
        assert_eq!(speeds[&1], vec![1.0, 2.0]);
    }
}
