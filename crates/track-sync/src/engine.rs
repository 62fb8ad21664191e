//! Map engine sink that logs every primitive operation
//!
//! There is no map on a terminal, so the driver keeps its own picture of what
//! would be drawn and reports it.

use geo::LineString;
use std::collections::{BTreeMap, BTreeSet};
use track_sync_lib::render::{
    self, LayerSpec, MapEngine, PaintValue, RenderError, RenderSet, SpeedScaleMode,
};
use track_sync_lib::{SelectionState, TrackGeometry};

/// Operation counters since the last [`LoggingEngine::take_stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub sources_added: usize,
    pub sources_removed: usize,
    pub layers_added: usize,
    pub layers_removed: usize,
    pub paints: usize,
}

impl EngineStats {
    pub fn total(&self) -> usize {
        self.sources_added
            + self.sources_removed
            + self.layers_added
            + self.layers_removed
            + self.paints
    }
}

#[derive(Debug, Default)]
pub struct LoggingEngine {
    /// Source id to point count
    sources: BTreeMap<String, usize>,
    layers: BTreeSet<String>,
    stats: EngineStats,
}

impl LoggingEngine {
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn point_count(&self) -> usize {
        self.sources.values().sum()
    }

    pub fn take_stats(&mut self) -> EngineStats {
        std::mem::take(&mut self.stats)
    }
}

impl MapEngine for LoggingEngine {
    fn add_source(&mut self, id: &str, line: &LineString<f64>) -> Result<(), RenderError> {
        if line.0.len() < 2 {
            return Err(RenderError::engine(
                "add_source",
                id,
                "a line needs at least two points",
            ));
        }
        if self.sources.contains_key(id) {
            return Err(RenderError::engine("add_source", id, "source already exists"));
        }
        tracing::debug!(id, points = line.0.len(), "add source");
        self.sources.insert(id.to_string(), line.0.len());
        self.stats.sources_added += 1;
        Ok(())
    }

    fn remove_source(&mut self, id: &str) -> Result<(), RenderError> {
        if self.sources.remove(id).is_none() {
            return Err(RenderError::engine("remove_source", id, "no such source"));
        }
        tracing::debug!(id, "remove source");
        self.stats.sources_removed += 1;
        Ok(())
    }

    fn add_layer(&mut self, spec: &LayerSpec) -> Result<(), RenderError> {
        if !self.sources.contains_key(&spec.source) {
            return Err(RenderError::engine("add_layer", &spec.id, "unknown source"));
        }
        if !self.layers.insert(spec.id.clone()) {
            return Err(RenderError::engine("add_layer", &spec.id, "layer already exists"));
        }
        tracing::debug!(id = %spec.id, color = %spec.color.to_hex(), width = spec.width, "add layer");
        self.stats.layers_added += 1;
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), RenderError> {
        if !self.layers.remove(id) {
            return Err(RenderError::engine("remove_layer", id, "no such layer"));
        }
        tracing::debug!(id, "remove layer");
        self.stats.layers_removed += 1;
        Ok(())
    }

    fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        value: PaintValue,
    ) -> Result<(), RenderError> {
        if !self.layers.contains(layer_id) {
            return Err(RenderError::engine("set_paint_property", layer_id, "no such layer"));
        }
        match &value {
            PaintValue::Color(color) => {
                tracing::debug!(layer_id, property, color = %color.to_hex(), "paint")
            }
            PaintValue::Gradient(stops) => {
                tracing::debug!(layer_id, property, stops = stops.stops.len(), "paint gradient")
            }
            PaintValue::Unset => tracing::debug!(layer_id, property, "unset paint"),
        }
        self.stats.paints += 1;
        Ok(())
    }
}

/// Render state carried from one geometry result to the next
pub struct Renderer<E: MapEngine> {
    engine: E,
    render_set: RenderSet,
    selection: SelectionState,
    speed_coloring: bool,
    speed_scale: SpeedScaleMode,
}

impl<E: MapEngine> Renderer<E> {
    pub fn new(
        engine: E,
        selection: SelectionState,
        speed_coloring: bool,
        speed_scale: SpeedScaleMode,
    ) -> Self {
        Self {
            engine,
            render_set: RenderSet::new(),
            selection,
            speed_coloring,
            speed_scale,
        }
    }

    /// Bring the map in line with a new geometry result
    pub fn apply(&mut self, geometries: &[TrackGeometry]) {
        let render_set = std::mem::take(&mut self.render_set);
        let render_set =
            render::sync_sources(&mut self.engine, render_set, geometries, &self.selection);
        let speeds = render::speeds_by_track(geometries);
        self.render_set = render::sync_speed_coloring(
            &mut self.engine,
            render_set,
            self.speed_coloring,
            &speeds,
            &self.selection,
            self.speed_scale,
        );
    }

    /// Swap the selection, restyling only the tracks that changed
    pub fn select(&mut self, selection: SelectionState) {
        let render_set = std::mem::take(&mut self.render_set);
        self.render_set =
            render::sync_selection(&mut self.engine, render_set, &selection, &self.selection);
        self.selection = selection;
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn render_set(&self) -> &RenderSet {
        &self.render_set
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use track_sync_lib::SelectionSource;

    fn line(id: u64, points: usize) -> TrackGeometry {
        let coordinates = (0..points).map(|p| [id as f64, p as f64 * 0.01]).collect();
        TrackGeometry::new(id, coordinates)
    }

    fn renderer(selected: &[u64]) -> Renderer<LoggingEngine> {
        Renderer::new(
            LoggingEngine::default(),
            SelectionState::from_ids(selected.iter().copied(), SelectionSource::Programmatic),
            false,
            SpeedScaleMode::PerTrack,
        )
    }

    #[test]
    fn test_apply_draws_and_diffs() {
        let mut r = renderer(&[2]);
        r.apply(&[line(1, 3), line(2, 4)]);
        assert_eq!(r.engine().source_count(), 2);
        assert_eq!(r.engine().layer_count(), 3);
        assert_eq!(r.engine().point_count(), 7);

        r.engine_mut().take_stats();
        r.apply(&[line(1, 3), line(2, 4)]);
        assert_eq!(r.engine_mut().take_stats().total(), 0);

        r.apply(&[line(2, 4)]);
        let stats = r.engine_mut().take_stats();
        assert_eq!(stats.sources_removed, 1);
        assert_eq!(stats.layers_removed, 1);
    }

    #[test]
    fn test_degenerate_line_is_skipped() {
        let mut r = renderer(&[]);
        r.apply(&[line(1, 1), line(2, 2)]);
        assert!(!r.render_set().contains(1));
        assert!(r.render_set().contains(2));
    }

    #[test]
    fn test_select_restyles() {
        let mut r = renderer(&[]);
        r.apply(&[line(1, 2), line(2, 2)]);
        r.engine_mut().take_stats();

        r.select(SelectionState::from_ids([1], SelectionSource::List));
        let stats = r.engine_mut().take_stats();
        assert_eq!(stats.layers_added, 2);
        assert_eq!(stats.layers_removed, 1);
        assert_eq!(r.engine().layer_count(), 3);
        assert!(r.selection().contains(1));

        // Later results keep the new selection's style
        r.apply(&[line(1, 2), line(2, 2), line(3, 2)]);
        assert_eq!(r.engine().layer_count(), 4);
    }

    #[test]
    fn test_speed_coloring_paints_gradients() {
        let mut r = Renderer::new(
            LoggingEngine::default(),
            SelectionState::new(),
            true,
            SpeedScaleMode::Global,
        );
        let geometry = line(1, 3).with_speeds(vec![1.0, 5.0]);
        r.apply(&[geometry, line(2, 3)]);
        assert!(r.render_set().gradient(1).is_some());
        assert!(r.render_set().gradient(2).is_none());
        assert_eq!(r.engine_mut().take_stats().paints, 1);
    }
}
