//! Selection model consumed by the render sync engine
//!
//! Selection is owned above the core; this type carries it into the sync calls.
//! It is never persisted.

use crate::TrackId;
use std::collections::HashSet;

/// Input that last changed the selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionSource {
    /// Click on a track line on the map
    Map,
    /// Click in the track list
    List,
    Keyboard,
    #[default]
    Programmatic,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionState {
    selected: HashSet<TrackId>,
    /// Fixed end for range selection
    anchor: Option<TrackId>,
    source: SelectionSource,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selection of exactly `ids`, without an anchor
    pub fn from_ids(ids: impl IntoIterator<Item = TrackId>, source: SelectionSource) -> Self {
        Self {
            selected: ids.into_iter().collect(),
            anchor: None,
            source,
        }
    }

    #[inline]
    pub fn contains(&self, id: TrackId) -> bool {
        self.selected.contains(&id)
    }

    pub fn ids(&self) -> &HashSet<TrackId> {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn anchor(&self) -> Option<TrackId> {
        self.anchor
    }

    pub fn source(&self) -> SelectionSource {
        self.source
    }

    /// Replace the selection with `id` and make it the anchor
    pub fn select_only(&mut self, id: TrackId, source: SelectionSource) {
        self.selected.clear();
        self.selected.insert(id);
        self.anchor = Some(id);
        self.source = source;
    }

    /// Flip `id` in or out of the selection; it becomes the anchor
    pub fn toggle(&mut self, id: TrackId, source: SelectionSource) {
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
        self.anchor = Some(id);
        self.source = source;
    }

    /// Select the range between the anchor and `id` in `order`.
    ///
    /// Without an anchor, or when either end is not in `order`, this behaves like
    /// [`select_only`](Self::select_only). The anchor is kept.
    pub fn extend_to(&mut self, id: TrackId, order: &[TrackId], source: SelectionSource) {
        let anchor = match self.anchor {
            Some(anchor) => anchor,
            None => return self.select_only(id, source),
        };
        let (Some(a), Some(b)) = (
            order.iter().position(|&x| x == anchor),
            order.iter().position(|&x| x == id),
        ) else {
            return self.select_only(id, source);
        };

        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        self.selected = order[start..=end].iter().copied().collect();
        self.source = source;
    }

    /// Clear everything, e.g. on logout
    pub fn clear(&mut self) {
        self.selected.clear();
        self.anchor = None;
        self.source = SelectionSource::Programmatic;
    }
}
