//! Core data model: positioned graph entities, edges, and viewport state

use geo::{Coord, Rect};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Primary key of an entity, assigned by the external layout feed.
pub type EntityId = String;

/// A positioned graph node as delivered by the layout feed.
///
/// Entities are immutable once stored, except for coordinate/importance
/// refresh when the layout feed re-runs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Entity {
    /// Unique id
    pub id: EntityId,
    /// Display title; entities without one are never labeled
    pub title: Option<String>,
    /// Id of the parent entity in the source graph, if any
    pub parent_id: Option<EntityId>,
    /// Visibility weight ("children count" in the source graph).
    /// Higher values survive more aggressive zoom-out levels.
    pub importance: u32,
    /// World-space x coordinate from the force layout
    pub x: f64,
    /// World-space y coordinate from the force layout
    pub y: f64,
}

impl Entity {
    /// Create an untitled entity with default importance.
    pub fn new(id: impl Into<EntityId>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            title: None,
            parent_id: None,
            importance: 0,
            x,
            y,
        }
    }

    /// Builder-style title setter.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder-style importance setter.
    pub fn with_importance(mut self, importance: u32) -> Self {
        self.importance = importance;
        self
    }
}

/// An edge between two positioned entities.
///
/// Edges share the entity lifecycle (bulk load, refresh, reset) but do not
/// participate in visibility resolution.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Edge {
    /// Id of the source entity
    pub source: EntityId,
    /// Id of the target entity
    pub target: EntityId,
    /// Layout position of the source endpoint
    pub source_pos: Coord<f64>,
    /// Layout position of the target endpoint
    pub target_pos: Coord<f64>,
}

/// A settled viewport as reported by the external viewport source.
///
/// `scale` decreases as the view zooms out. Not persisted; each settled
/// pan/zoom delivers a fresh one.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ViewportState {
    /// Zoom scale, strictly positive for a usable viewport
    pub scale: f64,
    /// World-space rectangle currently visible
    pub hit_rect: Rect<f64>,
}

impl ViewportState {
    /// Create a viewport state from a scale and hit rectangle.
    pub fn new(scale: f64, hit_rect: Rect<f64>) -> Self {
        Self { scale, hit_rect }
    }

    /// Whether every coordinate is a finite number.
    ///
    /// Camera glitches in the viewport source can report NaN or infinite
    /// geometry; such events carry no usable hit rect.
    pub fn is_finite(&self) -> bool {
        let min = self.hit_rect.min();
        let max = self.hit_rect.max();
        self.scale.is_finite()
            && min.x.is_finite()
            && min.y.is_finite()
            && max.x.is_finite()
            && max.y.is_finite()
    }
}

/// Inclusive point-in-rectangle test matching the store's range queries.
pub(crate) fn rect_contains(rect: &Rect<f64>, x: f64, y: f64) -> bool {
    let min = rect.min();
    let max = rect.max();
    x >= min.x && x <= max.x && y >= min.y && y <= max.y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    #[test]
    fn test_entity_builder_defaults() {
        let entity = Entity::new("a", 1.0, 2.0);
        assert_eq!(entity.importance, 0);
        assert!(entity.title.is_none());
        assert!(entity.parent_id.is_none());

        let entity = entity.with_title("A").with_importance(7);
        assert_eq!(entity.title.as_deref(), Some("A"));
        assert_eq!(entity.importance, 7);
    }

    #[test]
    fn test_viewport_finiteness() {
        assert!(ViewportState::new(1.0, rect(0.0, 0.0, 1.0, 1.0)).is_finite());
        // Scale zero means "render nothing" but is still a usable event.
        assert!(ViewportState::new(0.0, rect(0.0, 0.0, 1.0, 1.0)).is_finite());
        assert!(!ViewportState::new(f64::NAN, rect(0.0, 0.0, 1.0, 1.0)).is_finite());
        assert!(!ViewportState::new(1.0, rect(f64::NAN, 0.0, 1.0, 1.0)).is_finite());
        assert!(!ViewportState::new(1.0, rect(0.0, 0.0, f64::INFINITY, 1.0)).is_finite());
    }

    #[test]
    fn test_rect_contains_is_inclusive() {
        let r = rect(0.0, 0.0, 10.0, 10.0);
        assert!(rect_contains(&r, 0.0, 0.0));
        assert!(rect_contains(&r, 10.0, 10.0));
        assert!(rect_contains(&r, 5.0, 5.0));
        assert!(!rect_contains(&r, 10.1, 5.0));
        assert!(!rect_contains(&r, 5.0, -0.1));
    }
}
