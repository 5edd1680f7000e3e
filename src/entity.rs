//! Entity view consumed by the interest pipeline
//!
//! The core only reads entities; storage and simulation live with the host.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::util::Vec2;
use crate::visibility::stealth::Stealth;

pub type EntityId = Uuid;
pub type FactionId = u32;

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub position: Vec2,
    /// Facing in radians
    pub rotation: f32,
    pub faction: FactionId,
    /// Scales the default view distance
    pub view_distance_multiplier: f32,
    pub stealth: Stealth,
    /// Connected participant; players observe and share allied vision
    pub is_player: bool,
    /// Replicated verbatim into snapshots
    pub attributes: Map<String, Value>,
}

impl Entity {
    pub fn new(id: EntityId, position: Vec2, faction: FactionId) -> Self {
        Self {
            id,
            position,
            rotation: 0.0,
            faction,
            view_distance_multiplier: 1.0,
            stealth: Stealth::default(),
            is_player: true,
            attributes: Map::new(),
        }
    }

    pub fn with_rotation(mut self, rotation: f32) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_stealth(mut self, stealth: Stealth) -> Self {
        self.stealth = stealth;
        self
    }

    pub fn with_view_multiplier(mut self, multiplier: f32) -> Self {
        self.view_distance_multiplier = multiplier;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Non-player entities are indexed and replicated but never observe
    pub fn as_prop(mut self) -> Self {
        self.is_player = false;
        self
    }

    #[inline]
    pub fn is_stealthed(&self) -> bool {
        self.stealth.effectiveness() > 0.0
    }

    #[inline]
    pub fn distance_to(&self, other: &Entity) -> f32 {
        self.position.distance_to(other.position)
    }
}
