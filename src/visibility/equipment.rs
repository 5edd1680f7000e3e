//! Equipment and ability capabilities
//!
//! Presence checks go through [`CapabilityProvider`], supplied by the host's
//! player-state layer. Modifier values come from [`EquipmentModifiers`].

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::EquipmentModifiers;
use crate::entity::{Entity, EntityId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Equipment {
    SniperScope,
    ThermalGoggles,
    ScoutDrone,
    StealthDetector,
    Scanner,
}

impl Equipment {
    pub const ALL: [Equipment; 5] = [
        Equipment::SniperScope,
        Equipment::ThermalGoggles,
        Equipment::ScoutDrone,
        Equipment::StealthDetector,
        Equipment::Scanner,
    ];

    /// View distance bonus while carried (0 for pure detection gear)
    pub fn view_bonus(self, table: &EquipmentModifiers) -> f32 {
        match self {
            Equipment::SniperScope => table.sniper_scope,
            Equipment::ThermalGoggles => table.thermal_goggles,
            Equipment::ScoutDrone => table.scout_drone,
            Equipment::StealthDetector | Equipment::Scanner => 0.0,
        }
    }

    /// Range at which this item reveals fully stealthed targets
    pub fn detection_range(self, table: &EquipmentModifiers) -> Option<f32> {
        match self {
            Equipment::ThermalGoggles => Some(table.thermal_goggles_detection),
            Equipment::StealthDetector => Some(table.stealth_detector_detection),
            Equipment::Scanner => Some(table.scanner_detection),
            Equipment::SniperScope | Equipment::ScoutDrone => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    Reconnaissance,
    EagleEye,
    EnhancedPerception,
}

impl Ability {
    pub const ALL: [Ability; 3] = [
        Ability::Reconnaissance,
        Ability::EagleEye,
        Ability::EnhancedPerception,
    ];

    pub fn view_bonus(self, table: &EquipmentModifiers) -> f32 {
        match self {
            Ability::Reconnaissance => table.reconnaissance,
            Ability::EagleEye => table.eagle_eye,
            Ability::EnhancedPerception => 0.0,
        }
    }

    pub fn detection_range(self, table: &EquipmentModifiers) -> Option<f32> {
        match self {
            Ability::EnhancedPerception => Some(table.enhanced_perception_detection),
            Ability::Reconnaissance | Ability::EagleEye => None,
        }
    }
}

/// Player-state query interface
pub trait CapabilityProvider: Send + Sync {
    fn has_equipment(&self, entity: &Entity, equipment: Equipment) -> bool;
    fn has_active_ability(&self, entity: &Entity, ability: Ability) -> bool;
}

/// Nobody carries anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCapabilities;

impl CapabilityProvider for NoCapabilities {
    fn has_equipment(&self, _entity: &Entity, _equipment: Equipment) -> bool {
        false
    }

    fn has_active_ability(&self, _entity: &Entity, _ability: Ability) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone)]
pub struct Loadout {
    pub equipment: SmallVec<[Equipment; 4]>,
    pub abilities: SmallVec<[Ability; 4]>,
}

/// In-memory loadouts keyed by entity, shareable with the host
#[derive(Debug, Default)]
pub struct LoadoutCapabilities {
    loadouts: RwLock<FxHashMap<EntityId, Loadout>>,
}

impl LoadoutCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equip(&self, id: EntityId, equipment: Equipment) {
        let mut loadouts = self.loadouts.write();
        let loadout = loadouts.entry(id).or_default();
        if !loadout.equipment.contains(&equipment) {
            loadout.equipment.push(equipment);
        }
    }

    pub fn unequip(&self, id: EntityId, equipment: Equipment) {
        if let Some(loadout) = self.loadouts.write().get_mut(&id) {
            loadout.equipment.retain(|e| *e != equipment);
        }
    }

    pub fn set_ability(&self, id: EntityId, ability: Ability, active: bool) {
        let mut loadouts = self.loadouts.write();
        let loadout = loadouts.entry(id).or_default();
        loadout.abilities.retain(|a| *a != ability);
        if active {
            loadout.abilities.push(ability);
        }
    }

    pub fn forget(&self, id: EntityId) {
        self.loadouts.write().remove(&id);
    }
}

impl CapabilityProvider for LoadoutCapabilities {
    fn has_equipment(&self, entity: &Entity, equipment: Equipment) -> bool {
        self.loadouts
            .read()
            .get(&entity.id)
            .is_some_and(|l| l.equipment.contains(&equipment))
    }

    fn has_active_ability(&self, entity: &Entity, ability: Ability) -> bool {
        self.loadouts
            .read()
            .get(&entity.id)
            .is_some_and(|l| l.abilities.contains(&ability))
    }
}

/// Summed view distance bonus of carried equipment and active abilities
pub fn equipment_modifier(
    entity: &Entity,
    capabilities: &dyn CapabilityProvider,
    table: &EquipmentModifiers,
) -> f32 {
    let gear: f32 = Equipment::ALL
        .iter()
        .filter(|e| capabilities.has_equipment(entity, **e))
        .map(|e| e.view_bonus(table))
        .sum();
    let abilities: f32 = Ability::ALL
        .iter()
        .filter(|a| capabilities.has_active_ability(entity, **a))
        .map(|a| a.view_bonus(table))
        .sum();
    gear + abilities
}

/// Longest stealth detection range available to the entity, if any
pub fn detection_range(
    entity: &Entity,
    capabilities: &dyn CapabilityProvider,
    table: &EquipmentModifiers,
) -> Option<f32> {
    let gear = Equipment::ALL
        .iter()
        .filter(|e| capabilities.has_equipment(entity, **e))
        .filter_map(|e| e.detection_range(table));
    let abilities = Ability::ALL
        .iter()
        .filter(|a| capabilities.has_active_ability(entity, **a))
        .filter_map(|a| a.detection_range(table));
    gear.chain(abilities).reduce(f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec2;
    use uuid::Uuid;

    fn entity() -> Entity {
        Entity::new(Uuid::new_v4(), Vec2::ZERO, 1)
    }

    #[test]
    fn test_no_capabilities() {
        let e = entity();
        let table = EquipmentModifiers::default();
        assert_eq!(equipment_modifier(&e, &NoCapabilities, &table), 0.0);
        assert_eq!(detection_range(&e, &NoCapabilities, &table), None);
    }

    #[test]
    fn test_modifiers_sum() {
        let e = entity();
        let caps = LoadoutCapabilities::new();
        caps.equip(e.id, Equipment::SniperScope);
        caps.equip(e.id, Equipment::ScoutDrone);
        caps.set_ability(e.id, Ability::EagleEye, true);

        let table = EquipmentModifiers::default();
        assert_eq!(equipment_modifier(&e, &caps, &table), 30.0 + 20.0 + 15.0);

        caps.set_ability(e.id, Ability::EagleEye, false);
        caps.unequip(e.id, Equipment::ScoutDrone);
        assert_eq!(equipment_modifier(&e, &caps, &table), 30.0);
    }

    #[test]
    fn test_detection_range_takes_longest() {
        let e = entity();
        let caps = LoadoutCapabilities::new();
        let table = EquipmentModifiers::default();

        caps.equip(e.id, Equipment::StealthDetector);
        assert_eq!(detection_range(&e, &caps, &table), Some(30.0));

        caps.equip(e.id, Equipment::ThermalGoggles);
        assert_eq!(detection_range(&e, &caps, &table), Some(40.0));

        caps.set_ability(e.id, Ability::EnhancedPerception, true);
        assert_eq!(detection_range(&e, &caps, &table), Some(50.0));
    }

    #[test]
    fn test_equip_is_idempotent() {
        let e = entity();
        let caps = LoadoutCapabilities::new();
        caps.equip(e.id, Equipment::ScoutDrone);
        caps.equip(e.id, Equipment::ScoutDrone);
        let table = EquipmentModifiers::default();
        assert_eq!(equipment_modifier(&e, &caps, &table), 20.0);
        caps.forget(e.id);
        assert_eq!(equipment_modifier(&e, &caps, &table), 0.0);
    }
}
