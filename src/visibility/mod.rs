//! Multi-factor visibility resolution
//!
//! Decides whether an observer sees a target, as an explicit decision tree:
//! 1. Stealth gate (different faction, stealthed target only)
//! 2. Same faction: own view distance, else allied vision through the faction graph
//! 3. Different faction: own view distance, else the frontal view cone
//!
//! View distance is `base + environment + equipment + allied`, clamped to the
//! configured bounds and cached per observer for a short TTL.

pub mod allied;
pub mod cache;
pub mod environment;
pub mod equipment;
pub mod stealth;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, error};

use crate::config::{ConfigError, VisibilityConfig};
use crate::entity::{Entity, EntityId, FactionId};
use crate::util::Vec2;

use self::allied::{allied_modifier, AllyNode, AlliedVisibilityGraph};
use self::cache::{CacheStats, ModifierBreakdown, ViewCone, ViewDistanceCache, ViewDistanceEntry};
use self::environment::{EnvironmentalConditions, Weather};
use self::equipment::{detection_range, equipment_modifier, CapabilityProvider};

// ============================================================================
// Decisions
// ============================================================================

/// How a stealthed target got past the stealth gate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StealthCheck {
    NotStealthed,
    CloseProximity,
    Detected { range: f32 },
    PartialRoll { chance: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisibleVia {
    Own,
    Direct { distance: f32, view_distance: f32 },
    Allied { via: EntityId },
    ViewCone { angle: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HiddenReason {
    FullStealth,
    PartialStealthRoll { chance: f32 },
    OutOfRange { distance: f32, view_distance: f32 },
    BeyondConeRange { distance: f32, extended_distance: f32 },
    OutsideCone { angle: f32, half_angle: f32 },
}

/// Explainable outcome of one (observer, target) check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Visibility {
    Visible { via: VisibleVia, stealth: StealthCheck },
    Hidden { reason: HiddenReason },
}

impl Visibility {
    #[inline]
    pub fn is_visible(&self) -> bool {
        matches!(self, Visibility::Visible { .. })
    }

    fn visible(via: VisibleVia, stealth: StealthCheck) -> Self {
        Visibility::Visible { via, stealth }
    }

    fn hidden(reason: HiddenReason) -> Self {
        Visibility::Hidden { reason }
    }
}

/// Faults while resolving one observer; the orchestrator skips that observer
#[derive(Debug, Clone, thiserror::Error)]
pub enum VisibilityError {
    #[error("Inconsistent cache entry for {observer}: {reason}")]
    InconsistentCache { observer: EntityId, reason: String },
    #[error("Entity {0} has a non-finite position")]
    InvalidPosition(EntityId),
}

/// Snapshot of an observer's resolved view, for debugging tools
#[derive(Debug, Clone, Serialize)]
pub struct ViewDistanceDebug {
    pub observer: EntityId,
    pub view_distance: f32,
    pub modifiers: ModifierBreakdown,
    pub age_ms: u64,
    pub cone: Option<ViewCone>,
    pub is_night: bool,
    pub weather: Weather,
}

// ============================================================================
// Resolver
// ============================================================================

pub struct VisibilityResolver {
    config: VisibilityConfig,
    environment: EnvironmentalConditions,
    capabilities: Arc<dyn CapabilityProvider>,
    cache: ViewDistanceCache,
    /// Swapped in whole on rebuild; readers hold their own `Arc`
    allied_graphs: FxHashMap<FactionId, Arc<AlliedVisibilityGraph>>,
    /// Partial-stealth detection draws
    rng: StdRng,
    now_ms: u64,
}

impl VisibilityResolver {
    pub fn new(
        config: VisibilityConfig,
        capabilities: Arc<dyn CapabilityProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.detection_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            environment: EnvironmentalConditions::new(config.environment.clone()),
            cache: ViewDistanceCache::new(
                config.cache_ttl_ms,
                config.cache_eviction_threshold,
                config.cache_maintenance_interval_ms,
            ),
            config,
            capabilities,
            allied_graphs: FxHashMap::default(),
            rng,
            now_ms: 0,
        })
    }

    /// Replace the detection RNG, e.g. with a seeded one in tests
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn environment(&self) -> &EnvironmentalConditions {
        &self.environment
    }

    /// Weather and hazard changes take effect as cache entries expire
    pub fn environment_mut(&mut self) -> &mut EnvironmentalConditions {
        &mut self.environment
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance the clock, expire hazards and run cache maintenance
    pub fn advance(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        self.environment.advance(now_ms);
        self.cache.maintain(now_ms);
    }

    /// Rebuild stale or missing faction graphs and drop graphs of factions
    /// with no players left. Returns the number rebuilt.
    pub fn refresh_allied_graphs(&mut self, all: &[Entity]) -> usize {
        let mut factions: SmallVec<[FactionId; 8]> = SmallVec::new();
        for e in all.iter().filter(|e| e.is_player) {
            if !factions.contains(&e.faction) {
                factions.push(e.faction);
            }
        }
        self.allied_graphs.retain(|faction, _| factions.contains(faction));

        let ttl = self.config.allied_graph_ttl_ms;
        let mut rebuilt = 0;
        for faction in factions {
            let fresh = self
                .allied_graphs
                .get(&faction)
                .is_some_and(|g| !g.is_stale(self.now_ms, ttl));
            if fresh {
                continue;
            }
            let graph = AlliedVisibilityGraph::build(
                faction,
                all,
                self.config.allied_share_distance,
                |e| self.own_view_distance(e),
                self.now_ms,
            );
            self.allied_graphs.insert(faction, Arc::new(graph));
            rebuilt += 1;
        }
        if rebuilt > 0 {
            debug!("Rebuilt {} allied visibility graphs", rebuilt);
        }
        rebuilt
    }

    pub fn allied_graph(&self, faction: FactionId) -> Option<Arc<AlliedVisibilityGraph>> {
        self.allied_graphs.get(&faction).cloned()
    }

    /// Allies reachable from `observer` in its faction graph
    pub fn allied_reach(&self, observer: &Entity) -> Vec<AllyNode> {
        self.allied_graphs
            .get(&observer.faction)
            .map(|g| g.reachable(observer.id))
            .unwrap_or_default()
    }

    #[inline]
    pub fn base_view_distance(&self, entity: &Entity) -> f32 {
        self.config.default_view_distance * entity.view_distance_multiplier
    }

    /// View distance without allied sharing
    pub fn own_view_distance(&self, entity: &Entity) -> f32 {
        let raw = self.base_view_distance(entity)
            + self.environment.modifier_at(entity.position)
            + equipment_modifier(entity, self.capabilities.as_ref(), &self.config.equipment);
        raw.clamp(self.config.min_view_distance, self.config.max_view_distance)
    }

    /// Resolved view distance, cached per observer
    pub fn view_distance(&mut self, observer: &Entity, all: &[Entity]) -> Result<f32, VisibilityError> {
        Ok(self.entry_for(observer, all)?.view_distance)
    }

    /// View cone for the observer's current facing, built lazily
    pub fn view_cone(&mut self, observer: &Entity, all: &[Entity]) -> Result<ViewCone, VisibilityError> {
        let entry = self.entry_for(observer, all)?;
        Ok(self.cone_for(observer, &entry))
    }

    /// Radius that bounds every target this observer could see directly or by cone
    pub fn candidate_radius(&mut self, observer: &Entity, all: &[Entity]) -> Result<f32, VisibilityError> {
        let view = self.view_distance(observer, all)?;
        Ok(view * self.config.view_cone_distance_multiplier)
    }

    pub fn is_visible(&mut self, observer: &Entity, target: &Entity, all: &[Entity]) -> bool {
        match self.decide(observer, target, all) {
            Ok(decision) => decision.is_visible(),
            Err(e) => {
                debug!("Visibility check failed: {}", e);
                false
            }
        }
    }

    /// Run the full decision tree for one pair
    pub fn decide(
        &mut self,
        observer: &Entity,
        target: &Entity,
        all: &[Entity],
    ) -> Result<Visibility, VisibilityError> {
        ensure_finite(observer)?;
        ensure_finite(target)?;

        if observer.id == target.id {
            return Ok(Visibility::visible(VisibleVia::Own, StealthCheck::NotStealthed));
        }

        let distance = observer.position.distance_to(target.position);
        let same_faction = observer.faction == target.faction;

        let stealth = if !same_faction && target.is_stealthed() {
            match self.stealth_gate(observer, target, distance) {
                Ok(check) => check,
                Err(reason) => return Ok(Visibility::hidden(reason)),
            }
        } else {
            StealthCheck::NotStealthed
        };

        let entry = self.entry_for(observer, all)?;
        let view_distance = entry.view_distance;
        if distance <= view_distance {
            return Ok(Visibility::visible(
                VisibleVia::Direct { distance, view_distance },
                stealth,
            ));
        }

        if same_faction {
            let seer = self
                .allied_graphs
                .get(&observer.faction)
                .and_then(|g| g.find_seer(observer.id, target.position));
            return Ok(match seer {
                Some(via) => Visibility::visible(VisibleVia::Allied { via }, stealth),
                None => Visibility::hidden(HiddenReason::OutOfRange { distance, view_distance }),
            });
        }

        let cone = self.cone_for(observer, &entry);
        if distance > cone.extended_distance {
            return Ok(Visibility::hidden(HiddenReason::BeyondConeRange {
                distance,
                extended_distance: cone.extended_distance,
            }));
        }
        let angle = cone.direction.angle_between(target.position - observer.position);
        Ok(if angle <= cone.half_angle {
            Visibility::visible(VisibleVia::ViewCone { angle }, stealth)
        } else {
            Visibility::hidden(HiddenReason::OutsideCone {
                angle,
                half_angle: cone.half_angle,
            })
        })
    }

    /// Full stealth: only close proximity or a detection capability in range.
    /// Partial stealth: a weighted draw.
    fn stealth_gate(
        &mut self,
        observer: &Entity,
        target: &Entity,
        distance: f32,
    ) -> Result<StealthCheck, HiddenReason> {
        let effectiveness = target.stealth.effectiveness();
        if effectiveness >= 1.0 {
            if distance <= self.config.close_proximity_override {
                return Ok(StealthCheck::CloseProximity);
            }
            let range = detection_range(observer, self.capabilities.as_ref(), &self.config.equipment);
            return match range {
                Some(range) if distance <= range => Ok(StealthCheck::Detected { range }),
                _ => Err(HiddenReason::FullStealth),
            };
        }

        let chance = ((1.0 - effectiveness) * (1.0 - distance / self.config.default_view_distance))
            .clamp(0.0, 1.0);
        if self.rng.gen::<f32>() < chance {
            Ok(StealthCheck::PartialRoll { chance })
        } else {
            Err(HiddenReason::PartialStealthRoll { chance })
        }
    }

    fn entry_for(&mut self, observer: &Entity, all: &[Entity]) -> Result<ViewDistanceEntry, VisibilityError> {
        ensure_finite(observer)?;
        if let Some(entry) = self.cache.get(observer.id, self.now_ms) {
            match self.check_entry(observer.id, &entry) {
                Ok(()) => return Ok(entry),
                Err(e) => {
                    error!("{}; recomputing", e);
                    self.cache.remove(observer.id);
                }
            }
        }
        let entry = self.compute_entry(observer, all);
        self.cache.insert(observer.id, entry);
        Ok(entry)
    }

    fn compute_entry(&self, observer: &Entity, all: &[Entity]) -> ViewDistanceEntry {
        let share_distance = self.config.allied_share_distance;
        let share_sq = share_distance * share_distance;
        let allies = all
            .iter()
            .filter(|e| {
                e.is_player
                    && e.faction == observer.faction
                    && e.id != observer.id
                    && e.position.distance_sq_to(observer.position) <= share_sq
            })
            .map(|e| (e.position, self.own_view_distance(e)));

        let modifiers = ModifierBreakdown {
            base: self.base_view_distance(observer),
            environmental: self.environment.modifier_at(observer.position),
            equipment: equipment_modifier(observer, self.capabilities.as_ref(), &self.config.equipment),
            allied: allied_modifier(observer, allies, share_distance, self.config.allied_share_percentage),
        };
        let raw = modifiers.base + modifiers.environmental + modifiers.equipment + modifiers.allied;

        ViewDistanceEntry {
            view_distance: raw.clamp(self.config.min_view_distance, self.config.max_view_distance),
            modifiers,
            computed_at_ms: self.now_ms,
            cone: None,
        }
    }

    fn check_entry(&self, observer: EntityId, entry: &ViewDistanceEntry) -> Result<(), VisibilityError> {
        let inconsistent = |reason: String| VisibilityError::InconsistentCache { observer, reason };
        let v = entry.view_distance;
        if !v.is_finite() || v < self.config.min_view_distance || v > self.config.max_view_distance {
            return Err(inconsistent(format!("view distance {} out of bounds", v)));
        }
        if let Some(cone) = entry.cone {
            let expected = v * self.config.view_cone_distance_multiplier;
            if (cone.extended_distance - expected).abs() > 1e-3 {
                return Err(inconsistent(format!(
                    "cone reach {} does not match view distance {}",
                    cone.extended_distance, v
                )));
            }
        }
        Ok(())
    }

    fn cone_for(&mut self, observer: &Entity, entry: &ViewDistanceEntry) -> ViewCone {
        if let Some(cone) = entry.cone {
            if cone.rotation == observer.rotation {
                self.cache.record_cone(true);
                return cone;
            }
        }
        self.cache.record_cone(false);
        let cone = ViewCone {
            direction: Vec2::from_angle(observer.rotation),
            half_angle: self.config.view_cone_angle / 2.0,
            extended_distance: entry.view_distance * self.config.view_cone_distance_multiplier,
            rotation: observer.rotation,
        };
        if let Some(cached) = self.cache.peek_mut(observer.id) {
            cached.cone = Some(cone);
        }
        cone
    }

    /// Drop cached state for a departed observer
    pub fn remove_observer(&mut self, id: EntityId) {
        self.cache.remove(id);
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn debug_info(&self, observer: EntityId) -> Option<ViewDistanceDebug> {
        let entry = self.cache.peek(observer)?;
        Some(ViewDistanceDebug {
            observer,
            view_distance: entry.view_distance,
            modifiers: entry.modifiers,
            age_ms: self.now_ms.saturating_sub(entry.computed_at_ms),
            cone: entry.cone,
            is_night: self.environment.is_night(),
            weather: self.environment.weather(),
        })
    }

    #[cfg(test)]
    pub(crate) fn cache_mut(&mut self) -> &mut ViewDistanceCache {
        &mut self.cache
    }
}

fn ensure_finite(entity: &Entity) -> Result<(), VisibilityError> {
    if entity.position.x.is_finite() && entity.position.y.is_finite() {
        Ok(())
    } else {
        Err(VisibilityError::InvalidPosition(entity.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StealthSettings;
    use crate::visibility::environment::HazardKind;
    use crate::visibility::equipment::{Ability, Equipment, LoadoutCapabilities, NoCapabilities};
    use crate::visibility::stealth::Stealth;
    use std::f32::consts::PI;
    use uuid::Uuid;

    fn resolver() -> VisibilityResolver {
        resolver_with(Arc::new(NoCapabilities))
    }

    fn resolver_with(caps: Arc<dyn CapabilityProvider>) -> VisibilityResolver {
        let config = VisibilityConfig {
            detection_seed: Some(42),
            ..Default::default()
        };
        VisibilityResolver::new(config, caps).unwrap()
    }

    fn at(x: f32, y: f32, faction: FactionId) -> Entity {
        Entity::new(Uuid::new_v4(), Vec2::new(x, y), faction)
    }

    fn stealthed(mut e: Entity, level: f32) -> Entity {
        let mut stealth = Stealth::with_level(&StealthSettings::default(), level);
        stealth.activate();
        e.stealth = stealth;
        e
    }

    #[test]
    fn test_distance_threshold() {
        let mut r = resolver();
        // Facing +x, targets straight down the -y axis: no cone alignment
        let observer = at(0.0, 0.0, 1);
        let near = at(0.0, -49.0, 2);
        let far = at(0.0, -51.0, 2);
        let all = vec![observer.clone(), near.clone(), far.clone()];

        assert!(r.is_visible(&observer, &near, &all));
        assert!(!r.is_visible(&observer, &far, &all));
        assert!(matches!(
            r.decide(&observer, &far, &all).unwrap(),
            Visibility::Hidden { reason: HiddenReason::OutsideCone { .. } }
        ));
    }

    #[test]
    fn test_self_always_visible() {
        let mut r = resolver();
        let observer = stealthed(at(0.0, 0.0, 1), 1.0);
        let all = vec![observer.clone()];
        assert_eq!(
            r.decide(&observer, &observer, &all).unwrap(),
            Visibility::Visible { via: VisibleVia::Own, stealth: StealthCheck::NotStealthed }
        );
    }

    #[test]
    fn test_view_cone() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1).with_rotation(0.0);
        // Inside 30 degree half-angle at 70 units (cone reach 75)
        let ahead = at(70.0, 10.0, 2);
        let beside = at(0.0, 70.0, 2);
        let beyond = at(80.0, 0.0, 2);
        let all = vec![observer.clone(), ahead.clone(), beside.clone(), beyond.clone()];

        assert!(matches!(
            r.decide(&observer, &ahead, &all).unwrap(),
            Visibility::Visible { via: VisibleVia::ViewCone { .. }, .. }
        ));
        assert!(!r.is_visible(&observer, &beside, &all));
        assert!(matches!(
            r.decide(&observer, &beyond, &all).unwrap(),
            Visibility::Hidden { reason: HiddenReason::BeyondConeRange { .. } }
        ));
    }

    #[test]
    fn test_cone_follows_rotation() {
        let mut r = resolver();
        let target = at(0.0, 70.0, 2);
        let facing_x = at(0.0, 0.0, 1).with_rotation(0.0);
        let all = vec![facing_x.clone(), target.clone()];
        assert!(!r.is_visible(&facing_x, &target, &all));

        let mut facing_y = facing_x.clone();
        facing_y.rotation = PI / 2.0;
        assert!(r.is_visible(&facing_y, &target, &all), "Cone must be rebuilt for new facing");
    }

    #[test]
    fn test_same_faction_visible_within_range() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let ally = at(40.0, 0.0, 1);
        let all = vec![observer.clone(), ally.clone()];
        assert!(r.is_visible(&observer, &ally, &all));
    }

    #[test]
    fn test_same_faction_stealth_ignored() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let ally = stealthed(at(40.0, 0.0, 1), 1.0);
        let all = vec![observer.clone(), ally.clone()];
        assert!(r.is_visible(&observer, &ally, &all));
    }

    #[test]
    fn test_allied_vision_chain() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let relay = at(25.0, 0.0, 1);
        let scout = at(50.0, 0.0, 1);
        // Outside observer range, inside scout's own view distance
        let friendly_far = at(95.0, 0.0, 1).as_prop();
        let all = vec![observer.clone(), relay.clone(), scout.clone(), friendly_far.clone()];
        r.refresh_allied_graphs(&all);

        let decision = r.decide(&observer, &friendly_far, &all).unwrap();
        match decision {
            Visibility::Visible { via: VisibleVia::Allied { via }, .. } => assert_eq!(via, scout.id),
            other => panic!("Expected allied vision, got {:?}", other),
        }
    }

    #[test]
    fn test_full_stealth_hidden_without_detection() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let target = stealthed(at(30.0, 0.0, 2), 1.0);
        let all = vec![observer.clone(), target.clone()];
        assert_eq!(
            r.decide(&observer, &target, &all).unwrap(),
            Visibility::Hidden { reason: HiddenReason::FullStealth }
        );
    }

    #[test]
    fn test_full_stealth_close_proximity() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let target = stealthed(at(9.0, 0.0, 2), 1.0);
        let all = vec![observer.clone(), target.clone()];
        assert!(matches!(
            r.decide(&observer, &target, &all).unwrap(),
            Visibility::Visible { stealth: StealthCheck::CloseProximity, .. }
        ));
    }

    #[test]
    fn test_full_stealth_detection_capability() {
        let observer = at(0.0, 0.0, 1);
        let caps = Arc::new(LoadoutCapabilities::new());
        caps.equip(observer.id, Equipment::ThermalGoggles);
        let mut r = resolver_with(caps);

        let in_range = stealthed(at(35.0, 0.0, 2), 1.0);
        let out_of_range = stealthed(at(45.0, 0.0, 2), 1.0);
        let all = vec![observer.clone(), in_range.clone(), out_of_range.clone()];

        assert!(matches!(
            r.decide(&observer, &in_range, &all).unwrap(),
            Visibility::Visible { stealth: StealthCheck::Detected { .. }, .. }
        ));
        assert!(!r.is_visible(&observer, &out_of_range, &all));
    }

    #[test]
    fn test_partial_stealth_is_reproducible_with_seed() {
        let observer = at(0.0, 0.0, 1);
        let target = stealthed(at(10.0, 0.0, 2), 0.5);
        let all = vec![observer.clone(), target.clone()];

        let run = || {
            let mut r = resolver();
            (0..50).map(|_| r.is_visible(&observer, &target, &all)).collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());
        // chance = 0.5 * 0.8 = 0.4
        let seen = first.iter().filter(|v| **v).count();
        assert!(seen > 5 && seen < 45, "Seen {} of 50", seen);
    }

    #[test]
    fn test_partial_stealth_never_beyond_default_range() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1).with_rotation(0.0);
        let target = stealthed(at(55.0, 0.0, 2), 0.5);
        let all = vec![observer.clone(), target.clone()];
        for _ in 0..20 {
            assert!(!r.is_visible(&observer, &target, &all));
        }
    }

    #[test]
    fn test_view_distance_modifiers() {
        let observer = at(0.0, 0.0, 1);
        let caps = Arc::new(LoadoutCapabilities::new());
        caps.equip(observer.id, Equipment::SniperScope);
        caps.set_ability(observer.id, Ability::Reconnaissance, true);
        let mut r = resolver_with(caps);
        r.environment_mut().set_weather(Weather::Fog);

        let all = vec![observer.clone()];
        // 50 - 20 + 30 + 25 = 85
        assert!((r.view_distance(&observer, &all).unwrap() - 85.0).abs() < 1e-4);
    }

    #[test]
    fn test_view_distance_clamped() {
        let mut r = resolver();
        r.environment_mut().set_weather(Weather::Storm);
        r.environment_mut().add_hazard(HazardKind::ToxicGas, Vec2::ZERO, 100.0, 60_000);
        let observer = at(0.0, 0.0, 1);
        let all = vec![observer.clone()];
        assert_eq!(r.view_distance(&observer, &all).unwrap(), 20.0);
    }

    #[test]
    fn test_allied_modifier_extends_view() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let ally = at(15.0, 0.0, 1);
        let all = vec![observer.clone(), ally.clone()];
        // 50 + 50 * 0.5 * 0.5
        assert!((r.view_distance(&observer, &all).unwrap() - 62.5).abs() < 1e-4);
    }

    #[test]
    fn test_cache_ttl_refresh() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let all = vec![observer.clone()];
        assert_eq!(r.view_distance(&observer, &all).unwrap(), 50.0);

        // Cached value survives a weather change until the TTL runs out
        r.environment_mut().set_weather(Weather::Rain);
        assert_eq!(r.view_distance(&observer, &all).unwrap(), 50.0);
        r.advance(1_000);
        assert_eq!(r.view_distance(&observer, &all).unwrap(), 40.0);

        let stats = r.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_inconsistent_cache_recomputed() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let all = vec![observer.clone()];
        r.view_distance(&observer, &all).unwrap();
        r.cache_mut().peek_mut(observer.id).unwrap().view_distance = f32::NAN;

        assert_eq!(r.view_distance(&observer, &all).unwrap(), 50.0);
    }

    #[test]
    fn test_invalid_position_is_error() {
        let mut r = resolver();
        let observer = at(f32::NAN, 0.0, 1);
        let target = at(0.0, 0.0, 2);
        let all = vec![observer.clone(), target.clone()];
        assert!(matches!(
            r.decide(&observer, &target, &all),
            Err(VisibilityError::InvalidPosition(_))
        ));
        assert!(!r.is_visible(&observer, &target, &all));
    }

    #[test]
    fn test_debug_info_and_remove() {
        let mut r = resolver();
        let observer = at(0.0, 0.0, 1);
        let all = vec![observer.clone()];
        assert!(r.debug_info(observer.id).is_none());
        r.view_cone(&observer, &all).unwrap();

        let info = r.debug_info(observer.id).unwrap();
        assert_eq!(info.view_distance, 50.0);
        assert!(info.cone.is_some());
        assert!((info.cone.unwrap().extended_distance - 75.0).abs() < 1e-4);

        r.remove_observer(observer.id);
        assert!(r.debug_info(observer.id).is_none());
    }

    #[test]
    fn test_graphs_dropped_for_empty_factions() {
        let mut r = resolver();
        let a = at(0.0, 0.0, 1);
        let b = at(0.0, 0.0, 2);
        assert_eq!(r.refresh_allied_graphs(&[a.clone(), b.clone()]), 2);
        assert_eq!(r.refresh_allied_graphs(&[a.clone(), b.clone()]), 0, "Fresh graphs are kept");
        r.refresh_allied_graphs(&[a.clone()]);
        assert!(r.allied_graph(2).is_none());
        r.advance(1_000);
        assert_eq!(r.refresh_allied_graphs(&[a]), 1);
    }
}
