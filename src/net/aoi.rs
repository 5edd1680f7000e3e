//! Area of Interest (AOI) orchestration
//!
//! Runs the per-tick interest pipeline for every observer:
//! 1. Grid mutation: sync positions, density analysis, resize + redistribute
//! 2. Visibility: grid query for candidates, then the visibility decision tree
//! 3. Encoding: snapshot + delta against the observer's previous snapshot,
//!    in parallel over observer-owned state
//!
//! A failing observer is logged and skipped for the tick. Its previous
//! snapshot is dropped, so the next successful tick is a full resend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, InterestConfig};
use crate::entity::{Entity, EntityId};
use crate::grid::{DensityAnalyzer, GridConfiguration, GridSizeController, SpatialIndex};
use crate::metrics::InterestMetrics;
use crate::net::delta::{DeltaCodec, DeltaUpdate};
use crate::net::snapshot::build_snapshot;
use crate::visibility::equipment::CapabilityProvider;
use crate::visibility::{VisibilityError, VisibilityResolver, ViewDistanceDebug};

#[derive(Debug, thiserror::Error)]
pub enum InterestError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Visibility resolution failed: {0}")]
    Visibility(#[from] VisibilityError),
    #[error("Snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Unknown observer {0}")]
    UnknownObserver(EntityId),
}

#[derive(Debug, Default)]
struct ObserverState {
    /// Snapshot sent on the last successful tick
    previous: Option<Value>,
    /// Visible entity indices resolved for the current tick
    pending: Option<Vec<usize>>,
    visibility_time: Duration,
}

impl ObserverState {
    fn invalidate(&mut self) {
        self.previous = None;
        self.pending = None;
    }
}

pub struct InterestManager {
    codec: Arc<DeltaCodec>,
    metrics: Arc<InterestMetrics>,
    index: SpatialIndex,
    analyzer: DensityAnalyzer,
    sizer: GridSizeController,
    resolver: VisibilityResolver,
    observers: HashMap<EntityId, ObserverState>,
    now_ms: u64,
    tick: u64,
    force_analysis: bool,
}

impl InterestManager {
    pub fn new(
        config: InterestConfig,
        codec: Arc<DeltaCodec>,
        metrics: Arc<InterestMetrics>,
        capabilities: Arc<dyn CapabilityProvider>,
    ) -> Result<Self, InterestError> {
        config.validate()?;
        let grid = GridConfiguration::from_settings(&config.grid)?;
        let resolver = VisibilityResolver::new(config.visibility.clone(), capabilities)?;

        info!(
            "Interest manager ready: cell size {} [{}, {}], view distance {}, compression {:?}",
            config.grid.default_cell_size,
            config.grid.min_cell_size,
            config.grid.max_cell_size,
            config.visibility.default_view_distance,
            codec.options().level
        );

        Ok(Self {
            codec,
            metrics,
            index: SpatialIndex::new(config.grid.default_cell_size),
            analyzer: DensityAnalyzer::new(config.grid.analysis_interval_ms),
            sizer: GridSizeController::new(grid, config.grid.resize_interval_ms),
            resolver,
            observers: HashMap::new(),
            now_ms: 0,
            tick: 0,
            force_analysis: false,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Index a new entity; players also become observers
    pub fn on_entity_added(&mut self, entity: &Entity) {
        if is_finite(entity) {
            self.index.assign(entity.id, entity.position);
        }
        if entity.is_player {
            self.add_observer(entity.id);
        }
    }

    pub fn on_entity_removed(&mut self, id: EntityId) {
        self.index.remove(id);
        self.remove_observer(id);
    }

    /// Register an observer. Re-registering resets its state, forcing a
    /// full resend. Returns true if it was not registered before.
    pub fn add_observer(&mut self, id: EntityId) -> bool {
        let fresh = self.observers.insert(id, ObserverState::default()).is_none();
        if fresh {
            debug!("Observer {} registered", id);
        }
        fresh
    }

    pub fn remove_observer(&mut self, id: EntityId) -> bool {
        self.resolver.remove_observer(id);
        let removed = self.observers.remove(&id).is_some();
        if removed {
            debug!("Observer {} removed", id);
        }
        removed
    }

    /// Drop the observer's previous snapshot so its next update is a full resend
    pub fn resync_observer(&mut self, id: EntityId) -> Result<(), InterestError> {
        self.observers
            .get_mut(&id)
            .map(ObserverState::invalidate)
            .ok_or(InterestError::UnknownObserver(id))
    }

    /// Run a full density analysis on the next tick regardless of interval
    pub fn force_analysis(&mut self) {
        self.force_analysis = true;
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run the pipeline once and return one update per resolved observer
    pub fn tick(&mut self, entities: &[Entity], delta_time_ms: u64) -> std::collections::HashMap<EntityId, DeltaUpdate> {
        let tick_start = Instant::now();
        self.tick += 1;
        self.now_ms += delta_time_ms;

        let lookup: HashMap<EntityId, usize> = entities.iter().enumerate().map(|(i, e)| (e.id, i)).collect();

        self.update_grid(entities, &lookup);
        let (before, after) = self.resolve_observers(entities, &lookup);
        let updates = self.encode_updates(entities);

        self.metrics.record_filtering(before, after, updates.len() as u64);
        self.metrics.record_cache(&self.resolver.cache_stats());
        self.metrics.record_tick_time(tick_start.elapsed());
        updates
    }

    fn update_grid(&mut self, entities: &[Entity], lookup: &HashMap<EntityId, usize>) {
        for entity in entities {
            if is_finite(entity) {
                self.index.assign(entity.id, entity.position);
            } else {
                warn!("Entity {} has a non-finite position, dropping it from the grid", entity.id);
                self.index.remove(entity.id);
            }
        }

        let stale: Vec<EntityId> = self
            .index
            .entity_ids()
            .filter(|id| !lookup.contains_key(*id))
            .copied()
            .collect();
        for id in stale {
            self.index.remove(id);
        }

        if self.analyzer.analyze(self.index.cells(), self.force_analysis, self.now_ms) {
            self.force_analysis = false;
            self.metrics.record_analysis(self.analyzer.densities());
        }
        if let Some(outcome) = self.sizer.maybe_update(&mut self.index, &self.analyzer, self.now_ms) {
            if outcome.resized() > 0 {
                self.metrics.record_resize(outcome.resized());
            }
        }
        self.metrics.record_grid(self.index.cell_count(), self.index.entity_count());
    }

    /// Resolve the visible set of every observer in id order (stable draws
    /// from a seeded detection RNG). Returns entity counts before/after.
    fn resolve_observers(&mut self, entities: &[Entity], lookup: &HashMap<EntityId, usize>) -> (u64, u64) {
        self.resolver.advance(self.now_ms);
        self.resolver.refresh_allied_graphs(entities);

        let mut ids: Vec<EntityId> = self.observers.keys().copied().collect();
        ids.sort_unstable();

        let (mut before, mut after) = (0u64, 0u64);
        for id in ids {
            let start = Instant::now();
            let result = lookup.get(&id).map(|&idx| self.visible_set(idx, entities, lookup));

            let Some(state) = self.observers.get_mut(&id) else {
                continue;
            };
            match result {
                Some(Ok(visible)) => {
                    before += entities.len() as u64;
                    after += visible.len() as u64;
                    state.pending = Some(visible);
                    state.visibility_time = start.elapsed();
                }
                Some(Err(e)) => {
                    error!("Observer {} skipped this tick: {}", id, e);
                    self.metrics.record_failed_observer();
                    state.invalidate();
                }
                // Not in the world this tick; resend in full when it returns
                None => state.invalidate(),
            }
        }
        (before, after)
    }

    fn visible_set(
        &mut self,
        observer_idx: usize,
        entities: &[Entity],
        lookup: &HashMap<EntityId, usize>,
    ) -> Result<Vec<usize>, InterestError> {
        let observer = &entities[observer_idx];
        let radius = self.resolver.candidate_radius(observer, entities)?;

        let mut candidates = self.index.query_radius(observer.position, radius);
        for ally in self.resolver.allied_reach(observer) {
            candidates.extend(
                self.index
                    .query_radius(ally.position, ally.view_distance)
                    .into_iter()
                    .filter(|id| lookup.get(id).is_some_and(|&i| entities[i].faction == observer.faction)),
            );
        }
        candidates.sort_unstable();
        candidates.dedup();

        let mut visible = Vec::with_capacity(candidates.len() + 1);
        visible.push(observer_idx);
        for id in candidates {
            let Some(&idx) = lookup.get(&id) else {
                continue;
            };
            if idx == observer_idx {
                continue;
            }
            if self.resolver.decide(observer, &entities[idx], entities)?.is_visible() {
                visible.push(idx);
            }
        }
        visible.sort_unstable();
        Ok(visible)
    }

    fn encode_updates(&mut self, entities: &[Entity]) -> std::collections::HashMap<EntityId, DeltaUpdate> {
        let codec = &self.codec;
        let metrics = &self.metrics;
        let tick = self.tick;

        self.observers
            .par_iter_mut()
            .filter_map(|(id, state)| {
                let visible = state.pending.take()?;
                let start = Instant::now();

                let encoded = build_snapshot(entities, &visible).and_then(|snapshot| {
                    let update = codec.create_delta(&snapshot, state.previous.as_ref())?;
                    Ok((snapshot, update))
                });

                match encoded {
                    Ok((snapshot, mut update)) => {
                        update.tick = tick;
                        state.previous = Some(snapshot);
                        metrics.record_update(&update.stats, update.full, visible.len());
                        metrics.record_observer_time(state.visibility_time + start.elapsed());
                        Some((*id, update))
                    }
                    Err(e) => {
                        error!("Observer {} skipped this tick: {}", id, InterestError::from(e));
                        metrics.record_failed_observer();
                        state.invalidate();
                        None
                    }
                }
            })
            .collect()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_observer(&self, id: EntityId) -> bool {
        self.observers.contains_key(&id)
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn analyzer(&self) -> &DensityAnalyzer {
        &self.analyzer
    }

    pub fn resolver(&self) -> &VisibilityResolver {
        &self.resolver
    }

    /// Environment changes (weather, hazards) go through here
    pub fn resolver_mut(&mut self) -> &mut VisibilityResolver {
        &mut self.resolver
    }

    pub fn metrics(&self) -> &Arc<InterestMetrics> {
        &self.metrics
    }

    pub fn debug_info(&self, observer: EntityId) -> Result<Option<ViewDistanceDebug>, InterestError> {
        if !self.is_observer(observer) {
            return Err(InterestError::UnknownObserver(observer));
        }
        Ok(self.resolver.debug_info(observer))
    }
}

#[inline]
fn is_finite(entity: &Entity) -> bool {
    entity.position.x.is_finite() && entity.position.y.is_finite()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StealthSettings;
    use crate::net::delta::apply_delta;
    use crate::util::Vec2;
    use crate::visibility::equipment::NoCapabilities;
    use crate::visibility::stealth::Stealth;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn manager() -> InterestManager {
        let mut config = InterestConfig::default();
        config.visibility.detection_seed = Some(7);
        InterestManager::new(
            config,
            Arc::new(DeltaCodec::default()),
            Arc::new(InterestMetrics::new()),
            Arc::new(NoCapabilities),
        )
        .unwrap()
    }

    fn at(x: f32, y: f32, faction: u32) -> Entity {
        Entity::new(Uuid::new_v4(), Vec2::new(x, y), faction)
    }

    fn register(manager: &mut InterestManager, entities: &[Entity]) {
        for e in entities {
            manager.on_entity_added(e);
        }
    }

    fn keys(update: &DeltaUpdate) -> Vec<String> {
        update.delta.as_object().map(|m| m.keys().cloned().collect()).unwrap_or_default()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = InterestConfig::default();
        config.grid.min_cell_size = 500.0;
        let result = InterestManager::new(
            config,
            Arc::new(DeltaCodec::default()),
            Arc::new(InterestMetrics::new()),
            Arc::new(NoCapabilities),
        );
        assert!(matches!(result, Err(InterestError::Config(_))));
    }

    #[test]
    fn test_full_then_delta() {
        let mut m = manager();
        let a = at(0.0, 0.0, 1);
        let b = at(20.0, 0.0, 1);
        let mut world = vec![a.clone(), b.clone()];
        register(&mut m, &world);

        let first = m.tick(&world, 50);
        assert_eq!(first.len(), 2);
        assert!(first[&a.id].full);
        assert_eq!(first[&a.id].tick, 1);
        assert_eq!(keys(&first[&a.id]).len(), 2);

        world[1].position = Vec2::new(21.0, 0.0);
        let second = m.tick(&world, 50);
        let update = &second[&a.id];
        assert!(!update.full);
        assert_eq!(update.tick, 2);
        assert_eq!(
            update.delta[b.id.to_string()]["position"],
            json!({ "dx": 1.0, "dy": 0.0, "_rel": true })
        );
    }

    #[test]
    fn test_far_entities_filtered() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let near = at(30.0, 0.0, 2).as_prop();
        let far = at(500.0, 0.0, 2).as_prop();
        let world = vec![observer.clone(), near.clone(), far.clone()];
        register(&mut m, &world);

        let updates = m.tick(&world, 50);
        assert_eq!(updates.len(), 1, "Props are not observers");
        let snapshot = &updates[&observer.id].delta;
        assert!(snapshot.get(observer.id.to_string()).is_some(), "Observer sees itself");
        assert!(snapshot.get(near.id.to_string()).is_some());
        assert!(snapshot.get(far.id.to_string()).is_none());

        assert_eq!(m.metrics().entities_before.load(Ordering::Relaxed), 3);
        assert_eq!(m.metrics().entities_after.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_distance_threshold_through_pipeline() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let inside = at(0.0, -49.0, 2).as_prop();
        let outside = at(0.0, -51.0, 2).as_prop();
        let world = vec![observer.clone(), inside.clone(), outside.clone()];
        register(&mut m, &world);

        let updates = m.tick(&world, 50);
        let snapshot = &updates[&observer.id].delta;
        assert!(snapshot.get(inside.id.to_string()).is_some());
        assert!(snapshot.get(outside.id.to_string()).is_none());
    }

    #[test]
    fn test_allied_vision_through_pipeline() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let relay = at(25.0, 0.0, 1);
        let scout = at(50.0, 0.0, 1);
        let outpost = at(95.0, 0.0, 1).as_prop();
        let world = vec![observer.clone(), relay, scout, outpost.clone()];
        register(&mut m, &world);

        let updates = m.tick(&world, 50);
        let snapshot = &updates[&observer.id].delta;
        assert!(snapshot.get(outpost.id.to_string()).is_some(), "Seen through the scout");
    }

    #[test]
    fn test_full_stealth_hidden() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let mut stealth = Stealth::new(&StealthSettings::default());
        stealth.activate();
        let sneaky = at(30.0, 0.0, 2).with_stealth(stealth).as_prop();
        let world = vec![observer.clone(), sneaky.clone()];
        register(&mut m, &world);

        let updates = m.tick(&world, 50);
        assert!(updates[&observer.id].delta.get(sneaky.id.to_string()).is_none());
    }

    #[test]
    fn test_removed_entity_marked_null() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let other = at(10.0, 0.0, 2).as_prop();
        let world = vec![observer.clone(), other.clone()];
        register(&mut m, &world);
        m.tick(&world, 50);

        m.on_entity_removed(other.id);
        let updates = m.tick(&world[..1], 50);
        assert_eq!(updates[&observer.id].delta[other.id.to_string()], Value::Null);
        assert!(!m.index().contains_entity(other.id));
    }

    #[test]
    fn test_absent_observer_gets_full_resend() {
        let mut m = manager();
        let a = at(0.0, 0.0, 1);
        let b = at(10.0, 0.0, 1);
        let world = vec![a.clone(), b.clone()];
        register(&mut m, &world);
        m.tick(&world, 50);

        let without_a = m.tick(&world[1..], 50);
        assert!(!without_a.contains_key(&a.id));
        assert!(!m.index().contains_entity(a.id), "Stale entities leave the grid");

        let back = m.tick(&world, 50);
        assert!(back[&a.id].full);
        assert!(!back[&b.id].full);
    }

    #[test]
    fn test_failing_observer_isolated() {
        let mut m = manager();
        let good = at(0.0, 0.0, 1);
        let mut bad = at(5.0, 0.0, 1);
        let mut world = vec![good.clone(), bad.clone()];
        register(&mut m, &world);
        m.tick(&world, 50);

        bad.position = Vec2::new(f32::NAN, 0.0);
        world[1] = bad.clone();
        let updates = m.tick(&world, 50);
        assert!(!updates.contains_key(&bad.id));
        assert!(updates.contains_key(&good.id), "Other observers still update");
        assert_eq!(m.metrics().failed_observers.load(Ordering::Relaxed), 1);

        world[1].position = Vec2::new(5.0, 0.0);
        let healed = m.tick(&world, 50);
        assert!(healed[&bad.id].full, "Full resend after a skipped tick");
    }

    #[test]
    fn test_observer_registration() {
        let mut m = manager();
        let player = at(0.0, 0.0, 1);
        let world = vec![player.clone()];
        register(&mut m, &world);
        assert!(m.is_observer(player.id));
        assert!(!m.add_observer(player.id), "Already registered");

        m.tick(&world, 50);
        assert!(m.remove_observer(player.id));
        assert!(m.tick(&world, 50).is_empty());
        assert!(matches!(
            m.resync_observer(player.id),
            Err(InterestError::UnknownObserver(_))
        ));

        m.add_observer(player.id);
        assert!(m.tick(&world, 50)[&player.id].full);
    }

    #[test]
    fn test_resync_forces_full() {
        let mut m = manager();
        let player = at(0.0, 0.0, 1);
        let world = vec![player.clone()];
        register(&mut m, &world);
        m.tick(&world, 50);
        assert!(!m.tick(&world, 50)[&player.id].full);

        m.resync_observer(player.id).unwrap();
        assert!(m.tick(&world, 50)[&player.id].full);
    }

    #[test]
    fn test_debug_info() {
        let mut m = manager();
        let player = at(0.0, 0.0, 1);
        let world = vec![player.clone()];
        register(&mut m, &world);
        m.tick(&world, 50);

        let info = m.debug_info(player.id).unwrap().unwrap();
        assert_eq!(info.view_distance, 50.0);
        assert!(m.debug_info(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_grid_tracks_moving_world() {
        let mut m = manager();
        let mut rng = StdRng::seed_from_u64(11);
        let mut world: Vec<Entity> = (0..200)
            .map(|i| {
                let e = at(rng.gen_range(-400.0..400.0), rng.gen_range(-400.0..400.0), (i % 3) as u32);
                if i % 4 == 0 { e } else { e.as_prop() }
            })
            .collect();
        register(&mut m, &world);
        m.force_analysis();

        for _ in 0..10 {
            for e in world.iter_mut() {
                e.position = e.position + Vec2::new(rng.gen_range(-20.0..20.0), rng.gen_range(-20.0..20.0));
            }
            let updates = m.tick(&world, 50);
            assert_eq!(updates.len(), 50);
        }

        assert_eq!(m.index().entity_count(), world.len());
        for e in &world {
            let key = m.index().cell_of(e.id).unwrap();
            let cell = m.index().cell(key).unwrap();
            assert!(cell.contains(e.position), "Entity {} outside its cell", e.id);
        }
        assert!(m.metrics().density_analyses.load(Ordering::Relaxed) >= 1);
        assert_eq!(m.metrics().tick_count.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_cell_sizes_bounded_in_clustered_world() {
        let mut config = InterestConfig::default();
        config.grid.analysis_interval_ms = 100;
        config.grid.resize_interval_ms = 100;
        let (min, max) = (config.grid.min_cell_size, config.grid.max_cell_size);
        let mut m = InterestManager::new(
            config,
            Arc::new(DeltaCodec::default()),
            Arc::new(InterestMetrics::new()),
            Arc::new(NoCapabilities),
        )
        .unwrap();

        // Half packed around the origin, half spread around (600, 600)
        let mut rng = StdRng::seed_from_u64(21);
        let bases: Vec<Vec2> = (0..300)
            .map(|i| {
                if i % 2 == 0 {
                    Vec2::new(rng.gen_range(-40.0..40.0), rng.gen_range(-40.0..40.0))
                } else {
                    Vec2::new(rng.gen_range(450.0..750.0), rng.gen_range(450.0..750.0))
                }
            })
            .collect();
        let mut world: Vec<Entity> = bases.iter().map(|b| at(b.x, b.y, 1).as_prop()).collect();
        register(&mut m, &world);

        for _ in 0..400 {
            for (e, base) in world.iter_mut().zip(&bases) {
                e.position = *base + Vec2::new(rng.gen_range(-15.0..15.0), rng.gen_range(-15.0..15.0));
            }
            m.tick(&world, 50);

            for cell in m.index().cells() {
                assert!(
                    cell.width() >= min && cell.width() <= max && cell.height() >= min && cell.height() <= max,
                    "Cell #{} is {}x{}",
                    cell.key(),
                    cell.width(),
                    cell.height()
                );
            }
        }

        // Both clusters cover 20 default slots between them
        let slots: hashbrown::HashSet<_> = m.index().cells().map(|c| c.slot()).collect();
        assert!(slots.len() <= 20, "{} anchor slots", slots.len());
        assert!(m.index().cell_count() <= 8 * slots.len(), "{} cells", m.index().cell_count());
        assert!(m.metrics().cells_resized.load(Ordering::Relaxed) > 0, "Clusters must trigger resizes");
        for e in &world {
            let cell = m.index().cell(m.index().cell_of(e.id).unwrap()).unwrap();
            assert!(cell.contains(e.position));
        }
    }

    #[test]
    fn test_client_tracks_attribute_cleared_to_null() {
        let mut m = manager();
        let observer = at(0.0, 0.0, 1);
        let prop = at(10.0, 0.0, 2).as_prop().with_attribute("target", json!(5));
        let mut world = vec![observer.clone(), prop.clone()];
        register(&mut m, &world);

        let first = m.tick(&world, 50);
        let mut client = apply_delta(&Value::Null, &first[&observer.id]);
        assert_eq!(client[prop.id.to_string()]["target"], json!(5));

        world[1].attributes.insert("target".to_string(), Value::Null);
        let second = m.tick(&world, 50);
        client = apply_delta(&client, &second[&observer.id]);

        let server = build_snapshot(&world, &[0, 1]).unwrap();
        assert_eq!(client, server);
        assert!(client[prop.id.to_string()].get("target").is_none());
    }

    #[test]
    fn test_deterministic_with_seed() {
        let settings = StealthSettings {
            level: 0.5,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let world: Vec<Entity> = (0..60)
            .map(|i| {
                let mut stealth = Stealth::new(&settings);
                if i % 2 == 0 {
                    stealth.activate();
                }
                at(rng.gen_range(-60.0..60.0), rng.gen_range(-60.0..60.0), (i % 2) as u32).with_stealth(stealth)
            })
            .collect();

        let run = || {
            let mut m = manager();
            register(&mut m, &world);
            let updates = m.tick(&world, 50);
            let mut out: Vec<(EntityId, Vec<String>)> =
                updates.iter().map(|(id, u)| (*id, keys(u))).collect();
            out.sort();
            out
        };
        assert_eq!(run(), run());
    }
}
