//! Per-observer view distance cache
//!
//! Entries expire after a TTL. When the cache grows past its eviction
//! threshold, the oldest entries go first, ties broken by the smallest total
//! modifier magnitude.

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::entity::EntityId;
use crate::util::Vec2;

/// Breakdown of a resolved view distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModifierBreakdown {
    /// Default view distance times the observer's multiplier
    pub base: f32,
    pub environmental: f32,
    pub equipment: f32,
    pub allied: f32,
}

impl ModifierBreakdown {
    pub fn total_magnitude(&self) -> f32 {
        self.environmental.abs() + self.equipment.abs() + self.allied.abs()
    }
}

/// Frontal extended-range detection region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewCone {
    /// Unit facing vector
    pub direction: Vec2,
    pub half_angle: f32,
    pub extended_distance: f32,
    /// Observer rotation the cone was built for
    pub rotation: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewDistanceEntry {
    pub view_distance: f32,
    pub modifiers: ModifierBreakdown,
    pub computed_at_ms: u64,
    /// Built lazily on the first cone check
    pub cone: Option<ViewCone>,
}

impl ViewDistanceEntry {
    fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.computed_at_ms) >= ttl_ms
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f32,
    pub cone_hits: u64,
    pub cone_misses: u64,
    pub cone_hit_rate: f32,
}

/// Counts removed by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone)]
pub struct ViewDistanceCache {
    entries: FxHashMap<EntityId, ViewDistanceEntry>,
    ttl_ms: u64,
    eviction_threshold: usize,
    maintenance_interval_ms: u64,
    last_maintenance_ms: u64,
    hits: u64,
    misses: u64,
    cone_hits: u64,
    cone_misses: u64,
}

impl ViewDistanceCache {
    pub fn new(ttl_ms: u64, eviction_threshold: usize, maintenance_interval_ms: u64) -> Self {
        Self {
            entries: FxHashMap::default(),
            ttl_ms,
            eviction_threshold,
            maintenance_interval_ms,
            last_maintenance_ms: 0,
            hits: 0,
            misses: 0,
            cone_hits: 0,
            cone_misses: 0,
        }
    }

    /// Fresh entry for `id`, counting the hit or miss
    pub fn get(&mut self, id: EntityId, now_ms: u64) -> Option<ViewDistanceEntry> {
        match self.entries.get(&id) {
            Some(entry) if !entry.is_expired(now_ms, self.ttl_ms) => {
                self.hits += 1;
                Some(*entry)
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Entry regardless of age, without touching the counters
    pub fn peek(&self, id: EntityId) -> Option<&ViewDistanceEntry> {
        self.entries.get(&id)
    }

    pub fn peek_mut(&mut self, id: EntityId) -> Option<&mut ViewDistanceEntry> {
        self.entries.get_mut(&id)
    }

    pub fn insert(&mut self, id: EntityId, entry: ViewDistanceEntry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: EntityId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn record_cone(&mut self, hit: bool) {
        if hit {
            self.cone_hits += 1;
        } else {
            self.cone_misses += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Expire and evict on the maintenance interval
    pub fn maintain(&mut self, now_ms: u64) -> Option<MaintenanceReport> {
        if now_ms.saturating_sub(self.last_maintenance_ms) < self.maintenance_interval_ms {
            return None;
        }
        self.last_maintenance_ms = now_ms;
        Some(self.sweep(now_ms))
    }

    /// Drop expired entries, then evict down to the threshold
    pub fn sweep(&mut self, now_ms: u64) -> MaintenanceReport {
        let ttl = self.ttl_ms;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms, ttl));
        let expired = before - self.entries.len();

        let mut evicted = 0;
        if self.entries.len() > self.eviction_threshold {
            let mut order: Vec<(EntityId, u64, f32)> = self
                .entries
                .iter()
                .map(|(id, e)| (*id, e.computed_at_ms, e.modifiers.total_magnitude()))
                .collect();
            order.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.total_cmp(&b.2)));

            evicted = self.entries.len() - self.eviction_threshold;
            for (id, _, _) in order.into_iter().take(evicted) {
                self.entries.remove(&id);
            }
        }

        if expired + evicted > 0 {
            debug!(
                "View distance cache maintenance: {} expired, {} evicted, {} remaining",
                expired,
                evicted,
                self.entries.len()
            );
        }
        MaintenanceReport { expired, evicted }
    }

    pub fn stats(&self) -> CacheStats {
        let rate = |hits: u64, misses: u64| {
            let total = hits + misses;
            if total == 0 {
                0.0
            } else {
                hits as f32 / total as f32
            }
        };
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: rate(self.hits, self.misses),
            cone_hits: self.cone_hits,
            cone_misses: self.cone_misses,
            cone_hit_rate: rate(self.cone_hits, self.cone_misses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn entry(at: u64, allied: f32) -> ViewDistanceEntry {
        ViewDistanceEntry {
            view_distance: 50.0,
            modifiers: ModifierBreakdown {
                base: 50.0,
                allied,
                ..Default::default()
            },
            computed_at_ms: at,
            cone: None,
        }
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ViewDistanceCache::new(1_000, 100, 5_000);
        let id = Uuid::new_v4();
        cache.insert(id, entry(0, 0.0));

        assert!(cache.get(id, 999).is_some());
        assert!(cache.get(id, 1_000).is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_maintenance_interval() {
        let mut cache = ViewDistanceCache::new(1_000, 100, 5_000);
        cache.insert(Uuid::new_v4(), entry(0, 0.0));
        assert!(cache.maintain(4_999).is_none());
        let report = cache.maintain(5_000).unwrap();
        assert_eq!(report.expired, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_oldest_then_smallest_modifier() {
        let mut cache = ViewDistanceCache::new(10_000, 2, 0);
        let oldest = Uuid::new_v4();
        let tie_small = Uuid::new_v4();
        let tie_large = Uuid::new_v4();
        let newest = Uuid::new_v4();
        cache.insert(oldest, entry(100, 50.0));
        cache.insert(tie_small, entry(200, 1.0));
        cache.insert(tie_large, entry(200, 20.0));
        cache.insert(newest, entry(300, 0.0));

        let report = cache.sweep(500);
        assert_eq!(report.evicted, 2);
        assert!(cache.peek(oldest).is_none());
        assert!(cache.peek(tie_small).is_none());
        assert!(cache.peek(tie_large).is_some());
        assert!(cache.peek(newest).is_some());
    }

    #[test]
    fn test_remove() {
        let mut cache = ViewDistanceCache::new(1_000, 100, 5_000);
        let id = Uuid::new_v4();
        cache.insert(id, entry(0, 0.0));
        assert!(cache.remove(id));
        assert!(!cache.remove(id));
    }
}
