//! Allied vision sharing
//!
//! One graph per faction: nodes are players, edges join players within the
//! sharing distance. Graphs are rebuilt on a TTL and swapped in whole, so
//! they may lag real positions by up to that TTL.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::entity::{Entity, EntityId, FactionId};
use crate::util::Vec2;

#[derive(Debug, Clone, Copy)]
pub struct AllyNode {
    pub id: EntityId,
    pub position: Vec2,
    /// The ally's own view distance, without shared vision
    pub view_distance: f32,
}

#[derive(Debug, Clone)]
pub struct AlliedVisibilityGraph {
    faction: FactionId,
    built_at_ms: u64,
    nodes: Vec<AllyNode>,
    lookup: FxHashMap<EntityId, usize>,
    edges: Vec<SmallVec<[usize; 8]>>,
}

impl AlliedVisibilityGraph {
    /// Build from every player of `faction`. O(n^2) in faction size.
    pub fn build<'a>(
        faction: FactionId,
        players: impl IntoIterator<Item = &'a Entity>,
        share_distance: f32,
        view_distance_of: impl Fn(&Entity) -> f32,
        now_ms: u64,
    ) -> Self {
        let nodes: Vec<AllyNode> = players
            .into_iter()
            .filter(|e| e.is_player && e.faction == faction)
            .map(|e| AllyNode {
                id: e.id,
                position: e.position,
                view_distance: view_distance_of(e),
            })
            .collect();

        let lookup = nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

        let share_sq = share_distance * share_distance;
        let mut edges: Vec<SmallVec<[usize; 8]>> = vec![SmallVec::new(); nodes.len()];
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if nodes[i].position.distance_sq_to(nodes[j].position) <= share_sq {
                    edges[i].push(j);
                    edges[j].push(i);
                }
            }
        }

        Self {
            faction,
            built_at_ms: now_ms,
            nodes,
            lookup,
            edges,
        }
    }

    pub fn faction(&self) -> FactionId {
        self.faction
    }

    pub fn built_at_ms(&self) -> u64 {
        self.built_at_ms
    }

    pub fn is_stale(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.built_at_ms) >= ttl_ms
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.lookup.contains_key(&id)
    }

    /// Allies adjacent to `id` (within sharing distance at build time)
    pub fn neighbors(&self, id: EntityId) -> impl Iterator<Item = &AllyNode> {
        self.lookup
            .get(&id)
            .into_iter()
            .flat_map(move |&i| self.edges[i].iter().map(move |&j| &self.nodes[j]))
    }

    /// Every ally reachable from `id`, excluding `id` itself, in BFS order
    pub fn reachable(&self, id: EntityId) -> Vec<AllyNode> {
        let mut out = Vec::new();
        self.bfs(id, |node| {
            out.push(*node);
            false
        });
        out
    }

    /// First ally reachable from `observer` that directly sees `target`
    pub fn find_seer(&self, observer: EntityId, target: Vec2) -> Option<EntityId> {
        let mut seer = None;
        self.bfs(observer, |node| {
            let sees = node.position.distance_sq_to(target) <= node.view_distance * node.view_distance;
            if sees {
                seer = Some(node.id);
            }
            sees
        });
        seer
    }

    /// Visit reachable nodes (not the start) until `visit` returns true
    fn bfs(&self, start: EntityId, mut visit: impl FnMut(&AllyNode) -> bool) {
        let Some(&start) = self.lookup.get(&start) else {
            return;
        };
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        seen[start] = true;
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for &next in &self.edges[current] {
                if seen[next] {
                    continue;
                }
                seen[next] = true;
                if visit(&self.nodes[next]) {
                    return;
                }
                queue.push_back(next);
            }
        }
    }
}

/// View distance shared by nearby allies:
/// `sum(their_view * (1 - d / share_distance) * share_percentage)`
pub fn allied_modifier(
    observer: &Entity,
    allies: impl IntoIterator<Item = (Vec2, f32)>,
    share_distance: f32,
    share_percentage: f32,
) -> f32 {
    allies
        .into_iter()
        .map(|(position, their_view)| {
            let d = observer.position.distance_to(position);
            let falloff = (1.0 - d / share_distance).max(0.0);
            their_view * falloff * share_percentage
        })
        .sum()
}
