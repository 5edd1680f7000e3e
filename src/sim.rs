//! Demo world for the standalone binary and benchmarks
//!
//! Wandering bots split across three factions. Some carry equipment, some
//! toggle stealth, and the environment drifts through weather changes and
//! random hazards.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use uuid::Uuid;

use crate::config::StealthSettings;
use crate::entity::Entity;
use crate::util::{wrap_angle, Vec2};
use crate::visibility::environment::{EnvironmentalConditions, Weather};
use crate::visibility::equipment::{Ability, Equipment, LoadoutCapabilities};
use crate::visibility::stealth::Stealth;

pub const FACTIONS: u32 = 3;

/// Units per second
const BOT_SPEED: f32 = 12.0;

/// Seconds between heading changes
const DECISION_INTERVAL: f32 = 2.0;

/// Max heading change per decision (radians)
const MAX_TURN: f32 = 1.2;

/// Per-tick chances
const STEALTH_TOGGLE_CHANCE: f64 = 0.01;
const WEATHER_CHANGE_CHANCE: f64 = 0.002;
const HAZARD_SPAWN_CHANCE: f64 = 0.001;

#[derive(Debug, Clone)]
struct Wanderer {
    heading: f32,
    decision_timer: f32,
}

pub struct SimWorld {
    entities: Vec<Entity>,
    wanderers: Vec<Wanderer>,
    capabilities: Arc<LoadoutCapabilities>,
    arena_radius: f32,
    rng: StdRng,
}

impl SimWorld {
    /// Spawn `count` bots; one in four is a player (observer)
    pub fn new(count: usize, seed: Option<u64>, stealth: &StealthSettings) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // Keep density roughly constant as the world grows
        let arena_radius = (count.max(1) as f32).sqrt() * 25.0;
        let capabilities = Arc::new(LoadoutCapabilities::new());

        let mut entities = Vec::with_capacity(count);
        let mut wanderers = Vec::with_capacity(count);
        for i in 0..count {
            let id = Uuid::from_u128(rng.gen());
            let angle = rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI);
            let dist = arena_radius * rng.gen::<f32>().sqrt();
            let heading = rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI);

            let mut entity = Entity::new(id, Vec2::from_angle(angle) * dist, i as u32 % FACTIONS)
                .with_rotation(heading)
                .with_stealth(Stealth::with_level(stealth, rng.gen_range(0.3..=1.0)))
                .with_attribute("name", json!(bot_name(&mut rng)))
                .with_attribute("health", json!(100));
            if i % 4 != 0 {
                entity = entity.as_prop();
            }

            if rng.gen_bool(0.2) {
                capabilities.equip(id, Equipment::ALL[rng.gen_range(0..Equipment::ALL.len())]);
            }
            if rng.gen_bool(0.1) {
                capabilities.set_ability(id, Ability::ALL[rng.gen_range(0..Ability::ALL.len())], true);
            }

            entities.push(entity);
            wanderers.push(Wanderer {
                heading,
                decision_timer: rng.gen_range(0.0..DECISION_INTERVAL),
            });
        }

        Self {
            entities,
            wanderers,
            capabilities,
            arena_radius,
            rng,
        }
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn capabilities(&self) -> Arc<LoadoutCapabilities> {
        Arc::clone(&self.capabilities)
    }

    pub fn arena_radius(&self) -> f32 {
        self.arena_radius
    }

    /// Advance bots and the environment by one tick
    pub fn step(&mut self, delta_time_ms: u64, environment: &mut EnvironmentalConditions) {
        let dt = delta_time_ms as f32 / 1000.0;
        let rng = &mut self.rng;

        for (entity, bot) in self.entities.iter_mut().zip(self.wanderers.iter_mut()) {
            bot.decision_timer -= dt;
            if bot.decision_timer <= 0.0 {
                bot.decision_timer = DECISION_INTERVAL * (1.0 + rng.gen_range(-0.2..0.2));
                bot.heading = wrap_angle(bot.heading + rng.gen_range(-MAX_TURN..MAX_TURN));
            }

            // Head back in once outside the arena
            if entity.position.length() > self.arena_radius {
                let inward = entity.position * -1.0;
                bot.heading = inward.y.atan2(inward.x);
            }

            entity.position += Vec2::from_angle(bot.heading) * (BOT_SPEED * dt);
            entity.rotation = bot.heading;

            entity.stealth.update(delta_time_ms as f32);
            if rng.gen_bool(STEALTH_TOGGLE_CHANCE) {
                if entity.stealth.is_active() {
                    entity.stealth.deactivate();
                } else {
                    entity.stealth.activate();
                }
            }
        }

        if rng.gen_bool(WEATHER_CHANGE_CHANCE) {
            let weather = match rng.gen_range(0..4) {
                0 => Weather::Clear,
                1 => Weather::Fog,
                2 => Weather::Rain,
                _ => Weather::Storm,
            };
            environment.set_weather(weather);
        }
        if rng.gen_bool(HAZARD_SPAWN_CHANCE) {
            environment.spawn_random_hazard(rng, Vec2::ZERO, self.arena_radius);
        }
    }
}

fn bot_name<R: Rng>(rng: &mut R) -> String {
    let prefixes = ["Nova", "Star", "Cosmic", "Orbit", "Luna", "Solar", "Astro", "Nebula"];
    let suffixes = ["X", "Prime", "Alpha", "Beta", "One", "Zero", "Max", "Pro"];
    format!(
        "{}{}",
        prefixes[rng.gen_range(0..prefixes.len())],
        suffixes[rng.gen_range(0..suffixes.len())]
    )
}
