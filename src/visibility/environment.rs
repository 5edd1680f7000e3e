//! Environmental conditions affecting view distance
//!
//! - Day/night derived from a cycle clock (second half of each cycle is night)
//! - Global weather set by the host
//! - Timed circular hazards, applied only to positions inside their radius

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::config::EnvironmentModifiers;
use crate::util::Vec2;

/// Radius range of randomly spawned hazards (world units)
pub const HAZARD_RADIUS_RANGE: (f32, f32) = (500.0, 1500.0);

/// Lifetime range of randomly spawned hazards (5 to 15 minutes)
pub const HAZARD_DURATION_RANGE_MS: (u64, u64) = (300_000, 900_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    Clear,
    Fog,
    Rain,
    Storm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    ToxicGas,
    MeteorStrike,
    ElectricalStorm,
}

#[derive(Debug, Clone, Serialize)]
pub struct Hazard {
    pub id: u64,
    pub kind: HazardKind,
    pub position: Vec2,
    pub radius: f32,
    pub expires_at_ms: u64,
}

impl Hazard {
    #[inline]
    pub fn contains(&self, position: Vec2) -> bool {
        self.position.distance_sq_to(position) <= self.radius * self.radius
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentalConditions {
    modifiers: EnvironmentModifiers,
    now_ms: u64,
    weather: Weather,
    hazards: Vec<Hazard>,
    next_hazard_id: u64,
}

impl EnvironmentalConditions {
    pub fn new(modifiers: EnvironmentModifiers) -> Self {
        Self {
            modifiers,
            now_ms: 0,
            weather: Weather::Clear,
            hazards: Vec::new(),
            next_hazard_id: 1,
        }
    }

    /// Move the clock forward and drop expired hazards
    pub fn advance(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        let before = self.hazards.len();
        self.hazards.retain(|h| h.expires_at_ms > now_ms);
        if self.hazards.len() != before {
            debug!("{} hazards expired", before - self.hazards.len());
        }
    }

    pub fn is_night(&self) -> bool {
        let cycle = self.modifiers.day_night_cycle_ms.max(1);
        self.now_ms % cycle >= cycle / 2
    }

    pub fn weather(&self) -> Weather {
        self.weather
    }

    pub fn set_weather(&mut self, weather: Weather) {
        if weather != self.weather {
            debug!("Weather changed: {:?} -> {:?}", self.weather, weather);
            self.weather = weather;
        }
    }

    pub fn hazards(&self) -> &[Hazard] {
        &self.hazards
    }

    pub fn add_hazard(&mut self, kind: HazardKind, position: Vec2, radius: f32, duration_ms: u64) -> u64 {
        let id = self.next_hazard_id;
        self.next_hazard_id += 1;
        self.hazards.push(Hazard {
            id,
            kind,
            position,
            radius,
            expires_at_ms: self.now_ms.saturating_add(duration_ms),
        });
        id
    }

    /// Spawn a hazard of random kind, size and lifetime around `center`
    pub fn spawn_random_hazard<R: Rng>(&mut self, rng: &mut R, center: Vec2, spread: f32) -> u64 {
        let kind = match rng.gen_range(0..3) {
            0 => HazardKind::ToxicGas,
            1 => HazardKind::MeteorStrike,
            _ => HazardKind::ElectricalStorm,
        };
        let offset = Vec2::new(rng.gen_range(-spread..=spread), rng.gen_range(-spread..=spread));
        let radius = rng.gen_range(HAZARD_RADIUS_RANGE.0..=HAZARD_RADIUS_RANGE.1);
        let duration = rng.gen_range(HAZARD_DURATION_RANGE_MS.0..=HAZARD_DURATION_RANGE_MS.1);
        self.add_hazard(kind, center + offset, radius, duration)
    }

    pub fn remove_hazard(&mut self, id: u64) -> bool {
        let before = self.hazards.len();
        self.hazards.retain(|h| h.id != id);
        self.hazards.len() != before
    }

    fn weather_modifier(&self) -> f32 {
        match self.weather {
            Weather::Clear => 0.0,
            Weather::Fog => self.modifiers.fog,
            Weather::Rain => self.modifiers.rain,
            Weather::Storm => self.modifiers.storm,
        }
    }

    fn hazard_modifier(&self, kind: HazardKind) -> f32 {
        match kind {
            HazardKind::ToxicGas => self.modifiers.toxic_gas,
            HazardKind::MeteorStrike => self.modifiers.meteor_strike,
            HazardKind::ElectricalStorm => self.modifiers.electrical_storm,
        }
    }

    /// Day/night + weather + every hazard containing `position`
    pub fn modifier_at(&self, position: Vec2) -> f32 {
        let night = if self.is_night() { self.modifiers.night } else { 0.0 };
        let hazards: f32 = self
            .hazards
            .iter()
            .filter(|h| h.contains(position))
            .map(|h| self.hazard_modifier(h.kind))
            .sum();
        night + self.weather_modifier() + hazards
    }
}
