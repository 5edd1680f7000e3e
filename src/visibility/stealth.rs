//! Stealth state machine
//!
//! INACTIVE -> activate -> ACTIVE -> (deactivate | duration expiry) -> COOLDOWN
//! -> (cooldown expiry) -> INACTIVE

use serde::Serialize;

use crate::config::StealthSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StealthState {
    Inactive,
    Active,
    Cooldown,
}

/// Per-entity stealth ability
#[derive(Debug, Clone, PartialEq)]
pub struct Stealth {
    active: bool,
    /// Effectiveness while active
    level: f32,
    duration_ms: f32,
    cooldown_ms: f32,
    duration_remaining_ms: f32,
    cooldown_remaining_ms: f32,
}

impl Stealth {
    pub fn new(settings: &StealthSettings) -> Self {
        Self {
            active: false,
            level: settings.level.clamp(0.0, 1.0),
            duration_ms: settings.duration_ms,
            cooldown_ms: settings.cooldown_ms,
            duration_remaining_ms: 0.0,
            cooldown_remaining_ms: 0.0,
        }
    }

    /// Same as `new` with a custom effectiveness level
    pub fn with_level(settings: &StealthSettings, level: f32) -> Self {
        let mut stealth = Self::new(settings);
        stealth.level = level.clamp(0.0, 1.0);
        stealth
    }

    pub fn state(&self) -> StealthState {
        if self.active {
            StealthState::Active
        } else if self.cooldown_remaining_ms > 0.0 {
            StealthState::Cooldown
        } else {
            StealthState::Inactive
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn duration_remaining_ms(&self) -> f32 {
        self.duration_remaining_ms
    }

    pub fn cooldown_remaining_ms(&self) -> f32 {
        self.cooldown_remaining_ms
    }

    /// Returns false without changing anything if already active or cooling down
    pub fn activate(&mut self) -> bool {
        if self.active || self.cooldown_remaining_ms > 0.0 {
            return false;
        }
        self.active = true;
        self.duration_remaining_ms = self.duration_ms;
        true
    }

    /// Starts the fixed cooldown however the activation ended
    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.duration_remaining_ms = 0.0;
        self.cooldown_remaining_ms = self.cooldown_ms;
    }

    pub fn update(&mut self, delta_time_ms: f32) {
        if self.active {
            self.duration_remaining_ms -= delta_time_ms;
            if self.duration_remaining_ms <= 0.0 {
                self.deactivate();
            }
        } else if self.cooldown_remaining_ms > 0.0 {
            self.cooldown_remaining_ms = (self.cooldown_remaining_ms - delta_time_ms).max(0.0);
        }
    }

    /// 0 when inactive, otherwise the configured level
    pub fn effectiveness(&self) -> f32 {
        if self.active {
            self.level
        } else {
            0.0
        }
    }
}

impl Default for Stealth {
    fn default() -> Self {
        Self::new(&StealthSettings::default())
    }
}
