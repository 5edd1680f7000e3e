pub mod vec2;

pub use vec2::Vec2;

use std::f32::consts::{PI, TAU};

/// Wrap an angle into (-PI, PI]
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    } else if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}

/// f64 variant used by the JSON delta codec
#[inline]
pub fn wrap_angle_f64(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    } else if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}
