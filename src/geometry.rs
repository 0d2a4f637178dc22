//! The angle model shared by the estimator and the simulator.
//!
//! An array is two microphones `baseline` meters apart. A far-field source at
//! angle `φ` off the array's broadside reaches one microphone
//! `baseline * sin(φ) / c` seconds before the other, which is what the
//! clients report as `del_t`.

use crate::{Point, Radian};

/// Speed of sound in dry air at about 20°C, in m/s.
pub const SPEED_OF_SOUND: f64 = 343.0;

/// Convert a measured delay to an angle of arrival in the array's frame.
///
/// The sine is clipped to `[-1, 1]` so that noise pushing `|c·Δt|` past the
/// baseline maps to ±90° instead of NaN.
pub fn angle_of_arrival(delay: f64, baseline: f64, speed_of_sound: f64) -> Radian {
    let sin_theta = (speed_of_sound * delay) / baseline;
    sin_theta.clamp(-1.0, 1.0).asin()
}

/// The delay an array would measure for a source at `angle` in its frame.
/// Inverse of [angle_of_arrival] for `|angle| <= π/2`.
pub fn delay_for_angle(angle: Radian, baseline: f64, speed_of_sound: f64) -> f64 {
    baseline * angle.sin() / speed_of_sound
}

/// The smallest signed difference `a - b`, normalized to `[-π, π]`.
pub fn angle_difference(a: Radian, b: Radian) -> Radian {
    let diff = a - b;
    diff.sin().atan2(diff.cos())
}

/// Bearing from an array at `position` facing `theta` to `source`, in the
/// array's frame.
pub fn expected_angle(position: Point, theta: Radian, source: Point) -> Radian {
    let angle_global = (source.y - position.y).atan2(source.x - position.x);
    angle_global - theta
}
