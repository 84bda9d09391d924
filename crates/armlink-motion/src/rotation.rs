//! Rotation-vector algebra.
//!
//! A rotation vector encodes an orientation as `axis × angle`.  The wire
//! representation is only defined modulo 2π and modulo the sign of the
//! axis, so consecutive frames of a smoothly rotating tool can jump from
//! `(3.1, 0, 0)` to `(-3.1, 0, 0)`.  [`unwrap_rotation_vector`] re-expresses
//! each new vector relative to the previous one so the angle evolves
//! continuously.

use std::f64::consts::{PI, TAU};

use armlink_types::Vector3d;

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn from_array(v: Vector3d) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    pub fn to_array(self) -> Vector3d {
        [self.x, self.y, self.z]
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Unit vector in the same direction.  The zero vector stays zero.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            Self::zero()
        } else {
            self.scale(1.0 / len)
        }
    }
}

/// Wrap an angle difference into `[-π, π)`.
pub fn wrap_angle_delta(delta: f64) -> f64 {
    delta - TAU * ((delta + PI) / TAU).floor()
}

/// Re-express `new` so that its angle is the one closest to `previous`.
///
/// Both vectors are split into axis and angle (a zero vector has angle 0 and
/// no axis).  If the axes point in opposite half-spaces the new axis and
/// angle are negated; the angle difference is then wrapped into `[-π, π)`
/// and added to the previous angle.  The returned vector describes the same
/// rotation as `new`.
pub fn unwrap_rotation_vector(new: Vector3d, previous: Vector3d) -> Vector3d {
    let previous = Vec3::from_array(previous);
    let previous_angle = previous.length();
    let previous_axis = previous.normalized();

    let new = Vec3::from_array(new);
    let mut angle = new.length();
    let mut axis = new.normalized();

    if axis.dot(previous_axis) < 0.0 {
        angle = -angle;
        axis = axis.scale(-1.0);
    }

    let delta = wrap_angle_delta(angle - previous_angle);
    axis.scale(previous_angle + delta).to_array()
}
