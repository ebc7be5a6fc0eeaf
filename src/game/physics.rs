//! Arena geometry: vectors, bounded pursuit and hit tests

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// Position or direction in arena space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);
    /// Forward for player ships
    pub const FORWARD: Vec3 = Vec3::new(0.0, 0.0, 1.0);
    /// Forward for enemy ships
    pub const BACK: Vec3 = Vec3::new(0.0, 0.0, -1.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance(self, other: Vec3) -> f32 {
        (other - self).length()
    }

    /// Unit vector in the same direction, zero stays zero
    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len < f32::EPSILON {
            Vec3::ZERO
        } else {
            self * (1.0 / len)
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Physics helpers for ship movement and hit tests
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Move `current` toward `target` by at most `max_step`.
    /// Within one step the result is exactly `target`.
    pub fn step_toward(current: Vec3, target: Vec3, max_step: f32) -> Vec3 {
        let heading = target - current;
        let distance = heading.length();

        if distance <= max_step {
            target
        } else {
            current + heading * (max_step / distance)
        }
    }

    /// Straight-line drift along a heading
    pub fn drift(position: Vec3, heading: Vec3, speed: f32, dt: f32) -> Vec3 {
        position + heading * (speed * dt)
    }

    /// Does a ray of length `range` from `origin` along `direction` pass
    /// within `radius` of `center`
    pub fn ray_hits_sphere(
        origin: Vec3,
        direction: Vec3,
        range: f32,
        center: Vec3,
        radius: f32,
    ) -> bool {
        let dir = direction.normalized();
        if dir == Vec3::ZERO {
            return false;
        }

        let to_center = center - origin;
        // Closest approach along the ray, clamped to the beam segment
        let along = to_center.dot(dir).clamp(0.0, range);
        let closest = origin + dir * along;

        closest.distance(center) <= radius
    }

    /// Check overlap between two spheres
    pub fn spheres_overlap(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> bool {
        let combined = radius_a + radius_b;
        (b - a).length_squared() <= combined * combined
    }
}
