//! Shared primitive types used across the job system.

use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// One pass of the registry driver. Counts up from 1.
pub type FrameNumber = u64;

/// Internal frame identifier of the self-update job.
/// Distinct from `FrameNumber`: repeat passes bump it within one frame.
pub type FrameId = u64;

/// Job ordering value. Higher runs earlier.
pub type Priority = i32;

/// Host time in seconds.
pub type Seconds = f64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Per-axis absolute offset.
    pub fn abs(self) -> Self {
        Self { x: self.x.abs(), y: self.y.abs() }
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2 { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}
