//! Stage bounding box and transform clamping.
//!
//! Coordinates are relative to the stage center with y pointing up. A
//! sprite's position is its center, so keeping the whole footprint on
//! stage means shrinking the allowed range by half the footprint per axis.

use glam::Vec2;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct StageBounds {
    pub width: f32,
    pub height: f32,
}

impl Default for StageBounds {
    fn default() -> Self {
        Self {
            width: 480.0,
            height: 360.0,
        }
    }
}

impl StageBounds {
    /// Clamp a sprite center so its footprint stays inside the stage.
    ///
    /// Idempotent. A footprint wider than the stage pins to the lower edge
    /// rather than panicking the way `f32::clamp` would.
    pub fn clamp_center(&self, center: Vec2, footprint: Vec2) -> Vec2 {
        let half_stage = Vec2::new(self.width, self.height) * 0.5;
        let half_sprite = footprint * 0.5;
        let max = half_stage - half_sprite;
        let min = -max;
        Vec2::new(
            center.x.min(max.x).max(min.x),
            center.y.min(max.y).max(min.y),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(format!(
                "Stage validation failed: stage size must be > 0 (got {}x{})",
                self.width, self.height
            ));
        }
        Ok(())
    }
}
