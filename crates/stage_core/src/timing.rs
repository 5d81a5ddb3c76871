//! Every fixed delay in the system.
//!
//! Durations are stored as whole milliseconds so a stage file can override
//! them, and converted to [`Duration`] at the point of use.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Pause after each move/turn (and each repeat iteration).
    pub step_ms: u64,
    /// Gap between superseding a run and starting the new one.
    pub run_settle_ms: u64,
    /// Gap between a script swap and restarting both engines.
    pub swap_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub cooldown_ms: u64,
    pub notice_ms: u64,
    /// Per-sprite offset when global play starts every displayed sprite.
    pub play_stagger_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            step_ms: 300,
            run_settle_ms: 50,
            swap_settle_ms: 300,
            poll_interval_ms: 100,
            cooldown_ms: 3000,
            notice_ms: 3000,
            play_stagger_ms: 100,
        }
    }
}

impl Timing {
    pub fn step(&self) -> Duration {
        Duration::from_millis(self.step_ms)
    }

    pub fn run_settle(&self) -> Duration {
        Duration::from_millis(self.run_settle_ms)
    }

    pub fn swap_settle(&self) -> Duration {
        Duration::from_millis(self.swap_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn notice(&self) -> Duration {
        Duration::from_millis(self.notice_ms)
    }

    pub fn play_stagger(&self, index: usize) -> Duration {
        Duration::from_millis(self.play_stagger_ms.saturating_mul(index as u64))
    }

    /// How long a say/think bubble stays up. Negative or non-finite seconds show nothing.
    pub fn message(seconds: f32) -> Duration {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_millis((seconds * 1000.0) as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("Timing validation failed: poll_interval_ms must be > 0".to_string());
        }
        if self.cooldown_ms == 0 {
            log::warn!("Collision cooldown is 0 ms; overlapping sprites will retrigger every poll.");
        }
        Ok(())
    }
}
