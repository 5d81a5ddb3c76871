//! Collision detection over tracked sprite centers.
//!
//! A collision is two displayed sprites whose rounded centers differ by at
//! most the tolerance on both axes. There is no geometry beyond that: the
//! tracker already reduced every sprite to a point.
//!
//! Every fresh detection puts the pair into a cooldown map for a fixed
//! duration. While a pair is cooling down it produces no side effects at
//! all, neither the colliding highlight nor a swap. When the entry expires
//! the tracker is woken so a pair that is still overlapping is picked up on
//! the next read instead of the next tick.
//!
//! The colliding highlight follows the last pair evaluated in scan order,
//! not the union of all overlapping pairs. A later non-colliding pair clears
//! a highlight set by an earlier one in the same scan.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::IVec2;
use parking_lot::Mutex;
use serde::Deserialize;
use stage_core::sprite::SpriteId;
use stage_core::timing::Timing;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::events::{EventSink, StageEvent};
use crate::swap::SwapCoordinator;

pub const DEFAULT_TOLERANCE: i32 = 20;

/// Tracked centers keyed by sprite id. Iteration order is ascending id.
pub type CoordinateSnapshot = BTreeMap<SpriteId, IVec2>;

/// Unordered sprite pair. `(a, b)` and `(b, a)` build the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpritePair {
    pub low: SpriteId,
    pub high: SpriteId,
}

impl SpritePair {
    pub fn new(a: SpriteId, b: SpriteId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }
}

/// Two independent switches; either one enables swapping.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct SwapToggles {
    pub hero_mode: bool,
    pub collision_swap: bool,
}

impl SwapToggles {
    pub fn swap_enabled(self) -> bool {
        self.hero_mode || self.collision_swap
    }
}

pub struct CollisionDetector {
    tolerance: i32,
    timing: Timing,
    toggles: Mutex<SwapToggles>,
    /// pair -> instant its cooldown ends
    cooldowns: Arc<Mutex<HashMap<SpritePair, Instant>>>,
    colliding: Mutex<Vec<SpriteId>>,
    coordinator: SwapCoordinator,
    events: EventSink,
    tracker_wake: Arc<Notify>,
}

impl CollisionDetector {
    pub fn new(
        tolerance: i32,
        timing: Timing,
        toggles: SwapToggles,
        coordinator: SwapCoordinator,
        events: EventSink,
        tracker_wake: Arc<Notify>,
    ) -> Self {
        Self {
            tolerance,
            timing,
            toggles: Mutex::new(toggles),
            cooldowns: Arc::new(Mutex::new(HashMap::new())),
            colliding: Mutex::new(Vec::new()),
            coordinator,
            events,
            tracker_wake,
        }
    }

    pub fn toggles(&self) -> SwapToggles {
        *self.toggles.lock()
    }

    pub fn set_hero_mode(&self, enabled: bool) {
        self.toggles.lock().hero_mode = enabled;
        log::info!("Hero mode {}", if enabled { "on" } else { "off" });
    }

    pub fn set_collision_swap(&self, enabled: bool) {
        self.toggles.lock().collision_swap = enabled;
        log::info!("Collision swap {}", if enabled { "on" } else { "off" });
    }

    pub fn in_cooldown(&self, a: SpriteId, b: SpriteId) -> bool {
        self.cooldowns.lock().contains_key(&SpritePair::new(a, b))
    }

    pub fn colliding(&self) -> Vec<SpriteId> {
        self.colliding.lock().clone()
    }

    /// Evaluate every pair in the snapshot, lowest ids first.
    ///
    /// Returns the pairs newly detected on this pass (those that entered
    /// cooldown), whether or not swapping was enabled for them.
    pub fn evaluate(&self, snapshot: &CoordinateSnapshot) -> Vec<SpritePair> {
        let entries: Vec<(SpriteId, IVec2)> = snapshot.iter().map(|(&id, &p)| (id, p)).collect();
        let mut detected = Vec::new();
        let tolerance = self.tolerance.max(0).unsigned_abs();

        for (i, &(id_a, pos_a)) in entries.iter().enumerate() {
            for &(id_b, pos_b) in &entries[i + 1..] {
                if pos_a.x.abs_diff(pos_b.x) > tolerance || pos_a.y.abs_diff(pos_b.y) > tolerance {
                    self.set_colliding(Vec::new());
                    continue;
                }

                let pair = SpritePair::new(id_a, id_b);
                if self.in_cooldown(id_a, id_b) {
                    log::trace!("Sprites {id_a} and {id_b} overlap but are cooling down");
                    continue;
                }

                log::info!(
                    "Collision between sprite {id_a} at ({}, {}) and sprite {id_b} at ({}, {})",
                    pos_a.x,
                    pos_a.y,
                    pos_b.x,
                    pos_b.y
                );
                self.set_colliding(vec![id_a, id_b]);
                self.start_cooldown(pair);
                detected.push(pair);

                if self.toggles().swap_enabled() {
                    self.coordinator.swap(id_a, id_b);
                } else {
                    log::debug!("Swapping disabled; collision only highlighted");
                }
            }
        }
        detected
    }

    fn start_cooldown(&self, pair: SpritePair) {
        let until = Instant::now() + self.timing.cooldown();
        self.cooldowns.lock().insert(pair, until);

        let cooldowns = self.cooldowns.clone();
        let wake = self.tracker_wake.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(until).await;
            let mut map = cooldowns.lock();
            if map.get(&pair) == Some(&until) {
                map.remove(&pair);
                drop(map);
                log::debug!("Cooldown expired for sprites {} and {}", pair.low, pair.high);
                wake.notify_one();
            }
        });
    }

    fn set_colliding(&self, ids: Vec<SpriteId>) {
        let mut colliding = self.colliding.lock();
        if *colliding != ids {
            *colliding = ids.clone();
            drop(colliding);
            self.events.emit(StageEvent::Colliding(ids));
        }
    }
}
