//! Position tracker: periodic sampling of displayed sprite centers.

use std::sync::Arc;

use parking_lot::Mutex;
use stage_core::timing::Timing;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::collision::{CollisionDetector, CoordinateSnapshot};
use crate::stage::Stage;

pub struct PositionTracker {
    stage: Stage,
    detector: Arc<CollisionDetector>,
    wake: Arc<Notify>,
    timing: Timing,
    latest: Mutex<CoordinateSnapshot>,
}

impl PositionTracker {
    pub fn new(
        stage: Stage,
        detector: Arc<CollisionDetector>,
        wake: Arc<Notify>,
        timing: Timing,
    ) -> Self {
        Self {
            stage,
            detector,
            wake,
            timing,
            latest: Mutex::new(CoordinateSnapshot::new()),
        }
    }

    /// Rounded centers of every displayed sprite that has an engine.
    pub fn sample(&self) -> CoordinateSnapshot {
        self.stage
            .displayed_ids()
            .into_iter()
            .filter_map(|id| {
                let engine = self.stage.engine(id)?;
                Some((id, engine.rendered_center()))
            })
            .collect()
    }

    /// One tracker read: sample, remember, and evaluate when a pair exists.
    pub fn poll_once(&self) {
        let snapshot = self.sample();
        if snapshot.len() >= 2 {
            self.detector.evaluate(&snapshot);
        }
        *self.latest.lock() = snapshot;
    }

    /// Coordinates from the most recent read, for the coordinate readout.
    pub fn latest_snapshot(&self) -> CoordinateSnapshot {
        self.latest.lock().clone()
    }

    /// Poll on the fixed interval and whenever the tracker is woken. Never returns.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.timing.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Position tracker polling every {} ms",
            self.timing.poll_interval().as_millis()
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {
                    log::trace!("Position tracker woken early");
                }
            }
            self.poll_once();
        }
    }
}
