//! Animation swap: two colliding sprites trade scripts and start over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stage_core::sprite::SpriteId;
use stage_core::timing::Timing;
use tokio::task::JoinHandle;

use crate::events::{EventSink, StageEvent};
use crate::stage::Stage;

#[derive(Clone)]
pub struct SwapCoordinator {
    stage: Stage,
    timing: Timing,
    events: EventSink,
    /// Bumped per notice so an older clear timer cannot hide a newer notice.
    notice_generation: Arc<AtomicU64>,
}

impl SwapCoordinator {
    pub fn new(stage: Stage, timing: Timing, events: EventSink) -> Self {
        Self {
            stage,
            timing,
            events,
            notice_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Exchange the scripts of `a` and `b` and restart both engines.
    ///
    /// Both runs are cancelled without waiting, the scripts trade places in a
    /// single roster update, and after the swap settle delay each engine
    /// starts its new script from wherever the sprite currently is. No
    /// idempotence check: callers gate repeated swaps with the collision
    /// cooldown. Returns the restart task, or `None` when either id is unknown.
    pub fn swap(&self, a: SpriteId, b: SpriteId) -> Option<JoinHandle<()>> {
        if a == b || !self.stage.contains(a) || !self.stage.contains(b) {
            log::warn!("Swap requested for unknown sprite pair ({a}, {b}); ignoring");
            return None;
        }

        for id in [a, b] {
            if let Some(engine) = self.stage.engine(id) {
                engine.cancel();
            }
        }

        let (name_a, name_b) = self.stage.exchange_scripts(a, b)?;
        log::info!("Swapped scripts between {name_a} ({a}) and {name_b} ({b})");
        self.announce(format!("Animations swapped: {name_a} <-> {name_b}"));

        let stage = self.stage.clone();
        let settle = self.timing.swap_settle();
        Some(tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            for id in [a, b] {
                if stage.run_sprite(id).is_none() {
                    log::warn!("Sprite {id} could not be restarted after swap");
                }
            }
        }))
    }

    fn announce(&self, text: String) {
        let generation = self.notice_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let duration = self.timing.notice();
        self.events.emit(StageEvent::Notice { text, duration });

        let events = self.events.clone();
        let current = self.notice_generation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if current.load(Ordering::SeqCst) == generation {
                events.emit(StageEvent::NoticeCleared);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::StageBounds;
    use crate::engine::{RunOutcome, SpriteEngine};
    use glam::Vec2;
    use stage_core::block::Block;
    use stage_core::script::Script;
    use stage_core::sprite::{default_roster, Sprite};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn stage() -> Stage {
        let sprites: Vec<Sprite> = default_roster()
            .into_iter()
            .map(|s| Sprite {
                displayed: true,
                ..s
            })
            .collect();
        let stage = Stage::new(sprites.clone(), Timing::default(), Arc::new(Notify::new()));
        for sprite in sprites {
            stage.register_engine(
                sprite.id,
                SpriteEngine::new(
                    sprite.id,
                    sprite.kind,
                    StageBounds::default(),
                    Timing::default(),
                    EventSink::disabled(),
                ),
            );
        }
        stage
    }

    #[tokio::test(start_paused = true)]
    async fn swap_exchanges_scripts_and_restarts_from_current_position() {
        let stage = stage();
        stage.replace_script(SpriteId(1), Script::from(vec![Block::move_by(10.0)]));
        stage.replace_script(SpriteId(2), Script::from(vec![Block::turn_by(90.0)]));
        let coordinator = SwapCoordinator::new(stage.clone(), Timing::default(), EventSink::disabled());

        coordinator
            .swap(SpriteId(1), SpriteId(2))
            .expect("known pair")
            .await
            .expect("restart task");
        assert_eq!(
            stage.script(SpriteId(1)),
            Some(Script::from(vec![Block::turn_by(90.0)]))
        );
        assert_eq!(
            stage.script(SpriteId(2)),
            Some(Script::from(vec![Block::move_by(10.0)]))
        );

        // both restarted runs are done well within a second
        tokio::time::sleep(Duration::from_secs(1)).await;
        let cat = stage.engine(SpriteId(1)).expect("registered").snapshot();
        let butterfly = stage.engine(SpriteId(2)).expect("registered").snapshot();
        assert_eq!(cat.position, Vec2::ZERO);
        assert_eq!(cat.rotation, 90.0);
        assert_eq!(butterfly.position, Vec2::new(-90.0, -50.0));
        assert_eq!(butterfly.rotation, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_cancels_in_flight_runs() {
        let stage = stage();
        stage.replace_script(
            SpriteId(1),
            Script::from(vec![Block::move_by(10.0), Block::move_by(10.0), Block::move_by(10.0)]),
        );
        let running = stage.run_sprite(SpriteId(1)).expect("registered");
        tokio::time::sleep(Duration::from_millis(100)).await;

        let coordinator = SwapCoordinator::new(stage.clone(), Timing::default(), EventSink::disabled());
        coordinator.swap(SpriteId(1), SpriteId(3));
        assert_eq!(running.await.expect("run task"), RunOutcome::Stopped);
        assert_eq!(
            stage.engine(SpriteId(1)).expect("registered").snapshot().position.x,
            10.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn swap_with_unknown_sprite_is_a_no_op() {
        let stage = stage();
        stage.replace_script(SpriteId(1), Script::from(vec![Block::move_by(10.0)]));
        let coordinator = SwapCoordinator::new(stage.clone(), Timing::default(), EventSink::disabled());

        assert!(coordinator.swap(SpriteId(1), SpriteId(77)).is_none());
        assert_eq!(
            stage.script(SpriteId(1)),
            Some(Script::from(vec![Block::move_by(10.0)]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn swap_notice_names_both_sprites_and_clears() {
        let stage = stage();
        let (events, mut rx) = EventSink::channel();
        let coordinator = SwapCoordinator::new(stage, Timing::default(), events);
        coordinator.swap(SpriteId(2), SpriteId(3));

        match rx.recv().await {
            Some(StageEvent::Notice { text, duration }) => {
                assert!(text.contains("Butterfly"));
                assert!(text.contains("Ball"));
                assert_eq!(duration, Duration::from_millis(3000));
            }
            other => panic!("expected notice, got {other:?}"),
        }
        assert_eq!(rx.recv().await, Some(StageEvent::NoticeCleared));
    }
}
