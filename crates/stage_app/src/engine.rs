//! Per-sprite execution engine.
//!
//! Each sprite owns one engine. A run interprets the sprite's script as a
//! cooperative tokio task; every suspension is an explicit timed sleep and
//! cancellation is checked at block boundaries (and before every repeat
//! iteration), never mid-sleep. A continuation that wakes after being
//! superseded sees its token cancelled and returns without touching state.
//!
//! Lock order is `active` then `state`. Neither guard is held across an await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::{IVec2, Vec2};
use parking_lot::Mutex;
use stage_core::block::{Block, BlockKind};
use stage_core::script::Script;
use stage_core::sprite::{SpriteId, SpriteKind};
use stage_core::timing::Timing;
use tokio::task::JoinHandle;

use crate::bounds::StageBounds;
use crate::events::{BubbleStyle, EventSink, SpeechBubble, StageEvent};

/// Cooperative cancellation flag for a single run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// True when both tokens belong to the same run.
    pub fn same_run(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Cancelled before the last block finished. Not an error.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub position: Vec2,
    pub rotation: f32,
    pub running: bool,
    pub message: Option<SpeechBubble>,
}

struct EngineShared {
    sprite: SpriteId,
    kind: SpriteKind,
    bounds: StageBounds,
    timing: Timing,
    events: EventSink,
    active: Mutex<Option<CancelToken>>,
    state: Mutex<ExecutionState>,
}

/// Cheap, cloneable handle to one sprite's engine.
#[derive(Clone)]
pub struct SpriteEngine {
    shared: Arc<EngineShared>,
}

impl SpriteEngine {
    pub fn new(
        sprite: SpriteId,
        kind: SpriteKind,
        bounds: StageBounds,
        timing: Timing,
        events: EventSink,
    ) -> Self {
        let engine = Self {
            shared: Arc::new(EngineShared {
                sprite,
                kind,
                bounds,
                timing,
                events,
                active: Mutex::new(None),
                state: Mutex::new(ExecutionState {
                    position: kind.start_position(),
                    rotation: 0.0,
                    running: false,
                    message: None,
                }),
            }),
        };
        engine.apply(|_| {});
        engine
    }

    pub fn kind(&self) -> SpriteKind {
        self.shared.kind
    }

    pub fn snapshot(&self) -> ExecutionState {
        self.shared.state.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Rendered center rounded to whole stage units, as the tracker reads it.
    pub fn rendered_center(&self) -> IVec2 {
        self.shared.state.lock().position.round().as_ivec2()
    }

    /// Start `script` from the current position, superseding any in-flight run.
    ///
    /// The previous run is cancelled and a fresh token installed under one
    /// lock, so two live runs never coexist. Interpretation begins after the
    /// run settle delay.
    pub fn run(&self, script: Script) -> JoinHandle<RunOutcome> {
        let token = self.supersede();
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(engine.shared.timing.run_settle()).await;
            let outcome = if token.is_cancelled() {
                RunOutcome::Stopped
            } else {
                engine.execute(&script, &token).await
            };
            engine.finish(&token, outcome);
            outcome
        })
    }

    /// Signal cancellation of the in-flight run, if any. Does not wait for it.
    pub fn cancel(&self) -> bool {
        let previous = self.shared.active.lock().take();
        self.shared.state.lock().running = false;
        match previous {
            Some(token) => {
                token.cancel();
                log::debug!("Sprite {}: run cancelled", self.shared.sprite);
                true
            }
            None => false,
        }
    }

    /// Cancel, clear the bubble and return to the kind's start position.
    pub fn reset(&self) {
        self.cancel();
        self.show_message(None);
        let start = self.shared.kind.start_position();
        self.apply(|state| {
            state.position = start;
            state.rotation = 0.0;
        });
        log::info!(
            "Sprite {} ({}) reset to ({}, {})",
            self.shared.sprite,
            self.shared.kind,
            start.x,
            start.y
        );
    }

    /// Cancel, clear the bubble and place the sprite at `position` with no rotation.
    pub fn set_position(&self, position: Vec2) {
        self.cancel();
        self.show_message(None);
        self.apply(|state| {
            state.position = position;
            state.rotation = 0.0;
        });
    }

    fn supersede(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut active = self.shared.active.lock();
        if let Some(previous) = active.replace(token.clone()) {
            previous.cancel();
            log::debug!("Sprite {}: superseding in-flight run", self.shared.sprite);
        }
        self.shared.state.lock().running = true;
        drop(active);
        self.show_message(None);
        token
    }

    fn finish(&self, token: &CancelToken, outcome: RunOutcome) {
        let mut active = self.shared.active.lock();
        let is_current = active.as_ref().is_some_and(|t| t.same_run(token));
        if is_current {
            *active = None;
            self.shared.state.lock().running = false;
        }
        let state = self.snapshot();
        log::info!(
            "Sprite {}: run {:?} at ({}, {}), rotation {}",
            self.shared.sprite,
            outcome,
            state.position.x,
            state.position.y,
            state.rotation
        );
    }

    async fn execute(&self, script: &Script, token: &CancelToken) -> RunOutcome {
        let blocks = script.blocks();
        if blocks.is_empty() {
            log::debug!("Sprite {}: empty script", self.shared.sprite);
            return RunOutcome::Completed;
        }
        let plan = script.elision_plan();
        let step = self.shared.timing.step();

        for (index, block) in blocks.iter().enumerate() {
            if token.is_cancelled() {
                log::debug!("Sprite {}: stopped before block {}", self.shared.sprite, index);
                return RunOutcome::Stopped;
            }
            if plan.is_elided(index) {
                log::trace!("Sprite {}: block {} runs inside a repeat", self.shared.sprite, index);
                continue;
            }

            match &block.kind {
                BlockKind::Move => {
                    self.translate(block.number(0));
                    tokio::time::sleep(step).await;
                }
                BlockKind::Turn => {
                    let angle = block.number(0);
                    self.apply(|state| state.rotation += angle);
                    tokio::time::sleep(step).await;
                }
                BlockKind::Goto => {
                    let target = Vec2::new(block.number(0), block.number(1));
                    self.apply(|state| state.position = target);
                }
                BlockKind::Say | BlockKind::Think => {
                    let style = if block.kind == BlockKind::Say {
                        BubbleStyle::Say
                    } else {
                        BubbleStyle::Think
                    };
                    self.show_message(Some(SpeechBubble {
                        style,
                        text: block.text(0),
                    }));
                    tokio::time::sleep(Timing::message(block.number(1))).await;
                    if !token.is_cancelled() {
                        self.show_message(None);
                    }
                }
                BlockKind::Repeat => {
                    let source = plan.repeat_source(index).and_then(|i| blocks.get(i));
                    let outcome = self.replay_move(source, block.repeat_count(), token).await;
                    if outcome == RunOutcome::Stopped {
                        return outcome;
                    }
                }
                BlockKind::Unknown(name) => {
                    log::warn!(
                        "Sprite {}: skipping unknown block type '{}' at index {}",
                        self.shared.sprite,
                        name,
                        index
                    );
                }
            }
        }
        RunOutcome::Completed
    }

    async fn replay_move(
        &self,
        source: Option<&Block>,
        times: u32,
        token: &CancelToken,
    ) -> RunOutcome {
        let Some(source) = source else {
            log::debug!("Sprite {}: repeat has no move to replay", self.shared.sprite);
            return RunOutcome::Completed;
        };
        let dx = source.number(0);
        for iteration in 0..times {
            if token.is_cancelled() {
                log::debug!(
                    "Sprite {}: repeat stopped at iteration {}/{}",
                    self.shared.sprite,
                    iteration + 1,
                    times
                );
                return RunOutcome::Stopped;
            }
            self.translate(dx);
            tokio::time::sleep(self.shared.timing.step()).await;
        }
        RunOutcome::Completed
    }

    fn translate(&self, dx: f32) {
        self.apply(|state| state.position.x += dx);
    }

    /// Mutate state, clamp to the stage, and publish the resulting transform.
    fn apply(&self, mutate: impl FnOnce(&mut ExecutionState)) {
        let (position, rotation) = {
            let mut state = self.shared.state.lock();
            mutate(&mut state);
            state.position = self
                .shared
                .bounds
                .clamp_center(state.position, self.shared.kind.footprint());
            (state.position, state.rotation)
        };
        self.shared.events.emit(StageEvent::Transform {
            sprite: self.shared.sprite,
            position,
            rotation,
        });
    }

    fn show_message(&self, bubble: Option<SpeechBubble>) {
        let changed = {
            let mut state = self.shared.state.lock();
            let changed = state.message != bubble;
            state.message = bubble.clone();
            changed
        };
        if changed {
            self.shared.events.emit(StageEvent::Message {
                sprite: self.shared.sprite,
                bubble,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn engine(kind: SpriteKind) -> SpriteEngine {
        SpriteEngine::new(
            SpriteId(1),
            kind,
            StageBounds::default(),
            Timing::default(),
            EventSink::disabled(),
        )
    }

    fn script(blocks: Vec<Block>) -> Script {
        Script::from(blocks)
    }

    #[tokio::test(start_paused = true)]
    async fn moves_accumulate_into_x() {
        let cat = engine(SpriteKind::Cat);
        let outcome = cat
            .run(script(vec![
                Block::move_by(10.0),
                Block::move_by(20.0),
                Block::move_by(-5.0),
            ]))
            .await
            .expect("run task");

        assert_eq!(outcome, RunOutcome::Completed);
        let state = cat.snapshot();
        assert_eq!(state.position, Vec2::new(25.0, 0.0));
        assert!(!state.running);
    }

    #[tokio::test(start_paused = true)]
    async fn run_continues_from_current_position() {
        let ball = engine(SpriteKind::Ball);
        ball.run(script(vec![Block::move_by(-30.0)])).await.expect("run task");
        ball.run(script(vec![Block::move_by(-30.0)])).await.expect("run task");
        assert_eq!(ball.snapshot().position, Vec2::new(40.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_replaces_the_move_it_replays() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![Block::move_by(10.0), Block::repeat(3.0)]))
            .await
            .expect("run task");
        assert_eq!(cat.snapshot().position.x, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_without_move_is_a_no_op() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![Block::repeat(4.0), Block::turn_by(90.0)]))
            .await
            .expect("run task");
        let state = cat.snapshot();
        assert_eq!(state.position, Vec2::ZERO);
        assert_eq!(state.rotation, 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_repeats_replay_the_same_move() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![
            Block::move_by(5.0),
            Block::repeat(2.0),
            Block::repeat(3.0),
        ]))
        .await
        .expect("run task");
        assert_eq!(cat.snapshot().position.x, 25.0);
    }

    #[tokio::test(start_paused = true)]
    async fn turn_is_not_normalized() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![Block::turn_by(270.0), Block::turn_by(180.0)]))
            .await
            .expect("run task");
        assert_eq!(cat.snapshot().rotation, 450.0);
    }

    #[tokio::test(start_paused = true)]
    async fn goto_is_absolute_and_clamped() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![Block::goto(50.0, -20.0)])).await.expect("run task");
        assert_eq!(cat.snapshot().position, Vec2::new(50.0, -20.0));

        cat.run(script(vec![Block::goto(1000.0, 0.0)])).await.expect("run task");
        assert_eq!(cat.snapshot().position, Vec2::new(192.5, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_block_is_skipped() {
        let cat = engine(SpriteKind::Cat);
        let spin = Block::new(BlockKind::Unknown("spin".into()), Vec::new());
        let outcome = cat
            .run(script(vec![spin, Block::move_by(10.0)]))
            .await
            .expect("run task");
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(cat.snapshot().position.x, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_two_blocks_keeps_exactly_their_effects() {
        let cat = engine(SpriteKind::Cat);
        // settle 50 -> move@50, turn@350, move@650, move@950
        let handle = cat.run(script(vec![
            Block::move_by(10.0),
            Block::turn_by(45.0),
            Block::move_by(10.0),
            Block::move_by(10.0),
        ]));
        sleep(Duration::from_millis(500)).await;
        assert!(cat.cancel());

        assert_eq!(handle.await.expect("run task"), RunOutcome::Stopped);
        let state = cat.snapshot();
        assert_eq!(state.position, Vec2::new(10.0, 0.0));
        assert_eq!(state.rotation, 45.0);
        assert!(!state.running);

        sleep(Duration::from_millis(2000)).await;
        assert_eq!(cat.snapshot().position, Vec2::new(10.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_inside_repeat_stops_before_next_iteration() {
        let cat = engine(SpriteKind::Cat);
        // settle 50 -> iterations at 50, 350, 650, ...
        let handle = cat.run(script(vec![Block::move_by(4.0), Block::repeat(10.0)]));
        sleep(Duration::from_millis(500)).await;
        cat.cancel();
        assert_eq!(handle.await.expect("run task"), RunOutcome::Stopped);
        assert_eq!(cat.snapshot().position.x, 8.0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_run_supersedes_the_old_one() {
        let cat = engine(SpriteKind::Cat);
        let first = cat.run(script(vec![
            Block::move_by(10.0),
            Block::move_by(10.0),
            Block::move_by(10.0),
        ]));
        // first run: moves at 50 and 350, third would be at 650
        sleep(Duration::from_millis(400)).await;
        let second = cat.run(script(vec![Block::turn_by(90.0)]));

        assert_eq!(second.await.expect("run task"), RunOutcome::Completed);
        assert_eq!(first.await.expect("run task"), RunOutcome::Stopped);

        sleep(Duration::from_millis(1000)).await;
        let state = cat.snapshot();
        assert_eq!(state.position.x, 20.0);
        assert_eq!(state.rotation, 90.0);
        assert!(!state.running);
    }

    #[tokio::test(start_paused = true)]
    async fn say_shows_then_clears_message() {
        let cat = engine(SpriteKind::Cat);
        let handle = cat.run(script(vec![Block::say("hi", 1.0)]));
        sleep(Duration::from_millis(500)).await;
        assert_eq!(
            cat.snapshot().message,
            Some(SpeechBubble {
                style: BubbleStyle::Say,
                text: "hi".into()
            })
        );
        handle.await.expect("run task");
        assert_eq!(cat.snapshot().message, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_think_leaves_bubble_up() {
        let cat = engine(SpriteKind::Cat);
        let handle = cat.run(script(vec![Block::think("hmm", 2.0), Block::move_by(10.0)]));
        sleep(Duration::from_millis(500)).await;
        cat.cancel();
        assert_eq!(handle.await.expect("run task"), RunOutcome::Stopped);

        let state = cat.snapshot();
        assert_eq!(state.message.map(|b| b.style), Some(BubbleStyle::Think));
        assert_eq!(state.position.x, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_butterfly_to_start() {
        let butterfly = engine(SpriteKind::Butterfly);
        let handle = butterfly.run(script(vec![
            Block::move_by(40.0),
            Block::turn_by(30.0),
            Block::move_by(40.0),
        ]));
        sleep(Duration::from_millis(500)).await;
        butterfly.reset();

        let state = butterfly.snapshot();
        assert_eq!(state.position, Vec2::new(-100.0, -50.0));
        assert_eq!(state.rotation, 0.0);
        assert!(!state.running);
        assert_eq!(handle.await.expect("run task"), RunOutcome::Stopped);
        assert_eq!(butterfly.snapshot().position, Vec2::new(-100.0, -50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn set_position_overrides_rotation_and_message() {
        let cat = engine(SpriteKind::Cat);
        cat.run(script(vec![Block::turn_by(30.0)])).await.expect("run task");
        cat.set_position(Vec2::new(-60.0, 70.0));
        let state = cat.snapshot();
        assert_eq!(state.position, Vec2::new(-60.0, 70.0));
        assert_eq!(state.rotation, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn transforms_are_published() {
        let (events, mut rx) = EventSink::channel();
        let cat = SpriteEngine::new(
            SpriteId(7),
            SpriteKind::Cat,
            StageBounds::default(),
            Timing::default(),
            events,
        );
        cat.run(script(vec![Block::move_by(15.0)])).await.expect("run task");

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let StageEvent::Transform { .. } = event {
                last = Some(event);
            }
        }
        assert_eq!(
            last,
            Some(StageEvent::Transform {
                sprite: SpriteId(7),
                position: Vec2::new(15.0, 0.0),
                rotation: 0.0,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rendered_center_rounds() {
        let cat = engine(SpriteKind::Cat);
        cat.set_position(Vec2::new(10.4, -3.6));
        assert_eq!(cat.rendered_center(), IVec2::new(10, -4));
    }
}
