//! Scripted sessions: a recorded list of authoring and playback actions.
//!
//! A session file stands in for the clicks, drags and edits a user would
//! make on the stage. Steps run strictly in order; `wait` is the only step
//! that lets time pass. A step that fails (unknown sprite, bad payload) is
//! logged and the session carries on.

use glam::Vec2;
use serde::Deserialize;
use stage_core::block::{Block, BlockArg, BlockKind};
use stage_core::sprite::SpriteId;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::collision::CollisionDetector;
use crate::engine::RunOutcome;
use crate::stage::Stage;
use crate::tracker::PositionTracker;

#[derive(Debug, Deserialize, Clone)]
pub struct Session {
    pub steps: Vec<SessionStep>,
}

/// One user action. Authoring steps without a `sprite` act on the current
/// authoring target.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionStep {
    Wait {
        ms: u64,
    },
    Play,
    Run {
        sprite: SpriteId,
    },
    ResetAll,
    Toggle {
        sprite: SpriteId,
    },
    Select {
        sprite: SpriteId,
    },
    SetPosition {
        sprite: SpriteId,
        x: f32,
        y: f32,
    },
    /// Palette drag: a block of `kind` with its default arguments unless
    /// `args` is given.
    Add {
        #[serde(default)]
        sprite: Option<SpriteId>,
        kind: BlockKind,
        #[serde(default)]
        args: Option<Vec<BlockArg>>,
    },
    /// Raw drop payload, parsed exactly as the drop target would.
    Drop {
        #[serde(default)]
        sprite: Option<SpriteId>,
        payload: String,
    },
    Edit {
        #[serde(default)]
        sprite: Option<SpriteId>,
        index: usize,
        arg: usize,
        value: String,
    },
    Remove {
        #[serde(default)]
        sprite: Option<SpriteId>,
        index: usize,
    },
    HeroMode {
        enabled: bool,
    },
    CollisionSwap {
        enabled: bool,
    },
    /// Log the tracker's latest coordinates.
    Readout,
}

impl SessionStep {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Wait { .. } => "wait",
            Self::Play => "play",
            Self::Run { .. } => "run",
            Self::ResetAll => "reset_all",
            Self::Toggle { .. } => "toggle",
            Self::Select { .. } => "select",
            Self::SetPosition { .. } => "set_position",
            Self::Add { .. } => "add",
            Self::Drop { .. } => "drop",
            Self::Edit { .. } => "edit",
            Self::Remove { .. } => "remove",
            Self::HeroMode { .. } => "hero_mode",
            Self::CollisionSwap { .. } => "collision_swap",
            Self::Readout => "readout",
        }
    }
}

pub fn load_session_from_path(path: &Path) -> Result<Session, String> {
    let raw =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let session: Session = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse session JSON {}: {e}", path.display()))?;
    validate_session(&session)?;
    Ok(session)
}

fn validate_session(session: &Session) -> Result<(), String> {
    if session.steps.is_empty() {
        return Err("Session validation failed: steps list is empty".to_string());
    }
    Ok(())
}

/// Applies session steps to a live stage.
pub struct SessionRunner {
    stage: Stage,
    detector: Arc<CollisionDetector>,
    tracker: Arc<PositionTracker>,
    runs: Vec<JoinHandle<Option<RunOutcome>>>,
}

impl SessionRunner {
    pub fn new(stage: Stage, detector: Arc<CollisionDetector>, tracker: Arc<PositionTracker>) -> Self {
        Self {
            stage,
            detector,
            tracker,
            runs: Vec::new(),
        }
    }

    /// Run every step in order. Returns the handles of runs started along the way.
    pub async fn run(mut self, session: &Session) -> Vec<JoinHandle<Option<RunOutcome>>> {
        log::info!("Session started: {} step(s)", session.steps.len());
        for (index, step) in session.steps.iter().enumerate() {
            if let SessionStep::Wait { ms } = step {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                continue;
            }
            if let Err(err) = self.apply(step) {
                log::warn!("Session step {index} ({}) failed: {err}", step.label());
            }
        }
        log::info!("Session finished");
        self.runs
    }

    /// Apply one non-waiting step immediately.
    pub fn apply(&mut self, step: &SessionStep) -> Result<(), String> {
        match step {
            SessionStep::Wait { .. } => {}
            SessionStep::Play => self.runs.extend(self.stage.global_play()),
            SessionStep::Run { sprite } => {
                let handle = self
                    .stage
                    .run_sprite(*sprite)
                    .ok_or_else(|| format!("sprite {sprite} cannot run"))?;
                self.runs.push(tokio::spawn(async move { handle.await.ok() }));
            }
            SessionStep::ResetAll => self.stage.reset_all(),
            SessionStep::Toggle { sprite } => {
                let displayed = self
                    .stage
                    .toggle_display(*sprite)
                    .ok_or_else(|| format!("unknown sprite {sprite}"))?;
                log::info!(
                    "Sprite {sprite} {}",
                    if displayed { "shown" } else { "hidden" }
                );
            }
            SessionStep::Select { sprite } => {
                if !self.stage.select_for_authoring(*sprite) {
                    return Err(format!("sprite {sprite} cannot be selected"));
                }
            }
            SessionStep::SetPosition { sprite, x, y } => {
                if !self.stage.set_position(*sprite, Vec2::new(*x, *y)) {
                    return Err(format!("sprite {sprite} has no engine"));
                }
            }
            SessionStep::Add { sprite, kind, args } => {
                let id = self.target(*sprite)?;
                let block = match args {
                    Some(args) => Block::new(kind.clone(), args.clone()),
                    None => Block::with_defaults(kind.clone()),
                };
                if !self.stage.append_block(id, block) {
                    return Err(format!("unknown sprite {id}"));
                }
            }
            SessionStep::Drop { sprite, payload } => {
                let id = self.target(*sprite)?;
                self.stage.drop_block_payload(id, payload)?;
            }
            SessionStep::Edit {
                sprite,
                index,
                arg,
                value,
            } => {
                let id = self.target(*sprite)?;
                self.stage.edit_block_argument(id, *index, *arg, value)?;
            }
            SessionStep::Remove { sprite, index } => {
                let id = self.target(*sprite)?;
                self.stage
                    .remove_block(id, *index)
                    .ok_or_else(|| format!("sprite {id} has no block at index {index}"))?;
            }
            SessionStep::HeroMode { enabled } => self.detector.set_hero_mode(*enabled),
            SessionStep::CollisionSwap { enabled } => self.detector.set_collision_swap(*enabled),
            SessionStep::Readout => {
                for (id, center) in self.tracker.latest_snapshot() {
                    log::info!("Sprite {id} at ({}, {})", center.x, center.y);
                }
            }
        }
        Ok(())
    }

    fn target(&self, sprite: Option<SpriteId>) -> Result<SpriteId, String> {
        sprite
            .or_else(|| self.stage.authoring_target())
            .ok_or_else(|| "no sprite is selected for authoring".to_string())
    }
}
