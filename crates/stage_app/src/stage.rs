//! Stage controller: roster, display toggles, authoring target and the
//! engine registry.
//!
//! Engines are addressed through handles registered here rather than held by
//! their callers, so the swap coordinator and global play never need to know
//! how an engine was built. The roster is the only place scripts live; a run
//! receives a copy of the script at the moment it starts.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec2;
use parking_lot::Mutex;
use stage_core::block::{parse_block_payload, Block};
use stage_core::script::Script;
use stage_core::sprite::{Sprite, SpriteId};
use stage_core::timing::Timing;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::{RunOutcome, SpriteEngine};

struct Roster {
    sprites: Vec<Sprite>,
    authoring: Option<SpriteId>,
}

impl Roster {
    fn find_mut(&mut self, id: SpriteId) -> Option<&mut Sprite> {
        self.sprites.iter_mut().find(|s| s.id == id)
    }

    fn first_displayed(&self) -> Option<SpriteId> {
        self.sprites.iter().find(|s| s.displayed).map(|s| s.id)
    }
}

struct StageShared {
    roster: Mutex<Roster>,
    engines: Mutex<BTreeMap<SpriteId, SpriteEngine>>,
    timing: Timing,
    /// Wakes the position tracker when the displayed set changes.
    tracker_wake: Arc<Notify>,
}

#[derive(Clone)]
pub struct Stage {
    shared: Arc<StageShared>,
}

impl Stage {
    pub fn new(sprites: Vec<Sprite>, timing: Timing, tracker_wake: Arc<Notify>) -> Self {
        let mut roster = Roster {
            sprites,
            authoring: None,
        };
        roster.authoring = roster.first_displayed();
        Self {
            shared: Arc::new(StageShared {
                roster: Mutex::new(roster),
                engines: Mutex::new(BTreeMap::new()),
                timing,
                tracker_wake,
            }),
        }
    }

    // --- Engine registry ---------------------------------------------------------

    pub fn register_engine(&self, id: SpriteId, engine: SpriteEngine) {
        if !self.contains(id) {
            log::warn!("Registering engine for sprite {id}, which is not on the roster");
        }
        if let Some(previous) = self.shared.engines.lock().insert(id, engine) {
            previous.cancel();
            log::debug!("Replaced engine handle for sprite {id}");
        }
    }

    pub fn deregister_engine(&self, id: SpriteId) -> Option<SpriteEngine> {
        let engine = self.shared.engines.lock().remove(&id)?;
        engine.cancel();
        Some(engine)
    }

    pub fn engine(&self, id: SpriteId) -> Option<SpriteEngine> {
        self.shared.engines.lock().get(&id).cloned()
    }

    // --- Roster queries ----------------------------------------------------------

    pub fn sprites(&self) -> Vec<Sprite> {
        self.shared.roster.lock().sprites.clone()
    }

    pub fn sprite(&self, id: SpriteId) -> Option<Sprite> {
        let roster = self.shared.roster.lock();
        roster.sprites.iter().find(|s| s.id == id).cloned()
    }

    pub fn contains(&self, id: SpriteId) -> bool {
        self.shared.roster.lock().sprites.iter().any(|s| s.id == id)
    }

    /// Displayed sprite ids in roster order.
    pub fn displayed_ids(&self) -> Vec<SpriteId> {
        let roster = self.shared.roster.lock();
        roster
            .sprites
            .iter()
            .filter(|s| s.displayed)
            .map(|s| s.id)
            .collect()
    }

    pub fn script(&self, id: SpriteId) -> Option<Script> {
        self.sprite(id).map(|s| s.script)
    }

    // --- Display and authoring target -------------------------------------------

    pub fn authoring_target(&self) -> Option<SpriteId> {
        self.shared.roster.lock().authoring
    }

    /// Point authoring at `id`. Only displayed sprites can be targeted.
    pub fn select_for_authoring(&self, id: SpriteId) -> bool {
        let mut roster = self.shared.roster.lock();
        let displayed = roster.sprites.iter().any(|s| s.id == id && s.displayed);
        if displayed {
            roster.authoring = Some(id);
        } else {
            log::warn!("Sprite {id} is not displayed; authoring target unchanged");
        }
        displayed
    }

    /// Flip the display flag. Returns the new flag, or `None` for an unknown id.
    ///
    /// Hiding the authoring target moves authoring to the first displayed
    /// sprite in roster order, or to nothing when none remain.
    pub fn toggle_display(&self, id: SpriteId) -> Option<bool> {
        let now_displayed = {
            let mut roster = self.shared.roster.lock();
            let sprite = roster.find_mut(id)?;
            sprite.displayed = !sprite.displayed;
            let now_displayed = sprite.displayed;

            if !now_displayed && roster.authoring == Some(id) {
                roster.authoring = roster.first_displayed();
                log::info!(
                    "Authoring target moved from sprite {id} to {:?}",
                    roster.authoring
                );
            } else if now_displayed && roster.authoring.is_none() {
                roster.authoring = Some(id);
            }
            now_displayed
        };

        if !now_displayed {
            if let Some(engine) = self.engine(id) {
                engine.cancel();
            }
        }
        self.shared.tracker_wake.notify_one();
        Some(now_displayed)
    }

    // --- Global commands ---------------------------------------------------------

    /// Run every displayed sprite's current script, staggered by roster position.
    pub fn global_play(&self) -> Vec<JoinHandle<Option<RunOutcome>>> {
        let displayed = self.displayed_ids();
        log::info!("Global play for {} sprite(s)", displayed.len());
        displayed
            .into_iter()
            .enumerate()
            .map(|(index, id)| {
                let stage = self.clone();
                let delay = self.shared.timing.play_stagger(index);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let handle = stage.run_sprite(id)?;
                    handle.await.ok()
                })
            })
            .collect()
    }

    /// Start `id`'s engine on the sprite's current script.
    pub fn run_sprite(&self, id: SpriteId) -> Option<JoinHandle<RunOutcome>> {
        let Some(engine) = self.engine(id) else {
            log::warn!("No engine registered for sprite {id}; skipping run");
            return None;
        };
        let script = self.script(id)?;
        Some(engine.run(script))
    }

    pub fn reset_all(&self) {
        for id in self.displayed_ids() {
            match self.engine(id) {
                Some(engine) => engine.reset(),
                None => log::warn!("No engine registered for sprite {id}; skipping reset"),
            }
        }
    }

    pub fn set_position(&self, id: SpriteId, position: Vec2) -> bool {
        match self.engine(id) {
            Some(engine) => {
                engine.set_position(position);
                true
            }
            None => {
                log::warn!("No engine registered for sprite {id}; position not set");
                false
            }
        }
    }

    // --- Authoring ---------------------------------------------------------------

    pub fn replace_script(&self, id: SpriteId, script: Script) -> bool {
        self.edit_script(id, |current| {
            *current = script;
            Ok(())
        })
        .is_ok()
    }

    pub fn append_block(&self, id: SpriteId, block: Block) -> bool {
        self.edit_script(id, |script| {
            script.push(block);
            Ok(())
        })
        .is_ok()
    }

    /// Append a block dropped as a raw payload. A payload that fails to parse
    /// is discarded and the script is left untouched.
    pub fn drop_block_payload(&self, id: SpriteId, raw: &str) -> Result<(), String> {
        let block = parse_block_payload(raw)?;
        self.edit_script(id, |script| {
            script.push(block);
            Ok(())
        })
    }

    pub fn edit_block_argument(
        &self,
        id: SpriteId,
        block_index: usize,
        arg_index: usize,
        value: &str,
    ) -> Result<(), String> {
        self.edit_script(id, |script| {
            let block = script
                .get_mut(block_index)
                .ok_or_else(|| format!("Sprite {id} has no block at index {block_index}"))?;
            block.set_argument(arg_index, value)
        })
    }

    pub fn remove_block(&self, id: SpriteId, block_index: usize) -> Option<Block> {
        let mut removed = None;
        self.edit_script(id, |script| {
            removed = script.remove(block_index);
            Ok(())
        })
        .ok()?;
        removed
    }

    /// Exchange two sprites' scripts in one critical section.
    ///
    /// Returns both display names, or `None` (and changes nothing) when either
    /// id is unknown or the ids are equal.
    pub fn exchange_scripts(&self, a: SpriteId, b: SpriteId) -> Option<(String, String)> {
        if a == b {
            return None;
        }
        let mut roster = self.shared.roster.lock();
        let index_a = roster.sprites.iter().position(|s| s.id == a)?;
        let index_b = roster.sprites.iter().position(|s| s.id == b)?;

        let script_a = std::mem::take(&mut roster.sprites[index_a].script);
        let script_b = std::mem::replace(&mut roster.sprites[index_b].script, script_a);
        roster.sprites[index_a].script = script_b;

        Some((
            roster.sprites[index_a].name.clone(),
            roster.sprites[index_b].name.clone(),
        ))
    }

    fn edit_script(
        &self,
        id: SpriteId,
        edit: impl FnOnce(&mut Script) -> Result<(), String>,
    ) -> Result<(), String> {
        let mut roster = self.shared.roster.lock();
        let sprite = roster
            .find_mut(id)
            .ok_or_else(|| format!("Unknown sprite {id}"))?;
        // Edits apply to a copy so a failed edit leaves the script as it was.
        let mut draft = sprite.script.clone();
        edit(&mut draft)?;
        sprite.script = draft;
        Ok(())
    }
}
