use serde::Deserialize;
use stage_core::script::{load_script_from_path, Script};
use stage_core::sprite::{default_roster, Sprite, SpriteId, SpriteKind};
use stage_core::timing::Timing;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::bounds::StageBounds;
use crate::collision::{SwapToggles, DEFAULT_TOLERANCE};
use crate::stage::Stage;

pub const STAGE_FILE_VERSION: &str = "0.1";

#[derive(Debug, Deserialize, Clone)]
pub struct StageFile {
    pub version: String,
    #[serde(default)]
    pub stage: StageBounds,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default = "default_tolerance")]
    pub collision_tolerance: i32,
    #[serde(default)]
    pub swap: SwapToggles,
    pub sprites: Vec<SpriteEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpriteEntry {
    pub id: SpriteId,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: SpriteKind,
    #[serde(default)]
    pub displayed: bool,
    #[serde(default)]
    pub script: Script,
    /// Script file relative to the stage file. Replaces `script` once loaded.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
}

impl SpriteEntry {
    fn to_sprite(&self) -> Sprite {
        let mut sprite = Sprite::new(self.id, self.kind);
        if let Some(name) = &self.name {
            sprite.name = name.clone();
        }
        sprite.displayed = self.displayed;
        sprite.script = self.script.clone();
        sprite
    }
}

impl Default for StageFile {
    fn default() -> Self {
        Self {
            version: STAGE_FILE_VERSION.to_string(),
            stage: StageBounds::default(),
            timing: Timing::default(),
            collision_tolerance: DEFAULT_TOLERANCE,
            swap: SwapToggles::default(),
            sprites: default_roster()
                .into_iter()
                .map(|sprite| SpriteEntry {
                    id: sprite.id,
                    name: Some(sprite.name),
                    kind: sprite.kind,
                    displayed: sprite.displayed,
                    script: sprite.script,
                    script_path: None,
                })
                .collect(),
        }
    }
}

impl StageFile {
    pub fn roster(&self) -> Vec<Sprite> {
        self.sprites.iter().map(SpriteEntry::to_sprite).collect()
    }
}

/// Polls a file's modification time; reports each change once.
pub struct StageWatcher {
    path: PathBuf,
    last_seen_modified: Option<SystemTime>,
}

impl StageWatcher {
    pub fn new(path: PathBuf) -> Self {
        let last_seen_modified = modified_time(&path);
        Self {
            path,
            last_seen_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn should_reload(&mut self) -> bool {
        let current = modified_time(&self.path);
        match (self.last_seen_modified, current) {
            (Some(old), Some(now)) if now > old => {
                self.last_seen_modified = Some(now);
                true
            }
            (None, Some(now)) => {
                self.last_seen_modified = Some(now);
                true
            }
            _ => false,
        }
    }
}

pub fn load_stage_from_path(stage_path: &Path) -> Result<StageFile, String> {
    let raw = fs::read_to_string(stage_path)
        .map_err(|e| format!("Failed to read stage file {}: {e}", stage_path.display()))?;
    let mut stage: StageFile = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse stage JSON {}: {e}", stage_path.display()))?;
    validate_stage(&stage)?;

    let base = stage_path.parent().unwrap_or_else(|| Path::new("."));
    for entry in &mut stage.sprites {
        if let Some(relative) = &entry.script_path {
            entry.script = load_script_from_path(&base.join(relative))?;
        }
    }
    Ok(stage)
}

fn validate_stage(stage: &StageFile) -> Result<(), String> {
    if stage.version != STAGE_FILE_VERSION {
        return Err(format!(
            "Stage validation failed: unsupported version '{}' (expected '{STAGE_FILE_VERSION}')",
            stage.version
        ));
    }
    stage.stage.validate()?;
    stage.timing.validate()?;
    if stage.collision_tolerance < 0 {
        return Err(format!(
            "Stage validation failed: collision_tolerance must be >= 0 (got {})",
            stage.collision_tolerance
        ));
    }
    if stage.sprites.is_empty() {
        return Err("Stage validation failed: sprites array is empty".to_string());
    }

    let mut ids = HashSet::new();
    for entry in &stage.sprites {
        if !ids.insert(entry.id) {
            return Err(format!(
                "Stage validation failed: duplicate sprite id '{}'",
                entry.id
            ));
        }
        if entry.script_path.is_some() && !entry.script.is_empty() {
            return Err(format!(
                "Stage validation failed: sprite '{}' must provide either 'script' or 'script_path', not both",
                entry.id
            ));
        }
    }
    if !stage.sprites.iter().any(|entry| entry.displayed) {
        log::warn!("Stage has no displayed sprites. Nothing will run until one is toggled on.");
    }
    Ok(())
}

/// Push every script from a reloaded stage file into the live roster.
///
/// Only scripts are hot-reloaded; sprites that are not already on the stage
/// are skipped. Returns how many scripts were replaced.
pub fn apply_script_reload(stage: &Stage, file: &StageFile) -> usize {
    let mut replaced = 0;
    for entry in &file.sprites {
        if stage.replace_script(entry.id, entry.script.clone()) {
            replaced += 1;
        } else {
            log::warn!(
                "Reloaded stage file names sprite {} which is not on the stage; skipped",
                entry.id
            );
        }
    }
    replaced
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok()?.modified().ok()
}

const fn default_tolerance() -> i32 {
    DEFAULT_TOLERANCE
}
