//! Scripts: the ordered block list owned by one sprite.
//!
//! The only structure above a flat list is the repeat pattern. A `repeat`
//! block re-executes the nearest `move` before it, and that move is skipped
//! when the script is walked linearly. [`Script::elision_plan`] resolves this
//! once per run so the interpreter never has to search backwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockKind};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script {
    blocks: Vec<Block>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove(&mut self, index: usize) -> Option<Block> {
        (index < self.blocks.len()).then(|| self.blocks.remove(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_mut(index)
    }

    /// Resolve which moves are elided and which move each repeat replays.
    pub fn elision_plan(&self) -> ElisionPlan {
        let mut plan = ElisionPlan::default();
        for (index, block) in self.blocks.iter().enumerate() {
            if block.kind != BlockKind::Repeat {
                continue;
            }
            let source = self.blocks[..index]
                .iter()
                .rposition(|candidate| candidate.kind == BlockKind::Move);
            match source {
                Some(source) => {
                    plan.elided.insert(source);
                    plan.repeat_sources.insert(index, source);
                }
                None => log::debug!("Repeat block at index {index} has no move to replay"),
            }
        }
        plan
    }
}

impl From<Vec<Block>> for Script {
    fn from(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }
}

impl FromIterator<Block> for Script {
    fn from_iter<I: IntoIterator<Item = Block>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
        }
    }
}

/// Load a standalone script file: a JSON array of blocks.
pub fn load_script_from_path(script_path: &Path) -> Result<Script, String> {
    let raw = fs::read_to_string(script_path)
        .map_err(|e| format!("Failed to read script file {}: {e}", script_path.display()))?;
    let script: Script = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse script JSON {}: {e}", script_path.display()))?;
    for (index, block) in script.blocks().iter().enumerate() {
        if let BlockKind::Unknown(name) = &block.kind {
            log::warn!(
                "Script {} block {index} has unknown type '{name}'; it will be skipped when run",
                script_path.display()
            );
        }
    }
    Ok(script)
}

/// Output of the preprocessing pass over a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElisionPlan {
    elided: BTreeSet<usize>,
    /// repeat index -> index of the move it replays
    repeat_sources: BTreeMap<usize, usize>,
}

impl ElisionPlan {
    pub fn is_elided(&self, index: usize) -> bool {
        self.elided.contains(&index)
    }

    pub fn repeat_source(&self, repeat_index: usize) -> Option<usize> {
        self.repeat_sources.get(&repeat_index).copied()
    }

    pub fn elided_count(&self) -> usize {
        self.elided.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file_path(name_hint: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "stage_script_test_{}_{}_{}.json",
            name_hint,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn repeat_elides_nearest_preceding_move() {
        let script = Script::from(vec![
            Block::move_by(5.0),
            Block::turn_by(90.0),
            Block::move_by(10.0),
            Block::say("hi", 1.0),
            Block::repeat(3.0),
        ]);
        let plan = script.elision_plan();
        assert!(plan.is_elided(2));
        assert!(!plan.is_elided(0));
        assert_eq!(plan.repeat_source(4), Some(2));
        assert_eq!(plan.elided_count(), 1);
    }

    #[test]
    fn repeat_without_preceding_move_has_no_source() {
        let script = Script::from(vec![
            Block::repeat(3.0),
            Block::move_by(10.0),
        ]);
        let plan = script.elision_plan();
        assert_eq!(plan.repeat_source(0), None);
        assert!(!plan.is_elided(1));
    }

    #[test]
    fn consecutive_repeats_share_one_elided_move() {
        let script = Script::from(vec![
            Block::move_by(5.0),
            Block::repeat(2.0),
            Block::repeat(3.0),
        ]);
        let plan = script.elision_plan();
        assert_eq!(plan.elided_count(), 1);
        assert_eq!(plan.repeat_source(1), Some(0));
        assert_eq!(plan.repeat_source(2), Some(0));
    }

    #[test]
    fn script_is_a_plain_json_array() {
        let script: Script = serde_json::from_str(
            r#"[{"type":"move","args":[10]},{"type":"repeat","args":[4]}]"#,
        )
        .expect("should parse");
        assert_eq!(script.len(), 2);
        assert_eq!(script.blocks()[1].repeat_count(), 4);
    }

    #[test]
    fn remove_out_of_range_is_none() {
        let mut script = Script::from(vec![Block::move_by(1.0)]);
        assert!(script.remove(3).is_none());
        assert_eq!(script.remove(0), Some(Block::move_by(1.0)));
        assert!(script.is_empty());
    }

    #[test]
    fn load_script_from_path_reads_block_array() {
        let path = temp_file_path("valid");
        fs::write(
            &path,
            r#"[{"type":"say","args":["Meow",1]},{"type":"spin","args":[]}]"#,
        )
        .expect("failed to write temp script file");

        let script = load_script_from_path(&path).expect("script should load");
        assert_eq!(script.len(), 2);
        assert_eq!(script.blocks()[0].text(0), "Meow");
        assert_eq!(script.blocks()[1].kind, BlockKind::Unknown("spin".to_string()));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_script_from_path_tolerates_wrong_arg_types() {
        let path = temp_file_path("wrong_args");
        fs::write(
            &path,
            r#"[{"type":"move","args":[false]},{"type":"repeat","args":null}]"#,
        )
        .expect("failed to write temp script file");

        let script = load_script_from_path(&path).expect("script should load");
        assert_eq!(script.blocks()[0].number(0), 10.0);
        assert_eq!(script.blocks()[1].repeat_count(), 5);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_script_from_path_reports_parse_errors() {
        let path = temp_file_path("invalid");
        fs::write(&path, r#"{"type":"move"}"#).expect("failed to write temp script file");

        let err = load_script_from_path(&path).expect_err("object is not a script");
        assert!(err.contains("Failed to parse script JSON"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn load_script_from_path_reports_missing_file() {
        let path = temp_file_path("missing");
        let err = load_script_from_path(&path).expect_err("file does not exist");
        assert!(err.contains("Failed to read script file"));
    }
}
