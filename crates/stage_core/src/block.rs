//! Block model: the single instructions a sprite script is built from.
//!
//! Blocks arrive from the authoring side as loose JSON
//! (`{"type": "move", "args": [10]}`). Argument lists are never rejected for
//! their shape: every accessor falls back to the per-type default when a slot
//! is missing or holds the wrong kind of value. Unknown block types survive
//! deserialization so the engine can log and skip them at run time.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockKind {
    Move,
    Turn,
    Goto,
    Say,
    Think,
    Repeat,
    /// Anything the engine does not understand. Kept verbatim for logging.
    Unknown(String),
}

impl BlockKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Move => "move",
            Self::Turn => "turn",
            Self::Goto => "goto",
            Self::Say => "say",
            Self::Think => "think",
            Self::Repeat => "repeat",
            Self::Unknown(name) => name,
        }
    }

    /// Argument schema for this block type, in slot order.
    pub fn schema(&self) -> &'static [ArgSlot] {
        match self {
            Self::Move => &[ArgSlot::Number(10.0)],
            Self::Turn => &[ArgSlot::Number(15.0)],
            Self::Repeat => &[ArgSlot::Number(5.0)],
            Self::Goto => &[ArgSlot::Number(0.0), ArgSlot::Number(0.0)],
            Self::Say => &[ArgSlot::Text("Hello!"), ArgSlot::Number(2.0)],
            Self::Think => &[ArgSlot::Text("Hmm..."), ArgSlot::Number(2.0)],
            Self::Unknown(_) => &[],
        }
    }
}

impl From<String> for BlockKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "move" => Self::Move,
            "turn" => Self::Turn,
            "goto" => Self::Goto,
            "say" => Self::Say,
            "think" => Self::Think,
            "repeat" => Self::Repeat,
            _ => Self::Unknown(value),
        }
    }
}

impl From<BlockKind> for String {
    fn from(kind: BlockKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected kind of a single argument slot, carrying its default value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgSlot {
    Number(f32),
    Text(&'static str),
}

impl ArgSlot {
    fn default_arg(self) -> BlockArg {
        match self {
            Self::Number(n) => BlockArg::Number(n),
            Self::Text(s) => BlockArg::Text(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockArg {
    Number(f32),
    Text(String),
    /// Any other JSON value (`true`, `null`, objects). Read as missing.
    Other(serde_json::Value),
}

impl BlockArg {
    /// Numeric reading of the argument. Text that parses as a number counts.
    pub fn as_number(&self) -> Option<f32> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f32>().ok()?,
            Self::Other(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Text reading of the argument, `None` for values that are neither text nor a number.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Other(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Vec<BlockArg>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<BlockArg>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<BlockArg>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Block {
    pub fn new(kind: BlockKind, args: Vec<BlockArg>) -> Self {
        Self { kind, args }
    }

    /// A block of `kind` with every slot at its default value.
    pub fn with_defaults(kind: BlockKind) -> Self {
        let args = kind.schema().iter().map(|slot| slot.default_arg()).collect();
        Self { kind, args }
    }

    pub fn move_by(steps: f32) -> Self {
        Self::new(BlockKind::Move, vec![BlockArg::Number(steps)])
    }

    pub fn turn_by(degrees: f32) -> Self {
        Self::new(BlockKind::Turn, vec![BlockArg::Number(degrees)])
    }

    pub fn goto(x: f32, y: f32) -> Self {
        Self::new(
            BlockKind::Goto,
            vec![BlockArg::Number(x), BlockArg::Number(y)],
        )
    }

    pub fn say(text: &str, seconds: f32) -> Self {
        Self::new(
            BlockKind::Say,
            vec![BlockArg::Text(text.to_string()), BlockArg::Number(seconds)],
        )
    }

    pub fn think(text: &str, seconds: f32) -> Self {
        Self::new(
            BlockKind::Think,
            vec![BlockArg::Text(text.to_string()), BlockArg::Number(seconds)],
        )
    }

    pub fn repeat(times: f32) -> Self {
        Self::new(BlockKind::Repeat, vec![BlockArg::Number(times)])
    }

    /// Numeric argument at `slot`, or the schema default when missing or malformed.
    pub fn number(&self, slot: usize) -> f32 {
        let fallback = match self.kind.schema().get(slot) {
            Some(ArgSlot::Number(n)) => *n,
            _ => 0.0,
        };
        self.args
            .get(slot)
            .and_then(BlockArg::as_number)
            .unwrap_or(fallback)
    }

    /// Text argument at `slot`, or the schema placeholder when missing or malformed.
    pub fn text(&self, slot: usize) -> String {
        self.args
            .get(slot)
            .and_then(BlockArg::to_text)
            .unwrap_or_else(|| match self.kind.schema().get(slot) {
                Some(ArgSlot::Text(s)) => s.to_string(),
                _ => String::new(),
            })
    }

    /// Iteration count of a repeat block. Fractions truncate, negatives run zero times.
    pub fn repeat_count(&self) -> u32 {
        self.number(0).max(0.0) as u32
    }

    /// Edit one argument from raw editor input.
    ///
    /// Numeric slots coerce the input (anything non-numeric becomes 0); text
    /// slots take it unchanged. Slots between the current end of `args` and
    /// `slot` are filled with their defaults.
    pub fn set_argument(&mut self, slot: usize, raw: &str) -> Result<(), String> {
        let schema = self.kind.schema();
        let value = match schema.get(slot) {
            Some(ArgSlot::Number(_)) => {
                let parsed = raw.trim().parse::<f32>().ok().filter(|n| n.is_finite());
                BlockArg::Number(parsed.unwrap_or(0.0))
            }
            Some(ArgSlot::Text(_)) => BlockArg::Text(raw.to_string()),
            None if matches!(self.kind, BlockKind::Unknown(_)) => BlockArg::Text(raw.to_string()),
            None => {
                return Err(format!(
                    "Block '{}' has no argument slot {} (takes {})",
                    self.kind,
                    slot,
                    schema.len()
                ));
            }
        };

        while self.args.len() <= slot {
            let filler = schema
                .get(self.args.len())
                .map(|s| s.default_arg())
                .unwrap_or_else(|| BlockArg::Text(String::new()));
            self.args.push(filler);
        }
        self.args[slot] = value;
        Ok(())
    }
}

/// Parse a block dropped from the palette. A failure leaves nothing to apply.
pub fn parse_block_payload(raw: &str) -> Result<Block, String> {
    serde_json::from_str(raw).map_err(|e| format!("Failed to parse block payload: {e}"))
}
