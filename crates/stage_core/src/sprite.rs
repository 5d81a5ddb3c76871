//! Sprite identity and the fixed roster the stage starts with.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::script::Script;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpriteId(pub u32);

impl std::fmt::Display for SpriteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpriteKind {
    Cat,
    Butterfly,
    Ball,
}

impl SpriteKind {
    /// All kinds in roster order.
    pub const ALL: &'static [SpriteKind] = &[SpriteKind::Cat, SpriteKind::Butterfly, SpriteKind::Ball];

    pub fn label(self) -> &'static str {
        match self {
            Self::Cat => "Cat",
            Self::Butterfly => "Butterfly",
            Self::Ball => "Ball",
        }
    }

    /// Where `reset` puts a sprite of this kind, relative to stage center.
    pub fn start_position(self) -> Vec2 {
        match self {
            Self::Cat => Vec2::new(0.0, 0.0),
            Self::Butterfly => Vec2::new(-100.0, -50.0),
            Self::Ball => Vec2::new(100.0, 50.0),
        }
    }

    /// Rendered width and height, used to keep the sprite inside the stage.
    pub fn footprint(self) -> Vec2 {
        match self {
            Self::Cat => Vec2::new(95.0, 100.0),
            Self::Butterfly => Vec2::new(60.0, 50.0),
            Self::Ball => Vec2::new(50.0, 50.0),
        }
    }
}

impl std::fmt::Display for SpriteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sprite {
    pub id: SpriteId,
    pub name: String,
    pub kind: SpriteKind,
    pub script: Script,
    pub displayed: bool,
}

impl Sprite {
    pub fn new(id: SpriteId, kind: SpriteKind) -> Self {
        Self {
            id,
            name: kind.label().to_string(),
            kind,
            script: Script::new(),
            displayed: false,
        }
    }
}

/// One sprite per kind with ids starting at 1. Only the cat starts on stage.
pub fn default_roster() -> Vec<Sprite> {
    SpriteKind::ALL
        .iter()
        .zip(1u32..)
        .map(|(&kind, id)| Sprite {
            displayed: kind == SpriteKind::Cat,
            ..Sprite::new(SpriteId(id), kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roster_matches_kinds_in_order() {
        let roster = default_roster();
        let ids: Vec<u32> = roster.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(roster[1].kind, SpriteKind::Butterfly);
        assert_eq!(roster[2].name, "Ball");
    }

    #[test]
    fn only_cat_is_displayed_initially() {
        let displayed: Vec<SpriteKind> = default_roster()
            .into_iter()
            .filter(|s| s.displayed)
            .map(|s| s.kind)
            .collect();
        assert_eq!(displayed, vec![SpriteKind::Cat]);
    }

    #[test]
    fn start_positions_are_fixed_per_kind() {
        assert_eq!(SpriteKind::Cat.start_position(), Vec2::ZERO);
        assert_eq!(SpriteKind::Butterfly.start_position(), Vec2::new(-100.0, -50.0));
        assert_eq!(SpriteKind::Ball.start_position(), Vec2::new(100.0, 50.0));
    }

    #[test]
    fn kind_parses_lowercase() {
        let kind: SpriteKind = serde_json::from_str(r#""butterfly""#).expect("should parse");
        assert_eq!(kind, SpriteKind::Butterfly);
        assert_eq!(format!("{}", kind), "Butterfly");
    }
}
