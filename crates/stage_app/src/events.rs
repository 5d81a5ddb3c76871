//! Outbound event stream consumed by whatever draws the stage.
//!
//! The core never renders. It reports transforms, speech bubbles, the
//! collision indicator and transient notices, and the receiver decides how
//! (or whether) to show them.

use std::time::Duration;

use glam::Vec2;
use stage_core::sprite::SpriteId;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleStyle {
    Say,
    Think,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechBubble {
    pub style: BubbleStyle,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageEvent {
    /// Place the sprite at `position` (stage-center relative, y up) rotated by `rotation` degrees.
    Transform {
        sprite: SpriteId,
        position: Vec2,
        rotation: f32,
    },
    Message {
        sprite: SpriteId,
        bubble: Option<SpeechBubble>,
    },
    /// Sprites currently highlighted as colliding. Empty clears the indicator.
    Colliding(Vec<SpriteId>),
    Notice {
        text: String,
        duration: Duration,
    },
    NoticeCleared,
}

/// Cloneable sending half. A sink without a receiver drops events silently.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<StageEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<StageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: StageEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                log::trace!("Stage event dropped: receiver closed");
            }
        }
    }
}
