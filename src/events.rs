use crate::model::ImageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Emitted by a change feed when the image collection changes.
///
/// Only a signal to reconcile; the player always re-fetches instead of
/// applying the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub image: Option<ImageId>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, image: Option<ImageId>) -> Self {
        Self { kind, image }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    TogglePause,
    Advance,
    Retreat,
    /// Manually re-fetch the collection.
    Reload,
}

impl ControlInput {
    /// Maps a keydown name to the input it drives. Only space and the
    /// horizontal arrows are recognised.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            " " | "Space" | "Spacebar" => Some(Self::TogglePause),
            "ArrowRight" => Some(Self::Advance),
            "ArrowLeft" => Some(Self::Retreat),
            _ => None,
        }
    }
}
