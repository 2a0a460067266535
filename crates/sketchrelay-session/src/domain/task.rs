//! Tasks and the opaque content that flows along a chain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a player is asked to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskType {
    /// Write a sentence (the seed, or a caption for a drawing).
    WriteSentence,
    /// Draw the previous sentence.
    DrawPicture,
    /// Nothing to do.
    Waiting,
}

impl TaskType {
    /// The task type of the next hop along a chain. `Waiting` has none.
    #[must_use]
    pub fn opposite(self) -> Option<Self> {
        match self {
            Self::WriteSentence => Some(Self::DrawPicture),
            Self::DrawPicture => Some(Self::WriteSentence),
            Self::Waiting => None,
        }
    }

    /// The wire name of this task type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WriteSentence => "writeSentence",
            Self::DrawPicture => "drawPicture",
            Self::Waiting => "waiting",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted sentence or drawing. Never inspected, only measured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(String);

impl Content {
    /// Wraps an encoded sentence or drawing.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty content carried by seeds and waits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw encoded value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Content {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Content {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A unit of work held by exactly one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// What to do.
    pub task_type: TaskType,
    /// Whose chain the output extends. Empty for `Waiting`.
    pub root_player: String,
    /// The content to respond to. Empty for seeds and `Waiting`.
    pub previous_content: Content,
}

impl Task {
    /// The "nothing to do" task.
    #[must_use]
    pub fn waiting() -> Self {
        Self {
            task_type: TaskType::Waiting,
            root_player: String::new(),
            previous_content: Content::default(),
        }
    }

    /// The opening task of `player`'s own chain.
    #[must_use]
    pub fn seed(player: &str) -> Self {
        Self {
            task_type: TaskType::WriteSentence,
            root_player: player.to_owned(),
            previous_content: Content::default(),
        }
    }

    /// Returns `true` for the `Waiting` task.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.task_type == TaskType::Waiting
    }
}
