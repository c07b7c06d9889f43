//! Hierarchical mode states
//!
//! ```text
//! RUNNING
//! ├── PASSTHROUGH
//! └── BUFFER
//!     ├── BUFFER_IDLE
//!     └── BUFFER_PIPE_ACTIVE
//! ```
//!
//! The engine is always in one leaf state. Events are offered to the leaf
//! level first and bubble up through the parents until one handles them.
//! A transition exits levels from the old leaf up to the common ancestor,
//! then enters levels from below the ancestor down to the new leaf.

use super::ControlReply;
use crate::batch::BatchSession;
use crate::types::StorageMode;

/// Leaf state of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageState {
    /// Forwarding records without persisting them
    Passthrough,
    /// Buffering with no open batch session
    BufferIdle,
    /// Buffering with an open batch session
    BufferPipeActive(BatchSession),
}

impl StorageState {
    /// Leaf state for an initial mode
    pub fn initial(mode: StorageMode) -> Self {
        match mode {
            StorageMode::Passthrough => StorageState::Passthrough,
            StorageMode::Buffer => StorageState::BufferIdle,
        }
    }

    /// State name as shown in logs and stats
    pub fn name(&self) -> &'static str {
        self.leaf().name()
    }

    /// Operating mode the state belongs to
    pub fn mode(&self) -> StorageMode {
        match self {
            StorageState::Passthrough => StorageMode::Passthrough,
            StorageState::BufferIdle | StorageState::BufferPipeActive(_) => StorageMode::Buffer,
        }
    }

    /// Level of the leaf state
    pub fn leaf(&self) -> Level {
        match self {
            StorageState::Passthrough => Level::Passthrough,
            StorageState::BufferIdle => Level::BufferIdle,
            StorageState::BufferPipeActive(_) => Level::BufferPipeActive,
        }
    }

    /// Open batch session, if any
    pub fn session(&self) -> Option<&BatchSession> {
        match self {
            StorageState::BufferPipeActive(session) => Some(session),
            _ => None,
        }
    }
}

/// A level of the state hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Running,
    Passthrough,
    Buffer,
    BufferIdle,
    BufferPipeActive,
}

impl Level {
    /// Level name
    pub fn name(self) -> &'static str {
        match self {
            Level::Running => "RUNNING",
            Level::Passthrough => "PASSTHROUGH",
            Level::Buffer => "BUFFER",
            Level::BufferIdle => "BUFFER_IDLE",
            Level::BufferPipeActive => "BUFFER_PIPE_ACTIVE",
        }
    }

    /// Enclosing level, `None` for the root
    pub fn parent(self) -> Option<Level> {
        match self {
            Level::Running => None,
            Level::Passthrough | Level::Buffer => Some(Level::Running),
            Level::BufferIdle | Level::BufferPipeActive => Some(Level::Buffer),
        }
    }

    /// This level followed by its ancestors, leaf to root
    pub fn chain(self) -> impl Iterator<Item = Level> {
        std::iter::successors(Some(self), |level| level.parent())
    }

    /// Ancestors and this level, root to leaf
    pub fn path_from_root(self) -> Vec<Level> {
        let mut path: Vec<Level> = self.chain().collect();
        path.reverse();
        path
    }
}

/// Levels exited and entered by a transition, in execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPath {
    pub exits: Vec<Level>,
    pub entries: Vec<Level>,
}

/// Compute the exit and entry sequence between two leaves
///
/// A transition to the same leaf exits and enters nothing.
pub fn transition_path(from: Level, to: Level) -> TransitionPath {
    let from_path = from.path_from_root();
    let to_path = to.path_from_root();
    let common = from_path
        .iter()
        .zip(&to_path)
        .take_while(|(a, b)| a == b)
        .count();

    TransitionPath {
        exits: from_path[common..].iter().rev().copied().collect(),
        entries: to_path[common..].to_vec(),
    }
}

/// Result of offering an event to one level
#[derive(Debug)]
pub enum Outcome {
    /// The level consumed the event
    Handled {
        /// State to move to after the handler
        next: Option<StorageState>,
        /// Reply to send once the transition has run
        reply: Option<ControlReply>,
    },
    /// Offer the event to the parent level
    Propagate,
}

impl Outcome {
    /// Handled without a state change
    pub fn reply(reply: ControlReply) -> Self {
        Outcome::Handled {
            next: None,
            reply: Some(reply),
        }
    }

    /// Handled with a state change
    pub fn transition(next: StorageState, reply: ControlReply) -> Self {
        Outcome::Handled {
            next: Some(next),
            reply: Some(reply),
        }
    }

    /// Handled silently
    pub fn consumed() -> Self {
        Outcome::Handled {
            next: None,
            reply: None,
        }
    }
}
