//! Pipeline state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hardware capture pipeline state, ordered from fully released to streaming
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum PipelineState {
    /// No hardware handle held
    #[default]
    Null,
    /// Device opened, resources allocated
    Ready,
    /// Pipeline prerolled but not streaming
    Paused,
    /// Streaming; the only state in which captures succeed
    Playing,
}

impl PipelineState {
    const ORDER: [PipelineState; 4] = [
        PipelineState::Null,
        PipelineState::Ready,
        PipelineState::Paused,
        PipelineState::Playing,
    ];

    /// Whether a capture may be attempted in this state
    pub fn can_capture(self) -> bool {
        self == PipelineState::Playing
    }

    /// Intermediate and final states to step through on the way to `target`.
    ///
    /// Transitions are always single steps, so going from `Null` to `Playing`
    /// yields `[Ready, Paused, Playing]` and going back down yields
    /// `[Paused, Ready, Null]`. Empty when already at `target`.
    pub fn path_to(self, target: PipelineState) -> Vec<PipelineState> {
        let from = self as usize;
        let to = target as usize;
        if to > from {
            Self::ORDER[from + 1..=to].to_vec()
        } else {
            Self::ORDER[to..from].iter().rev().copied().collect()
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Null => "NULL",
            PipelineState::Ready => "READY",
            PipelineState::Paused => "PAUSED",
            PipelineState::Playing => "PLAYING",
        };
        f.write_str(name)
    }
}
