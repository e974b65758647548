//! Card mutations and engine notifications.
//!
//! This module defines the atomic card mutations the engine emits and the
//! complete set of notifications a presentation layer receives.

use crate::card::{CardData, SuitAndRank};
use crate::options::GameOption;
use crate::slot::{SlotId, SlotSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user gesture, `0` means no gesture
pub type ActionId = u32;

/// Gesture id used when the recorder replays moves
pub const REPLAY_ACTION_ID: ActionId = u32::MAX;

/// One atomic card mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A card was inserted into a slot
    Insertion {
        slot: SlotId,
        index: usize,
        card: CardData,
        /// Fills a placeholder left by an earlier unresolved insertion
        replaces: bool,
    },
    /// A card was removed from a slot
    Removal {
        slot: SlotId,
        index: usize,
        card: CardData,
    },
    /// A card was turned over in place
    Flip {
        slot: SlotId,
        index: usize,
        card: CardData,
    },
    /// Every card was removed from a slot
    Clearing { slot: SlotId },
}

impl Action {
    /// Fresh insertion
    pub fn insertion(slot: SlotId, index: usize, card: CardData) -> Self {
        Action::Insertion {
            slot,
            index,
            card,
            replaces: false,
        }
    }

    /// Target slot
    pub fn slot(&self) -> SlotId {
        match *self {
            Action::Insertion { slot, .. }
            | Action::Removal { slot, .. }
            | Action::Flip { slot, .. }
            | Action::Clearing { slot } => slot,
        }
    }

    /// Target index, clearing has none
    pub fn index(&self) -> Option<usize> {
        match *self {
            Action::Insertion { index, .. }
            | Action::Removal { index, .. }
            | Action::Flip { index, .. } => Some(index),
            Action::Clearing { .. } => None,
        }
    }

    pub(crate) fn index_mut(&mut self) -> Option<&mut usize> {
        match self {
            Action::Insertion { index, .. }
            | Action::Removal { index, .. }
            | Action::Flip { index, .. } => Some(index),
            Action::Clearing { .. } => None,
        }
    }

    /// Card carried by the action
    pub fn card(&self) -> Option<CardData> {
        match *self {
            Action::Insertion { card, .. }
            | Action::Removal { card, .. }
            | Action::Flip { card, .. } => Some(card),
            Action::Clearing { .. } => None,
        }
    }

    pub(crate) fn card_mut(&mut self) -> Option<&mut CardData> {
        match self {
            Action::Insertion { card, .. }
            | Action::Removal { card, .. }
            | Action::Flip { card, .. } => Some(card),
            Action::Clearing { .. } => None,
        }
    }

    /// Face-independent identity of the carried card
    pub fn value(&self) -> Option<SuitAndRank> {
        self.card().map(|card| card.value())
    }

    /// Whether this insertion waits for its backing card object
    pub fn replaces(&self) -> bool {
        matches!(self, Action::Insertion { replaces: true, .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Insertion {
                slot,
                index,
                card,
                replaces,
            } => {
                write!(f, "insertion of {card} to slot {slot} at {index}")?;
                if *replaces {
                    write!(f, " (replacing)")?;
                }
                Ok(())
            }
            Action::Removal { slot, index, card } => {
                write!(f, "removal of {card} from slot {slot} at {index}")
            }
            Action::Flip { slot, index, card } => {
                write!(f, "flipping of {card} in slot {slot} at {index}")
            }
            Action::Clearing { slot } => write!(f, "clearing slot {slot}"),
        }
    }
}

/// Where an action notification comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionOrigin {
    /// Caused directly by a gesture the presentation already performed
    pub engine: bool,
    /// Emitted while replaying a saved session
    pub replay: bool,
}

/// Notifications from the engine, in emission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    // ==================== Table ====================
    /// All slots and cards are gone, the presentation starts preparing
    ClearData,
    /// A slot was created
    NewSlot(SlotSpec),
    ExpansionToDown { slot: SlotId, expansion: f64 },
    ExpansionToRight { slot: SlotId, expansion: f64 },

    // ==================== Mutations ====================
    /// One card mutation
    Action { action: Action, origin: ActionOrigin },
    /// Every mutation of the current move has been emitted
    MoveEnded { origin: ActionOrigin },
    /// The move and all of its delayed follow-ups are complete
    MoveFinished,

    // ==================== Gesture results ====================
    CouldDrag { id: ActionId, slot: SlotId, could: bool },
    CouldDrop { id: ActionId, slot: SlotId, could: bool },
    Dropped { id: ActionId, slot: SlotId, could: bool },
    Clicked { id: ActionId, slot: SlotId, could: bool },
    DoubleClicked { id: ActionId, slot: SlotId, could: bool },

    // ==================== Status ====================
    CanUndo(bool),
    CanRedo(bool),
    CanDeal(bool),
    Score(i32),
    Message(String),
    Hint(String),
    ShowScore(bool),
    ShowDeal(bool),
    GameOptions(Vec<GameOption>),

    // ==================== Lifecycle ====================
    GameLoaded { game_file: String },
    GameStarted,
    /// Undo out of a finished game
    GameContinued,
    GameOver { won: bool },
    /// The engine can not continue, interaction must stop
    EngineFailure { message: String },
    /// A saved session is being restored with this much elapsed time
    RestoreStarted { elapsed_ms: u64 },
    RestoreCompleted { success: bool, resumed: bool },
    /// Whether a previous unfinished game is kept for restoring
    PreviousGameStored(bool),
}
