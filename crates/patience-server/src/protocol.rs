//! WebSocket protocol messages for the Patience engine service.

use patience_core::{ActionId, CardData, EngineEvent, GameOption, SlotId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Load a game file
    Load { game_file: String },

    /// Deal a new game, from a fixed seed if one is given
    Start { seed: Option<u32> },

    /// Deal the current game again
    Restart,

    Undo,
    Redo,

    /// Deal the next cards from the stock
    Deal,

    /// Ask for a hint
    Hint,

    /// Pick up the trailing cards of a slot
    Drag {
        id: ActionId,
        slot: SlotId,
        cards: Vec<CardData>,
    },

    /// Put dragged cards back
    CancelDrag {
        id: ActionId,
        slot: SlotId,
        cards: Vec<CardData>,
    },

    /// Ask whether dragged cards may be dropped
    CheckDrop {
        id: ActionId,
        start: SlotId,
        end: SlotId,
        cards: Vec<CardData>,
    },

    /// Drop dragged cards
    Drop {
        id: ActionId,
        start: SlotId,
        end: SlotId,
        cards: Vec<CardData>,
    },

    Click { id: ActionId, slot: SlotId },
    DoubleClick { id: ActionId, slot: SlotId },

    /// Ask for the game options
    RequestOptions,

    /// Change game options
    SetOptions { options: Vec<GameOption> },

    /// Save the session now
    SaveState,

    /// Forget the saved session
    ResetSavedState,

    /// Restore the saved session, loading the fallback game if there is none
    RestoreSavedState { fallback: Option<String> },

    /// Bring back the game running before the last new game
    RestorePreviousGame,

    /// Forget the game running before the last new game
    ForgetPreviousGame,

    /// Request recently loaded games
    History,

    /// Ping for keepalive
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Welcome message with the session ID and the games that can be loaded
    Welcome { session_id: Uuid, games: Vec<String> },

    /// Notifications produced by one request, in emission order
    Events {
        accepted: bool,
        batch: Vec<EngineEvent>,
    },

    /// Recently loaded games, most recent first
    History { games: Vec<String> },

    /// Error occurred
    Error { message: String },

    /// Pong response
    Pong,
}
