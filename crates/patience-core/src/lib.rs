//! Patience - engine core for patience card games
//!
//! This crate provides the logic between a card game's rules and its
//! presentation, including:
//! - Card and slot value types
//! - The engine coordinator with its lifecycle and gesture guards
//! - A deferred action queue and a headless presentation mirror
//! - A move recorder that saves sessions and replays them
//!
//! # Architecture
//!
//! The rules of one game sit behind the [`rules::Rules`] trait. The
//! [`Engine`] owns the canonical table, calls into the rules and emits an
//! ordered stream of [`EngineEvent`]s. A presentation consumes that stream;
//! [`Manager`] is a headless one used by the server and the tests.
//!
//! # Modules
//!
//! - [`card`]: Suits, ranks and card data
//! - [`slot`]: Slot identity, type and layout
//! - [`actions`]: Card mutations and engine notifications
//! - [`rules`]: Boundary to game rules
//! - [`engine`]: Engine coordinator
//! - [`games`]: Built-in rules and the game catalog
//! - [`queue`]: Deferred action queue
//! - [`manager`]: Headless presentation mirror
//! - [`recorder`]: Move log, saving and replay
//! - [`store`], [`options`], [`history`], [`config`]: Persistence and settings

pub mod actions;
pub mod card;
pub mod config;
pub mod engine;
pub mod games;
pub mod history;
pub mod manager;
pub mod options;
pub mod queue;
pub mod recorder;
pub mod rules;
pub mod slot;
pub mod store;

// Re-export commonly used types
pub use actions::{Action, ActionId, ActionOrigin, EngineEvent, REPLAY_ACTION_ID};
pub use card::{standard_deck, CardData, CardList, Rank, Suit, SuitAndRank};
pub use config::{DroppablePolicy, EngineConfig};
pub use engine::{Engine, EngineError, EngineState, GameRng, PendingDelayedCall};
pub use games::{GameCatalog, Klondike, MoveHistory};
pub use manager::{CardObject, ConsistencyError, Manager};
pub use options::{GameOption, GameOptionType};
pub use queue::{FlushReport, Pooled, Queue, QueueError, Resolution, Resolver};
pub use recorder::{Record, RecordError, Recorder, ReplayStatus, SavedState, StateError};
pub use rules::{
    GameFeatures, Lambda, LambdaTable, NamedCall, RuleHandle, Rules, RulesHost, ScriptError,
    Value,
};
pub use slot::{SlotId, SlotLayout, SlotSpec, SlotType};
pub use store::{FileStore, MemoryStore, StateStore, StoreError};
