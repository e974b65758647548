//! Engine coordinator.
//!
//! [`Engine`] owns the canonical table, the loaded rules and the move
//! recorder. Every public operation runs to completion synchronously and
//! leaves its notifications in an ordered outbox drained with
//! [`Engine::take_events`]. All card mutations of one move are followed by
//! exactly one [`EngineEvent::MoveEnded`] marker.

pub mod adapter;
mod internals;

pub use adapter::GameRng;

use crate::actions::{Action, ActionId, ActionOrigin, EngineEvent, REPLAY_ACTION_ID};
use crate::card::{CardData, CardList};
use crate::config::{DroppablePolicy, EngineConfig};
use crate::games::GameCatalog;
use crate::history;
use crate::options::{
    apply_to_value, clear_options, load_options, parse_options, save_options, GameOption,
};
use crate::recorder::{Record, Recorder, ReplayStart, ReplayStatus, ReplayStep};
use crate::rules::{GameFeatures, Lambda, NamedCall, RuleHandle, ScriptError, Value};
use crate::slot::SlotId;
use crate::store::{remove_or_warn, StateStore, STATE_KEY};
use adapter::RulesAdapter;
use internals::Internals;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifecycle of the loaded game
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    /// Loaded as part of restoring a saved session
    Restored,
    Loaded,
    /// Dealing a new game
    Begin,
    Running,
    GameOver,
}

/// Why the engine refused an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("another action ({0}) is ongoing")]
    ActionOngoing(ActionId),

    #[error("a delayed call is pending")]
    DelayedCallOngoing,

    #[error("no cards given")]
    NoCards,

    #[error("action {got} does not match the current action {current}")]
    WrongAction { got: ActionId, current: ActionId },

    #[error("slot {0} does not exist")]
    BadSlot(SlotId),

    #[error("cards are not on top of slot {0}")]
    NotOnTop(SlotId),

    #[error("game is not running")]
    NotRunning,

    #[error("engine has failed")]
    Failed,

    #[error("game does not support dropping")]
    NotDroppable,

    #[error("action id 0 is reserved for no action")]
    InvalidActionId,
}

/// Delayed callback waiting for its timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingDelayedCall {
    /// Pass back to [`Engine::fire_delayed_call`]
    pub generation: u64,
    pub delay: Duration,
}

/// The engine coordinator. One per running session.
pub struct Engine {
    adapter: RulesAdapter,
    internals: Internals,
    recorder: Recorder,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    game_file: String,
    /// In-flight gesture, 0 when none
    action: ActionId,
}

impl Engine {
    pub fn new(catalog: GameCatalog, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        debug!("Patience engine created");
        Self {
            adapter: RulesAdapter::new(catalog),
            internals: Internals::default(),
            recorder: Recorder::new(store.clone(), config.clone()),
            store,
            config,
            game_file: String::new(),
            action: 0,
        }
    }

    // ==================== Accessors ====================

    pub fn state(&self) -> EngineState {
        self.internals.state
    }

    pub fn game_file(&self) -> &str {
        &self.game_file
    }

    pub fn seed(&self) -> u32 {
        self.internals.seed
    }

    pub fn features(&self) -> GameFeatures {
        self.internals.features
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &GameCatalog {
        self.adapter.catalog()
    }

    /// Current in-flight gesture, 0 when none
    pub fn current_action(&self) -> ActionId {
        self.action
    }

    pub fn failed(&self) -> bool {
        self.internals.failed
    }

    pub fn replaying(&self) -> bool {
        self.recorder.replaying()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Canonical contents of every slot
    pub fn slots(&self) -> &[CardList] {
        &self.internals.slots
    }

    /// The trailing `count` cards of a slot, every card when `count` is 0
    pub fn cards(&self, slot: SlotId, count: usize) -> CardList {
        let cards = self.internals.slot(slot);
        let skip = if count > 0 {
            cards.len().saturating_sub(count)
        } else {
            0
        };
        cards[skip..].to_vec()
    }

    /// Most recently loaded game files
    pub fn history(&self) -> Vec<String> {
        history::history(self.store.as_ref())
    }

    /// Drain the notifications emitted so far
    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        self.internals.take_events()
    }

    // ==================== Lifecycle ====================

    /// Load a game file, dropping any previous game kept for restoring
    pub fn load(&mut self, game_file: &str) -> bool {
        if self.recorder.drop_old_state() {
            self.internals.emit(EngineEvent::PreviousGameStored(false));
        }
        self.load_game(game_file, false)
    }

    fn load_game(&mut self, game_file: &str, restored: bool) -> bool {
        debug!("Loading game from {}", game_file);
        self.action = 0;
        self.internals.failed = false;
        self.internals.recording_move = false;
        self.internals.clear(true);

        let replaying = self.recorder.replaying();
        if let Err(e) = self
            .adapter
            .load(game_file, &mut self.internals, replaying)
        {
            warn!("Loading {} failed: {}", game_file, e);
            self.internals.clear(true);
            self.die("Loading new game failed");
            return false;
        }
        if self.internals.failed {
            self.internals.state = EngineState::Uninitialized;
            return false;
        }

        debug!("Loaded {}", game_file);
        self.internals.state = if restored {
            EngineState::Restored
        } else {
            EngineState::Loaded
        };
        self.game_file = game_file.to_string();

        let mut options = self.game_options();
        if !options.is_empty()
            && load_options(self.store.as_ref(), game_file, &mut options)
            && !self.apply_options(&options)
        {
            warn!("Stored game options don't apply, clearing stored game options");
            clear_options(self.store.as_ref(), game_file);
            return self.load_game(game_file, restored);
        }

        info!("Loaded game {}", game_file);
        history::remember(self.store.as_ref(), game_file);
        self.recorder.handle_game_loaded(game_file);
        self.internals.emit(EngineEvent::GameLoaded {
            game_file: game_file.to_string(),
        });
        self.recorder.invalidate_state();
        true
    }

    /// Deal a new game. A restored game keeps its seed.
    pub fn start(&mut self) -> bool {
        let new_seed = self.internals.state != EngineState::Restored;
        self.start_engine(new_seed)
    }

    /// Deal a new game from a fixed seed
    pub fn start_with_seed(&mut self, seed: u32) -> bool {
        self.internals.seed = seed;
        self.start_engine(false)
    }

    /// Deal the current game again
    pub fn restart(&mut self) -> bool {
        if self.internals.state < EngineState::Begin {
            warn!("Game has not been started yet. Can not restart!");
            return false;
        }
        self.start_engine(false)
    }

    fn start_engine(&mut self, mut new_seed: bool) -> bool {
        debug!("Starting engine");
        if self.internals.state == EngineState::Uninitialized {
            warn!("Game must be initialized first");
            return false;
        }

        if self.recorder.store_old_state() {
            self.internals.emit(EngineEvent::PreviousGameStored(true));
        }
        self.action = 0;
        self.internals.failed = false;
        self.internals.recording_move = false;
        let restoring = self.internals.make_first_move;

        let mut count = 0;
        loop {
            if count > 0 {
                info!("No moves left at the beginning, starting over");
            }
            self.reset_generator(new_seed);
            self.internals.state = EngineState::Begin;
            if let Err(e) = self.start_new_game() {
                warn!("Rules failed while starting new game: {}", e);
            }
            if self.internals.failed {
                return false;
            }
            // Retries always get a fresh deal
            new_seed = true;

            if restoring || !self.is_game_over() {
                break;
            }
            count += 1;
            if count > self.config.max_retries {
                info!("Accepting a deal without moves after {} retries", count - 1);
                break;
            }
        }
        if self.internals.failed {
            return false;
        }

        self.internals.emit_features();
        self.internals.state = EngineState::Running;
        self.update_dealable();
        if self.internals.make_first_move {
            if !self.internals.has_delayed_call() {
                self.internals.make_first_move = false;
                self.begin_replay();
            }
        } else {
            info!("Game started with seed {}", self.internals.seed);
            self.internals.emit(EngineEvent::GameStarted);
            self.recorder.handle_game_started();
            self.test_game_over();
        }
        true
    }

    fn start_new_game(&mut self) -> Result<(), ScriptError> {
        let replaying = self.recorder.replaying();
        let result = self
            .adapter
            .call(Lambda::NewGame, &[], &mut self.internals, replaying)
            .and_then(|_| {
                self.adapter
                    .call_named(NamedCall::StartGame, &[], &mut self.internals, replaying)
            });
        if result.is_err() && !self.internals.failed {
            self.die("Starting new game failed");
        }
        result.map(|_| ())
    }

    fn reset_generator(&mut self, new_seed: bool) {
        if new_seed {
            self.internals.seed = GameRng::fresh_seed();
        }
        self.adapter.rng = GameRng::new(self.internals.seed);
        self.recorder.set_seed(self.internals.seed);
    }

    // ==================== Moves ====================

    pub fn undo_move(&mut self) -> bool {
        if let Err(e) = self.guard() {
            warn!("Can not undo move: {}", e);
            return false;
        }

        if self.internals.state == EngineState::GameOver {
            self.internals.state = EngineState::Running;
            self.internals.emit(EngineEvent::GameContinued);
            self.recorder.handle_game_continued();
        }

        if self.call_named(NamedCall::Undo, &[], "Can not undo move").is_none() {
            return false;
        }

        self.recorder.undo();
        self.finish_history_move();
        true
    }

    pub fn redo_move(&mut self) -> bool {
        if let Err(e) = self.guard() {
            warn!("Can not redo move: {}", e);
            return false;
        }

        if self.call_named(NamedCall::Redo, &[], "Can not redo move").is_none() {
            return false;
        }

        self.recorder.redo();
        self.finish_history_move();
        self.test_game_over();
        true
    }

    fn finish_history_move(&mut self) {
        let origin = self.origin(false);
        self.internals.emit(EngineEvent::MoveEnded { origin });
        self.internals.emit(EngineEvent::MoveFinished);
        self.recorder.handle_move_ended();
        self.update_dealable();
    }

    pub fn deal_card(&mut self) -> bool {
        if let Err(e) = self.guard() {
            warn!("Can not deal a card: {}", e);
            return false;
        }

        self.record_move(None);
        if self
            .call_named(NamedCall::DoDealNextCards, &[], "Can not deal card")
            .is_none()
        {
            return false;
        }
        self.recorder.record_deal();
        self.end_move(false);
        true
    }

    /// Ask the rules for a hint and emit it
    pub fn hint(&mut self) -> Option<String> {
        let data = self.call(Lambda::Hint, &[], "Can not get hint")?;
        let message = format_hint(&data);
        self.internals.emit(EngineEvent::Hint(message.clone()));
        Some(message)
    }

    // ==================== Gestures ====================

    /// Pick up the trailing `cards` of a slot
    pub fn drag(&mut self, id: ActionId, slot: SlotId, cards: &[CardData]) -> bool {
        let checked = check_id(id)
            .and_then(|_| self.guard())
            .and_then(|_| {
                if cards.is_empty() {
                    Err(EngineError::NoCards)
                } else {
                    Ok(())
                }
            })
            .and_then(|_| self.check_on_top(slot, cards));
        if let Err(e) = checked {
            warn!("Tried to start dragging from slot {}: {}", slot, e);
            self.internals.emit(EngineEvent::CouldDrag {
                id,
                slot,
                could: false,
            });
            return false;
        }

        self.record_move(Some(slot));
        let args = [Value::from(slot), Value::Cards(cards.to_vec())];
        let Some(rv) = self.call(Lambda::ButtonPressed, &args, "Can not start drag") else {
            return false;
        };

        let could = rv.is_true();
        if could {
            // The dragged cards are the slot's trailing cards
            let origin = self.origin(true);
            for _ in 0..cards.len() {
                if let Some(card) = self.internals.slots[slot].pop() {
                    let index = self.internals.slots[slot].len();
                    self.internals.emit(EngineEvent::Action {
                        action: Action::Removal { slot, index, card },
                        origin,
                    });
                }
            }
            self.action = id;
        } else {
            self.discard_move();
        }
        self.internals
            .emit(EngineEvent::CouldDrag { id, slot, could });
        could
    }

    /// Put dragged cards back where they came from
    pub fn cancel_drag(&mut self, id: ActionId, slot: SlotId, cards: &[CardData]) {
        if self.action != id {
            warn!(
                "Tried to cancel drag for wrong action {}, current {}",
                id, self.action
            );
            return;
        }

        debug!(
            "Canceling move, putting back {} cards to slot {}",
            cards.len(),
            slot
        );
        self.put_back(slot, cards);
        self.discard_move();
        self.action = 0;
    }

    /// Whether the dragged cards may be dropped onto `end`
    pub fn check_drop(
        &mut self,
        id: ActionId,
        start: SlotId,
        end: SlotId,
        cards: &[CardData],
    ) -> bool {
        if let Err(e) = self.check_gesture(id, cards) {
            warn!("Tried to check drop: {}", e);
            self.internals.emit(EngineEvent::CouldDrop {
                id,
                slot: end,
                could: false,
            });
            return false;
        }

        if !self.internals.has_feature(GameFeatures::DROPPABLE) {
            let could = self.config.droppable_policy == DroppablePolicy::Allow;
            debug!("No droppable feature, answering {}", could);
            self.internals.emit(EngineEvent::CouldDrop {
                id,
                slot: end,
                could,
            });
            return could;
        }

        let args = [
            Value::from(start),
            Value::Cards(cards.to_vec()),
            Value::from(end),
        ];
        let Some(rv) = self.call(
            Lambda::Droppable,
            &args,
            "Can not check if dropping is allowed",
        ) else {
            return false;
        };
        let could = rv.is_true();
        self.internals.emit(EngineEvent::CouldDrop {
            id,
            slot: end,
            could,
        });
        could
    }

    /// Drop the dragged cards onto `end`. Rejected cards return to `start`.
    pub fn drop(&mut self, id: ActionId, start: SlotId, end: SlotId, cards: &[CardData]) -> bool {
        let checked = self.check_gesture(id, cards).and_then(|_| {
            if !self.internals.has_feature(GameFeatures::DROPPABLE)
                && self.config.droppable_policy == DroppablePolicy::Deny
            {
                Err(EngineError::NotDroppable)
            } else {
                Ok(())
            }
        });
        if let Err(e) = checked {
            warn!("Tried to drop cards: {}", e);
            self.internals.emit(EngineEvent::Dropped {
                id,
                slot: end,
                could: false,
            });
            if id != 0 && self.action == id {
                self.put_back(start, cards);
                self.discard_move();
                self.action = 0;
            }
            return false;
        }

        let args = [
            Value::from(start),
            Value::Cards(cards.to_vec()),
            Value::from(end),
        ];
        let Some(rv) = self.call(Lambda::ButtonReleased, &args, "Can not drop") else {
            return false;
        };

        let could = rv.is_true();
        self.internals.emit(EngineEvent::Dropped {
            id,
            slot: end,
            could,
        });
        self.action = 0;
        if could {
            self.recorder.record_drop(start, end, cards.len());
            self.end_move(false);
        } else {
            self.put_back(start, cards);
            self.discard_move();
        }
        could
    }

    pub fn click(&mut self, id: ActionId, slot: SlotId) -> bool {
        if let Err(e) = check_id(id).and_then(|_| self.guard()) {
            warn!("Tried to click: {}", e);
            self.internals.emit(EngineEvent::Clicked {
                id,
                slot,
                could: false,
            });
            return false;
        }

        self.record_move(None);
        let Some(rv) = self.call(Lambda::ButtonClicked, &[Value::from(slot)], "Can not click")
        else {
            return false;
        };

        let could = rv.is_true();
        self.internals.emit(EngineEvent::Clicked { id, slot, could });
        if could {
            self.recorder.record_click(slot);
            self.end_move(false);
        } else {
            self.discard_move();
        }
        could
    }

    pub fn double_click(&mut self, id: ActionId, slot: SlotId) -> bool {
        if let Err(e) = check_id(id).and_then(|_| self.guard()) {
            warn!("Tried to double click: {}", e);
            self.internals.emit(EngineEvent::DoubleClicked {
                id,
                slot,
                could: false,
            });
            return false;
        }

        self.record_move(None);
        let Some(rv) = self.call(
            Lambda::ButtonDoubleClicked,
            &[Value::from(slot)],
            "Can not double click",
        ) else {
            return false;
        };

        let could = rv.is_true();
        self.internals
            .emit(EngineEvent::DoubleClicked { id, slot, could });
        if could {
            self.recorder.record_double_click(slot);
            self.end_move(false);
        } else {
            self.discard_move();
        }
        could
    }

    fn put_back(&mut self, slot: SlotId, cards: &[CardData]) {
        let Some(contents) = self.internals.slots.get(slot) else {
            error!("Can not put cards back to unknown slot {}", slot);
            return;
        };
        let base = contents.len();
        let origin = self.origin(true);
        for (i, card) in cards.iter().enumerate() {
            self.internals.emit(EngineEvent::Action {
                action: Action::insertion(slot, base + i, *card),
                origin,
            });
        }
        self.internals.slots[slot].extend_from_slice(cards);
    }

    // ==================== Guards ====================

    /// Refuse to start a gesture while another one is unresolved
    fn guard(&self) -> Result<(), EngineError> {
        if self.internals.failed {
            Err(EngineError::Failed)
        } else if self.internals.state < EngineState::Running {
            Err(EngineError::NotRunning)
        } else if self.action != 0 {
            Err(EngineError::ActionOngoing(self.action))
        } else if self.internals.has_delayed_call() {
            Err(EngineError::DelayedCallOngoing)
        } else {
            Ok(())
        }
    }

    /// Continuation of the in-flight gesture
    fn check_gesture(&self, id: ActionId, cards: &[CardData]) -> Result<(), EngineError> {
        check_id(id)?;
        if self.internals.failed {
            Err(EngineError::Failed)
        } else if self.action != id {
            Err(EngineError::WrongAction {
                got: id,
                current: self.action,
            })
        } else if cards.is_empty() {
            Err(EngineError::NoCards)
        } else {
            Ok(())
        }
    }

    fn check_on_top(&self, slot: SlotId, cards: &[CardData]) -> Result<(), EngineError> {
        let contents = self
            .internals
            .slots
            .get(slot)
            .ok_or(EngineError::BadSlot(slot))?;
        if cards.len() > contents.len() {
            return Err(EngineError::NotOnTop(slot));
        }
        let top = &contents[contents.len() - cards.len()..];
        if top.iter().zip(cards).all(|(a, b)| a.equal_value(b)) {
            Ok(())
        } else {
            Err(EngineError::NotOnTop(slot))
        }
    }

    // ==================== Move bookkeeping ====================

    fn origin(&self, engine: bool) -> ActionOrigin {
        ActionOrigin {
            engine,
            replay: self.recorder.replaying(),
        }
    }

    fn record_move(&mut self, slot: Option<SlotId>) {
        let cards = slot.map(|id| self.internals.slot(id)).unwrap_or_default();
        debug!(
            "Start recording move for slot {:?} with {} cards",
            slot,
            cards.len()
        );
        if self.internals.recording_move {
            error!("There was already a move ongoing");
        }
        self.internals.recording_move = true;

        let slot = slot.map(|id| id as i64).unwrap_or(-1);
        let args = [Value::Int(slot), Value::Cards(cards)];
        self.call_named(NamedCall::RecordMove, &args, "Can not record move");
    }

    fn end_move(&mut self, from_delayed_call: bool) {
        debug!("End recorded move");
        if self
            .call_named(NamedCall::EndMove, &[], "Can not end move")
            .is_some()
        {
            let origin = self.origin(false);
            self.internals.emit(EngineEvent::MoveEnded { origin });
        }

        if !from_delayed_call {
            if !self.internals.recording_move {
                warn!("There was no move ongoing when ending move");
            }
            self.internals.recording_move = false;
        }

        self.update_dealable();
        if !self.internals.has_delayed_call() {
            self.internals.emit(EngineEvent::MoveFinished);
            self.recorder.handle_move_ended();
        }
        if !self.recorder.replaying() {
            self.test_game_over();
        }
    }

    fn discard_move(&mut self) {
        debug!("Discard recorded move");
        self.call_named(NamedCall::DiscardMove, &[], "Can not discard move");
        if !self.internals.recording_move {
            warn!("There was no move ongoing when discarding move");
        }
        self.internals.recording_move = false;
    }

    fn update_dealable(&mut self) {
        if self.internals.has_feature(GameFeatures::DEALABLE) {
            if let Some(rv) = self.call(Lambda::Dealable, &[], "Can not check dealable") {
                self.internals.set_can_deal(rv.is_true());
            }
        }
    }

    fn is_game_over(&mut self) -> bool {
        self.call(Lambda::GameOver, &[], "Can not check if game is over")
            .map(|rv| !rv.is_true())
            .unwrap_or(false)
    }

    fn is_winning_game(&mut self) -> bool {
        self.call(Lambda::WinningGame, &[], "Can not check if game is won")
            .map(|rv| rv.is_true())
            .unwrap_or(false)
    }

    fn test_game_over(&mut self) {
        if self.internals.state < EngineState::GameOver && self.is_game_over() {
            self.internals.state = EngineState::GameOver;
            let won = self.is_winning_game();
            info!("Game over, {}", if won { "won" } else { "lost" });
            self.internals.emit(EngineEvent::GameOver { won });
            self.recorder.handle_game_over();
        }
    }

    // ==================== Delayed calls ====================

    /// The delayed callback waiting to fire, if any
    pub fn pending_delayed_call(&self) -> Option<PendingDelayedCall> {
        self.internals.delayed.map(|call| PendingDelayedCall {
            generation: call.generation,
            delay: if self.recorder.replaying() {
                Duration::ZERO
            } else {
                self.config.delayed_call_delay(self.store.as_ref())
            },
        })
    }

    /// Run the pending delayed callback. Stale generations are ignored.
    pub fn fire_delayed_call(&mut self, generation: u64) -> bool {
        let Some(call) = self.internals.delayed else {
            return false;
        };
        if call.generation != generation {
            debug!(
                "Ignoring stale delayed call {}, current {}",
                generation, call.generation
            );
            return false;
        }

        // The callback may set up another delayed call
        self.internals.clear_delayed_call();
        if self.invoke(call.handle, "Delayed call failed").is_none() {
            return false;
        }
        self.end_move(true);

        if self.internals.make_first_move && !self.internals.has_delayed_call() {
            self.internals.make_first_move = false;
            self.begin_replay();
        }
        true
    }

    /// Fire delayed callbacks back to back until none is pending
    pub fn run_delayed_calls(&mut self) -> usize {
        let mut fired = 0;
        while let Some(call) = self.internals.delayed {
            if !self.fire_delayed_call(call.generation) {
                break;
            }
            fired += 1;
        }
        fired
    }

    // ==================== Options ====================

    fn game_options(&mut self) -> Vec<GameOption> {
        self.call(Lambda::GetOptions, &[], "Can not get game options")
            .map(|value| parse_options(&value))
            .unwrap_or_default()
    }

    /// Emit the current game options
    pub fn request_game_options(&mut self) -> Vec<GameOption> {
        let options = self.game_options();
        self.internals
            .emit(EngineEvent::GameOptions(options.clone()));
        options
    }

    pub fn set_game_option(&mut self, option: &GameOption) -> bool {
        self.set_game_options(std::slice::from_ref(option))
    }

    /// Apply options and remember them for this game file
    pub fn set_game_options(&mut self, options: &[GameOption]) -> bool {
        debug!("Setting {} options", options.len());
        if !self.apply_options(options) {
            return false;
        }
        let current = self.game_options();
        save_options(self.store.as_ref(), &self.game_file, &current);
        true
    }

    fn apply_options(&mut self, options: &[GameOption]) -> bool {
        let Some(value) = self.call(Lambda::GetOptions, &[], "Can not get options") else {
            return false;
        };
        if value.as_list().is_none() {
            warn!("Game doesn't have options but tried to set options anyway");
            return false;
        }
        let Some(updated) = apply_to_value(&value, options) else {
            return false;
        };

        // Recorded moves may not reproduce with other options
        self.recorder.invalidate_state();

        let replaying = self.recorder.replaying();
        match self
            .adapter
            .call(Lambda::ApplyOptions, &[updated], &mut self.internals, replaying)
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Can not apply options: {}", e);
                false
            }
        }
    }

    // ==================== Persistence ====================

    /// Restore the saved session. The client starts it with [`Engine::start`].
    pub fn restore_saved_state(&mut self) -> bool {
        if self.internals.state > EngineState::Uninitialized
            && self.internals.state < EngineState::GameOver
        {
            warn!("Engine running, can not restore saved state");
            return false;
        }

        self.internals.make_first_move = true;
        match self.recorder.start_replay() {
            Ok(start) => self.handle_replay_game(start),
            Err(e) => {
                debug!("Nothing to restore: {}", e);
                self.handle_replay_completed(ReplayStatus::Failed);
                false
            }
        }
    }

    /// Restore the saved session or load `fallback` when there is none
    pub fn restore_saved_or_load(&mut self, fallback: &str) -> bool {
        self.restore_saved_state() || self.load(fallback)
    }

    pub fn save_state(&mut self) {
        self.recorder.save();
    }

    /// Forget the saved session
    pub fn reset_saved_state(&mut self) {
        self.recorder.invalidate_state();
        self.recorder.clear();
        remove_or_warn(self.store.as_ref(), STATE_KEY);
        debug!("Reset saved state");
    }

    /// Bring back the game that was running before the last new game
    pub fn restore_previous_game(&mut self) -> bool {
        if self.internals.recording_move {
            warn!("Cannot restore previous game while move is ongoing");
            return false;
        }
        if self.recorder.replaying() {
            warn!("Cannot restore previous game while replaying a game");
            return false;
        }

        let Some(start) = self.recorder.restore_old_state() else {
            return false;
        };
        self.internals.emit(EngineEvent::PreviousGameStored(false));
        self.internals.make_first_move = true;
        self.handle_replay_game(start)
    }

    pub fn forget_previous_game(&mut self) {
        if self.recorder.drop_old_state() {
            self.internals.emit(EngineEvent::PreviousGameStored(false));
        }
    }

    fn handle_replay_game(&mut self, start: ReplayStart) -> bool {
        if let Some(seed) = start.seed {
            self.internals.seed = seed;
        }
        if !self.load_game(&start.game_file, start.seed.is_some()) {
            self.handle_replay_completed(ReplayStatus::Failed);
            return false;
        }
        if start.elapsed_ms > 0 {
            self.internals.emit(EngineEvent::RestoreStarted {
                elapsed_ms: start.elapsed_ms,
            });
        }
        debug!(
            "Restored game {} {} seed {:?}",
            start.game_file,
            if start.seed.is_some() { "with" } else { "without" },
            start.seed
        );
        true
    }

    fn begin_replay(&mut self) {
        self.recorder.replay_move();
        let status = self.continue_replay();
        self.handle_replay_completed(status);
    }

    fn continue_replay(&mut self) -> ReplayStatus {
        loop {
            // Follow-ups fire without waiting while replaying
            while let Some(call) = self.internals.delayed {
                if !self.fire_delayed_call(call.generation) {
                    break;
                }
            }
            if self.internals.failed {
                return self.abandon_replay();
            }

            match self.recorder.next_step() {
                ReplayStep::Completed => return ReplayStatus::Success,
                ReplayStep::Replay(record) => {
                    if self.replay_record(record) && !self.internals.failed {
                        info!("Replayed {}", record);
                        self.recorder.advance();
                    } else {
                        warn!("Failed to replay {}", record);
                        return self.abandon_replay();
                    }
                }
            }
        }
    }

    fn abandon_replay(&mut self) -> ReplayStatus {
        self.action = 0;
        let status = if self.internals.failed {
            self.recorder.handle_engine_failure()
        } else {
            None
        };
        status.unwrap_or_else(|| self.recorder.fail())
    }

    fn replay_record(&mut self, record: Record) -> bool {
        let id = REPLAY_ACTION_ID;
        match record {
            Record::Deal => self.deal_card(),
            Record::Move { start, end, count } => {
                let cards = self.cards(start, count);
                if cards.len() != count {
                    error!(
                        "Got unexpected number of cards {} instead of {}",
                        cards.len(),
                        count
                    );
                    return false;
                }
                if !self.drag(id, start, &cards) {
                    return false;
                }
                if !self.check_drop(id, start, end, &cards) {
                    self.cancel_drag(id, start, &cards);
                    return false;
                }
                self.drop(id, start, end, &cards)
            }
            Record::Click(slot) => self.click(id, slot),
            Record::DoubleClick(slot) => self.double_click(id, slot),
        }
    }

    fn handle_replay_completed(&mut self, status: ReplayStatus) {
        self.internals.make_first_move = false;
        match status {
            ReplayStatus::NeedsRestart => {
                self.internals.emit(EngineEvent::RestoreCompleted {
                    success: true,
                    resumed: false,
                });
                warn!("Replay failed and engine needs restart");
                // The abandoned session must not be kept as a previous game
                self.recorder.invalidate_state();
                self.restart();
            }
            ReplayStatus::Success => {
                self.internals.emit(EngineEvent::RestoreCompleted {
                    success: true,
                    resumed: true,
                });
                debug!("Replay succeeded");
                self.internals.emit(EngineEvent::GameStarted);
                self.test_game_over();
            }
            ReplayStatus::Failed => {
                self.internals.emit(EngineEvent::RestoreCompleted {
                    success: false,
                    resumed: false,
                });
                debug!("Replay failed");
            }
        }
    }

    // ==================== Rules calls ====================

    /// Call an entry point, failing the engine when the rules fail
    fn call(&mut self, lambda: Lambda, args: &[Value], failure: &str) -> Option<Value> {
        let replaying = self.recorder.replaying();
        let result = self
            .adapter
            .call(lambda, args, &mut self.internals, replaying);
        self.settle(result, failure)
    }

    fn call_named(&mut self, call: NamedCall, args: &[Value], failure: &str) -> Option<Value> {
        let replaying = self.recorder.replaying();
        let result = self
            .adapter
            .call_named(call, args, &mut self.internals, replaying);
        self.settle(result, failure)
    }

    fn invoke(&mut self, handle: RuleHandle, failure: &str) -> Option<Value> {
        let replaying = self.recorder.replaying();
        let result = self
            .adapter
            .invoke(handle, &[], &mut self.internals, replaying);
        self.settle(result, failure)
    }

    fn settle(&mut self, result: Result<Value, ScriptError>, failure: &str) -> Option<Value> {
        match result {
            Ok(_) if self.internals.failed => None,
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{}: {}", failure, e);
                if !self.internals.failed {
                    self.die(failure);
                }
                None
            }
        }
    }

    /// Fatal error, the session can not continue
    fn die(&mut self, message: &str) {
        self.internals.die(message);
    }
}

/// Turn the rules' hint value into a message
fn format_hint(data: &Value) -> String {
    let not_supported = || "Hints are not supported".to_string();
    let Some(items) = data.as_list() else {
        return not_supported();
    };
    let text = |i: usize| {
        items
            .get(i)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    };
    match items.first().and_then(Value::as_int) {
        Some(0) => text(1)
            .map(|msg| msg.strip_suffix('.').unwrap_or(msg).to_string())
            .unwrap_or_else(not_supported),
        Some(1) | Some(2) => match (text(1), text(2)) {
            (Some(a), Some(b)) => format!("Move {a} onto {b}"),
            _ => not_supported(),
        },
        _ => not_supported(),
    }
}

/// Gestures need a nonzero id, zero marks no gesture in flight
fn check_id(id: ActionId) -> Result<(), EngineError> {
    if id == 0 {
        Err(EngineError::InvalidActionId)
    } else {
        Ok(())
    }
}
