//! Rules engine boundary.
//!
//! The rules of one specific game live behind the [`Rules`] trait. The
//! engine calls into the rules through registered entry points
//! ([`Lambda`]) and free-form named calls ([`NamedCall`]); the rules call
//! back into the engine through the [`RulesHost`] surface.

use crate::card::CardList;
use crate::slot::{SlotId, SlotSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ==================== Values ====================

/// A value crossing the rules boundary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Unspecified,
    Bool(bool),
    Int(i64),
    Str(String),
    Cards(CardList),
    List(Vec<Value>),
}

impl Value {
    /// Truthiness the way the rules see it: only `Bool(false)` is false
    pub fn is_true(&self) -> bool {
        !matches!(self, Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cards(&self) -> Option<&CardList> {
        match self {
            Value::Cards(cards) => Some(cards),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<SlotId> for Value {
    fn from(value: SlotId) -> Self {
        Value::Int(value as i64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<CardList> for Value {
    fn from(value: CardList) -> Self {
        Value::Cards(value)
    }
}

// ==================== Entry points ====================

/// Entry points a game registers when it is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lambda {
    NewGame,
    ButtonPressed,
    ButtonReleased,
    ButtonClicked,
    ButtonDoubleClicked,
    /// Answers whether any moves are left
    GameOver,
    WinningGame,
    Hint,
    GetOptions,
    ApplyOptions,
    Timeout,
    Droppable,
    Dealable,
}

impl Lambda {
    /// All entry points in registration order
    pub const ALL: [Lambda; 13] = [
        Lambda::NewGame,
        Lambda::ButtonPressed,
        Lambda::ButtonReleased,
        Lambda::ButtonClicked,
        Lambda::ButtonDoubleClicked,
        Lambda::GameOver,
        Lambda::WinningGame,
        Lambda::Hint,
        Lambda::GetOptions,
        Lambda::ApplyOptions,
        Lambda::Timeout,
        Lambda::Droppable,
        Lambda::Dealable,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Entry points up to and including this one must be registered
    pub const LAST_MANDATORY: Lambda = Lambda::Timeout;

    /// Position in registration order
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_mandatory(self) -> bool {
        self.index() <= Self::LAST_MANDATORY.index()
    }

    /// Textual name of the entry point
    pub fn name(self) -> &'static str {
        match self {
            Lambda::NewGame => "new-game",
            Lambda::ButtonPressed => "button-pressed",
            Lambda::ButtonReleased => "button-released",
            Lambda::ButtonClicked => "button-clicked",
            Lambda::ButtonDoubleClicked => "button-double-clicked",
            Lambda::GameOver => "game-over",
            Lambda::WinningGame => "winning-game",
            Lambda::Hint => "hint",
            Lambda::GetOptions => "get-options",
            Lambda::ApplyOptions => "apply-options",
            Lambda::Timeout => "timeout",
            Lambda::Droppable => "droppable",
            Lambda::Dealable => "dealable",
        }
    }

    /// Entry point by its textual name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|lambda| lambda.name() == name)
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Free-form calls every game provides without registering them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedCall {
    StartGame,
    Undo,
    Redo,
    RecordMove,
    EndMove,
    DiscardMove,
    DoDealNextCards,
}

impl NamedCall {
    pub fn name(self) -> &'static str {
        match self {
            NamedCall::StartGame => "start-game",
            NamedCall::Undo => "undo",
            NamedCall::Redo => "redo",
            NamedCall::RecordMove => "record-move",
            NamedCall::EndMove => "end-move",
            NamedCall::DiscardMove => "discard-move",
            NamedCall::DoDealNextCards => "do-deal-next-cards",
        }
    }
}

impl fmt::Display for NamedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle to a callable inside the rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleHandle(pub u32);

/// Registered entry points of the loaded game
#[derive(Debug, Clone, Default)]
pub struct LambdaTable {
    handles: [Option<RuleHandle>; Lambda::COUNT],
}

impl LambdaTable {
    pub fn get(&self, lambda: Lambda) -> Option<RuleHandle> {
        self.handles[lambda.index()]
    }

    pub fn set(&mut self, lambda: Lambda, handle: RuleHandle) {
        self.handles[lambda.index()] = Some(handle);
    }

    /// Register handles in [`Lambda::ALL`] order, extra handles are ignored
    pub fn set_all(&mut self, handles: &[RuleHandle]) {
        for (lambda, handle) in Lambda::ALL.iter().zip(handles) {
            self.set(*lambda, *handle);
        }
    }

    pub fn clear(&mut self) {
        self.handles = [None; Lambda::COUNT];
    }

    /// First mandatory entry point that was not registered
    pub fn missing_mandatory(&self) -> Option<Lambda> {
        Lambda::ALL
            .iter()
            .copied()
            .filter(|lambda| lambda.is_mandatory())
            .find(|lambda| self.get(*lambda).is_none())
    }
}

// ==================== Features ====================

/// Feature bitmask a game sets while loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameFeatures(pub u32);

impl GameFeatures {
    pub const NONE: GameFeatures = GameFeatures(0);
    pub const DROPPABLE: GameFeatures = GameFeatures(0x01);
    pub const SCORE_HIDDEN: GameFeatures = GameFeatures(0x02);
    pub const DEALABLE: GameFeatures = GameFeatures(0x04);

    pub fn contains(self, other: GameFeatures) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for GameFeatures {
    type Output = GameFeatures;

    fn bitor(self, rhs: GameFeatures) -> GameFeatures {
        GameFeatures(self.0 | rhs.0)
    }
}

// ==================== Errors ====================

/// Failures raised inside the rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("no rules for game file {0}")]
    UnknownGame(String),

    #[error("loading {game_file} failed: {message}")]
    LoadFailed { game_file: String, message: String },

    #[error("entry point {0} is not registered")]
    MissingLambda(&'static str),

    #[error("unknown rule handle {0}")]
    UnknownHandle(u32),

    #[error("bad arguments to {call}: {message}")]
    BadArguments { call: String, message: String },

    #[error("{call} failed: {message}")]
    CallFailed { call: String, message: String },

    #[error("no game loaded")]
    NotLoaded,
}

impl ScriptError {
    pub fn bad_arguments(call: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::BadArguments {
            call: call.into(),
            message: message.into(),
        }
    }

    pub fn call_failed(call: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::CallFailed {
            call: call.into(),
            message: message.into(),
        }
    }
}

// ==================== Traits ====================

/// What the rules may ask of the engine
pub trait RulesHost {
    fn features(&self) -> GameFeatures;
    fn set_features(&mut self, features: GameFeatures);

    /// Status bar message
    fn set_message(&mut self, message: &str);

    /// Drop every slot, the game is about to lay out a new table
    fn reset_surface(&mut self);

    fn add_slot(&mut self, spec: SlotSpec);

    /// Canonical contents of a slot, empty for unknown slots
    fn slot(&self, id: SlotId) -> CardList;

    /// Replace a slot's contents; the engine emits the minimal mutations
    fn set_cards(&mut self, id: SlotId, cards: CardList);

    fn set_expansion_to_down(&mut self, id: SlotId, expansion: f64);
    fn set_expansion_to_right(&mut self, id: SlotId, expansion: f64);

    /// Register entry points in [`Lambda::ALL`] order
    fn set_lambdas(&mut self, handles: &[RuleHandle]);
    fn set_lambda(&mut self, lambda: Lambda, handle: RuleHandle);

    /// Uniformly random integer in `[0, n)`
    fn random(&mut self, n: u32) -> u32;

    fn set_score(&mut self, score: i32);

    fn timeout(&self) -> i32;
    fn set_timeout(&mut self, timeout: i32);

    /// Ask to be called back shortly. Refused while another call is pending.
    fn delayed_call(&mut self, callback: RuleHandle) -> bool;

    fn set_can_undo(&mut self, can: bool);
    fn set_can_redo(&mut self, can: bool);
    fn set_can_deal(&mut self, can: bool);
}

/// Rules of one game
pub trait Rules: Send {
    /// Lay out the table and register entry points
    fn load(&mut self, host: &mut dyn RulesHost) -> Result<(), ScriptError>;

    /// Call a registered entry point or a delayed callback
    fn invoke(
        &mut self,
        handle: RuleHandle,
        args: &[Value],
        host: &mut dyn RulesHost,
    ) -> Result<Value, ScriptError>;

    /// Call one of the free-form entry points
    fn invoke_named(
        &mut self,
        call: NamedCall,
        args: &[Value],
        host: &mut dyn RulesHost,
    ) -> Result<Value, ScriptError>;
}

/// Read an integer argument
pub fn int_arg(call: &str, args: &[Value], position: usize) -> Result<i64, ScriptError> {
    args.get(position)
        .and_then(Value::as_int)
        .ok_or_else(|| ScriptError::bad_arguments(call, format!("expected integer at {position}")))
}

/// Read a card list argument
pub fn cards_arg<'a>(
    call: &str,
    args: &'a [Value],
    position: usize,
) -> Result<&'a CardList, ScriptError> {
    args.get(position)
        .and_then(Value::as_cards)
        .ok_or_else(|| ScriptError::bad_arguments(call, format!("expected cards at {position}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Bool(false).is_true());
        assert!(Value::Bool(true).is_true());
        assert!(Value::Int(0).is_true());
        assert!(Value::Unspecified.is_true());
        assert!(Value::List(vec![]).is_true());
    }

    #[test]
    fn test_lambda_names_round_trip() {
        for lambda in Lambda::ALL {
            assert_eq!(Lambda::from_name(lambda.name()), Some(lambda));
        }
        assert_eq!(Lambda::COUNT, 13);
        assert!(Lambda::Timeout.is_mandatory());
        assert!(!Lambda::Droppable.is_mandatory());
    }

    #[test]
    fn test_lambda_table() {
        let mut table = LambdaTable::default();
        assert_eq!(table.missing_mandatory(), Some(Lambda::NewGame));

        let handles: Vec<RuleHandle> = (0..11).map(RuleHandle).collect();
        table.set_all(&handles);
        assert_eq!(table.missing_mandatory(), None);
        assert_eq!(table.get(Lambda::Hint), Some(RuleHandle(7)));
        assert_eq!(table.get(Lambda::Dealable), None);

        table.clear();
        assert_eq!(table.get(Lambda::Hint), None);
    }

    #[test]
    fn test_features() {
        let features = GameFeatures::DROPPABLE | GameFeatures::DEALABLE;
        assert!(features.contains(GameFeatures::DROPPABLE));
        assert!(!features.contains(GameFeatures::SCORE_HIDDEN));
        assert_eq!(features.0, 0x05);
    }

    #[test]
    fn test_argument_helpers() {
        let args = vec![Value::Int(3), Value::Cards(vec![])];
        assert_eq!(int_arg("button-pressed", &args, 0), Ok(3));
        assert!(cards_arg("button-pressed", &args, 1).unwrap().is_empty());
        assert!(matches!(
            int_arg("button-pressed", &args, 1),
            Err(ScriptError::BadArguments { .. })
        ));
    }
}
