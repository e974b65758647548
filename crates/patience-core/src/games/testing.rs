//! In-memory host for exercising rules without an engine.

use crate::card::CardList;
use crate::engine::GameRng;
use crate::rules::{GameFeatures, Lambda, LambdaTable, RuleHandle, RulesHost};
use crate::slot::{SlotId, SlotSpec};

pub(crate) struct RecordingHost {
    pub slots: Vec<CardList>,
    pub features: GameFeatures,
    pub lambdas: LambdaTable,
    pub rng: GameRng,
    pub score: i32,
    pub timeout: i32,
    pub message: String,
    pub delayed: Option<RuleHandle>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub can_deal: bool,
}

impl RecordingHost {
    pub fn new(seed: u32) -> Self {
        Self {
            slots: Vec::new(),
            features: GameFeatures::NONE,
            lambdas: LambdaTable::default(),
            rng: GameRng::new(seed),
            score: 0,
            timeout: 0,
            message: String::new(),
            delayed: None,
            can_undo: false,
            can_redo: false,
            can_deal: false,
        }
    }
}

impl RulesHost for RecordingHost {
    fn features(&self) -> GameFeatures {
        self.features
    }

    fn set_features(&mut self, features: GameFeatures) {
        self.features = features;
    }

    fn set_message(&mut self, message: &str) {
        self.message = message.to_string();
    }

    fn reset_surface(&mut self) {
        self.slots.clear();
        self.delayed = None;
    }

    fn add_slot(&mut self, spec: SlotSpec) {
        if spec.id >= self.slots.len() {
            self.slots.resize(spec.id + 1, CardList::new());
        }
        self.slots[spec.id] = spec.cards;
    }

    fn slot(&self, id: SlotId) -> CardList {
        self.slots.get(id).cloned().unwrap_or_default()
    }

    fn set_cards(&mut self, id: SlotId, cards: CardList) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = cards;
        }
    }

    fn set_expansion_to_down(&mut self, _id: SlotId, _expansion: f64) {}

    fn set_expansion_to_right(&mut self, _id: SlotId, _expansion: f64) {}

    fn set_lambdas(&mut self, handles: &[RuleHandle]) {
        self.lambdas.set_all(handles);
    }

    fn set_lambda(&mut self, lambda: Lambda, handle: RuleHandle) {
        self.lambdas.set(lambda, handle);
    }

    fn random(&mut self, n: u32) -> u32 {
        self.rng.below(n)
    }

    fn set_score(&mut self, score: i32) {
        self.score = score;
    }

    fn timeout(&self) -> i32 {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: i32) {
        self.timeout = timeout;
    }

    fn delayed_call(&mut self, callback: RuleHandle) -> bool {
        if self.delayed.is_some() {
            return false;
        }
        self.delayed = Some(callback);
        true
    }

    fn set_can_undo(&mut self, can: bool) {
        self.can_undo = can;
    }

    fn set_can_redo(&mut self, can: bool) {
        self.can_redo = can;
    }

    fn set_can_deal(&mut self, can: bool) {
        self.can_deal = can;
    }
}
