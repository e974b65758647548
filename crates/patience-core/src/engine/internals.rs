//! Engine state shared with the rules through the host surface.

use super::adapter::GameRng;
use super::EngineState;
use crate::actions::{Action, ActionOrigin, EngineEvent};
use crate::card::CardList;
use crate::rules::{GameFeatures, Lambda, LambdaTable, RuleHandle, RulesHost};
use crate::slot::{SlotId, SlotSpec};
use tracing::{debug, error, warn};

/// Pending delayed callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DelayedCall {
    pub handle: RuleHandle,
    pub generation: u64,
}

/// Canonical table and everything the rules can touch
#[derive(Debug)]
pub(crate) struct Internals {
    pub slots: Vec<CardList>,
    pub features: GameFeatures,
    pub state: EngineState,
    pub timeout: i32,
    pub seed: u32,
    pub recording_move: bool,
    /// A restored session waits for its first replayed move
    pub make_first_move: bool,
    pub delayed: Option<DelayedCall>,
    generation: u64,
    /// Set by a fatal error until a game is loaded or started again
    pub failed: bool,
    events: Vec<EngineEvent>,
}

impl Default for Internals {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            features: GameFeatures::NONE,
            state: EngineState::Uninitialized,
            timeout: 0,
            seed: 0,
            recording_move: false,
            make_first_move: false,
            delayed: None,
            generation: 0,
            failed: false,
            events: Vec::new(),
        }
    }
}

impl Internals {
    pub fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_feature(&self, feature: GameFeatures) -> bool {
        self.features.contains(feature)
    }

    /// Drop the table. With `reset_data` the game itself is forgotten too.
    pub fn clear(&mut self, reset_data: bool) {
        if reset_data {
            self.state = EngineState::Uninitialized;
            self.features = GameFeatures::NONE;
        }
        self.set_can_undo(false);
        self.set_can_redo(false);
        self.set_can_deal(false);
        self.slots.clear();
        self.clear_delayed_call();
        self.emit(EngineEvent::ClearData);
    }

    pub fn slot(&self, id: SlotId) -> CardList {
        self.slots.get(id).cloned().unwrap_or_default()
    }

    pub fn add_slot(&mut self, spec: SlotSpec) {
        if spec.id != self.slots.len() {
            warn!(
                "Unexpected slot id while adding slots! Got {} but expected {}",
                spec.id,
                self.slots.len()
            );
        }
        if spec.id >= self.slots.len() {
            self.slots.resize(spec.id + 1, CardList::new());
        }
        self.slots[spec.id] = spec.cards.clone();
        self.emit(EngineEvent::NewSlot(spec));
    }

    fn action(&mut self, action: Action, origin: ActionOrigin) {
        self.emit(EngineEvent::Action { action, origin });
    }

    /// Replace slot contents, emitting the mutations that turn the old
    /// contents into the new ones
    pub fn set_cards(&mut self, id: SlotId, cards: CardList, origin: ActionOrigin) {
        if id >= self.slots.len() {
            error!("Tried to set cards of unknown slot {}", id);
            self.die("Invalid slot id");
            return;
        }

        if cards.is_empty() {
            if !self.slots[id].is_empty() {
                debug!("Clearing slot {}", id);
                self.slots[id].clear();
                self.action(Action::Clearing { slot: id }, origin);
            }
            return;
        }

        // Walk both lists from the bottom card up
        let mut i = 0;
        let mut j = 0;
        while j < cards.len() && i < self.slots[id].len() {
            let new = cards[j];
            let old = self.slots[id][i];
            if old.equal_value(&new) {
                if old.show != new.show {
                    debug!("Flipping {} in slot {} at index {}", new, id, i);
                    self.slots[id][i].show = new.show;
                    self.action(
                        Action::Flip {
                            slot: id,
                            index: i,
                            card: new,
                        },
                        origin,
                    );
                }
                i += 1;
                j += 1;
            } else {
                debug!("Removing {} from slot {} from index {}", old, id, i);
                let card = self.slots[id].remove(i);
                self.action(
                    Action::Removal {
                        slot: id,
                        index: i,
                        card,
                    },
                    origin,
                );
            }
        }
        while self.slots[id].len() > i {
            let index = self.slots[id].len() - 1;
            if let Some(card) = self.slots[id].pop() {
                debug!("Remove {} from slot {} from index {}", card, id, index);
                self.action(
                    Action::Removal {
                        slot: id,
                        index,
                        card,
                    },
                    origin,
                );
            }
        }
        for card in &cards[j..] {
            let index = self.slots[id].len();
            debug!("Appending {} to slot {} to index {}", card, id, index);
            self.slots[id].push(*card);
            self.action(Action::insertion(id, index, *card), origin);
        }

        if self.slots[id] != cards {
            self.die("Cards don't match!");
        }
    }

    pub fn set_can_undo(&mut self, can: bool) {
        debug!("{} undo", if can { "Can" } else { "Can't" });
        self.emit(EngineEvent::CanUndo(can));
    }

    pub fn set_can_redo(&mut self, can: bool) {
        debug!("{} redo", if can { "Can" } else { "Can't" });
        self.emit(EngineEvent::CanRedo(can));
    }

    pub fn set_can_deal(&mut self, can: bool) {
        debug!("{} deal", if can { "Can" } else { "Can't" });
        self.emit(EngineEvent::CanDeal(can));
    }

    pub fn emit_features(&mut self) {
        let show_score = !self.has_feature(GameFeatures::SCORE_HIDDEN);
        let show_deal = self.has_feature(GameFeatures::DEALABLE);
        self.emit(EngineEvent::ShowScore(show_score));
        self.emit(EngineEvent::ShowDeal(show_deal));
    }

    // ==================== Delayed calls ====================

    pub fn has_delayed_call(&self) -> bool {
        self.delayed.is_some()
    }

    pub fn setup_delayed_call(&mut self, handle: RuleHandle) -> bool {
        if self.delayed.is_some() {
            return false;
        }
        self.generation += 1;
        self.delayed = Some(DelayedCall {
            handle,
            generation: self.generation,
        });
        true
    }

    pub fn clear_delayed_call(&mut self) {
        self.delayed = None;
    }

    // ==================== Failure ====================

    /// Fatal error, interaction must stop
    pub fn die(&mut self, message: &str) {
        error!("Engine failure: {}", message);
        self.failed = true;
        self.emit(EngineEvent::EngineFailure {
            message: message.to_string(),
        });
    }
}

/// The host surface handed to the rules for the duration of one call
pub(crate) struct Host<'a> {
    internals: &'a mut Internals,
    lambdas: &'a mut LambdaTable,
    rng: &'a mut GameRng,
    replaying: bool,
}

impl<'a> Host<'a> {
    pub fn new(
        internals: &'a mut Internals,
        lambdas: &'a mut LambdaTable,
        rng: &'a mut GameRng,
        replaying: bool,
    ) -> Self {
        Self {
            internals,
            lambdas,
            rng,
            replaying,
        }
    }
}

impl RulesHost for Host<'_> {
    fn features(&self) -> GameFeatures {
        self.internals.features
    }

    fn set_features(&mut self, features: GameFeatures) {
        debug!("Setting features to {:#x}", features.0);
        self.internals.features = features;
    }

    fn set_message(&mut self, message: &str) {
        debug!("Message changed to {}", message);
        self.internals.emit(EngineEvent::Message(message.to_string()));
    }

    fn reset_surface(&mut self) {
        self.internals.clear(false);
    }

    fn add_slot(&mut self, spec: SlotSpec) {
        self.internals.add_slot(spec);
    }

    fn slot(&self, id: SlotId) -> CardList {
        self.internals.slot(id)
    }

    fn set_cards(&mut self, id: SlotId, cards: CardList) {
        let origin = ActionOrigin {
            engine: false,
            replay: self.replaying,
        };
        self.internals.set_cards(id, cards, origin);
    }

    fn set_expansion_to_down(&mut self, id: SlotId, expansion: f64) {
        self.internals
            .emit(EngineEvent::ExpansionToDown { slot: id, expansion });
    }

    fn set_expansion_to_right(&mut self, id: SlotId, expansion: f64) {
        self.internals
            .emit(EngineEvent::ExpansionToRight { slot: id, expansion });
    }

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
        debug!("Score updated to {}", score);
        self.internals.emit(EngineEvent::Score(score));
    }

    fn timeout(&self) -> i32 {
        self.internals.timeout
    }

    fn set_timeout(&mut self, timeout: i32) {
        self.internals.timeout = timeout;
    }

    fn delayed_call(&mut self, callback: RuleHandle) -> bool {
        debug!("Creating delayed call");
        self.internals.setup_delayed_call(callback)
    }

    fn set_can_undo(&mut self, can: bool) {
        self.internals.set_can_undo(can);
    }

    fn set_can_redo(&mut self, can: bool) {
        self.internals.set_can_redo(can);
    }

    fn set_can_deal(&mut self, can: bool) {
        self.internals.set_can_deal(can);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardData, Rank, Suit};
    use crate::slot::{SlotLayout, SlotType};
    use pretty_assertions::assert_eq;

    fn card(suit: Suit, rank: u8, show: bool) -> CardData {
        CardData::new(suit, Rank::new(rank).unwrap(), show)
    }

    fn internals_with(cards: CardList) -> Internals {
        let mut internals = Internals::default();
        internals.add_slot(SlotSpec {
            id: 0,
            cards,
            slot_type: SlotType::Tableau,
            layout: SlotLayout::fanned_down(0.0, 0.0),
        });
        internals.take_events();
        internals
    }

    fn actions(internals: &mut Internals) -> Vec<Action> {
        internals
            .take_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Action { action, .. } => Some(action),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_set_cards_flips_top() {
        let a = card(Suit::Spades, 5, false);
        let b = card(Suit::Hearts, 9, false);
        let mut internals = internals_with(vec![a, b]);

        internals.set_cards(0, vec![a, b.with_show(true)], ActionOrigin::default());
        assert_eq!(
            actions(&mut internals),
            vec![Action::Flip {
                slot: 0,
                index: 1,
                card: b.with_show(true)
            }]
        );
        assert!(!internals.failed);
    }

    #[test]
    fn test_set_cards_removes_and_inserts() {
        let a = card(Suit::Spades, 1, true);
        let b = card(Suit::Hearts, 2, true);
        let c = card(Suit::Clubs, 3, true);
        let mut internals = internals_with(vec![a, b]);

        internals.set_cards(0, vec![a, c], ActionOrigin::default());
        assert_eq!(
            actions(&mut internals),
            vec![
                Action::Removal {
                    slot: 0,
                    index: 1,
                    card: b
                },
                Action::insertion(0, 1, c),
            ]
        );
        assert_eq!(internals.slots[0], vec![a, c]);
    }

    #[test]
    fn test_set_cards_appends_on_top() {
        let a = card(Suit::Spades, 1, true);
        let b = card(Suit::Hearts, 2, true);
        let mut internals = internals_with(vec![a]);

        internals.set_cards(0, vec![a, b], ActionOrigin::default());
        assert_eq!(actions(&mut internals), vec![Action::insertion(0, 1, b)]);
        assert!(!internals.failed);
    }

    #[test]
    fn test_set_cards_removes_from_top() {
        let a = card(Suit::Spades, 1, true);
        let b = card(Suit::Hearts, 2, true);
        let c = card(Suit::Clubs, 3, true);
        let mut internals = internals_with(vec![a, b, c]);

        internals.set_cards(0, vec![a], ActionOrigin::default());
        assert_eq!(
            actions(&mut internals),
            vec![
                Action::Removal {
                    slot: 0,
                    index: 2,
                    card: c
                },
                Action::Removal {
                    slot: 0,
                    index: 1,
                    card: b
                },
            ]
        );
    }

    #[test]
    fn test_set_cards_clears() {
        let a = card(Suit::Spades, 1, true);
        let mut internals = internals_with(vec![a]);
        internals.set_cards(0, vec![], ActionOrigin::default());
        assert_eq!(actions(&mut internals), vec![Action::Clearing { slot: 0 }]);
        // Clearing an empty slot is silent
        internals.set_cards(0, vec![], ActionOrigin::default());
        assert!(actions(&mut internals).is_empty());
    }

    #[test]
    fn test_set_cards_unknown_slot_dies() {
        let mut internals = internals_with(vec![]);
        internals.set_cards(4, vec![card(Suit::Clubs, 1, true)], ActionOrigin::default());
        assert!(internals.failed);
        assert!(matches!(
            internals.take_events().last(),
            Some(EngineEvent::EngineFailure { .. })
        ));
    }

    #[test]
    fn test_single_delayed_call() {
        let mut internals = Internals::default();
        assert!(internals.setup_delayed_call(RuleHandle(1)));
        assert!(!internals.setup_delayed_call(RuleHandle(2)));
        assert_eq!(internals.delayed.map(|d| d.handle), Some(RuleHandle(1)));
        internals.clear_delayed_call();
        assert!(internals.setup_delayed_call(RuleHandle(2)));
        assert_eq!(internals.delayed.map(|d| d.generation), Some(2));
    }
}
