//! Headless presentation manager.
//!
//! Consumes engine notifications the way a UI does and keeps a mirror of
//! the table made of card objects. Card objects keep their identity across
//! moves: a card removed from one slot and inserted into another is the
//! same object, claimed from the queue's pool.

use crate::actions::{Action, EngineEvent};
use crate::card::{CardData, CardList, SuitAndRank};
use crate::queue::{FlushReport, Pooled, Queue, Resolution, Resolver};
use crate::slot::SlotId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error};

/// A card on the mirrored table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardObject {
    /// Stable identity of the object
    pub key: u64,
    pub data: CardData,
    /// Hidden objects left the table and wait in the pool
    pub visible: bool,
}

impl Pooled for CardObject {
    fn value(&self) -> SuitAndRank {
        self.data.value()
    }
}

/// Disagreement between the engine and the mirror
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("expected {expected} in slot {slot} at {index} but found {found}")]
    WrongCard {
        slot: SlotId,
        index: usize,
        expected: SuitAndRank,
        found: SuitAndRank,
    },

    #[error("{0} can not wait for a card")]
    DoubleRequeue(Action),

    #[error("index {index} is out of bounds in slot {slot}")]
    BadIndex { slot: SlotId, index: usize },

    #[error("slot {0} does not exist")]
    BadSlot(SlotId),

    #[error("slot {slot} shows {actual:?} instead of {expected:?}")]
    MissingCards {
        slot: SlotId,
        expected: CardList,
        actual: Vec<Option<CardData>>,
    },
}

type Table = BTreeMap<SlotId, Vec<Option<CardObject>>>;

/// Mirror of the table built from engine notifications
#[derive(Debug, Default)]
pub struct Manager {
    table: Table,
    queue: Queue<CardObject>,
    /// Between clear-data and game-started actions apply immediately
    preparing: bool,
    next_key: u64,
    errors: Vec<ConsistencyError>,
    last_flush: FlushReport,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preparing(&self) -> bool {
        self.preparing
    }

    pub fn queue(&self) -> &Queue<CardObject> {
        &self.queue
    }

    /// Violations seen so far
    pub fn errors(&self) -> &[ConsistencyError] {
        &self.errors
    }

    pub fn last_flush(&self) -> &FlushReport {
        &self.last_flush
    }

    /// Objects of one slot, `None` for placeholders
    pub fn slot(&self, id: SlotId) -> Option<&[Option<CardObject>]> {
        self.table.get(&id).map(Vec::as_slice)
    }

    /// Visible table, placeholders as `None`
    pub fn snapshot(&self) -> BTreeMap<SlotId, Vec<Option<CardData>>> {
        self.table
            .iter()
            .map(|(id, cards)| {
                (
                    *id,
                    cards.iter().map(|c| c.as_ref().map(|c| c.data)).collect(),
                )
            })
            .collect()
    }

    /// Compare the mirror to the engine's canonical slots
    pub fn check(&self, slots: &[CardList]) -> Vec<ConsistencyError> {
        let snapshot = self.snapshot();
        let mut errors = Vec::new();
        for (id, expected) in slots.iter().enumerate() {
            let actual = snapshot.get(&id).cloned().unwrap_or_default();
            let matches = actual.len() == expected.len()
                && actual
                    .iter()
                    .zip(expected)
                    .all(|(a, e)| a.as_ref() == Some(e));
            if !matches {
                errors.push(ConsistencyError::MissingCards {
                    slot: id,
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        errors
    }

    pub fn handle_all<'a>(&mut self, events: impl IntoIterator<Item = &'a EngineEvent>) {
        for event in events {
            self.handle(event);
        }
    }

    pub fn handle(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::ClearData => {
                debug!("Clearing table");
                self.preparing = true;
                self.table.clear();
                self.queue.clear();
                self.queue.take_all();
            }
            EngineEvent::NewSlot(spec) => {
                let cards = spec
                    .cards
                    .iter()
                    .map(|data| Some(new_object(&mut self.next_key, *data)))
                    .collect();
                self.table.insert(spec.id, cards);
                self.queue.add_slot(spec.id);
            }
            EngineEvent::GameStarted => {
                self.preparing = false;
            }
            EngineEvent::Action { action, origin } => {
                if self.preparing {
                    self.apply_immediately(action);
                } else if origin.engine {
                    self.apply_engine_action(action);
                } else {
                    self.queue.queue(*action);
                }
            }
            EngineEvent::MoveEnded { .. } => self.flush(),
            _ => {}
        }
    }

    fn report(&mut self, e: ConsistencyError) {
        error!("{}", e);
        self.errors.push(e);
    }

    /// Apply without animation, used while the table is being prepared
    fn apply_immediately(&mut self, action: &Action) {
        let Some(cards) = self.table.get_mut(&action.slot()) else {
            self.report(ConsistencyError::BadSlot(action.slot()));
            return;
        };
        match *action {
            Action::Insertion { index, card, .. } => {
                if index > cards.len() {
                    let slot = action.slot();
                    self.report(ConsistencyError::BadIndex { slot, index });
                    return;
                }
                let object = match self.queue.take(action) {
                    Some(mut object) => {
                        object.data = card;
                        object.visible = true;
                        object
                    }
                    None => new_object(&mut self.next_key, card),
                };
                cards.insert(index, Some(object));
            }
            Action::Removal { index, .. } => {
                if index >= cards.len() {
                    let slot = action.slot();
                    self.report(ConsistencyError::BadIndex { slot, index });
                    return;
                }
                cards.remove(index);
            }
            Action::Flip { index, card, .. } => match cards.get_mut(index) {
                Some(Some(object)) => object.data.show = card.show,
                _ => {
                    let slot = action.slot();
                    self.report(ConsistencyError::BadIndex { slot, index });
                }
            },
            Action::Clearing { .. } => cards.clear(),
        }
    }

    /// The UI already performed these: a drag lifted the cards or a
    /// cancelled drag put them back
    fn apply_engine_action(&mut self, action: &Action) {
        let slot = action.slot();
        let Some(cards) = self.table.get_mut(&slot) else {
            self.report(ConsistencyError::BadSlot(slot));
            return;
        };
        match *action {
            Action::Removal { index, card, .. } => {
                if index >= cards.len() {
                    self.report(ConsistencyError::BadIndex { slot, index });
                    return;
                }
                let removed = cards.remove(index);
                self.queue.decrement_queued(slot, index);
                if let Some(object) = removed {
                    if !object.data.equal_value(&card) {
                        let found = object.value();
                        self.report(ConsistencyError::WrongCard {
                            slot,
                            index,
                            expected: card.value(),
                            found,
                        });
                    }
                    self.queue.store(object);
                }
            }
            Action::Insertion { index, card, .. } => {
                if index > cards.len() {
                    self.report(ConsistencyError::BadIndex { slot, index });
                    return;
                }
                self.queue.increment_queued(slot, index);
                let object = match self.queue.take(action) {
                    Some(mut object) => {
                        object.data = card;
                        object.visible = true;
                        object
                    }
                    None => new_object(&mut self.next_key, card),
                };
                cards.insert(index, Some(object));
            }
            _ => self.apply_immediately(action),
        }
    }

    fn flush(&mut self) {
        let mut resolver = TableResolver {
            table: &mut self.table,
            errors: Vec::new(),
        };
        let report = self.queue.flush(&mut resolver);
        let errors = resolver.errors;
        for e in errors {
            self.report(e);
        }
        for action in &report.discarded {
            self.report(ConsistencyError::DoubleRequeue(*action));
        }
        for object in self.queue.unclaimed_mut() {
            object.visible = false;
        }
        self.last_flush = report;
    }
}

impl fmt::Display for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, cards) in &self.table {
            write!(f, "{id}:")?;
            for card in cards {
                match card {
                    Some(object) => write!(f, " [{}]", object.data)?,
                    None => write!(f, " [?]")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn new_object(next_key: &mut u64, data: CardData) -> CardObject {
    *next_key += 1;
    CardObject {
        key: *next_key,
        data,
        visible: true,
    }
}

/// Applies queued actions to the mirrored table
struct TableResolver<'a> {
    table: &'a mut Table,
    errors: Vec<ConsistencyError>,
}

impl Resolver<CardObject> for TableResolver<'_> {
    fn resolve(&mut self, queue: &mut Queue<CardObject>, action: &Action) -> Resolution {
        let slot = action.slot();
        let Some(cards) = self.table.get_mut(&slot) else {
            self.errors.push(ConsistencyError::BadSlot(slot));
            return Resolution::Resolved;
        };

        match *action {
            Action::Insertion {
                index,
                card,
                replaces,
                ..
            } => {
                if !replaces {
                    if index > cards.len() {
                        self.errors.push(ConsistencyError::BadIndex { slot, index });
                        return Resolution::Resolved;
                    }
                    queue.increment_queued(slot, index);
                }
                let object = queue.take(action).map(|mut object| {
                    object.data = card;
                    object.visible = true;
                    object
                });
                let pending = object.is_none();
                if replaces {
                    match cards.get_mut(index) {
                        Some(entry) if entry.is_none() => *entry = object,
                        _ => {
                            self.errors.push(ConsistencyError::BadIndex { slot, index });
                            if let Some(object) = object {
                                queue.store(object);
                            }
                            return Resolution::Resolved;
                        }
                    }
                } else {
                    cards.insert(index, object);
                }
                if pending {
                    debug!("No card object for {} yet", action);
                    Resolution::Pending
                } else {
                    Resolution::Resolved
                }
            }
            Action::Removal { index, card, .. } => {
                if index >= cards.len() {
                    self.errors.push(ConsistencyError::BadIndex { slot, index });
                    return Resolution::Resolved;
                }
                let removed = cards.remove(index);
                queue.decrement_queued(slot, index);
                if let Some(object) = removed {
                    if !object.data.equal_value(&card) {
                        self.errors.push(ConsistencyError::WrongCard {
                            slot,
                            index,
                            expected: card.value(),
                            found: object.value(),
                        });
                    }
                    queue.store(object);
                }
                Resolution::Resolved
            }
            Action::Flip { index, card, .. } => {
                match cards.get_mut(index) {
                    Some(Some(object)) => {
                        if !object.data.equal_value(&card) {
                            self.errors.push(ConsistencyError::WrongCard {
                                slot,
                                index,
                                expected: card.value(),
                                found: object.value(),
                            });
                        }
                        object.data.show = card.show;
                    }
                    Some(None) => {
                        queue.flip_queued(slot, index, &card);
                    }
                    None => self.errors.push(ConsistencyError::BadIndex { slot, index }),
                }
                Resolution::Resolved
            }
            Action::Clearing { .. } => {
                for object in cards.drain(..).flatten() {
                    queue.store(object);
                }
                queue.clear_queued(slot);
                Resolution::Resolved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionOrigin;
    use crate::card::{Rank, Suit};
    use crate::slot::{SlotLayout, SlotSpec, SlotType};
    use pretty_assertions::assert_eq;

    fn card(suit: Suit, rank: u8) -> CardData {
        CardData::new(suit, Rank::new(rank).unwrap(), true)
    }

    fn slot(id: SlotId, cards: CardList) -> EngineEvent {
        EngineEvent::NewSlot(SlotSpec {
            id,
            cards,
            slot_type: SlotType::Tableau,
            layout: SlotLayout::fanned_down(id as f64, 0.0),
        })
    }

    fn queued(action: Action) -> EngineEvent {
        EngineEvent::Action {
            action,
            origin: ActionOrigin::default(),
        }
    }

    fn move_ended() -> EngineEvent {
        EngineEvent::MoveEnded {
            origin: ActionOrigin::default(),
        }
    }

    fn started(tables: Vec<CardList>) -> Manager {
        let mut manager = Manager::new();
        manager.handle(&EngineEvent::ClearData);
        for (id, cards) in tables.into_iter().enumerate() {
            manager.handle(&slot(id, cards));
        }
        manager.handle(&EngineEvent::GameStarted);
        manager
    }

    #[test]
    fn test_move_keeps_object_identity() {
        let ace = card(Suit::Spades, 1);
        let mut manager = started(vec![vec![ace], vec![]]);
        let key = manager.slot(0).unwrap()[0].as_ref().unwrap().key;

        manager.handle_all(&[
            queued(Action::Removal {
                slot: 0,
                index: 0,
                card: ace,
            }),
            queued(Action::insertion(1, 0, ace)),
            move_ended(),
        ]);

        let moved = manager.slot(1).unwrap()[0].as_ref().unwrap();
        assert_eq!(moved.key, key);
        assert!(manager.errors().is_empty());
        assert_eq!(manager.check(&[vec![], vec![ace]]), vec![]);
    }

    #[test]
    fn test_insertion_before_removal_waits_for_object() {
        let ace = card(Suit::Spades, 1);
        let mut manager = started(vec![vec![ace], vec![]]);

        // Destination updated first, the object is still in slot 0
        manager.handle_all(&[
            queued(Action::insertion(1, 0, ace)),
            queued(Action::Removal {
                slot: 0,
                index: 0,
                card: ace,
            }),
            move_ended(),
        ]);

        assert_eq!(manager.last_flush().deferred, 0);
        assert_eq!(manager.check(&[vec![], vec![ace]]), vec![]);
        assert_eq!(manager.queue().action_count(), 0);
    }

    #[test]
    fn test_placeholder_removal_adjusts_waiting_actions() {
        let ace = card(Suit::Spades, 1);
        let king = card(Suit::Hearts, 13);
        let mut manager = started(vec![vec![], vec![], vec![], vec![]]);

        // Slot 3 receives two cards whose objects do not exist anywhere
        manager.handle_all(&[
            queued(Action::insertion(3, 0, ace)),
            queued(Action::insertion(3, 1, king)),
            move_ended(),
        ]);
        assert_eq!(manager.last_flush().deferred, 2);
        assert_eq!(manager.snapshot()[&3], vec![None, None]);

        // The ace leaves before its object ever arrived
        manager.handle_all(&[
            queued(Action::Removal {
                slot: 3,
                index: 0,
                card: ace,
            }),
            move_ended(),
        ]);
        let waiting = manager.queue().later_actions(3);
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].index(), Some(0));
        assert_eq!(waiting[0].card(), Some(king));
    }

    #[test]
    fn test_flip_of_placeholder_updates_waiting_insertion() {
        let queen = card(Suit::Diamonds, 12).with_show(false);
        let mut manager = started(vec![vec![], vec![queen]]);

        manager.handle_all(&[
            queued(Action::insertion(0, 0, queen)),
            move_ended(),
        ]);
        // Object is still in slot 1, the insertion waits
        manager.handle_all(&[
            queued(Action::Flip {
                slot: 0,
                index: 0,
                card: queen.with_show(true),
            }),
            queued(Action::Removal {
                slot: 1,
                index: 0,
                card: queen,
            }),
            move_ended(),
        ]);

        assert_eq!(manager.check(&[vec![queen.with_show(true)], vec![]]), vec![]);
    }

    #[test]
    fn test_engine_actions_apply_immediately() {
        let ace = card(Suit::Clubs, 1);
        let two = card(Suit::Clubs, 2);
        let mut manager = started(vec![vec![ace, two]]);
        let engine = ActionOrigin {
            engine: true,
            replay: false,
        };

        manager.handle(&EngineEvent::Action {
            action: Action::Removal {
                slot: 0,
                index: 1,
                card: two,
            },
            origin: engine,
        });
        assert_eq!(manager.snapshot()[&0].len(), 1);
        assert_eq!(manager.queue().card_count(), 1);

        manager.handle(&EngineEvent::Action {
            action: Action::insertion(0, 1, two),
            origin: engine,
        });
        assert_eq!(manager.queue().card_count(), 0);
        assert_eq!(manager.check(&[vec![ace, two]]), vec![]);
    }

    #[test]
    fn test_wrong_card_is_reported() {
        let ace = card(Suit::Clubs, 1);
        let mut manager = started(vec![vec![ace]]);
        manager.handle_all(&[
            queued(Action::Removal {
                slot: 0,
                index: 0,
                card: card(Suit::Hearts, 1),
            }),
            move_ended(),
        ]);
        assert!(matches!(
            manager.errors(),
            [ConsistencyError::WrongCard { slot: 0, index: 0, .. }]
        ));
    }

    #[test]
    fn test_unclaimed_objects_are_hidden() {
        let ace = card(Suit::Clubs, 1);
        let mut manager = started(vec![vec![ace]]);
        manager.handle_all(&[queued(Action::Clearing { slot: 0 }), move_ended()]);
        assert_eq!(manager.queue().card_count(), 1);
        assert!(manager.queue.unclaimed_mut().all(|object| !object.visible));
    }
}
