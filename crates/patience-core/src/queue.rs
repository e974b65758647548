//! Deferred action queue.
//!
//! The engine mutates slots instantly while the presentation animates the
//! same mutations over time. The queue buffers the mutations of one move
//! and resolves them against real card objects when the move ends:
//!
//! - Removed card objects go to a pool keyed by suit and rank.
//! - Insertions claim the pooled object for the same physical card, so the
//!   card animates from its old place instead of being recreated.
//! - An insertion whose card object is not available yet leaves a
//!   placeholder and waits in a per-slot bucket of later actions. Indices
//!   of waiting actions are kept valid as sibling cards come and go.
//!
//! Resolution is done in two passes: the main list is moved out of the
//! queue and walked by value, unresolved insertions are moved straight
//! into their later bucket, and then the later buckets get their turn.

use crate::actions::Action;
use crate::card::{CardData, SuitAndRank};
use crate::slot::SlotId;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Something that can sit in the card pool
pub trait Pooled {
    /// Identity of the physical card this object shows
    fn value(&self) -> SuitAndRank;
}

/// Queue consistency violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("only insertions can wait for a card, discarding {0}")]
    RequeueNonInsertion(Action),

    #[error("action targets unregistered slot {0}")]
    UnknownSlot(SlotId),
}

/// Outcome of resolving one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Fully applied
    Resolved,
    /// Applied with a placeholder, the backing card object is still missing
    Pending,
}

/// Applies queued actions to the presentation.
///
/// The resolver gets the queue back so it can claim pooled card objects and
/// keep waiting actions in line with the mutation it just applied.
pub trait Resolver<C> {
    fn resolve(&mut self, queue: &mut Queue<C>, action: &Action) -> Resolution;
}

/// Summary of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Actions applied completely
    pub resolved: usize,
    /// Actions still waiting in later buckets after the flush
    pub deferred: usize,
    /// Actions that could not be kept
    pub discarded: Vec<Action>,
}

/// Action queue with a pending card pool
#[derive(Debug)]
pub struct Queue<C> {
    /// Actions of the current move in emission order
    actions: Vec<Action>,
    /// Insertions waiting for their card object, per slot
    later: BTreeMap<SlotId, Vec<Action>>,
    /// Card objects detached from any slot
    cards: HashMap<SuitAndRank, Vec<C>>,
}

impl<C> Default for Queue<C> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            later: BTreeMap::new(),
            cards: HashMap::new(),
        }
    }
}

impl<C: Pooled> Queue<C> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot so that actions may wait for it
    pub fn add_slot(&mut self, slot: SlotId) {
        self.later.entry(slot).or_default();
    }

    /// Whether a slot has been registered
    pub fn has_slot(&self, slot: SlotId) -> bool {
        self.later.contains_key(&slot)
    }

    /// Forget all actions and slots. Pooled cards stay.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.later.clear();
    }

    /// Number of actions in the main list and all later buckets
    pub fn action_count(&self) -> usize {
        self.actions.len() + self.later.values().map(Vec::len).sum::<usize>()
    }

    /// Number of pooled card objects
    pub fn card_count(&self) -> usize {
        self.cards.values().map(Vec::len).sum()
    }

    /// Walk the main list first and then every later bucket slot by slot
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter().chain(self.later.values().flatten())
    }

    /// Actions waiting in one slot's later bucket
    pub fn later_actions(&self, slot: SlotId) -> &[Action] {
        self.later.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append an action to the main list
    pub fn queue(&mut self, action: Action) {
        debug!("Queueing {}", action);
        self.actions.push(action);
    }

    /// Make an insertion wait in its slot's later bucket
    pub fn requeue(&mut self, action: Action) -> Result<(), QueueError> {
        let action = match action {
            Action::Insertion {
                slot, index, card, ..
            } => Action::Insertion {
                slot,
                index,
                card,
                replaces: true,
            },
            other => {
                warn!("Trying to queue non-insertion action");
                error!("Discarding {}", other);
                return Err(QueueError::RequeueNonInsertion(other));
            }
        };

        debug!("Queueing again {}", action);
        let slot = action.slot();
        if !self.has_slot(slot) {
            error!("{}", QueueError::UnknownSlot(slot));
        }
        self.later.entry(slot).or_default().push(action);
        Ok(())
    }

    /// Put a card object into the pool
    pub fn store(&mut self, card: C) {
        let value = card.value();
        debug!("Storing {}", value);
        self.cards.entry(value).or_default().push(card);
    }

    /// Claim the pooled object for the action's card, if there is one
    pub fn take(&mut self, action: &Action) -> Option<C> {
        let value = action.value()?;
        let bucket = self.cards.get_mut(&value)?;
        let card = bucket.pop();
        if bucket.is_empty() {
            self.cards.remove(&value);
        }
        card
    }

    /// Drain the whole pool
    pub fn take_all(&mut self) -> Vec<C> {
        self.cards.drain().flat_map(|(_, cards)| cards).collect()
    }

    /// Pooled objects nobody claimed
    pub fn unclaimed_mut(&mut self) -> impl Iterator<Item = &mut C> {
        self.cards.values_mut().flatten()
    }

    /// A card was inserted at `index`: waiting actions at or above it shift up
    pub fn increment_queued(&mut self, slot: SlotId, index: usize) {
        for action in self.later.entry(slot).or_default().iter_mut() {
            if let Some(queued) = action.index_mut() {
                if *queued >= index {
                    *queued += 1;
                }
            }
        }
    }

    /// A card was removed from `index`.
    ///
    /// A waiting action exactly at `index` belonged to the removed
    /// placeholder and is erased; its card is returned. Actions above shift
    /// down.
    pub fn decrement_queued(&mut self, slot: SlotId, index: usize) -> Option<CardData> {
        let bucket = self.later.entry(slot).or_default();
        let mut erased = None;
        bucket.retain_mut(|action| match action.index_mut() {
            Some(queued) if *queued == index => {
                erased = action.card();
                false
            }
            Some(queued) if *queued > index => {
                *queued -= 1;
                true
            }
            _ => true,
        });
        erased
    }

    /// A placeholder at `index` was flipped: update the waiting insertion
    pub fn flip_queued(&mut self, slot: SlotId, index: usize, data: &CardData) -> bool {
        let bucket = self.later.entry(slot).or_default();
        let Some(action) = bucket.iter_mut().find(|a| a.index() == Some(index)) else {
            return false;
        };
        if let Some(card) = action.card_mut() {
            if !card.equal_value(data) {
                error!(
                    "Rank or suit doesn't match to {} for queued {} in slot {} at index {}",
                    data, card, slot, index
                );
            }
            card.show = data.show;
        }
        true
    }

    /// The slot was cleared: nothing waits for it anymore
    pub fn clear_queued(&mut self, slot: SlotId) {
        if let Some(bucket) = self.later.get_mut(&slot) {
            bucket.clear();
        }
    }

    /// Resolve every buffered action once.
    ///
    /// Main list actions that stay pending are requeued, so nothing is ever
    /// dropped silently. Later actions that stay pending keep waiting for a
    /// future flush.
    pub fn flush<R: Resolver<C>>(&mut self, resolver: &mut R) -> FlushReport {
        let mut report = FlushReport::default();

        for action in std::mem::take(&mut self.actions) {
            match resolver.resolve(self, &action) {
                Resolution::Resolved => report.resolved += 1,
                Resolution::Pending => {
                    if let Err(e) = self.requeue(action) {
                        if let QueueError::RequeueNonInsertion(discarded) = e {
                            report.discarded.push(discarded);
                        }
                    }
                }
            }
        }

        let slots: Vec<SlotId> = self.later.keys().copied().collect();
        for slot in slots {
            let waiting = self.later.get_mut(&slot).map(std::mem::take).unwrap_or_default();
            let mut kept = Vec::with_capacity(waiting.len());
            for action in waiting {
                match resolver.resolve(self, &action) {
                    Resolution::Resolved => report.resolved += 1,
                    Resolution::Pending => kept.push(action),
                }
            }
            let bucket = self.later.entry(slot).or_default();
            kept.append(bucket);
            *bucket = kept;
        }

        report.deferred = self.later.values().map(Vec::len).sum();
        debug!(
            "Flushed queue: {} resolved, {} deferred, {} discarded",
            report.resolved,
            report.deferred,
            report.discarded.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{Rank, Suit};
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Token(CardData);

    impl Pooled for Token {
        fn value(&self) -> SuitAndRank {
            self.0.value()
        }
    }

    fn card(suit: Suit, rank: u8) -> CardData {
        CardData::new(suit, Rank::new(rank).unwrap(), true)
    }

    #[test]
    fn test_store_and_take_by_identity() {
        let mut queue = Queue::new();
        let ace = card(Suit::Spades, 1);
        queue.store(Token(ace.with_show(false)));
        assert_eq!(queue.card_count(), 1);

        let other = Action::insertion(0, 0, card(Suit::Hearts, 1));
        assert!(queue.take(&other).is_none());

        let same = Action::insertion(0, 0, ace);
        assert_eq!(queue.take(&same), Some(Token(ace.with_show(false))));
        assert_eq!(queue.card_count(), 0);
    }

    #[test]
    fn test_requeue_rejects_non_insertions() {
        let mut queue: Queue<Token> = Queue::new();
        queue.add_slot(0);
        let removal = Action::Removal {
            slot: 0,
            index: 0,
            card: card(Suit::Clubs, 2),
        };
        assert_eq!(
            queue.requeue(removal),
            Err(QueueError::RequeueNonInsertion(removal))
        );
        assert_eq!(queue.action_count(), 0);

        queue.requeue(Action::insertion(0, 0, card(Suit::Clubs, 2))).unwrap();
        assert!(queue.later_actions(0)[0].replaces());
    }

    #[test]
    fn test_decrement_erases_superseded_action() {
        let mut queue: Queue<Token> = Queue::new();
        queue.add_slot(3);
        let ace = card(Suit::Spades, 1);
        let king = card(Suit::Hearts, 13);
        queue.requeue(Action::insertion(3, 0, ace)).unwrap();
        queue.requeue(Action::insertion(3, 1, king)).unwrap();

        assert_eq!(queue.decrement_queued(3, 0), Some(ace));
        let later = queue.later_actions(3);
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].index(), Some(0));
        assert_eq!(later[0].card(), Some(king));
    }

    #[test]
    fn test_flip_and_clear_queued() {
        let mut queue: Queue<Token> = Queue::new();
        queue.add_slot(1);
        let five = card(Suit::Diamonds, 5).with_show(false);
        queue.requeue(Action::insertion(1, 2, five)).unwrap();

        assert!(!queue.flip_queued(1, 0, &five.with_show(true)));
        assert!(queue.flip_queued(1, 2, &five.with_show(true)));
        assert_eq!(queue.later_actions(1)[0].card(), Some(five.with_show(true)));

        queue.clear_queued(1);
        assert!(queue.later_actions(1).is_empty());
    }

    #[test]
    fn test_iter_walks_main_list_then_later_buckets() {
        let mut queue: Queue<Token> = Queue::new();
        queue.add_slot(0);
        queue.add_slot(1);
        queue.requeue(Action::insertion(1, 0, card(Suit::Clubs, 3))).unwrap();
        queue.queue(Action::Clearing { slot: 0 });
        let order: Vec<SlotId> = queue.iter().map(|a| a.slot()).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(queue.action_count(), 2);
    }

    /// Resolver that never finds card objects and counts what it saw
    struct Starved {
        seen: usize,
    }

    impl Resolver<Token> for Starved {
        fn resolve(&mut self, queue: &mut Queue<Token>, action: &Action) -> Resolution {
            self.seen += 1;
            match action {
                Action::Insertion { .. } => match queue.take(action) {
                    Some(_) => Resolution::Resolved,
                    None => Resolution::Pending,
                },
                _ => Resolution::Resolved,
            }
        }
    }

    #[test]
    fn test_flush_keeps_unresolved_insertions() {
        let mut queue: Queue<Token> = Queue::new();
        queue.add_slot(0);
        queue.queue(Action::insertion(0, 0, card(Suit::Clubs, 4)));
        queue.queue(Action::Flip {
            slot: 0,
            index: 0,
            card: card(Suit::Clubs, 4),
        });

        let mut resolver = Starved { seen: 0 };
        let report = queue.flush(&mut resolver);
        // Insertion tried twice: once from the main list, once from its bucket
        assert_eq!(resolver.seen, 3);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.deferred, 1);
        assert!(report.discarded.is_empty());

        queue.store(Token(card(Suit::Clubs, 4)));
        let report = queue.flush(&mut resolver);
        assert_eq!(report.resolved, 1);
        assert_eq!(report.deferred, 0);
        assert_eq!(queue.action_count(), 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(usize),
        Remove(usize),
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(
            prop_oneof![
                (0usize..12).prop_map(Op::Insert),
                (0usize..12).prop_map(Op::Remove),
            ],
            0..40,
        )
    }

    /// Resolver that leaves the given cards pending and logs what it resolved
    struct Picky {
        missing: HashSet<SuitAndRank>,
        resolved: Vec<Option<SuitAndRank>>,
    }

    impl Resolver<Token> for Picky {
        fn resolve(&mut self, _queue: &mut Queue<Token>, action: &Action) -> Resolution {
            match action.value() {
                Some(value) if self.missing.contains(&value) => Resolution::Pending,
                value => {
                    self.resolved.push(value);
                    Resolution::Resolved
                }
            }
        }
    }

    fn arb_flush() -> impl Strategy<Value = Vec<(u8, bool)>> {
        prop::collection::vec((0u8..4, any::<bool>()), 0..40)
    }

    fn numbered(kind: u8, n: usize) -> Action {
        let suit = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades][n % 4];
        let card = card(suit, (n / 4 + 1) as u8);
        match kind {
            0 => Action::insertion(0, n, card),
            1 => Action::Removal {
                slot: 0,
                index: n,
                card,
            },
            2 => Action::Flip {
                slot: 0,
                index: n,
                card,
            },
            _ => Action::Clearing { slot: 0 },
        }
    }

    proptest! {
        /// Every flushed action is resolved, deferred or reported discarded,
        /// and a later flush resolves each deferred one exactly once.
        #[test]
        fn prop_flush_loses_and_duplicates_nothing(actions in arb_flush()) {
            let mut queue: Queue<Token> = Queue::new();
            queue.add_slot(0);
            let mut resolver = Picky {
                missing: HashSet::new(),
                resolved: Vec::new(),
            };
            for (n, &(kind, pending)) in actions.iter().enumerate() {
                let action = numbered(kind, n);
                if pending {
                    if let Some(value) = action.value() {
                        resolver.missing.insert(value);
                    }
                }
                queue.queue(action);
            }

            let first = queue.flush(&mut resolver);
            prop_assert_eq!(first.resolved, resolver.resolved.len());
            prop_assert_eq!(
                first.resolved + first.deferred + first.discarded.len(),
                actions.len()
            );
            prop_assert!(first.discarded.iter().all(|a| !a.replaces()));
            prop_assert_eq!(queue.action_count(), first.deferred);

            resolver.missing.clear();
            let second = queue.flush(&mut resolver);
            prop_assert_eq!(second.resolved, first.deferred);
            prop_assert_eq!(second.deferred, 0);
            prop_assert!(second.discarded.is_empty());

            let carded: Vec<SuitAndRank> = resolver.resolved.iter().flatten().copied().collect();
            let unique: HashSet<SuitAndRank> = carded.iter().copied().collect();
            prop_assert_eq!(unique.len(), carded.len());
            prop_assert_eq!(resolver.resolved.len() + first.discarded.len(), actions.len());
        }

        /// Waiting actions track the position their placeholder would have
        /// in a slot mutated naively.
        #[test]
        fn prop_index_adjustment_matches_naive_slot(
            waiting in 1usize..6,
            ops in arb_ops(),
        ) {
            let mut queue: Queue<Token> = Queue::new();
            queue.add_slot(0);

            // Naive slot: Some(tag) is a placeholder, None a real card
            let mut naive: Vec<Option<u8>> = Vec::new();
            for tag in 0..waiting as u8 {
                queue.requeue(Action::insertion(0, naive.len(), card(Suit::Spades, tag + 1))).unwrap();
                naive.push(Some(tag));
            }

            for op in ops {
                match op {
                    Op::Insert(at) => {
                        let at = at.min(naive.len());
                        queue.increment_queued(0, at);
                        naive.insert(at, None);
                    }
                    Op::Remove(at) => {
                        if naive.is_empty() {
                            continue;
                        }
                        let at = at % naive.len();
                        let erased = queue.decrement_queued(0, at);
                        let removed = naive.remove(at);
                        prop_assert_eq!(erased.map(|c| c.rank.value() - 1), removed);
                    }
                }
            }

            let mut expected: Vec<(usize, u8)> = naive
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.map(|tag| (i, tag)))
                .collect();
            let mut actual: Vec<(usize, u8)> = queue
                .later_actions(0)
                .iter()
                .map(|a| (a.index().unwrap(), a.card().unwrap().rank.value() - 1))
                .collect();
            expected.sort();
            actual.sort();
            prop_assert_eq!(actual, expected);
        }
    }
}
