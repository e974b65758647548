//! Snapshot based undo and redo for native rules.

use crate::card::CardList;
use crate::rules::RulesHost;
use tracing::debug;

type Snapshot = Vec<CardList>;

/// Undo and redo stacks over the table contents.
///
/// A move is recorded before it happens and pushed onto the undo stack when
/// it ends. Discarded moves leave the stacks untouched. Ending a move that
/// was never recorded (the follow-up of a delayed call) only refreshes the
/// undo/redo sensitivity, so automatic follow-ups undo together with the
/// move that caused them.
#[derive(Debug, Default, Clone)]
pub struct MoveHistory {
    undo: Vec<Snapshot>,
    redo: Vec<Snapshot>,
    pending: Option<Snapshot>,
}

impl MoveHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Forget everything, a new game was dealt
    pub fn reset(&mut self, host: &mut dyn RulesHost) {
        self.undo.clear();
        self.redo.clear();
        self.pending = None;
        self.update(host);
    }

    /// Remember the table before a move
    pub fn record(&mut self, host: &dyn RulesHost, slots: usize) {
        self.pending = Some(snapshot(host, slots));
    }

    /// The recorded move happened. Returns whether one was pending.
    pub fn end(&mut self, host: &mut dyn RulesHost) -> bool {
        let ended = match self.pending.take() {
            Some(before) => {
                self.undo.push(before);
                self.redo.clear();
                true
            }
            None => false,
        };
        self.update(host);
        ended
    }

    pub fn discard(&mut self) {
        self.pending = None;
    }

    pub fn undo(&mut self, host: &mut dyn RulesHost, slots: usize) -> bool {
        let Some(before) = self.undo.pop() else {
            debug!("Nothing to undo");
            return false;
        };
        self.redo.push(snapshot(host, slots));
        restore(host, before);
        self.update(host);
        true
    }

    pub fn redo(&mut self, host: &mut dyn RulesHost, slots: usize) -> bool {
        let Some(after) = self.redo.pop() else {
            debug!("Nothing to redo");
            return false;
        };
        self.undo.push(snapshot(host, slots));
        restore(host, after);
        self.update(host);
        true
    }

    fn update(&self, host: &mut dyn RulesHost) {
        host.set_can_undo(self.can_undo());
        host.set_can_redo(self.can_redo());
    }
}

fn snapshot(host: &dyn RulesHost, slots: usize) -> Snapshot {
    (0..slots).map(|id| host.slot(id)).collect()
}

fn restore(host: &mut dyn RulesHost, snapshot: Snapshot) {
    for (id, cards) in snapshot.into_iter().enumerate() {
        host.set_cards(id, cards);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardData, Rank, Suit};
    use crate::games::testing::RecordingHost;

    fn host() -> RecordingHost {
        let mut host = RecordingHost::new(1);
        host.slots = vec![
            vec![CardData::new(Suit::Hearts, Rank::ACE, true)],
            vec![],
        ];
        host
    }

    fn move_card(host: &mut RecordingHost) {
        let card = host.slots[0].remove(0);
        host.slots[1].push(card);
    }

    #[test]
    fn test_undo_redo() {
        let mut host = host();
        let mut history = MoveHistory::new();

        history.record(&host, 2);
        move_card(&mut host);
        assert!(history.end(&mut host));
        assert!(host.can_undo);
        assert!(!host.can_redo);

        assert!(history.undo(&mut host, 2));
        assert_eq!(host.slots[0].len(), 1);
        assert!(host.slots[1].is_empty());
        assert!(!host.can_undo);
        assert!(host.can_redo);

        assert!(history.redo(&mut host, 2));
        assert!(host.slots[0].is_empty());
        assert_eq!(host.slots[1].len(), 1);
        assert!(!history.redo(&mut host, 2));
    }

    #[test]
    fn test_discarded_move_is_not_undoable() {
        let mut host = host();
        let mut history = MoveHistory::new();
        history.record(&host, 2);
        history.discard();
        assert!(!history.end(&mut host));
        assert!(!history.can_undo());
    }

    #[test]
    fn test_new_move_clears_redo() {
        let mut host = host();
        let mut history = MoveHistory::new();
        history.record(&host, 2);
        move_card(&mut host);
        history.end(&mut host);
        history.undo(&mut host, 2);
        assert!(history.can_redo());

        history.record(&host, 2);
        move_card(&mut host);
        history.end(&mut host);
        assert!(!history.can_redo());
        assert!(!host.can_redo);
    }
}
