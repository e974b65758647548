//! Klondike.
//!
//! Stock and waste at the top left, four foundations at the top right and
//! seven tableau piles below. Tableau piles build down in alternating
//! colors, foundations build up by suit from the ace. An empty tableau pile
//! takes a king.

use super::MoveHistory;
use crate::card::{standard_deck, CardData, CardList, Rank};
use crate::rules::{
    cards_arg, int_arg, GameFeatures, Lambda, NamedCall, RuleHandle, Rules, RulesHost,
    ScriptError, Value,
};
use crate::slot::{SlotId, SlotLayout, SlotSpec, SlotType};
use std::ops::Range;
use tracing::debug;

const STOCK: SlotId = 0;
const WASTE: SlotId = 1;
const FOUNDATIONS: Range<SlotId> = 2..6;
const TABLEAU: Range<SlotId> = 6..13;
const SLOT_COUNT: usize = 13;

/// Callback moving one card to the foundations
const AUTO_PLAY: RuleHandle = RuleHandle(100);

const THREE_CARD_DEALS: &str = "Three card deals";
const AUTO_FOUNDATION_MOVES: &str = "Automatic foundation moves";

/// Klondike rules
#[derive(Debug, Default)]
pub struct Klondike {
    three_card_deals: bool,
    auto_play: bool,
    history: MoveHistory,
}

impl Klondike {
    pub const GAME_FILE: &'static str = "klondike.scm";

    pub fn new() -> Self {
        Self::default()
    }

    fn new_game(&mut self, host: &mut dyn RulesHost) -> Value {
        host.reset_surface();

        let mut deck = standard_deck();
        for i in (1..deck.len()).rev() {
            let j = host.random(i as u32 + 1) as usize;
            deck.swap(i, j);
        }

        let mut piles = Vec::with_capacity(TABLEAU.len());
        for size in 1..=TABLEAU.len() {
            let mut pile = deck.split_off(deck.len() - size);
            if let Some(top) = pile.last_mut() {
                top.show = true;
            }
            piles.push(pile);
        }

        host.add_slot(SlotSpec {
            id: STOCK,
            cards: deck,
            slot_type: SlotType::Stock,
            layout: SlotLayout::stacked(0.0, 0.0),
        });
        host.add_slot(SlotSpec {
            id: WASTE,
            cards: CardList::new(),
            slot_type: SlotType::Waste,
            layout: SlotLayout::fanned_right(1.0, 0.0, self.deal_size()),
        });
        for (i, id) in FOUNDATIONS.enumerate() {
            host.add_slot(SlotSpec {
                id,
                cards: CardList::new(),
                slot_type: SlotType::Foundation,
                layout: SlotLayout::stacked(3.0 + i as f64, 0.0),
            });
        }
        for (i, (id, pile)) in TABLEAU.zip(piles).enumerate() {
            host.add_slot(SlotSpec {
                id,
                cards: pile,
                slot_type: SlotType::Tableau,
                layout: SlotLayout::fanned_down(i as f64, 1.0),
            });
        }

        self.history.reset(host);
        update_score(host);
        Value::List(vec![Value::Int(7), Value::Int(4)])
    }

    fn deal_size(&self) -> usize {
        if self.three_card_deals {
            3
        } else {
            1
        }
    }

    // ==================== Gestures ====================

    fn button_pressed(&self, slot: SlotId, cards: &CardList) -> bool {
        if cards.is_empty() || !cards.iter().all(|card| card.show) {
            return false;
        }
        match slot {
            WASTE => cards.len() == 1,
            s if FOUNDATIONS.contains(&s) => cards.len() == 1,
            s if TABLEAU.contains(&s) => is_sequence(cards),
            _ => false,
        }
    }

    fn droppable(&self, start: SlotId, cards: &CardList, end: SlotId, host: &dyn RulesHost) -> bool {
        let Some(first) = cards.first() else {
            return false;
        };
        if start == end {
            false
        } else if FOUNDATIONS.contains(&end) {
            cards.len() == 1 && fits_foundation(first, &host.slot(end))
        } else if TABLEAU.contains(&end) {
            fits_tableau(first, host.slot(end).last())
        } else {
            false
        }
    }

    fn button_released(
        &mut self,
        start: SlotId,
        cards: &CardList,
        end: SlotId,
        host: &mut dyn RulesHost,
    ) -> bool {
        if !self.droppable(start, cards, end, host) {
            return false;
        }
        let mut target = host.slot(end);
        target.extend_from_slice(cards);
        host.set_cards(end, target);
        flip_top(host, start);
        update_score(host);
        true
    }

    fn button_clicked(&mut self, slot: SlotId, host: &mut dyn RulesHost) -> bool {
        if slot == STOCK {
            return self.deal(host);
        }
        if TABLEAU.contains(&slot) {
            let cards = host.slot(slot);
            if cards.last().is_some_and(|card| !card.show) {
                flip_top(host, slot);
                return true;
            }
        }
        false
    }

    fn button_double_clicked(&mut self, slot: SlotId, host: &mut dyn RulesHost) -> bool {
        if slot != WASTE && !TABLEAU.contains(&slot) {
            return false;
        }
        let Some(card) = host.slot(slot).last().copied().filter(|card| card.show) else {
            return false;
        };
        match FOUNDATIONS
            .clone()
            .find(|&f| fits_foundation(&card, &host.slot(f)))
        {
            Some(foundation) => {
                move_top(host, slot, foundation);
                true
            }
            None => false,
        }
    }

    /// Turn cards from the stock, or recycle the waste when the stock is empty
    fn deal(&mut self, host: &mut dyn RulesHost) -> bool {
        let mut stock = host.slot(STOCK);
        let mut waste = host.slot(WASTE);
        if stock.is_empty() {
            if waste.is_empty() {
                return false;
            }
            debug!("Recycling {} cards from the waste", waste.len());
            let recycled = waste.iter().rev().map(|card| card.with_show(false)).collect();
            host.set_cards(WASTE, CardList::new());
            host.set_cards(STOCK, recycled);
            return true;
        }

        for _ in 0..self.deal_size() {
            match stock.pop() {
                Some(card) => waste.push(card.with_show(true)),
                None => break,
            }
        }
        host.set_cards(STOCK, stock);
        host.set_cards(WASTE, waste);
        true
    }

    // ==================== Queries ====================

    fn moves_left(&self, host: &dyn RulesHost) -> bool {
        if !host.slot(STOCK).is_empty() || !host.slot(WASTE).is_empty() {
            return true;
        }
        self.find_move(host).is_some()
    }

    fn winning_game(&self, host: &dyn RulesHost) -> bool {
        FOUNDATIONS.clone().all(|f| host.slot(f).len() == 13)
    }

    /// A card movement that makes progress: source, card count and target
    fn find_move(&self, host: &dyn RulesHost) -> Option<(SlotId, usize, SlotId)> {
        let sources = std::iter::once(WASTE).chain(TABLEAU);
        for source in sources.clone() {
            let Some(top) = host.slot(source).last().copied().filter(|c| c.show) else {
                continue;
            };
            if let Some(f) = FOUNDATIONS
                .clone()
                .find(|&f| fits_foundation(&top, &host.slot(f)))
            {
                return Some((source, 1, f));
            }
        }
        for source in sources {
            let cards = host.slot(source);
            let movable = if source == WASTE {
                cards.len().min(1)
            } else {
                face_up_run(&cards)
            };
            if movable == 0 {
                continue;
            }
            let run = &cards[cards.len() - movable..];
            let first = run[0];
            // Moving a whole pile onto an empty pile gains nothing
            if source != WASTE && first.rank == Rank::KING && movable == cards.len() {
                continue;
            }
            for target in TABLEAU.clone().filter(|&t| t != source) {
                if fits_tableau(&first, host.slot(target).last()) {
                    return Some((source, movable, target));
                }
            }
        }
        None
    }

    fn hint(&self, host: &dyn RulesHost) -> Value {
        if let Some((source, count, target)) = self.find_move(host) {
            let cards = host.slot(source);
            let card = cards[cards.len() - count];
            let onto = if FOUNDATIONS.contains(&target) {
                "the foundation".to_string()
            } else {
                match host.slot(target).last() {
                    Some(top) => format!("the {}", top.name()),
                    None => "an empty slot".to_string(),
                }
            };
            let kind = if FOUNDATIONS.contains(&target) { 1 } else { 2 };
            return Value::List(vec![
                Value::Int(kind),
                Value::Str(format!("the {}", card.name())),
                Value::Str(onto),
            ]);
        }
        if !host.slot(STOCK).is_empty() || !host.slot(WASTE).is_empty() {
            return Value::List(vec![
                Value::Int(0),
                Value::from("Deal a new card from the deck."),
            ]);
        }
        Value::Bool(false)
    }

    /// A foundation move that can not block anything
    fn safe_foundation_move(&self, host: &dyn RulesHost) -> Option<(SlotId, SlotId)> {
        let foundations: Vec<CardList> = FOUNDATIONS.clone().map(|f| host.slot(f)).collect();
        for source in std::iter::once(WASTE).chain(TABLEAU) {
            let Some(card) = host.slot(source).last().copied().filter(|c| c.show) else {
                continue;
            };
            let Some(index) = foundations
                .iter()
                .position(|pile| fits_foundation(&card, pile))
            else {
                continue;
            };
            let needed = card.rank.value().saturating_sub(1) as usize;
            let opposite_ready = foundations
                .iter()
                .filter(|pile| {
                    pile.first()
                        .is_some_and(|c| c.suit.is_red() != card.suit.is_red())
                        && pile.len() >= needed
                })
                .count();
            if card.rank.value() <= 2 || opposite_ready == 2 {
                return Some((source, FOUNDATIONS.start + index));
            }
        }
        None
    }

    fn auto_play(&mut self, host: &mut dyn RulesHost) -> Value {
        if let Some((source, foundation)) = self.safe_foundation_move(host) {
            debug!("Moving top of slot {} to foundation {}", source, foundation);
            move_top(host, source, foundation);
        }
        Value::Bool(true)
    }

    // ==================== Options ====================

    fn get_options(&self) -> Value {
        Value::List(vec![
            Value::List(vec![
                Value::from(THREE_CARD_DEALS),
                Value::Bool(self.three_card_deals),
            ]),
            Value::List(vec![
                Value::from(AUTO_FOUNDATION_MOVES),
                Value::Bool(self.auto_play),
            ]),
        ])
    }

    fn apply_options(&mut self, options: &Value) -> Result<Value, ScriptError> {
        let entries = options
            .as_list()
            .ok_or_else(|| ScriptError::bad_arguments("apply-options", "expected a list"))?;
        let flag = |i: usize| {
            entries
                .get(i)
                .and_then(Value::as_list)
                .and_then(|pair| pair.get(1))
                .map(Value::is_true)
        };
        if let Some(set) = flag(0) {
            self.three_card_deals = set;
        }
        if let Some(set) = flag(1) {
            self.auto_play = set;
        }
        Ok(options.clone())
    }

    fn end_move(&mut self, host: &mut dyn RulesHost) {
        self.history.end(host);
        update_score(host);
        if self.auto_play && self.safe_foundation_move(host).is_some() {
            host.delayed_call(AUTO_PLAY);
        }
    }
}

impl Rules for Klondike {
    fn load(&mut self, host: &mut dyn RulesHost) -> Result<(), ScriptError> {
        host.set_features(GameFeatures::DROPPABLE | GameFeatures::DEALABLE);
        let handles: Vec<RuleHandle> = (0..Lambda::COUNT as u32).map(RuleHandle).collect();
        host.set_lambdas(&handles);
        Ok(())
    }

    fn invoke(
        &mut self,
        handle: RuleHandle,
        args: &[Value],
        host: &mut dyn RulesHost,
    ) -> Result<Value, ScriptError> {
        if handle == AUTO_PLAY {
            return Ok(self.auto_play(host));
        }
        let lambda = Lambda::ALL
            .get(handle.0 as usize)
            .copied()
            .ok_or(ScriptError::UnknownHandle(handle.0))?;
        let name = lambda.name();
        let value = match lambda {
            Lambda::NewGame => self.new_game(host),
            Lambda::ButtonPressed => {
                let slot = slot_arg(name, args, 0)?;
                Value::Bool(self.button_pressed(slot, cards_arg(name, args, 1)?))
            }
            Lambda::ButtonReleased => {
                let start = slot_arg(name, args, 0)?;
                let end = slot_arg(name, args, 2)?;
                let cards = cards_arg(name, args, 1)?;
                Value::Bool(self.button_released(start, cards, end, host))
            }
            Lambda::ButtonClicked => {
                let slot = slot_arg(name, args, 0)?;
                Value::Bool(self.button_clicked(slot, host))
            }
            Lambda::ButtonDoubleClicked => {
                let slot = slot_arg(name, args, 0)?;
                Value::Bool(self.button_double_clicked(slot, host))
            }
            Lambda::GameOver => Value::Bool(self.moves_left(host)),
            Lambda::WinningGame => Value::Bool(self.winning_game(host)),
            Lambda::Hint => self.hint(host),
            Lambda::GetOptions => self.get_options(),
            Lambda::ApplyOptions => {
                let options = args
                    .first()
                    .ok_or_else(|| ScriptError::bad_arguments(name, "missing options"))?;
                self.apply_options(options)?
            }
            Lambda::Timeout => Value::Bool(false),
            Lambda::Droppable => {
                let start = slot_arg(name, args, 0)?;
                let end = slot_arg(name, args, 2)?;
                let cards = cards_arg(name, args, 1)?;
                Value::Bool(self.droppable(start, cards, end, host))
            }
            Lambda::Dealable => Value::Bool(
                !host.slot(STOCK).is_empty() || !host.slot(WASTE).is_empty(),
            ),
        };
        Ok(value)
    }

    fn invoke_named(
        &mut self,
        call: NamedCall,
        _args: &[Value],
        host: &mut dyn RulesHost,
    ) -> Result<Value, ScriptError> {
        match call {
            NamedCall::StartGame => host.set_message(""),
            NamedCall::RecordMove => self.history.record(host, SLOT_COUNT),
            NamedCall::EndMove => self.end_move(host),
            NamedCall::DiscardMove => self.history.discard(),
            NamedCall::Undo => {
                self.history.undo(host, SLOT_COUNT);
                update_score(host);
            }
            NamedCall::Redo => {
                self.history.redo(host, SLOT_COUNT);
                update_score(host);
            }
            NamedCall::DoDealNextCards => {
                self.deal(host);
            }
        }
        Ok(Value::Unspecified)
    }
}

fn slot_arg(call: &str, args: &[Value], position: usize) -> Result<SlotId, ScriptError> {
    let value = int_arg(call, args, position)?;
    SlotId::try_from(value)
        .map_err(|_| ScriptError::bad_arguments(call, format!("bad slot {value}")))
}

fn update_score(host: &mut dyn RulesHost) {
    let score: usize = FOUNDATIONS.map(|f| host.slot(f).len()).sum();
    host.set_score(score as i32);
}

fn flip_top(host: &mut dyn RulesHost, slot: SlotId) {
    let mut cards = host.slot(slot);
    if let Some(top) = cards.last_mut() {
        if !top.show {
            top.show = true;
            host.set_cards(slot, cards);
        }
    }
}

fn move_top(host: &mut dyn RulesHost, from: SlotId, to: SlotId) {
    let mut source = host.slot(from);
    let Some(card) = source.pop() else {
        return;
    };
    let mut target = host.slot(to);
    target.push(card);
    host.set_cards(from, source);
    host.set_cards(to, target);
    flip_top(host, from);
    update_score(host);
}

fn fits_foundation(card: &CardData, foundation: &CardList) -> bool {
    match foundation.last() {
        None => card.rank == Rank::ACE,
        Some(top) => top.suit == card.suit && top.rank.value() + 1 == card.rank.value(),
    }
}

fn fits_tableau(card: &CardData, top: Option<&CardData>) -> bool {
    match top {
        None => card.rank == Rank::KING,
        Some(top) => {
            top.show
                && top.suit.is_red() != card.suit.is_red()
                && top.rank.value() == card.rank.value() + 1
        }
    }
}

/// Face up cards building down in alternating colors
fn is_sequence(cards: &[CardData]) -> bool {
    cards
        .windows(2)
        .all(|pair| pair[0].show && fits_tableau(&pair[1], Some(&pair[0])))
}

/// Length of the movable run at the top of a tableau pile
fn face_up_run(cards: &[CardData]) -> usize {
    let mut run = 0;
    for i in (0..cards.len()).rev() {
        if !cards[i].show || (run > 0 && !fits_tableau(&cards[i + 1], Some(&cards[i]))) {
            break;
        }
        run += 1;
    }
    run
}
