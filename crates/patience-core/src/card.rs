//! Card value types.
//!
//! This module contains:
//! - Suit and rank enums with the numeric values the rules layer uses
//! - `CardData`, the value a slot holds
//! - `SuitAndRank`, the face-independent identity of a physical card

use serde::{Deserialize, Serialize};
use std::fmt;

/// Card suit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Suit {
    Clubs,
    Diamonds,
    Hearts,
    Spades,
}

impl Suit {
    /// All suits in rules-layer order
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    /// Numeric value used by the rules layer
    pub fn index(self) -> u8 {
        match self {
            Suit::Clubs => 0,
            Suit::Diamonds => 1,
            Suit::Hearts => 2,
            Suit::Spades => 3,
        }
    }

    /// Suit from the rules layer's numeric value
    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Whether the suit is red
    pub fn is_red(self) -> bool {
        matches!(self, Suit::Diamonds | Suit::Hearts)
    }

    /// Lowercase English name
    pub fn name(self) -> &'static str {
        match self {
            Suit::Clubs => "clubs",
            Suit::Diamonds => "diamonds",
            Suit::Hearts => "hearts",
            Suit::Spades => "spades",
        }
    }
}

/// Card rank.
///
/// Ranks 1..=13 are the regular cards. `0` is a joker and `14` a high ace,
/// which some games use instead of a regular ace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(u8);

impl Rank {
    pub const JOKER: Rank = Rank(0);
    pub const ACE: Rank = Rank(1);
    pub const JACK: Rank = Rank(11);
    pub const QUEEN: Rank = Rank(12);
    pub const KING: Rank = Rank(13);
    pub const ACE_HIGH: Rank = Rank(14);

    /// Card back sentinel used when drawing face-down cards
    pub const CARD_BACK: u8 = 54;
    /// Empty slot sentinel used when drawing empty slots
    pub const CARD_SLOT: u8 = 55;

    /// Create a rank, rejecting values outside joker..=ace-high
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::ACE_HIGH.0).then_some(Rank(value))
    }

    /// Numeric value
    pub fn value(self) -> u8 {
        self.0
    }

    /// Lowercase English name
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "joker",
            1 | 14 => "ace",
            2 => "two",
            3 => "three",
            4 => "four",
            5 => "five",
            6 => "six",
            7 => "seven",
            8 => "eight",
            9 => "nine",
            10 => "ten",
            11 => "jack",
            12 => "queen",
            _ => "king",
        }
    }

    /// All regular ranks from ace to king
    pub fn regular() -> impl Iterator<Item = Rank> {
        (1..=13).map(Rank)
    }
}

/// Face-independent identity of a card.
///
/// Two `CardData` values with the same `SuitAndRank` describe the same
/// physical card, whichever way up it lies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuitAndRank {
    pub suit: Suit,
    pub rank: Rank,
}

impl fmt::Display for SuitAndRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}", self.rank.name(), self.suit.name())
    }
}

/// A card as the rules layer sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardData {
    pub suit: Suit,
    pub rank: Rank,
    /// Face up
    pub show: bool,
}

impl CardData {
    /// Create a card
    pub fn new(suit: Suit, rank: Rank, show: bool) -> Self {
        Self { suit, rank, show }
    }

    /// Identity of the card regardless of its face
    pub fn value(&self) -> SuitAndRank {
        SuitAndRank {
            suit: self.suit,
            rank: self.rank,
        }
    }

    /// Same physical card, ignoring which way up it lies
    pub fn equal_value(&self, other: &CardData) -> bool {
        self.suit == other.suit && self.rank == other.rank
    }

    /// Copy of this card with the given face
    pub fn with_show(mut self, show: bool) -> Self {
        self.show = show;
        self
    }

    /// Human readable name, e.g. "queen of hearts"
    pub fn name(&self) -> String {
        self.value().to_string()
    }
}

impl fmt::Display for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())?;
        if !self.show {
            write!(f, " from behind")?;
        }
        Ok(())
    }
}

/// Ordered list of cards, bottom card first
pub type CardList = Vec<CardData>;

/// Build a standard 52 card deck, every card face down
pub fn standard_deck() -> CardList {
    Suit::ALL
        .iter()
        .flat_map(|&suit| Rank::regular().map(move |rank| CardData::new(suit, rank, false)))
        .collect()
}
