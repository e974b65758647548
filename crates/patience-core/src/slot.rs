//! Slot description types.
//!
//! A slot is an ordered pile of cards. The engine owns the canonical
//! contents; this module only describes what a slot is and how it is laid
//! out on the table.

use crate::card::CardList;
use serde::{Deserialize, Serialize};

/// Slot identifier, assigned by the rules layer when the slot is created
pub type SlotId = usize;

/// Role of a slot in the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SlotType {
    #[default]
    Unknown,
    Chooser,
    Foundation,
    Reserve,
    Stock,
    Tableau,
    Waste,
}

impl SlotType {
    /// Parse the symbol the rules layer uses for the slot type
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol {
            "chooser" => SlotType::Chooser,
            "foundation" => SlotType::Foundation,
            "reserve" => SlotType::Reserve,
            "stock" => SlotType::Stock,
            "tableau" => SlotType::Tableau,
            "waste" => SlotType::Waste,
            _ => SlotType::Unknown,
        }
    }
}

/// Where a slot sits and how its cards fan out
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotLayout {
    pub x: f64,
    pub y: f64,
    /// How many trailing cards fan out, `None` for all of them
    pub expansion_depth: Option<usize>,
    pub expanded_down: bool,
    pub expanded_right: bool,
    /// Explicit fan delta overriding the default spacing
    pub expansion_delta: Option<f64>,
}

impl SlotLayout {
    /// A slot showing only its top card
    pub fn stacked(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            expansion_depth: Some(0),
            ..Self::default()
        }
    }

    /// A slot fanning all of its cards downwards
    pub fn fanned_down(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            expansion_depth: None,
            expanded_down: true,
            ..Self::default()
        }
    }

    /// A slot fanning its top `depth` cards to the right
    pub fn fanned_right(x: f64, y: f64, depth: usize) -> Self {
        Self {
            x,
            y,
            expansion_depth: Some(depth),
            expanded_right: true,
            ..Self::default()
        }
    }
}

/// Everything the rules layer supplies when creating a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub id: SlotId,
    pub cards: CardList,
    pub slot_type: SlotType,
    pub layout: SlotLayout,
}
