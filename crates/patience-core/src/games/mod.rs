//! Built-in game rules and the catalog the engine loads them from.

mod klondike;
#[cfg(test)]
pub(crate) mod testing;
mod undo;

pub use klondike::Klondike;
pub use undo::MoveHistory;

use crate::rules::{Rules, ScriptError};
use std::collections::BTreeMap;
use std::fmt;

/// Creates a fresh rules instance for one loaded game
pub type RulesFactory = Box<dyn Fn() -> Box<dyn Rules> + Send + Sync>;

/// Game files the engine can load
#[derive(Default)]
pub struct GameCatalog {
    games: BTreeMap<String, RulesFactory>,
}

impl GameCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with every built-in game registered
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(Klondike::GAME_FILE, || Box::new(Klondike::new()));
        catalog
    }

    /// Register rules under a game file name, replacing earlier ones
    pub fn register<F>(&mut self, game_file: &str, factory: F)
    where
        F: Fn() -> Box<dyn Rules> + Send + Sync + 'static,
    {
        self.games
            .insert(base_name(game_file).to_string(), Box::new(factory));
    }

    /// Fresh rules for a game file, looked up by its base name
    pub fn create(&self, game_file: &str) -> Result<Box<dyn Rules>, ScriptError> {
        self.games
            .get(base_name(game_file))
            .map(|factory| factory())
            .ok_or_else(|| ScriptError::UnknownGame(game_file.to_string()))
    }

    pub fn contains(&self, game_file: &str) -> bool {
        self.games.contains_key(base_name(game_file))
    }

    /// Registered game files in name order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }
}

impl fmt::Debug for GameCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.games.keys()).finish()
    }
}

fn base_name(game_file: &str) -> &str {
    game_file.rsplit('/').next().unwrap_or(game_file)
}
