//! Recently loaded games, most recent first.

use crate::store::{set_or_warn, StateStore, HISTORY_KEY};

/// Maximum number of remembered games
pub const HISTORY_LENGTH: usize = 10;

/// Remembered game files
pub fn history(store: &dyn StateStore) -> Vec<String> {
    store
        .get(HISTORY_KEY)
        .unwrap_or_default()
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

/// Move a game file to the front of the history
pub fn remember(store: &dyn StateStore, game_file: &str) {
    let mut list = history(store);
    list.retain(|entry| entry != game_file);
    list.insert(0, game_file.to_string());
    list.truncate(HISTORY_LENGTH);
    set_or_warn(store, HISTORY_KEY, &list.join(";"));
}
