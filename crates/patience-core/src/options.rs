//! Game options.
//!
//! Games describe their options as a list value. Each entry is either a
//! `[name, set]` pair or an atom. An atom switches between check options
//! and a radio group; entering radio mode opens a new group.

use crate::rules::Value;
use crate::store::{remove_or_warn, set_or_warn, StateStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Group of check options
pub const NO_OPTION_GROUP: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameOptionType {
    Check,
    Radio,
}

/// One named boolean option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOption {
    pub display_name: String,
    pub kind: GameOptionType,
    /// Radio group, [`NO_OPTION_GROUP`] for check options
    pub group: u32,
    /// Position in the rules' option list
    pub index: u32,
    pub set: bool,
}

/// Build the option list from the rules' `get-options` value
pub fn parse_options(value: &Value) -> Vec<GameOption> {
    let Some(entries) = value.as_list() else {
        return Vec::new();
    };

    let mut group = NO_OPTION_GROUP;
    let mut check = true;
    let mut options = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let Some(pair) = entry.as_list() else {
            debug!("Atom at {}", i);
            if check {
                group += 1;
            }
            check = !check;
            continue;
        };

        let Some(name) = pair.first().and_then(Value::as_str) else {
            warn!("Option at {} has no name", i);
            continue;
        };
        let set = pair.get(1).map(Value::is_true).unwrap_or(false);
        debug!(
            "{} option {} at {}",
            if check { "Checkbox" } else { "Radio" },
            name,
            i
        );
        options.push(GameOption {
            display_name: name.to_string(),
            kind: if check {
                GameOptionType::Check
            } else {
                GameOptionType::Radio
            },
            group: if check { NO_OPTION_GROUP } else { group },
            index: i as u32,
            set,
        });
    }
    options
}

/// Write option states into the rules' option list.
///
/// Returns `None` when the value is not a list or an option points at an
/// atom.
pub fn apply_to_value(value: &Value, options: &[GameOption]) -> Option<Value> {
    let mut value = value.clone();
    let entries = value.as_list_mut()?;
    for option in options {
        let Some(pair) = entries
            .get_mut(option.index as usize)
            .and_then(Value::as_list_mut)
        else {
            warn!("Option at {} is an atom, can not set it", option.index);
            return None;
        };
        match pair.get_mut(1) {
            Some(slot) => *slot = Value::Bool(option.set),
            None => pair.push(Value::Bool(option.set)),
        }
    }
    Some(value)
}

/// Store key for a game's options, namespaced by the base name
pub fn options_key(game_file: &str) -> String {
    let base = game_file.rsplit('/').next().unwrap_or(game_file);
    let base = base.strip_suffix(".scm").unwrap_or(base);
    format!("/options/{base}")
}

/// Apply stored option states. Returns whether anything was stored.
pub fn load_options(store: &dyn StateStore, game_file: &str, options: &mut [GameOption]) -> bool {
    let Some(stored) = store.get(&options_key(game_file)) else {
        return false;
    };
    let set: Vec<u32> = stored
        .split(';')
        .filter_map(|index| index.trim().parse().ok())
        .collect();
    for option in options.iter_mut() {
        option.set = set.contains(&option.index);
    }
    true
}

/// Persist which options are set
pub fn save_options(store: &dyn StateStore, game_file: &str, options: &[GameOption]) {
    let value = options
        .iter()
        .filter(|option| option.set)
        .map(|option| option.index.to_string())
        .collect::<Vec<_>>()
        .join(";");
    set_or_warn(store, &options_key(game_file), &value);
}

pub fn clear_options(store: &dyn StateStore, game_file: &str) {
    remove_or_warn(store, &options_key(game_file));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn entry(name: &str, set: bool) -> Value {
        Value::List(vec![Value::from(name), Value::Bool(set)])
    }

    fn sample() -> Value {
        Value::List(vec![
            entry("Three card deals", false),
            Value::Bool(true),
            entry("Single pass", true),
            entry("Unlimited passes", false),
            Value::Bool(true),
            entry("Show score", true),
        ])
    }

    #[test]
    fn test_parse_groups() {
        let options = parse_options(&sample());
        let summary: Vec<(u32, GameOptionType, u32, bool)> = options
            .iter()
            .map(|o| (o.index, o.kind, o.group, o.set))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, GameOptionType::Check, 0, false),
                (2, GameOptionType::Radio, 1, true),
                (3, GameOptionType::Radio, 1, false),
                (5, GameOptionType::Check, 0, true),
            ]
        );
    }

    #[test]
    fn test_parse_non_list() {
        assert!(parse_options(&Value::Bool(false)).is_empty());
    }

    #[test]
    fn test_apply_to_value() {
        let mut options = parse_options(&sample());
        options[0].set = true;
        let applied = apply_to_value(&sample(), &options[..1]).unwrap();
        assert!(parse_options(&applied)[0].set);

        let bad = GameOption {
            index: 1,
            ..options[0].clone()
        };
        assert_eq!(apply_to_value(&sample(), &[bad]), None);
    }

    #[test]
    fn test_persistence() {
        let store = MemoryStore::new();
        let mut options = parse_options(&sample());
        assert!(!load_options(&store, "klondike.scm", &mut options));

        options[0].set = true;
        options[3].set = false;
        save_options(&store, "klondike.scm", &options);
        assert_eq!(store.get("/options/klondike").as_deref(), Some("0;2"));

        let mut reloaded = parse_options(&sample());
        assert!(load_options(&store, "klondike.scm", &mut reloaded));
        assert_eq!(reloaded, options);

        clear_options(&store, "klondike.scm");
        assert!(!load_options(&store, "klondike.scm", &mut reloaded));
    }
}
