//! Engine policy configuration.

use crate::store::{StateStore, DELAY_KEY};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// What `check-drop` answers when the game lacks the droppable feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroppablePolicy {
    #[default]
    Deny,
    Allow,
}

/// Tunable engine constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra deals tried when a fresh deal has no moves
    pub max_retries: u32,
    /// Delay before a delayed call fires, zero while replaying
    pub delayed_call_delay_ms: u64,
    /// Moves after which the session is saved
    pub moves_between_saves: u32,
    /// Time after which the next move saves the session
    pub save_timeout_ms: u64,
    /// Minimum time between unforced saves
    pub min_save_interval_ms: u64,
    pub droppable_policy: DroppablePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delayed_call_delay_ms: 50,
            moves_between_saves: 10,
            save_timeout_ms: 30_000,
            min_save_interval_ms: 1_000,
            droppable_policy: DroppablePolicy::Deny,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `PATIENCE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |key: &str| -> Option<u64> {
            let value = lookup(key)?;
            match value.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!("Ignoring invalid {}={}", key, value);
                    None
                }
            }
        };

        if let Some(n) = read("PATIENCE_MAX_RETRIES") {
            config.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = read("PATIENCE_DELAYED_CALL_DELAY_MS") {
            config.delayed_call_delay_ms = n;
        }
        if let Some(n) = read("PATIENCE_MOVES_BETWEEN_SAVES") {
            config.moves_between_saves = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = read("PATIENCE_SAVE_TIMEOUT_MS") {
            config.save_timeout_ms = n;
        }
        if let Some(n) = read("PATIENCE_MIN_SAVE_INTERVAL_MS") {
            config.min_save_interval_ms = n;
        }
        match lookup("PATIENCE_DROPPABLE_POLICY").as_deref() {
            Some("allow") => config.droppable_policy = DroppablePolicy::Allow,
            Some("deny") => config.droppable_policy = DroppablePolicy::Deny,
            Some(other) => warn!("Ignoring invalid PATIENCE_DROPPABLE_POLICY={}", other),
            None => {}
        }
        config
    }

    /// Delay for delayed calls, honoring a valid stored override
    pub fn delayed_call_delay(&self, store: &dyn StateStore) -> Duration {
        let mut delay = self.delayed_call_delay_ms;
        if let Some(value) = store.get(DELAY_KEY) {
            match value.trim().parse::<i64>() {
                Ok(n) if n >= 0 => delay = n as u64,
                _ => warn!("Invalid delayedCallDelay value: {}", value),
            }
        }
        Duration::from_millis(delay)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_millis(self.save_timeout_ms)
    }

    pub fn min_save_interval(&self) -> Duration {
        Duration::from_millis(self.min_save_interval_ms)
    }
}
