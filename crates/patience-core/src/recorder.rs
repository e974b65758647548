//! Move recording, persistence and replay bookkeeping.
//!
//! This module contains:
//! - `Record`, one user-visible move and its compact token form
//! - `SavedState`, the persisted session string
//! - `Recorder`, the move log with undo/redo, rate-limited saving, the
//!   previous game snapshot and the replay cursor
//!
//! The recorder never calls the engine. The engine asks it for the next
//! record to replay and reports back.

use crate::config::EngineConfig;
use crate::slot::SlotId;
use crate::store::{set_or_warn, StateStore, STATE_KEY};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Format version of the encoded move log
pub const DATA_VERSION: &str = "0";

// ==================== Records ====================

/// One recorded move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Deal,
    Move {
        start: SlotId,
        end: SlotId,
        count: usize,
    },
    Click(SlotId),
    DoubleClick(SlotId),
}

/// Invalid record token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("empty record")]
    Empty,

    #[error("unknown record kind in {0:?}")]
    UnknownKind(String),

    #[error("record {0:?} has too few fields")]
    MissingField(String),

    #[error("record {0:?} has a bad number")]
    BadNumber(String),

    #[error("move record {0:?} moves no cards")]
    NoCards(String),
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Deal => write!(f, "D"),
            Record::Move { start, end, count } => write!(f, "M:{start}:{end}:{count}"),
            Record::Click(slot) => write!(f, "C:{slot}"),
            Record::DoubleClick(slot) => write!(f, "L:{slot}"),
        }
    }
}

impl FromStr for Record {
    type Err = RecordError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = token.split(':').collect();
        let number = |i: usize| -> Result<usize, RecordError> {
            parts
                .get(i)
                .ok_or_else(|| RecordError::MissingField(token.to_string()))?
                .parse()
                .map_err(|_| RecordError::BadNumber(token.to_string()))
        };

        match parts[0] {
            "" => Err(RecordError::Empty),
            "D" => Ok(Record::Deal),
            "M" => {
                let record = Record::Move {
                    start: number(1)?,
                    end: number(2)?,
                    count: number(3)?,
                };
                match record {
                    Record::Move { count: 0, .. } => Err(RecordError::NoCards(token.to_string())),
                    record => Ok(record),
                }
            }
            "C" => Ok(Record::Click(number(1)?)),
            "L" => Ok(Record::DoubleClick(number(1)?)),
            _ => Err(RecordError::UnknownKind(token.to_string())),
        }
    }
}

// ==================== Saved state ====================

/// Invalid persisted session
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no saved state")]
    Missing,

    #[error("saved state has no game file")]
    NoGameFile,

    #[error("bad seed {0:?}")]
    BadSeed(String),

    #[error("move log is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("move log could not be (de)compressed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("move log has no elapsed time")]
    BadTime,

    #[error(transparent)]
    Record(#[from] RecordError),
}

/// A persisted session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SavedState {
    pub game_file: String,
    pub seed: Option<u32>,
    pub elapsed_ms: u64,
    pub records: Vec<Record>,
}

impl SavedState {
    /// `gameFile[;seed[;version;base64(zlib(elapsed:tokens))]]`
    pub fn encode(&self) -> Result<String, StateError> {
        let mut parts = vec![self.game_file.clone()];
        if let Some(seed) = self.seed {
            parts.push(seed.to_string());
            if !self.records.is_empty() {
                parts.push(DATA_VERSION.to_string());
                parts.push(compress(&format!(
                    "{}:{}",
                    self.elapsed_ms,
                    join_records(&self.records)
                ))?);
            }
        }
        Ok(parts.join(";"))
    }

    pub fn decode(text: &str) -> Result<Self, StateError> {
        let parts: Vec<&str> = text.split(';').collect();
        if parts[0].is_empty() {
            return Err(StateError::NoGameFile);
        }

        let mut state = SavedState {
            game_file: parts[0].to_string(),
            ..Self::default()
        };
        let Some(seed) = parts.get(1) else {
            return Ok(state);
        };
        state.seed = Some(
            seed.parse()
                .map_err(|_| StateError::BadSeed(seed.to_string()))?,
        );

        if parts.len() >= 4 {
            if parts[2] != DATA_VERSION {
                warn!("Ignoring moves stored in unknown format {}", parts[2]);
                return Ok(state);
            }
            let moves = decompress(parts[3])?;
            let (time, tokens) = moves.split_once(':').ok_or(StateError::BadTime)?;
            state.elapsed_ms = time.parse().map_err(|_| StateError::BadTime)?;
            state.records = split_records(tokens)?;
        }
        Ok(state)
    }
}

/// Comma-joined record tokens
pub fn join_records(records: &[Record]) -> String {
    records
        .iter()
        .map(Record::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse comma-joined record tokens
pub fn split_records(tokens: &str) -> Result<Vec<Record>, RecordError> {
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    tokens.split(',').map(str::parse).collect()
}

fn compress(text: &str) -> Result<String, StateError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    Ok(STANDARD.encode(encoder.finish()?))
}

fn decompress(text: &str) -> Result<String, StateError> {
    let bytes = STANDARD.decode(text)?;
    let mut decoded = String::new();
    ZlibDecoder::new(bytes.as_slice()).read_to_string(&mut decoded)?;
    Ok(decoded)
}

// ==================== Clock ====================

/// Playing time of the current game
#[derive(Debug, Clone, Default)]
pub struct GameClock {
    offset: Duration,
    running_since: Option<Instant>,
}

impl GameClock {
    /// Start counting from `offset`
    pub fn start(&mut self, offset: Duration) {
        self.offset = offset;
        self.running_since = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        self.offset = self.elapsed();
        self.running_since = None;
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.offset + self.running_since.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }
}

// ==================== Recorder ====================

/// How a replay ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayStatus {
    /// Nothing could be restored
    Failed,
    /// Every record was replayed
    Success,
    /// Replay went out of sync, the game must be restarted
    NeedsRestart,
}

/// A session the engine should load before replaying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayStart {
    pub game_file: String,
    pub seed: Option<u32>,
    pub elapsed_ms: u64,
}

/// Next replay step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStep {
    Replay(Record),
    Completed,
}

/// Previous unfinished game kept for restoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldState {
    pub records: Vec<Record>,
    pub seed: u32,
    pub elapsed_ms: u64,
}

/// Move log of the running game
pub struct Recorder {
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    records: Vec<Record>,
    abandoned: Vec<Record>,
    /// One-based replay cursor, zero when not replaying
    replaying: usize,
    game_file: String,
    has_seed: bool,
    seed: u32,
    /// Moves since the last save
    moves: u32,
    last_save: Option<Instant>,
    old_state: Option<OldState>,
    clock: GameClock,
}

impl Recorder {
    pub fn new(store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            records: Vec::new(),
            abandoned: Vec::new(),
            replaying: 0,
            game_file: String::new(),
            has_seed: false,
            seed: 0,
            moves: 0,
            last_save: None,
            old_state: None,
            clock: GameClock::default(),
        }
    }

    pub fn replaying(&self) -> bool {
        self.replaying > 0
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn abandoned(&self) -> &[Record] {
        &self.abandoned
    }

    pub fn old_state(&self) -> Option<&OldState> {
        self.old_state.as_ref()
    }

    pub fn clock(&self) -> &GameClock {
        &self.clock
    }

    /// Session as it would be saved now
    pub fn saved_state(&self) -> SavedState {
        SavedState {
            game_file: self.game_file.clone(),
            seed: self.has_seed.then_some(self.seed),
            elapsed_ms: self.clock.elapsed_ms(),
            records: self.records.clone(),
        }
    }

    // ==================== Recording ====================

    fn record(&mut self, record: Record) {
        if !self.replaying() {
            debug!("Recording {}", record);
            self.records.push(record);
            self.abandoned.clear();
        }
    }

    pub fn record_deal(&mut self) {
        self.record(Record::Deal);
    }

    pub fn record_drop(&mut self, start: SlotId, end: SlotId, count: usize) {
        self.record(Record::Move { start, end, count });
    }

    pub fn record_click(&mut self, slot: SlotId) {
        self.record(Record::Click(slot));
    }

    pub fn record_double_click(&mut self, slot: SlotId) {
        self.record(Record::DoubleClick(slot));
    }

    pub fn undo(&mut self) {
        if !self.replaying() {
            if let Some(record) = self.records.pop() {
                self.abandoned.push(record);
            }
        }
    }

    pub fn redo(&mut self) {
        if !self.replaying() {
            if let Some(record) = self.abandoned.pop() {
                self.records.push(record);
            }
        }
    }

    /// Forget every move and force the next save
    pub fn clear(&mut self) {
        self.records.clear();
        self.abandoned.clear();
        self.moves += 1;
    }

    // ==================== Seed ====================

    pub fn set_seed(&mut self, seed: u32) {
        debug!("Storing seed");
        self.seed = seed;
        self.has_seed = true;
    }

    /// The recorded moves no longer reproduce the game
    pub fn invalidate_state(&mut self) {
        debug!("Invalidating state");
        self.has_seed = false;
    }

    // ==================== Saving ====================

    /// Save unless a save happened very recently with nothing new to store
    pub fn save(&mut self) {
        let due = match self.last_save {
            None => true,
            Some(at) => at.elapsed() >= self.config.min_save_interval(),
        };
        if due || self.moves > 0 {
            self.write();
        }
    }

    fn write(&mut self) {
        match self.saved_state().encode() {
            Ok(state) => {
                set_or_warn(self.store.as_ref(), STATE_KEY, &state);
                debug!("Saved engine state");
            }
            Err(e) => error!("Could not encode engine state: {}", e),
        }
        self.moves = 0;
        self.last_save = Some(Instant::now());
    }

    // ==================== Engine notifications ====================

    pub fn handle_game_loaded(&mut self, game_file: &str) {
        self.game_file = game_file.to_string();
    }

    pub fn handle_game_started(&mut self) {
        if !self.replaying() {
            debug!("Game started, resetting recorded state");
            self.clear();
            self.clock.start(Duration::ZERO);
            self.save();
        }
    }

    pub fn handle_move_ended(&mut self) {
        if self.replaying() {
            return;
        }
        self.moves += 1;
        let timed_out = self
            .last_save
            .map(|at| at.elapsed() >= self.config.save_timeout())
            .unwrap_or(true);
        if self.moves >= self.config.moves_between_saves || timed_out {
            self.save();
        }
    }

    pub fn handle_game_over(&mut self) {
        self.clock.stop();
        if !self.replaying() {
            self.save();
        }
    }

    pub fn handle_game_continued(&mut self) {
        self.clock.resume();
    }

    /// The engine died. A replay in progress is abandoned.
    pub fn handle_engine_failure(&mut self) -> Option<ReplayStatus> {
        if self.replaying() {
            warn!("Engine failure while replaying moves");
            return Some(self.fail());
        }
        None
    }

    // ==================== Previous game ====================

    /// Keep the running game for restoring later. Returns whether it was kept.
    pub fn store_old_state(&mut self) -> bool {
        if self.replaying() || !self.has_seed {
            return false;
        }
        self.old_state = Some(OldState {
            records: self.records.clone(),
            seed: self.seed,
            elapsed_ms: self.clock.elapsed_ms(),
        });
        debug!("Stored old state");
        true
    }

    /// Bring back the previous game's moves for replaying
    pub fn restore_old_state(&mut self) -> Option<ReplayStart> {
        let old = self.old_state.take()?;
        self.records = old.records;
        self.abandoned.clear();
        self.has_seed = true;
        self.seed = old.seed;
        self.moves = 0;
        debug!("Restored old state");
        self.clock.start(Duration::from_millis(old.elapsed_ms));
        Some(ReplayStart {
            game_file: self.game_file.clone(),
            seed: Some(old.seed),
            elapsed_ms: old.elapsed_ms,
        })
    }

    /// Forget the previous game. Returns whether there was one.
    pub fn drop_old_state(&mut self) -> bool {
        if self.old_state.take().is_some() {
            debug!("Dropped old state");
            true
        } else {
            false
        }
    }

    // ==================== Replay ====================

    /// Load the saved session
    pub fn start_replay(&mut self) -> Result<ReplayStart, StateError> {
        debug!("Starting replay");
        let text = self.store.get(STATE_KEY).ok_or(StateError::Missing)?;
        let state = match SavedState::decode(&text) {
            Ok(state) => state,
            Err(e) => {
                info!("Engine state was not restored: {}", e);
                return Err(e);
            }
        };
        debug!("Loaded state {}", text);

        self.records = state.records;
        self.abandoned.clear();
        self.moves = 0;
        self.clock.start(Duration::from_millis(state.elapsed_ms));
        Ok(ReplayStart {
            game_file: state.game_file,
            seed: state.seed,
            elapsed_ms: state.elapsed_ms,
        })
    }

    /// Begin replaying from the first record
    pub fn replay_move(&mut self) {
        debug!("Replaying first move");
        self.replaying = 1;
    }

    /// Record at the cursor, or completion once every record has been replayed
    pub fn next_step(&mut self) -> ReplayStep {
        if !self.replaying() {
            error!("Tried to replay a move while not replaying");
            return ReplayStep::Completed;
        }
        match self.records.get(self.replaying - 1) {
            Some(record) => ReplayStep::Replay(*record),
            None => {
                self.replaying = 0;
                ReplayStep::Completed
            }
        }
    }

    /// The record at the cursor was replayed
    pub fn advance(&mut self) {
        if self.replaying() {
            self.replaying += 1;
        }
    }

    /// Abandon the session so the failure can not repeat
    pub fn fail(&mut self) -> ReplayStatus {
        warn!("Failed to restore game, abandoning state and resetting engine");
        self.clear();
        self.replaying = 0;
        self.save();
        ReplayStatus::NeedsRestart
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn recorder() -> (Arc<MemoryStore>, Recorder) {
        let store = Arc::new(MemoryStore::new());
        let recorder = Recorder::new(store.clone(), EngineConfig::default());
        (store, recorder)
    }

    #[test]
    fn test_record_tokens() {
        assert_eq!(Record::Deal.to_string(), "D");
        assert_eq!(
            Record::Move {
                start: 0,
                end: 4,
                count: 1
            }
            .to_string(),
            "M:0:4:1"
        );
        assert_eq!("C:2".parse(), Ok(Record::Click(2)));
        assert_eq!("L:0".parse(), Ok(Record::DoubleClick(0)));
    }

    #[test]
    fn test_record_rejects_bad_tokens() {
        assert_eq!("".parse::<Record>(), Err(RecordError::Empty));
        assert!(matches!(
            "M:1:2:0".parse::<Record>(),
            Err(RecordError::NoCards(_))
        ));
        assert!(matches!(
            "M:1:2".parse::<Record>(),
            Err(RecordError::MissingField(_))
        ));
        assert!(matches!(
            "C:x".parse::<Record>(),
            Err(RecordError::BadNumber(_))
        ));
        assert!(matches!(
            "X:1".parse::<Record>(),
            Err(RecordError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_saved_state_encoding() {
        let state = SavedState {
            game_file: "klondike.scm".into(),
            seed: Some(123456),
            elapsed_ms: 4200,
            records: vec![
                Record::Move {
                    start: 0,
                    end: 4,
                    count: 1,
                },
                Record::Deal,
            ],
        };
        let text = state.encode().unwrap();
        assert!(text.starts_with("klondike.scm;123456;0;"));
        assert_eq!(SavedState::decode(&text).unwrap(), state);
    }

    #[test]
    fn test_saved_state_without_seed() {
        let state = SavedState::decode("freecell.scm").unwrap();
        assert_eq!(state.game_file, "freecell.scm");
        assert_eq!(state.seed, None);
        assert!(state.records.is_empty());

        let plain = SavedState {
            game_file: "freecell.scm".into(),
            ..SavedState::default()
        };
        assert_eq!(plain.encode().unwrap(), "freecell.scm");
    }

    #[test]
    fn test_saved_state_errors() {
        assert!(matches!(SavedState::decode(""), Err(StateError::NoGameFile)));
        assert!(matches!(
            SavedState::decode("klondike.scm;seed"),
            Err(StateError::BadSeed(_))
        ));
        assert!(matches!(
            SavedState::decode("klondike.scm;1;0;!!!"),
            Err(StateError::Encoding(_))
        ));
        // Unknown format versions keep the seed but drop the moves
        let state = SavedState::decode("klondike.scm;1;9;whatever").unwrap();
        assert_eq!(state.seed, Some(1));
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_dropping_does_not_save() {
        let (store, mut recorder) = recorder();
        recorder.handle_game_loaded("klondike.scm");
        recorder.set_seed(5);
        recorder.handle_game_started();
        recorder.record_deal();
        drop(recorder);

        let saved = store.get(STATE_KEY).unwrap();
        let state = SavedState::decode(&saved).unwrap();
        assert_eq!(state.seed, Some(5));
        assert!(state.records.is_empty());
    }

    #[test]
    fn test_undo_redo_scenario() {
        let (_, mut recorder) = recorder();
        recorder.record_drop(0, 4, 1);
        recorder.record_deal();
        recorder.record_click(2);

        recorder.undo();
        assert_eq!(
            recorder.records(),
            &[
                Record::Move {
                    start: 0,
                    end: 4,
                    count: 1
                },
                Record::Deal
            ]
        );
        assert_eq!(recorder.abandoned(), &[Record::Click(2)]);

        recorder.redo();
        assert_eq!(recorder.records().len(), 3);
        assert!(recorder.abandoned().is_empty());
    }

    #[test]
    fn test_save_and_replay_cursor() {
        let (store, mut recorder) = recorder();
        recorder.handle_game_loaded("klondike.scm");
        recorder.set_seed(77);
        recorder.record_deal();
        recorder.record_click(1);
        recorder.save();
        assert!(store.get(STATE_KEY).unwrap().starts_with("klondike.scm;77;0;"));

        let mut replayer = Recorder::new(store.clone(), EngineConfig::default());
        let start = replayer.start_replay().unwrap();
        assert_eq!(start.game_file, "klondike.scm");
        assert_eq!(start.seed, Some(77));

        replayer.replay_move();
        assert_eq!(replayer.next_step(), ReplayStep::Replay(Record::Deal));
        // Recording is disabled while replaying
        replayer.record_deal();
        replayer.advance();
        assert_eq!(replayer.next_step(), ReplayStep::Replay(Record::Click(1)));
        replayer.advance();
        assert_eq!(replayer.next_step(), ReplayStep::Completed);
        assert!(!replayer.replaying());
        assert_eq!(replayer.records().len(), 2);
    }

    #[test]
    fn test_fail_clears_and_saves() {
        let (store, mut recorder) = recorder();
        recorder.handle_game_loaded("klondike.scm");
        recorder.set_seed(5);
        recorder.record_deal();
        recorder.replay_move();
        assert_eq!(recorder.fail(), ReplayStatus::NeedsRestart);
        assert!(!recorder.replaying());
        assert!(recorder.records().is_empty());
        assert_eq!(store.get(STATE_KEY).as_deref(), Some("klondike.scm;5"));
    }

    #[test]
    fn test_start_replay_without_state() {
        let (store, mut recorder) = recorder();
        assert!(matches!(recorder.start_replay(), Err(StateError::Missing)));
        store.set(STATE_KEY, "klondike.scm;bad").unwrap();
        assert!(matches!(
            recorder.start_replay(),
            Err(StateError::BadSeed(_))
        ));
    }

    #[test]
    fn test_old_state_swap() {
        let (_, mut recorder) = recorder();
        recorder.handle_game_loaded("klondike.scm");
        assert!(!recorder.store_old_state());

        recorder.set_seed(9);
        recorder.record_deal();
        assert!(recorder.store_old_state());
        recorder.handle_game_started();
        assert!(recorder.records().is_empty());

        let start = recorder.restore_old_state().unwrap();
        assert_eq!(start.seed, Some(9));
        assert_eq!(recorder.records(), &[Record::Deal]);
        assert!(recorder.old_state().is_none());
        assert!(!recorder.drop_old_state());
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        prop_oneof![
            Just(Record::Deal),
            (0usize..20, 0usize..20, 1usize..100_000)
                .prop_map(|(start, end, count)| Record::Move { start, end, count }),
            (0usize..20).prop_map(Record::Click),
            (0usize..20).prop_map(Record::DoubleClick),
        ]
    }

    proptest! {
        #[test]
        fn prop_record_token_round_trip(record in arb_record()) {
            prop_assert_eq!(record.to_string().parse::<Record>(), Ok(record));
        }

        #[test]
        fn prop_undo_redo_duality(
            records in prop::collection::vec(arb_record(), 1..30),
            undos in 0usize..30,
        ) {
            let (_, mut recorder) = recorder();
            for record in &records {
                match *record {
                    Record::Deal => recorder.record_deal(),
                    Record::Move { start, end, count } => recorder.record_drop(start, end, count),
                    Record::Click(slot) => recorder.record_click(slot),
                    Record::DoubleClick(slot) => recorder.record_double_click(slot),
                }
            }
            let undos = undos.min(records.len());
            for _ in 0..undos {
                recorder.undo();
            }
            prop_assert_eq!(recorder.abandoned().len(), undos);
            for _ in 0..undos {
                recorder.redo();
            }
            prop_assert_eq!(recorder.records(), records.as_slice());

            if undos > 0 {
                for _ in 0..undos {
                    recorder.undo();
                }
                recorder.record_deal();
                prop_assert!(recorder.abandoned().is_empty());
            }
        }
    }
}
