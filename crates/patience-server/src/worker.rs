//! Engine worker, one per connection.
//!
//! The worker owns the session's [`Engine`] and processes requests strictly
//! in order. Everything the engine emits while handling one request goes
//! out as a single [`ServerMessage::Events`] batch, so mutation
//! notifications always arrive together with the move-ended marker that
//! closes them. Delayed calls run on a one-shot timer keyed by the
//! engine's generation number.

use crate::protocol::{ClientMessage, ServerMessage};
use patience_core::Engine;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A session's engine and its request handling
pub struct Worker {
    session_id: Uuid,
    engine: Engine,
}

impl Worker {
    pub fn new(session_id: Uuid, engine: Engine) -> Self {
        Self { session_id, engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Handle one request. Returns the reply, if any.
    pub fn handle(&mut self, message: ClientMessage) -> Option<ServerMessage> {
        debug!("Session {} request {:?}", self.session_id, message);
        let engine = &mut self.engine;
        let accepted = match message {
            ClientMessage::Load { game_file } => engine.load(&game_file),
            ClientMessage::Start { seed: Some(seed) } => engine.start_with_seed(seed),
            ClientMessage::Start { seed: None } => engine.start(),
            ClientMessage::Restart => engine.restart(),
            ClientMessage::Undo => engine.undo_move(),
            ClientMessage::Redo => engine.redo_move(),
            ClientMessage::Deal => engine.deal_card(),
            ClientMessage::Hint => engine.hint().is_some(),
            ClientMessage::Drag { id, slot, cards } => engine.drag(id, slot, &cards),
            ClientMessage::CancelDrag { id, slot, cards } => {
                engine.cancel_drag(id, slot, &cards);
                true
            }
            ClientMessage::CheckDrop {
                id,
                start,
                end,
                cards,
            } => engine.check_drop(id, start, end, &cards),
            ClientMessage::Drop {
                id,
                start,
                end,
                cards,
            } => engine.drop(id, start, end, &cards),
            ClientMessage::Click { id, slot } => engine.click(id, slot),
            ClientMessage::DoubleClick { id, slot } => engine.double_click(id, slot),
            ClientMessage::RequestOptions => {
                engine.request_game_options();
                true
            }
            ClientMessage::SetOptions { options } => engine.set_game_options(&options),
            ClientMessage::SaveState => {
                engine.save_state();
                true
            }
            ClientMessage::ResetSavedState => {
                engine.reset_saved_state();
                true
            }
            ClientMessage::RestoreSavedState { fallback: Some(game_file) } => {
                engine.restore_saved_or_load(&game_file)
            }
            ClientMessage::RestoreSavedState { fallback: None } => engine.restore_saved_state(),
            ClientMessage::RestorePreviousGame => engine.restore_previous_game(),
            ClientMessage::ForgetPreviousGame => {
                engine.forget_previous_game();
                true
            }
            ClientMessage::History => {
                return Some(ServerMessage::History {
                    games: engine.history(),
                })
            }
            ClientMessage::Ping => return Some(ServerMessage::Pong),
        };
        Some(self.events(accepted))
    }

    /// Fire the delayed call of the given generation
    pub fn fire(&mut self, generation: u64) -> Option<ServerMessage> {
        if !self.engine.fire_delayed_call(generation) {
            return None;
        }
        Some(self.events(true))
    }

    /// Deadline of the pending delayed call, kept while the generation stays
    fn deadline(&self, current: Option<(u64, Instant)>) -> Option<(u64, Instant)> {
        let call = self.engine.pending_delayed_call()?;
        match current {
            Some((generation, at)) if generation == call.generation => Some((generation, at)),
            _ => Some((call.generation, Instant::now() + call.delay)),
        }
    }

    /// Save the session, the connection is gone
    pub fn close(&mut self) {
        info!("Saving session {}", self.session_id);
        self.engine.save_state();
    }

    fn events(&mut self, accepted: bool) -> ServerMessage {
        ServerMessage::Events {
            accepted,
            batch: self.engine.take_events(),
        }
    }
}

/// Wait for the timer, forever when there is none
async fn expire(timer: Option<(u64, Instant)>) -> u64 {
    match timer {
        Some((generation, at)) => {
            sleep_until(at).await;
            generation
        }
        None => std::future::pending().await,
    }
}

/// Process requests until the connection drops its sender
pub async fn run(
    mut worker: Worker,
    mut requests: mpsc::UnboundedReceiver<ClientMessage>,
    replies: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut timer = None;
    loop {
        timer = worker.deadline(timer);
        let reply = tokio::select! {
            request = requests.recv() => match request {
                Some(message) => worker.handle(message),
                None => break,
            },
            generation = expire(timer) => worker.fire(generation),
        };
        if let Some(reply) = reply {
            if replies.send(reply).is_err() {
                warn!("Session {} stopped listening", worker.session_id);
            }
        }
    }
    worker.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use patience_core::{EngineConfig, EngineEvent, GameCatalog, MemoryStore, StateStore};
    use std::sync::Arc;

    fn worker() -> Worker {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let engine = Engine::new(GameCatalog::with_builtin(), store, EngineConfig::default());
        Worker::new(Uuid::new_v4(), engine)
    }

    fn batch(reply: Option<ServerMessage>) -> (bool, Vec<EngineEvent>) {
        match reply {
            Some(ServerMessage::Events { accepted, batch }) => (accepted, batch),
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[test]
    fn test_load_and_start() {
        let mut worker = worker();
        let (accepted, events) = batch(worker.handle(ClientMessage::Load {
            game_file: "klondike.scm".to_string(),
        }));
        assert!(accepted);
        assert!(events.contains(&EngineEvent::GameLoaded {
            game_file: "klondike.scm".to_string()
        }));

        let (accepted, events) = batch(worker.handle(ClientMessage::Start { seed: Some(8) }));
        assert!(accepted);
        assert!(events.contains(&EngineEvent::GameStarted));
        assert_eq!(worker.engine().seed(), 8);
    }

    #[test]
    fn test_move_batch_ends_with_marker() {
        let mut worker = worker();
        worker.handle(ClientMessage::Load {
            game_file: "klondike.scm".to_string(),
        });
        worker.handle(ClientMessage::Start { seed: Some(8) });

        let (accepted, events) = batch(worker.handle(ClientMessage::Deal));
        assert!(accepted);
        let ended = events
            .iter()
            .position(|e| matches!(e, EngineEvent::MoveEnded { .. }))
            .unwrap();
        let last_action = events
            .iter()
            .rposition(|e| matches!(e, EngineEvent::Action { .. }))
            .unwrap();
        assert!(last_action < ended);
    }

    #[test]
    fn test_refused_request_is_reported() {
        let mut worker = worker();
        let (accepted, events) = batch(worker.handle(ClientMessage::Undo));
        assert!(!accepted);
        assert!(events.is_empty());
    }

    #[test]
    fn test_ping_and_history() {
        let mut worker = worker();
        assert!(matches!(
            worker.handle(ClientMessage::Ping),
            Some(ServerMessage::Pong)
        ));
        worker.handle(ClientMessage::Load {
            game_file: "klondike.scm".to_string(),
        });
        match worker.handle(ClientMessage::History) {
            Some(ServerMessage::History { games }) => assert_eq!(games, vec!["klondike.scm"]),
            other => panic!("expected history, got {:?}", other),
        }
    }

    #[test]
    fn test_no_timer_without_delayed_call() {
        let mut worker = worker();
        assert_eq!(worker.deadline(None), None);
        assert!(worker.fire(1).is_none());
    }

    #[tokio::test]
    async fn test_run_answers_in_order_and_saves() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let engine = Engine::new(GameCatalog::with_builtin(), store.clone(), EngineConfig::default());
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (replies_tx, mut replies_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(
            Worker::new(Uuid::new_v4(), engine),
            requests_rx,
            replies_tx,
        ));

        requests_tx
            .send(ClientMessage::Load {
                game_file: "klondike.scm".to_string(),
            })
            .unwrap();
        requests_tx.send(ClientMessage::Start { seed: Some(1) }).unwrap();
        requests_tx.send(ClientMessage::Ping).unwrap();
        drop(requests_tx);
        task.await.unwrap();

        assert!(matches!(
            replies_rx.recv().await,
            Some(ServerMessage::Events { accepted: true, .. })
        ));
        assert!(matches!(
            replies_rx.recv().await,
            Some(ServerMessage::Events { accepted: true, .. })
        ));
        assert!(matches!(replies_rx.recv().await, Some(ServerMessage::Pong)));
        assert!(store.get(patience_core::store::STATE_KEY).is_some());
    }
}
