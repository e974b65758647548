//! WebSocket server and connection handling.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::worker::{self, Worker};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use patience_core::{Engine, EngineConfig, GameCatalog, StateStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

/// A connected client
#[derive(Debug, Clone)]
pub struct Session {
    pub peer: SocketAddr,
    /// Requests for the session's engine worker
    pub requests: mpsc::UnboundedSender<ClientMessage>,
}

/// Server state shared across all connections.
pub struct ServerState {
    /// All connected sessions
    pub sessions: DashMap<Uuid, Session>,
    /// Persistence shared by every engine
    pub store: Arc<dyn StateStore>,
    pub config: EngineConfig,
}

impl ServerState {
    pub fn new(store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            config,
        }
    }

    /// Fresh engine for a new session
    pub fn new_engine(&self) -> Engine {
        Engine::new(
            GameCatalog::with_builtin(),
            self.store.clone(),
            self.config.clone(),
        )
    }

    /// Forward a request to a session's worker
    pub fn send_to_session(&self, session_id: Uuid, msg: ClientMessage) -> bool {
        match self.sessions.get(&session_id) {
            Some(session) => session.requests.send(msg).is_ok(),
            None => false,
        }
    }
}

/// Run the WebSocket server.
pub async fn run_server(addr: SocketAddr, state: Arc<ServerState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Patience server listening on {}", addr);

    while let Ok((stream, peer_addr)) = listener.accept().await {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }

    Ok(())
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    info!("New WebSocket connection from {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session_id = Uuid::new_v4();
    let engine = state.new_engine();
    let games = engine.catalog().names().map(str::to_string).collect();

    // Channels to and from the engine worker
    let (requests_tx, requests_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (replies_tx, mut replies_rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.sessions.insert(
        session_id,
        Session {
            peer: addr,
            requests: requests_tx,
        },
    );

    let welcome = ServerMessage::Welcome { session_id, games };
    let msg_text = serde_json::to_string(&welcome)?;
    ws_sender.send(Message::Text(msg_text.into())).await?;

    let worker_task = tokio::spawn(worker::run(
        Worker::new(session_id, engine),
        requests_rx,
        replies_tx.clone(),
    ));

    // Forward worker replies to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = replies_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Could not encode reply: {}", e),
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    if !state.send_to_session(session_id, client_msg) {
                        warn!("Worker for {} is gone", session_id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Invalid message from {}: {}", session_id, e);
                    let _ = replies_tx.send(ServerMessage::Error {
                        message: format!("invalid message: {e}"),
                    });
                }
            },
            Ok(Message::Close(_)) => {
                info!("Client {} closing connection", session_id);
                break;
            }
            Ok(Message::Ping(_)) => {
                let _ = replies_tx.send(ServerMessage::Pong);
            }
            Err(e) => {
                error!("WebSocket error from {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    // Dropping the session closes the request channel, the worker saves and exits
    state.sessions.remove(&session_id);
    if let Err(e) = worker_task.await {
        error!("Worker for {} failed: {}", session_id, e);
    }
    send_task.abort();

    info!("Connection closed for {}", session_id);
    Ok(())
}
