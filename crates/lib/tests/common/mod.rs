//! Mock conversation service for integration tests: an axum CRUD API and a WebSocket peer.
#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use convsync::conversation::{Conversation, Message};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

pub fn conversation(id: &str, title: &str, messages: &[(&str, &str, &str)]) -> Conversation {
    let mut c = Conversation::new(id, Some(title.to_string()));
    c.messages = messages
        .iter()
        .map(|(mid, from, content)| Message::new(Some(mid.to_string()), *from, *content))
        .collect();
    c
}

#[derive(Default)]
pub struct MockState {
    pub conversations: Vec<Conversation>,
    pub created: u32,
    pub username: Option<String>,
    /// Answer `POST /conversations` with 500.
    pub fail_create: bool,
}

pub type SharedState = Arc<Mutex<MockState>>;

/// Serve the CRUD API under `/api` on an ephemeral port. Returns the origin and the state.
pub async fn spawn_api(state: MockState) -> (String, SharedState) {
    let shared = Arc::new(Mutex::new(state));
    let app = Router::new()
        .route("/api/conversations", get(list).post(create))
        .route(
            "/api/conversations/:id",
            get(detail).put(update).delete(remove),
        )
        .route("/api/userinfo", get(userinfo))
        .with_state(shared.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind api");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), shared)
}

async fn list(State(state): State<SharedState>) -> Json<Vec<serde_json::Value>> {
    let s = state.lock().unwrap();
    Json(
        s.conversations
            .iter()
            .map(|c| serde_json::json!({ "id": c.id, "title": c.title }))
            .collect(),
    )
}

async fn create(State(state): State<SharedState>) -> Result<Json<Conversation>, StatusCode> {
    let mut s = state.lock().unwrap();
    if s.fail_create {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    s.created += 1;
    let c = Conversation::new(format!("new-{}", s.created), Some("New chat".to_string()));
    s.conversations.insert(0, c.clone());
    Ok(Json(c))
}

async fn detail(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, StatusCode> {
    let s = state.lock().unwrap();
    s.conversations
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let mut s = state.lock().unwrap();
    let Some(c) = s.conversations.iter_mut().find(|c| c.id == id) else {
        return StatusCode::NOT_FOUND;
    };
    c.title = body.get("title").and_then(|t| t.as_str()).map(String::from);
    StatusCode::OK
}

async fn remove(State(state): State<SharedState>, Path(id): Path<String>) -> StatusCode {
    let mut s = state.lock().unwrap();
    let before = s.conversations.len();
    s.conversations.retain(|c| c.id != id);
    if s.conversations.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    }
}

async fn userinfo(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let s = state.lock().unwrap();
    Json(serde_json::json!({ "username": s.username }))
}

/// WebSocket end of the streaming channel. Serves one connection at a time; frames pushed
/// with [`WsPeer::push`] go to the current connection, text received is on `inbound`.
pub struct WsPeer {
    pub url: String,
    outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl WsPeer {
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ws");
        let url = format!("ws://{}/api/chat", listener.local_addr().expect("local_addr"));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                loop {
                    tokio::select! {
                        Some(text) = out_rx.recv() => {
                            if ws.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        msg = ws.next() => match msg {
                            Some(Ok(WsMessage::Text(t))) => {
                                let _ = in_tx.send(t);
                            }
                            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });
        Self {
            url,
            outbound: out_tx,
            inbound: in_rx,
        }
    }

    pub fn push(&self, frame: serde_json::Value) {
        self.outbound.send(frame.to_string()).expect("peer task running");
    }

    pub async fn next_inbound(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(TIMEOUT, self.inbound.recv())
            .await
            .expect("inbound frame within timeout")
            .expect("peer task running");
        serde_json::from_str(&text).expect("inbound frame is JSON")
    }
}

/// Next notification message, skipping reconnect notices from the connection itself.
pub async fn next_notification(rx: &mut broadcast::Receiver<convsync::signals::Notification>) -> String {
    loop {
        let n = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("notification within timeout")
            .expect("notification channel open");
        if n.message != convsync::signals::RECONNECTING_MESSAGE {
            return n.message;
        }
    }
}
