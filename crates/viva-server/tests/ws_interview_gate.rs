//! WebSocket tests for the interview-start gate.
//!
//! The orchestrator loop must only begin for a user who holds the active
//! budget-session lock. These tests drive a real socket against a bound
//! server: an `interview:start` without a prior `session:start` is refused
//! with an error frame, and the same request succeeds once the session lock
//! is held.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream};

use viva_interview::{EngineConfig, Providers};
use viva_server::middleware::RateLimiter;
use viva_server::{app, auth, AppState};
use viva_session::SessionPolicy;
use viva_types::{ChatMessage, TranscriptFragment};
use viva_voice::{
    LanguageModel, SpeechSynthesizer, SpeechToText, SttSession, TokenStream,
    VoiceActivityDetector, VoiceError,
};

const SECRET: &str = "ws-gate-test-secret";

struct NullStt;
struct NullSttSession;

#[async_trait::async_trait]
impl SpeechToText for NullStt {
    async fn open_session(&self) -> Result<Box<dyn SttSession>, VoiceError> {
        Ok(Box::new(NullSttSession))
    }
}

#[async_trait::async_trait]
impl SttSession for NullSttSession {
    async fn push_audio(&mut self, _chunk: &[u8]) -> Result<Vec<TranscriptFragment>, VoiceError> {
        Ok(Vec::new())
    }

    async fn flush(&mut self) -> Result<Option<TranscriptFragment>, VoiceError> {
        Ok(None)
    }

    async fn close(&mut self) {}
}

struct NullLlm;

#[async_trait::async_trait]
impl LanguageModel for NullLlm {
    async fn stream(
        &self,
        _system_prompt: &str,
        _history: &[ChatMessage],
        _user_text: &str,
    ) -> Result<TokenStream, VoiceError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }
}

struct NullTts;

#[async_trait::async_trait]
impl SpeechSynthesizer for NullTts {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, VoiceError> {
        Ok(Vec::new())
    }
}

struct NullVad;

impl VoiceActivityDetector for NullVad {
    fn is_voice(&self, _chunk: &[u8]) -> bool {
        false
    }
}

/// Boots a server on an ephemeral port and returns its address. The tempdir
/// must outlive the test so the database file stays around.
async fn start_server() -> (SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir creation should succeed");
    let db_path = dir.path().join("gate.db");
    let pool = viva_db::create_pool(
        db_path.to_str().expect("utf-8 path"),
        viva_db::DbRuntimeSettings::default(),
    )
    .expect("pool creation should succeed");
    {
        let conn = pool.get().expect("connection should succeed");
        viva_db::run_migrations(&conn).expect("migrations should succeed");
    }

    let state = Arc::new(AppState {
        pool,
        token_secret: auth::derive_token_secret(SECRET),
        session_policy: SessionPolicy::default(),
        rate_limiter: RateLimiter::new(),
        rate_limit_per_min: 1_000,
        start_rate_limit_per_min: 1_000,
        engine_config: EngineConfig::default(),
        providers: Providers {
            stt: Arc::new(NullStt),
            llm: Arc::new(NullLlm),
            tts: Arc::new(NullTts),
            vad: Arc::new(NullVad),
        },
    });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");

    let router = app(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server should run");
    });

    (addr, dir)
}

type WsStream =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(addr: SocketAddr, user: &str) -> WsStream {
    let secret = auth::derive_token_secret(SECRET);
    let token = auth::generate_token(user, &secret);
    let (ws_stream, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("websocket connect should succeed");
    ws_stream
}

async fn send_json(ws: &mut WsStream, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send should succeed");
}

/// Reads frames until the next text frame, with a timeout.
async fn next_json(ws: &mut WsStream) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("a frame within the window")
            .expect("stream should stay open")
            .expect("frame should be readable");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("frame should be json");
        }
    }
}

#[tokio::test]
async fn interview_start_without_a_session_is_refused() {
    let (addr, _dir) = start_server().await;
    let mut ws = connect(addr, "dana").await;

    send_json(&mut ws, json!({"type": "interview:start"})).await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"]
        .as_str()
        .expect("error message")
        .contains("session"));
}

#[tokio::test]
async fn interview_start_with_an_active_session_begins_the_loop() {
    let (addr, _dir) = start_server().await;
    let mut ws = connect(addr, "erin").await;

    send_json(&mut ws, json!({"type": "session:start"})).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "session:ack");
    assert_eq!(ack["success"], true);

    send_json(&mut ws, json!({"type": "interview:start"})).await;
    let status = next_json(&mut ws).await;
    assert_eq!(status["type"], "interview:status");
    assert_eq!(status["state"], "speaking");
}

#[tokio::test]
async fn refused_interview_start_leaves_the_budget_unchanged() {
    let (addr, _dir) = start_server().await;
    let mut ws = connect(addr, "finn").await;

    send_json(&mut ws, json!({"type": "interview:start"})).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "error");

    // Closing without a session must not invent a charge.
    ws.close(None).await.expect("close should succeed");
    drop(ws);

    // The disconnect cleanup runs asynchronously on the server.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut ws = connect(addr, "finn").await;
    send_json(&mut ws, json!({"type": "session:start"})).await;
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["success"], true);
    // Full default budget: the refused attempt consumed nothing.
    assert_eq!(ack["remainingSeconds"], 1800);
}
