//! Viva server library logic.

pub mod api_session;
pub mod api_ws;
pub mod auth;
pub mod config;
pub mod middleware;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use middleware::RateLimiter;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use viva_db::DbPool;
use viva_interview::{EngineConfig, Providers};
use viva_session::SessionPolicy;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Derived HMAC key for bearer-token verification.
    pub token_secret: [u8; 32],
    /// Budget manager tunables.
    pub session_policy: SessionPolicy,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Fixed-window limit (per minute) for most endpoints.
    pub rate_limit_per_min: u32,
    /// Stricter fixed-window limit for session starts.
    pub start_rate_limit_per_min: u32,
    /// Per-connection orchestrator configuration.
    pub engine_config: EngineConfig,
    /// Speech and language providers handed to each orchestrator.
    pub providers: Providers,
}

/// Health check handler.
///
/// Returns `200 OK` with server status and version. Used by load balancers,
/// monitoring, and CI to verify the server is running.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: Arc<AppState>) -> Router {
    let authed = Router::new()
        .route("/api/session/start", post(api_session::start_handler))
        .route("/api/session/heartbeat", post(api_session::heartbeat_handler))
        .route("/api/session/end", post(api_session::end_handler))
        .route("/api/profile", get(api_session::profile_handler))
        // Outermost layer runs first: authenticate, then rate-limit by user.
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .merge(authed)
        .layer(Extension(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use async_trait::async_trait;
    use viva_types::{ChatMessage, TranscriptFragment};
    use viva_voice::{
        LanguageModel, SpeechSynthesizer, SpeechToText, SttSession, TokenStream,
        VoiceActivityDetector, VoiceError,
    };

    pub const TEST_SECRET: &str = "router-test-secret";

    struct NullStt;
    struct NullSttSession;

    #[async_trait]
    impl SpeechToText for NullStt {
        async fn open_session(&self) -> Result<Box<dyn SttSession>, VoiceError> {
            Ok(Box::new(NullSttSession))
        }
    }

    #[async_trait]
    impl SttSession for NullSttSession {
        async fn push_audio(
            &mut self,
            _chunk: &[u8],
        ) -> Result<Vec<TranscriptFragment>, VoiceError> {
            Ok(Vec::new())
        }

        async fn flush(&mut self) -> Result<Option<TranscriptFragment>, VoiceError> {
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    struct NullLlm;

    #[async_trait]
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

    #[async_trait]
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

    /// A file-backed pool in a fresh tempdir, migrated, with null providers.
    /// Returns the tempdir so it outlives the state.
    pub fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let pool = viva_db::create_pool(
            db_path.to_str().expect("utf-8 path"),
            viva_db::DbRuntimeSettings::default(),
        )
        .expect("pool");
        {
            let conn = pool.get().expect("conn");
            viva_db::run_migrations(&conn).expect("migrations");
        }

        let providers = Providers {
            stt: Arc::new(NullStt),
            llm: Arc::new(NullLlm),
            tts: Arc::new(NullTts),
            vad: Arc::new(NullVad),
        };

        let state = Arc::new(AppState {
            pool,
            token_secret: auth::derive_token_secret(TEST_SECRET),
            session_policy: SessionPolicy::default(),
            rate_limiter: RateLimiter::new(),
            rate_limit_per_min: 1_000,
            start_rate_limit_per_min: 1_000,
            engine_config: EngineConfig::default(),
            providers,
        });

        (state, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{test_state, TEST_SECRET};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn bearer(user: &str) -> String {
        let secret = auth::derive_token_secret(TEST_SECRET);
        format!("Bearer {}", auth::generate_token(user, &secret))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&body).expect("json body")
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let (state, _dir) = test_state();
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn session_endpoints_require_a_token() {
        let (state, _dir) = test_state();
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/start")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn start_heartbeat_end_over_http() {
        let (state, _dir) = test_state();
        let app = app(state);

        let start = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/start")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(start.status(), StatusCode::OK);
        let json = json_body(start).await;
        assert_eq!(json["success"], true);
        assert!(json["sessionId"].is_string());
        assert_eq!(json["remainingSeconds"], 1800);

        let heartbeat = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/heartbeat")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(heartbeat).await["success"], true);

        let end = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/end")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(end).await["success"], true);

        // Repeating end is still a success: the operation is idempotent.
        let again = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/end")
                    .header("Authorization", bearer("alice"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(again).await["success"], true);
    }

    #[tokio::test]
    async fn profile_reports_budget_and_role() {
        let (state, _dir) = test_state();
        let app = app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/profile")
                    .header("Authorization", bearer("bob"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["userId"], "bob");
        assert_eq!(json["role"], "user");
        assert_eq!(json["dailyLimitSecs"], 1800);
        assert_eq!(json["remainingSeconds"], 1800);
    }

    #[tokio::test]
    async fn exhausted_budget_start_reports_failure() {
        let (state, _dir) = test_state();
        let app = app(state.clone());

        // Provision and exhaust the budget directly.
        {
            let conn = state.pool.get().expect("conn");
            viva_session::ensure_user(&conn, "carol", chrono::Utc::now()).expect("ensure");
            conn.execute(
                "UPDATE users SET daily_used_secs = daily_limit_secs WHERE user_id = 'carol'",
                [],
            )
            .expect("update");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/session/start")
                    .header("Authorization", bearer("carol"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"]
            .as_str()
            .expect("error message")
            .contains("budget"));
    }

    #[tokio::test]
    async fn ws_rejects_missing_and_invalid_tokens() {
        use axum::extract::ConnectInfo;
        use std::net::SocketAddr;

        let (state, _dir) = test_state();
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        for uri in ["/ws", "/ws?token=garbage"] {
            let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));

            let response = app(state.clone()).oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "uri: {uri}");
        }
    }
}
