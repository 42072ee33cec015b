//! Viva server binary — the main entry point for the Viva platform.
//!
//! Starts an axum HTTP + WebSocket server with structured logging, database
//! initialization, the speech/language provider stack, and graceful shutdown
//! on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use viva_interview::{persona, EngineConfig, Providers};
use viva_server::middleware::RateLimiter;
use viva_server::{app, auth, config, AppState};
use viva_session::SessionPolicy;
use viva_voice::{
    ChatLlm, ChunkEnergyVad, LlmConfig, PiperTts, SpeechSynthesizer, SystemTts, TtsConfig,
    WhisperConfig, WhisperStt,
};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VIVA_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Assembles the provider stack from configuration.
fn build_providers(config: &config::Config) -> Providers {
    let stt = WhisperStt::new(WhisperConfig {
        binary_path: config.stt.binary_path.clone().into(),
        model_path: config.stt.model_path.clone().into(),
        language: config.stt.language.clone(),
        timeout: Duration::from_secs(config.stt.timeout_secs),
    });

    let llm = ChatLlm::new(LlmConfig {
        endpoint: config.llm.endpoint.clone(),
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
        timeout: Duration::from_secs(config.llm.timeout_secs),
    });

    let tts: Arc<dyn SpeechSynthesizer> = match config.tts.engine.as_str() {
        "system" => Arc::new(SystemTts::new(
            config.tts.max_chars,
            Duration::from_secs(config.tts.timeout_secs),
        )),
        _ => Arc::new(
            PiperTts::new(TtsConfig {
                binary_path: config.tts.binary_path.clone().into(),
                voice_path: config.tts.voice_path.clone().into(),
                speed: config.tts.speed,
                max_chars: config.tts.max_chars,
                timeout: Duration::from_secs(config.tts.timeout_secs),
            })
            .expect("invalid TTS configuration — check tts.speed"),
        ),
    };

    Providers {
        stt: Arc::new(stt),
        llm: Arc::new(llm),
        tts,
        vad: Arc::new(ChunkEnergyVad::default()),
    }
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = viva_db::create_pool(
        &config.database.path,
        viva_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied = viva_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Orchestrator configuration: persona/greeting knobs over the defaults.
    let mut engine_config = EngineConfig::default();
    engine_config.persona = persona::default_persona(&config.interview.position);
    if let Some(ref greeting) = config.interview.greeting {
        engine_config.greeting = greeting.clone();
    }

    let state = Arc::new(AppState {
        pool,
        token_secret: auth::derive_token_secret(&config.auth.token_secret),
        session_policy: SessionPolicy {
            hard_ceiling_secs: config.session.hard_ceiling_secs,
            zombie_threshold_secs: config.session.zombie_threshold_secs,
        },
        rate_limiter: RateLimiter::new(),
        rate_limit_per_min: config.session.rate_limit_per_min,
        start_rate_limit_per_min: config.session.start_rate_limit_per_min,
        engine_config,
        providers: build_providers(&config),
    });

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting viva server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown; ConnectInfo feeds the rate limiter and
    // the WebSocket auth logging.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("viva server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
