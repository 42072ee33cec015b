//! The per-connection turn orchestrator.
//!
//! One engine task per live connection. It consumes [`EngineCommand`]s from
//! the transport, drives the `IDLE → LISTENING → THINKING → SPEAKING` state
//! machine, and emits `ServerEvent`s back. Provider calls that can take real
//! time (greeting synthesis, the LLM/TTS turn pipeline) run in spawned tasks
//! that report back over an internal channel, so the loop never blocks on a
//! provider and keeps handling violations and end requests mid-turn.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use viva_types::events::ServerEvent;
use viva_types::{ChatMessage, TerminationReason, TurnState};
use viva_voice::{
    LanguageModel, SpeechSynthesizer, SpeechToText, SttSession, VoiceActivityDetector,
};

use crate::config::EngineConfig;
use crate::debounce::TranscriptDebouncer;
use crate::guard::{clamp_transcript, SpeechSignal, SpeechTracker};
use crate::sentence::SentenceSplitter;
use crate::violations::{ViolationOutcome, ViolationTracker};

/// Spoken apology emitted when a provider fails mid-turn. The interview
/// always recovers to listening afterwards.
const RECOVERY_LINE: &str = "I had trouble with that one. Could you say it again?";

/// Commands from the transport into the engine.
#[derive(Debug)]
pub enum EngineCommand {
    /// Begin the turn-taking loop (greeting, then listening).
    Begin,
    /// One binary microphone chunk.
    Audio(Vec<u8>),
    /// One client-reported integrity violation.
    Violation,
    /// Graceful shutdown (client ended the session or disconnected).
    End,
}

/// The provider set the engine orchestrates. All trait objects so the
/// transport layer can assemble them from configuration.
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub vad: Arc<dyn VoiceActivityDetector>,
}

/// The transport's two ends of a running engine.
pub struct EngineHandle {
    pub commands: mpsc::Sender<EngineCommand>,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Spawns one engine task and returns its channel handle. The engine exits
/// when the command sender is dropped or an `End` command arrives.
pub fn spawn_engine(config: EngineConfig, providers: Providers) -> EngineHandle {
    let (command_tx, command_rx) = mpsc::channel(256);
    let (event_tx, event_rx) = mpsc::channel(256);

    let engine = InterviewEngine::new(config, providers, event_tx);
    tokio::spawn(engine.run(command_rx));

    EngineHandle {
        commands: command_tx,
        events: event_rx,
    }
}

/// Reports from spawned provider tasks back into the loop.
enum Internal {
    GreetingReady(Result<Vec<u8>, viva_voice::VoiceError>),
    /// The turn task started speaking its first sentence.
    Speaking,
    /// The turn task finished; `assistant_text` is what was actually spoken.
    TurnFinished { assistant_text: Option<String> },
}

/// What woke the run loop. Resolved inside `select!` so every handler can
/// take `&mut self` afterwards.
enum Wake {
    Command(Option<EngineCommand>),
    Internal(Internal),
    DebounceFired,
}

struct InterviewEngine {
    config: EngineConfig,
    providers: Providers,
    events: mpsc::Sender<ServerEvent>,
    internal_tx: mpsc::Sender<Internal>,
    internal_rx: mpsc::Receiver<Internal>,

    state: TurnState,
    terminated: bool,
    /// Cleared on termination, checked immediately before every non-terminal
    /// emit. Shared with spawned turn tasks so their in-flight output is
    /// discarded once the session ends.
    live: Arc<AtomicBool>,

    stt_session: Option<Box<dyn SttSession>>,
    debouncer: TranscriptDebouncer,
    tracker: SpeechTracker,
    violations: ViolationTracker,
    history: Vec<ChatMessage>,
}

impl InterviewEngine {
    fn new(
        config: EngineConfig,
        providers: Providers,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(64);
        let debouncer =
            TranscriptDebouncer::new(config.debounce_punctuated, config.debounce_unpunctuated);
        let tracker = SpeechTracker::new(
            config.voice_gap,
            config.max_continuous_speech,
            config.silence_timeout,
        );
        Self {
            config,
            providers,
            events,
            internal_tx,
            internal_rx,
            state: TurnState::Idle,
            terminated: false,
            live: Arc::new(AtomicBool::new(true)),
            stt_session: None,
            debouncer,
            tracker,
            violations: ViolationTracker::new(),
            history: Vec::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        loop {
            let deadline = self.debouncer.deadline();
            let wake = tokio::select! {
                cmd = commands.recv() => Wake::Command(cmd),
                Some(msg) = self.internal_rx.recv() => Wake::Internal(msg),
                _ = debounce_timer(deadline) => Wake::DebounceFired,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(EngineCommand::End)) => {
                    self.terminate(TerminationReason::Ended, "The interview has ended.")
                        .await;
                    break;
                }
                Wake::Command(Some(EngineCommand::Begin)) => self.handle_begin().await,
                Wake::Command(Some(EngineCommand::Audio(chunk))) => {
                    self.handle_audio(chunk).await
                }
                Wake::Command(Some(EngineCommand::Violation)) => self.handle_violation().await,
                Wake::Internal(msg) => self.handle_internal(msg).await,
                Wake::DebounceFired => self.finalize_turn().await,
            }
        }

        if let Some(mut session) = self.stt_session.take() {
            session.close().await;
        }
        debug!("interview engine stopped");
    }

    async fn handle_begin(&mut self) {
        if self.terminated || self.state != TurnState::Idle {
            debug!(state = self.state.as_str(), "ignoring interview start");
            return;
        }

        match self.providers.stt.open_session().await {
            Ok(session) => self.stt_session = Some(session),
            Err(err) => {
                warn!(error = %err, "could not open a transcription session");
                self.emit(ServerEvent::Error {
                    message: "The interviewer could not start listening. Please try again."
                        .to_string(),
                })
                .await;
                return;
            }
        }

        self.set_state(TurnState::Speaking, "Let's begin.").await;

        // Greeting synthesis runs off-loop; listening starts immediately.
        let tts = Arc::clone(&self.providers.tts);
        let greeting = self.config.greeting.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let audio = tts.synthesize(&greeting).await;
            let _ = internal.send(Internal::GreetingReady(audio)).await;
        });

        self.push_history(ChatMessage::assistant(&self.config.greeting));
        self.set_state(TurnState::Listening, "I'm listening.").await;
        self.tracker.reset(Instant::now());
    }

    async fn handle_audio(&mut self, chunk: Vec<u8>) {
        if self.terminated || self.state != TurnState::Listening {
            return;
        }
        if chunk.len() > self.config.max_chunk_bytes {
            debug!(len = chunk.len(), "dropping oversized audio chunk");
            return;
        }

        let now = Instant::now();
        let obs = self
            .tracker
            .observe(self.providers.vad.is_voice(&chunk), now);
        let flush_now =
            obs.end_of_utterance || obs.signal == Some(SpeechSignal::ContinuousLimit);

        let mut fragments = Vec::new();
        if let Some(session) = self.stt_session.as_mut() {
            match session.push_audio(&chunk).await {
                Ok(mut produced) => fragments.append(&mut produced),
                Err(err) => warn!(error = %err, "transcription failed for a chunk"),
            }
            if flush_now {
                match session.flush().await {
                    Ok(Some(fragment)) => fragments.push(fragment),
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "transcription flush failed"),
                }
            }
        }
        for fragment in &fragments {
            self.debouncer.observe(fragment, now);
        }

        match obs.signal {
            Some(SpeechSignal::ContinuousLimit) => {
                self.emit(ServerEvent::InterviewStatus {
                    state: self.state,
                    message: "Let's pause there for a moment so I can respond.".to_string(),
                })
                .await;
                self.finalize_turn().await;
            }
            Some(SpeechSignal::SilenceTimeout) => {
                self.emit(ServerEvent::InterviewStatus {
                    state: self.state,
                    message: "Take your time. I'm still listening.".to_string(),
                })
                .await;
            }
            None => {}
        }
    }

    /// The debounce fired (or a continuous-speech cutoff forced it): the
    /// buffered transcript becomes one user turn.
    async fn finalize_turn(&mut self) {
        // Drain first so a stale deadline never spins the loop.
        let Some(raw) = self.debouncer.fire() else {
            return;
        };
        if self.terminated || self.state != TurnState::Listening {
            return;
        }

        let (transcript, clamped) = clamp_transcript(&raw, self.config.max_transcript_chars);
        if clamped {
            debug!(chars = raw.chars().count(), "turn transcript clamped");
        }

        self.emit(ServerEvent::UserTranscript {
            text: transcript.clone(),
        })
        .await;
        self.set_state(TurnState::Thinking, "Let me think about that.")
            .await;
        self.push_history(ChatMessage::user(&transcript));

        // The user turn travels separately from the prior history.
        let history: Vec<ChatMessage> = self.history[..self.history.len() - 1].to_vec();
        let llm = Arc::clone(&self.providers.llm);
        let tts = Arc::clone(&self.providers.tts);
        let events = self.events.clone();
        let live = Arc::clone(&self.live);
        let internal = self.internal_tx.clone();
        let persona = self.config.persona.clone();
        tokio::spawn(async move {
            let assistant_text = run_turn(
                &*llm, &*tts, &events, &live, &internal, &persona, &history, &transcript,
            )
            .await;
            let _ = internal
                .send(Internal::TurnFinished { assistant_text })
                .await;
        });
    }

    async fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::GreetingReady(Ok(audio)) => {
                self.emit(ServerEvent::AudioResponse {
                    text: self.config.greeting.clone(),
                    audio: BASE64.encode(audio),
                })
                .await;
            }
            Internal::GreetingReady(Err(err)) => {
                // The greeting text is already in the history; the interview
                // proceeds without its audio.
                warn!(error = %err, "greeting synthesis failed");
            }
            Internal::Speaking => {
                if !self.terminated {
                    self.state = TurnState::Speaking;
                }
            }
            Internal::TurnFinished { assistant_text } => {
                if self.terminated {
                    return;
                }
                if let Some(text) = assistant_text {
                    self.push_history(ChatMessage::assistant(text));
                }
                self.set_state(TurnState::Listening, "I'm listening.").await;
                self.tracker.reset(Instant::now());
            }
        }
    }

    async fn handle_violation(&mut self) {
        if self.terminated {
            return;
        }
        match self.violations.record() {
            ViolationOutcome::Warning { message } => {
                warn!(count = self.violations.count(), "integrity violation reported");
                self.emit(ServerEvent::SessionWarning { message }).await;
            }
            ViolationOutcome::Terminate { message } => {
                warn!(
                    count = self.violations.count(),
                    "terminating after repeated integrity violations"
                );
                self.terminate(TerminationReason::IntegrityViolation, &message)
                    .await;
            }
        }
    }

    /// Ends the interview. The `live` flag flips before the terminal event
    /// is sent, so nothing emitted by in-flight turn tasks can follow it.
    async fn terminate(&mut self, reason: TerminationReason, message: &str) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.live.store(false, Ordering::Release);

        if self
            .events
            .send(ServerEvent::SessionEnd {
                reason,
                message: message.to_string(),
            })
            .await
            .is_err()
        {
            debug!("event channel closed before the terminal event");
        }

        self.state = TurnState::Idle;
        self.debouncer.clear();
        if let Some(mut session) = self.stt_session.take() {
            session.close().await;
        }
    }

    async fn set_state(&mut self, state: TurnState, message: &str) {
        self.state = state;
        self.emit(ServerEvent::InterviewStatus {
            state,
            message: message.to_string(),
        })
        .await;
    }

    fn push_history(&mut self, message: ChatMessage) {
        self.history.push(message);
        if self.history.len() > self.config.max_history_entries {
            let excess = self.history.len() - self.config.max_history_entries;
            self.history.drain(..excess);
        }
    }

    async fn emit(&self, event: ServerEvent) {
        emit_guarded(&self.events, &self.live, event).await;
    }
}

/// Sleeps until the debounce deadline, or forever when no turn is pending.
async fn debounce_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Drops the event when the session ended between scheduling and delivery.
async fn emit_guarded(
    events: &mpsc::Sender<ServerEvent>,
    live: &AtomicBool,
    event: ServerEvent,
) {
    if !live.load(Ordering::Acquire) {
        debug!("discarding event after session end");
        return;
    }
    if events.send(event).await.is_err() {
        debug!("event channel closed");
    }
}

/// One THINKING → SPEAKING turn: stream tokens, split into sentences, and
/// synthesize each sentence in generation order (the sequential awaits are
/// what guarantee FIFO audio delivery).
///
/// Returns the text that was actually spoken, for the conversation history.
#[allow(clippy::too_many_arguments)]
async fn run_turn(
    llm: &dyn LanguageModel,
    tts: &dyn SpeechSynthesizer,
    events: &mpsc::Sender<ServerEvent>,
    live: &AtomicBool,
    internal: &mpsc::Sender<Internal>,
    persona: &str,
    history: &[ChatMessage],
    user_text: &str,
) -> Option<String> {
    let mut stream = match llm.stream(persona, history, user_text).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "completion request failed");
            emit_guarded(
                events,
                live,
                ServerEvent::Error {
                    message: RECOVERY_LINE.to_string(),
                },
            )
            .await;
            return None;
        }
    };

    let mut splitter = SentenceSplitter::new();
    let mut spoken = String::new();
    let mut announced = false;

    loop {
        let token = match stream.next().await {
            Some(Ok(token)) => Some(token),
            Some(Err(err)) => {
                warn!(error = %err, "completion stream failed mid-reply");
                emit_guarded(
                    events,
                    live,
                    ServerEvent::Error {
                        message: RECOVERY_LINE.to_string(),
                    },
                )
                .await;
                if spoken.is_empty() {
                    return None;
                }
                // Keep what was already spoken.
                break;
            }
            None => None,
        };

        let sentences = match &token {
            Some(token) => splitter.push(token),
            None => splitter.finish().into_iter().collect(),
        };

        for sentence in sentences {
            if !announced {
                announced = true;
                let _ = internal.send(Internal::Speaking).await;
                emit_guarded(
                    events,
                    live,
                    ServerEvent::InterviewStatus {
                        state: TurnState::Speaking,
                        message: String::new(),
                    },
                )
                .await;
            }
            match tts.synthesize(&sentence).await {
                Ok(audio) => {
                    if !spoken.is_empty() {
                        spoken.push(' ');
                    }
                    spoken.push_str(&sentence);
                    emit_guarded(
                        events,
                        live,
                        ServerEvent::AudioResponse {
                            text: sentence,
                            audio: BASE64.encode(audio),
                        },
                    )
                    .await;
                }
                Err(err) => {
                    warn!(error = %err, "sentence synthesis failed");
                    emit_guarded(
                        events,
                        live,
                        ServerEvent::Error {
                            message: RECOVERY_LINE.to_string(),
                        },
                    )
                    .await;
                    return if spoken.is_empty() { None } else { Some(spoken) };
                }
            }
        }

        if token.is_none() {
            break;
        }
    }

    if spoken.is_empty() {
        None
    } else {
        Some(spoken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use viva_types::TranscriptFragment;
    use viva_voice::VoiceError;

    /// Echoes each chunk back as one final UTF-8 fragment and counts pushes.
    struct FakeStt {
        pushes: Arc<AtomicUsize>,
    }

    struct FakeSttSession {
        pushes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl viva_voice::SpeechToText for FakeStt {
        async fn open_session(&self) -> Result<Box<dyn SttSession>, VoiceError> {
            Ok(Box::new(FakeSttSession {
                pushes: Arc::clone(&self.pushes),
            }))
        }
    }

    #[async_trait]
    impl SttSession for FakeSttSession {
        async fn push_audio(
            &mut self,
            chunk: &[u8],
        ) -> Result<Vec<TranscriptFragment>, VoiceError> {
            self.pushes.fetch_add(1, Ordering::SeqCst);
            if chunk.is_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![TranscriptFragment::final_(
                String::from_utf8_lossy(chunk).to_string(),
            )])
        }

        async fn flush(&mut self) -> Result<Option<TranscriptFragment>, VoiceError> {
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    struct FakeLlm {
        tokens: Vec<&'static str>,
        fail: bool,
    }

    #[async_trait]
    impl LanguageModel for FakeLlm {
        async fn stream(
            &self,
            _system_prompt: &str,
            _history: &[ChatMessage],
            _user_text: &str,
        ) -> Result<viva_voice::TokenStream, VoiceError> {
            if self.fail {
                return Err(VoiceError::Llm("model offline".to_string()));
            }
            let items: Vec<Result<String, VoiceError>> =
                self.tokens.iter().map(|t| Ok(t.to_string())).collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    /// Streams its tokens, then fails before the reply completes.
    struct MidStreamFailLlm {
        tokens: Vec<&'static str>,
    }

    #[async_trait]
    impl LanguageModel for MidStreamFailLlm {
        async fn stream(
            &self,
            _system_prompt: &str,
            _history: &[ChatMessage],
            _user_text: &str,
        ) -> Result<viva_voice::TokenStream, VoiceError> {
            let mut items: Vec<Result<String, VoiceError>> =
                self.tokens.iter().map(|t| Ok(t.to_string())).collect();
            items.push(Err(VoiceError::Llm("stream dropped".to_string())));
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    struct FakeTts;

    #[async_trait]
    impl SpeechSynthesizer for FakeTts {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
            Ok(format!("pcm:{text}").into_bytes())
        }
    }

    struct FakeVad;

    impl VoiceActivityDetector for FakeVad {
        fn is_voice(&self, chunk: &[u8]) -> bool {
            !chunk.is_empty()
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            greeting: "Welcome.".to_string(),
            ..EngineConfig::default()
        }
    }

    fn spawn_test_engine(llm: impl LanguageModel + 'static) -> (EngineHandle, Arc<AtomicUsize>) {
        let pushes = Arc::new(AtomicUsize::new(0));
        let providers = Providers {
            stt: Arc::new(FakeStt {
                pushes: Arc::clone(&pushes),
            }),
            llm: Arc::new(llm),
            tts: Arc::new(FakeTts),
            vad: Arc::new(FakeVad),
        };
        (spawn_engine(test_config(), providers), pushes)
    }

    async fn next_event(handle: &mut EngineHandle) -> ServerEvent {
        time::timeout(Duration::from_secs(30), handle.events.recv())
            .await
            .expect("event within the window")
            .expect("event channel open")
    }

    async fn assert_no_event(handle: &mut EngineHandle) {
        let outcome = time::timeout(Duration::from_secs(5), handle.events.recv()).await;
        assert!(outcome.is_err(), "expected silence, got {outcome:?}");
    }

    /// Drains the begin sequence: speaking status, listening status,
    /// greeting audio.
    async fn begin(handle: &mut EngineHandle) {
        handle
            .commands
            .send(EngineCommand::Begin)
            .await
            .expect("send begin");

        assert!(matches!(
            next_event(handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Speaking,
                ..
            }
        ));
        assert!(matches!(
            next_event(handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Listening,
                ..
            }
        ));
        match next_event(handle).await {
            ServerEvent::AudioResponse { text, .. } => assert_eq!(text, "Welcome."),
            other => panic!("expected greeting audio, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_turn_emits_ordered_sentences() {
        let (mut handle, _) = spawn_test_engine(FakeLlm {
            tokens: vec!["Great.", " Tell me more.", " Why", " Rust?"],
            fail: false,
        });
        begin(&mut handle).await;

        handle
            .commands
            .send(EngineCommand::Audio(b"Tell me about Rust.".to_vec()))
            .await
            .expect("send audio");

        match next_event(&mut handle).await {
            ServerEvent::UserTranscript { text } => assert_eq!(text, "Tell me about Rust."),
            other => panic!("expected transcript, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Thinking,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Speaking,
                ..
            }
        ));

        for expected in ["Great.", "Tell me more.", "Why Rust?"] {
            match next_event(&mut handle).await {
                ServerEvent::AudioResponse { text, audio } => {
                    assert_eq!(text, expected);
                    assert_eq!(
                        audio,
                        BASE64.encode(format!("pcm:{expected}").into_bytes())
                    );
                }
                other => panic!("expected audio for {expected:?}, got {other:?}"),
            }
        }

        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Listening,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn second_violation_terminates_and_silences_the_engine() {
        let (mut handle, pushes) = spawn_test_engine(FakeLlm {
            tokens: vec!["Noted."],
            fail: false,
        });
        begin(&mut handle).await;

        handle
            .commands
            .send(EngineCommand::Violation)
            .await
            .expect("send violation");
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::SessionWarning { .. }
        ));

        handle
            .commands
            .send(EngineCommand::Violation)
            .await
            .expect("send violation");
        match next_event(&mut handle).await {
            ServerEvent::SessionEnd { reason, .. } => {
                assert_eq!(reason, TerminationReason::IntegrityViolation);
            }
            other => panic!("expected session end, got {other:?}"),
        }

        // Audio after termination is inert: no STT, no events.
        let before = pushes.load(Ordering::SeqCst);
        handle
            .commands
            .send(EngineCommand::Audio(b"still here?".to_vec()))
            .await
            .expect("send audio");
        assert_no_event(&mut handle).await;
        assert_eq!(pushes.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn model_failure_recovers_to_listening() {
        let (mut handle, _) = spawn_test_engine(FakeLlm {
            tokens: vec![],
            fail: true,
        });
        begin(&mut handle).await;

        handle
            .commands
            .send(EngineCommand::Audio(b"Hello?".to_vec()))
            .await
            .expect("send audio");

        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::UserTranscript { .. }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Thinking,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::Error { .. }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Listening,
                ..
            }
        ));

        // The engine is still usable for another turn.
        handle
            .commands
            .send(EngineCommand::Audio(b"Try again.".to_vec()))
            .await
            .expect("send audio");
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::UserTranscript { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_reply_model_failure_emits_an_error_and_recovers() {
        let (mut handle, _) = spawn_test_engine(MidStreamFailLlm {
            tokens: vec!["One down. ", "and then"],
        });
        begin(&mut handle).await;

        handle
            .commands
            .send(EngineCommand::Audio(b"Go on.".to_vec()))
            .await
            .expect("send audio");

        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::UserTranscript { .. }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Thinking,
                ..
            }
        ));
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Speaking,
                ..
            }
        ));

        // The completed sentence was spoken before the stream died.
        match next_event(&mut handle).await {
            ServerEvent::AudioResponse { text, .. } => assert_eq!(text, "One down."),
            other => panic!("expected audio, got {other:?}"),
        }

        // The failure is reported even though part of the reply went out.
        match next_event(&mut handle).await {
            ServerEvent::Error { message } => assert_eq!(message, RECOVERY_LINE),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(
            next_event(&mut handle).await,
            ServerEvent::InterviewStatus {
                state: TurnState::Listening,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_chunks_are_dropped_before_transcription() {
        let (mut handle, pushes) = spawn_test_engine(FakeLlm {
            tokens: vec!["Sure."],
            fail: false,
        });
        begin(&mut handle).await;

        handle
            .commands
            .send(EngineCommand::Audio(vec![0u8; 150_000]))
            .await
            .expect("send audio");

        assert_no_event(&mut handle).await;
        assert_eq!(pushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn long_transcripts_are_clamped_with_a_marker() {
        let (mut handle, _) = spawn_test_engine(FakeLlm {
            tokens: vec!["Okay."],
            fail: false,
        });
        begin(&mut handle).await;

        let long = "a".repeat(1_500);
        handle
            .commands
            .send(EngineCommand::Audio(long.into_bytes()))
            .await
            .expect("send audio");

        match next_event(&mut handle).await {
            ServerEvent::UserTranscript { text } => {
                assert_eq!(text.chars().count(), 1_001);
                assert!(text.ends_with('…'));
            }
            other => panic!("expected transcript, got {other:?}"),
        }
    }
}
