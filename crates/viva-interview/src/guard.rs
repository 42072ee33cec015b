//! Safety limits on the listening path: transcript clamping and
//! voice-activity bookkeeping.

use std::time::Duration;
use tokio::time::Instant;

/// Truncates a turn transcript to `max_chars` characters, appending an
/// ellipsis marker when anything was cut. Returns the (possibly clamped)
/// text and whether clamping happened.
pub fn clamp_transcript(text: &str, max_chars: usize) -> (String, bool) {
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_chars {
            let mut clamped = text[..idx].to_string();
            clamped.push('…');
            return (clamped, true);
        }
        count += 1;
    }
    (text.to_string(), false)
}

/// Signal raised by the [`SpeechTracker`] for one observed audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechSignal {
    /// One uninterrupted stretch of speech exceeded the configured ceiling.
    ContinuousLimit,
    /// No voice activity for the configured silence window.
    SilenceTimeout,
}

/// What the tracker concluded from one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpeechObservation {
    pub signal: Option<SpeechSignal>,
    /// True on the chunk where voice gave way to sustained silence: the
    /// natural point to flush the recognizer.
    pub end_of_utterance: bool,
}

/// Tracks voice/silence transitions across the audio chunk stream for one
/// listening phase.
#[derive(Debug)]
pub struct SpeechTracker {
    voice_gap: Duration,
    max_continuous: Duration,
    silence_timeout: Duration,
    /// Start of the current uninterrupted speech stretch.
    speech_started: Option<Instant>,
    last_voice: Option<Instant>,
    /// When the current silent stretch began (listening started counts).
    silence_started: Option<Instant>,
    limit_raised: bool,
    silence_raised: bool,
}

impl SpeechTracker {
    pub fn new(voice_gap: Duration, max_continuous: Duration, silence_timeout: Duration) -> Self {
        Self {
            voice_gap,
            max_continuous,
            silence_timeout,
            speech_started: None,
            last_voice: None,
            silence_started: None,
            limit_raised: false,
            silence_raised: false,
        }
    }

    /// Feeds one chunk's voice-activity verdict at `now`.
    pub fn observe(&mut self, is_voice: bool, now: Instant) -> SpeechObservation {
        let mut obs = SpeechObservation::default();

        if is_voice {
            self.silence_started = None;
            self.silence_raised = false;

            // A gap longer than `voice_gap` starts a fresh stretch.
            let continues = self
                .last_voice
                .is_some_and(|t| now.duration_since(t) <= self.voice_gap);
            if !continues {
                self.speech_started = Some(now);
                self.limit_raised = false;
            }
            self.last_voice = Some(now);

            if !self.limit_raised
                && self
                    .speech_started
                    .is_some_and(|t| now.duration_since(t) >= self.max_continuous)
            {
                self.limit_raised = true;
                obs.signal = Some(SpeechSignal::ContinuousLimit);
            }
        } else {
            if self.silence_started.is_none() {
                self.silence_started = Some(now);
                // Voice just stopped: the recognizer should flush.
                obs.end_of_utterance = self.last_voice.is_some();
            }

            if !self.silence_raised
                && self
                    .silence_started
                    .is_some_and(|t| now.duration_since(t) >= self.silence_timeout)
            {
                self.silence_raised = true;
                obs.signal = Some(SpeechSignal::SilenceTimeout);
            }
        }

        obs
    }

    /// Resets for a fresh listening phase (called when a turn completes).
    pub fn reset(&mut self, now: Instant) {
        self.speech_started = None;
        self.last_voice = None;
        self.silence_started = Some(now);
        self.limit_raised = false;
        self.silence_raised = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SpeechTracker {
        SpeechTracker::new(
            Duration::from_secs(3),
            Duration::from_secs(60),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn clamp_leaves_short_text_alone() {
        let (text, clamped) = clamp_transcript("short answer", 1_000);
        assert_eq!(text, "short answer");
        assert!(!clamped);
    }

    #[test]
    fn clamp_cuts_at_char_boundary_and_marks() {
        let long = "é".repeat(1_200);
        let (text, clamped) = clamp_transcript(&long, 1_000);
        assert!(clamped);
        assert_eq!(text.chars().count(), 1_001);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn continuous_speech_limit_fires_once() {
        let mut t = tracker();
        let t0 = Instant::now();

        // Voice every second for 61 seconds.
        let mut fired = 0;
        for s in 0..=61 {
            let obs = t.observe(true, t0 + Duration::from_secs(s));
            if obs.signal == Some(SpeechSignal::ContinuousLimit) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn short_gaps_bridge_but_long_gaps_restart_the_stretch() {
        let mut t = tracker();
        let t0 = Instant::now();

        // 2s gaps bridge: 0,2,..,60 is one 60s stretch and trips the limit.
        let mut fired = 0;
        for s in (0..=60).step_by(2) {
            if t.observe(true, t0 + Duration::from_secs(s)).signal
                == Some(SpeechSignal::ContinuousLimit)
            {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        // A 5s pause restarts the clock: another 30s of speech is fine.
        let t1 = t0 + Duration::from_secs(65);
        for s in (0..=30).step_by(2) {
            let obs = t.observe(true, t1 + Duration::from_secs(s));
            assert_eq!(obs.signal, None);
        }
    }

    #[test]
    fn silence_timeout_fires_after_quiet_window() {
        let mut t = tracker();
        let t0 = Instant::now();
        t.reset(t0);

        assert_eq!(t.observe(false, t0 + Duration::from_secs(5)).signal, None);
        let obs = t.observe(false, t0 + Duration::from_secs(10));
        assert_eq!(obs.signal, Some(SpeechSignal::SilenceTimeout));
        // Only once per silent stretch.
        let obs = t.observe(false, t0 + Duration::from_secs(20));
        assert_eq!(obs.signal, None);
    }

    #[test]
    fn voice_to_silence_edge_flags_end_of_utterance() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.observe(true, t0);
        let obs = t.observe(false, t0 + Duration::from_millis(200));
        assert!(obs.end_of_utterance);
        // Still silent: no second edge.
        let obs = t.observe(false, t0 + Duration::from_millis(400));
        assert!(!obs.end_of_utterance);
    }

    #[test]
    fn silence_before_any_voice_is_not_an_utterance_end() {
        let mut t = tracker();
        let obs = t.observe(false, Instant::now());
        assert!(!obs.end_of_utterance);
    }
}
