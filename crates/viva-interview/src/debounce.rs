//! Turn-completion debouncing over transcript fragments.
//!
//! Every fragment — interim or final — restarts the pending deadline, so the
//! speaker is never cut off mid-utterance. Only final fragments carry text
//! into the turn buffer. The wait is dynamic: text that already ends in
//! sentence-final punctuation gets a short wait; an unpunctuated trailing
//! fragment gets a longer one, on the theory that the speaker may still be
//! thinking.

use std::time::Duration;
use tokio::time::Instant;
use viva_types::TranscriptFragment;

#[derive(Debug)]
pub struct TranscriptDebouncer {
    punctuated_wait: Duration,
    unpunctuated_wait: Duration,
    buffer: String,
    deadline: Option<Instant>,
}

impl TranscriptDebouncer {
    pub fn new(punctuated_wait: Duration, unpunctuated_wait: Duration) -> Self {
        Self {
            punctuated_wait,
            unpunctuated_wait,
            buffer: String::new(),
            deadline: None,
        }
    }

    /// Records a fragment arrival at `now`: appends final text and restarts
    /// the completion deadline.
    pub fn observe(&mut self, fragment: &TranscriptFragment, now: Instant) {
        if fragment.is_final && !fragment.text.trim().is_empty() {
            if !self.buffer.is_empty() {
                self.buffer.push(' ');
            }
            self.buffer.push_str(fragment.text.trim());
        }
        self.deadline = Some(now + self.current_wait());
    }

    /// The instant at which the turn should be finalized, if a timer is
    /// pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fires the timer: clears the deadline and atomically drains the buffer.
    /// Returns `None` when nothing was buffered (e.g. only interim fragments
    /// arrived).
    pub fn fire(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    /// Drops any pending timer and buffered text.
    pub fn clear(&mut self) {
        self.deadline = None;
        self.buffer.clear();
    }

    fn current_wait(&self) -> Duration {
        if self
            .buffer
            .chars()
            .last()
            .is_some_and(|c| matches!(c, '.' | '?' | '!'))
        {
            self.punctuated_wait
        } else {
            self.unpunctuated_wait
        }
    }
}
