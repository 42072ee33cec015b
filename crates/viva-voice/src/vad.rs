//! Default voice-activity detection.
//!
//! The heuristic is deliberately simple: a frame carrying meaningfully more
//! than silence-sized payload is treated as voice. It lives behind the
//! [`VoiceActivityDetector`] trait so a model-based detector can replace it
//! without touching the orchestration loop.

use crate::capability::VoiceActivityDetector;

/// Byte-size VAD over ~250ms client frames.
#[derive(Debug, Clone, Copy)]
pub struct ChunkEnergyVad {
    threshold_bytes: usize,
}

impl ChunkEnergyVad {
    pub fn new(threshold_bytes: usize) -> Self {
        Self { threshold_bytes }
    }
}

impl Default for ChunkEnergyVad {
    fn default() -> Self {
        Self {
            threshold_bytes: 100,
        }
    }
}

impl VoiceActivityDetector for ChunkEnergyVad {
    fn is_voice(&self, chunk: &[u8]) -> bool {
        chunk.len() > self.threshold_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_above_threshold_are_voice() {
        let vad = ChunkEnergyVad::default();
        assert!(vad.is_voice(&[0u8; 101]));
        assert!(!vad.is_voice(&[0u8; 100]));
        assert!(!vad.is_voice(&[]));
    }
}
