//! Utterance segmentation — the voice-activity state machine
//!
//! Consumes one level sample per tick and decides where an utterance begins
//! and ends. Two thresholds form a hysteresis band (levels in between change
//! nothing, which prevents start/stop chatter at the boundary) and a silence
//! debounce absorbs natural pauses within one utterance (breaths, word
//! finding) without splitting it into multiple turns.
//!
//! Thresholds and debounce are tuned against device microphone gain and are
//! part of the configuration surface, never hardcoded in the logic.

use crate::error::{VoiceError, VoiceResult};
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for the segmenter
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Level at or above which speech is considered present (default: 12).
    pub voice_threshold: u8,

    /// Level below which silence is considered present (default: 10).
    /// Must be <= `voice_threshold`; the gap is the hysteresis band.
    pub silence_threshold: u8,

    /// Continuous silence required after speech before the utterance is
    /// considered finished (default: 1500ms).
    pub silence_duration: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 12,
            silence_threshold: 10,
            silence_duration: Duration::from_millis(1500),
        }
    }
}

/// Events emitted by the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Level crossed the voice threshold from a non-voiced state.
    UtteranceStart { at: Instant },

    /// Silence held below the silence threshold for the full debounce.
    UtteranceEnd { at: Instant },
}

/// The utterance window state machine. Pure and synchronous: one sample in,
/// at most one event out. All timing comes from the caller's sample clock.
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    voice_detected: bool,
    silence_started_at: Option<Instant>,
    stopped: bool,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> VoiceResult<Self> {
        if config.silence_threshold > config.voice_threshold {
            return Err(VoiceError::Config(format!(
                "silence threshold ({}) must not exceed voice threshold ({})",
                config.silence_threshold, config.voice_threshold
            )));
        }

        Ok(Self {
            config,
            voice_detected: false,
            silence_started_at: None,
            stopped: false,
        })
    }

    /// Evaluate one level sample. Samples pushed after `stop()` are ignored.
    pub fn push_sample(&mut self, level: u8, now: Instant) -> Option<SegmentEvent> {
        if self.stopped {
            return None;
        }

        if level >= self.config.voice_threshold {
            self.silence_started_at = None;
            if !self.voice_detected {
                self.voice_detected = true;
                debug!("Utterance start (level {})", level);
                return Some(SegmentEvent::UtteranceStart { at: now });
            }
            None
        } else if level < self.config.silence_threshold && self.voice_detected {
            match self.silence_started_at {
                None => {
                    self.silence_started_at = Some(now);
                    None
                }
                Some(started) => {
                    if now.duration_since(started) >= self.config.silence_duration {
                        self.voice_detected = false;
                        self.silence_started_at = None;
                        debug!("Utterance end (silence held)");
                        Some(SegmentEvent::UtteranceEnd { at: now })
                    } else {
                        None
                    }
                }
            }
        } else {
            // Hysteresis band, or silence with no open window.
            None
        }
    }

    /// Whether an utterance window is currently open.
    pub fn voice_detected(&self) -> bool {
        self.voice_detected
    }

    /// Suspend segmentation. An open window is NOT closed here; the caller
    /// aborts its capture (discard, never send) and calls `reset()`.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Resume accepting samples after `stop()`.
    pub fn resume(&mut self) {
        self.stopped = false;
    }

    /// Clear any open utterance window.
    pub fn reset(&mut self) {
        self.voice_detected = false;
        self.silence_started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(voice: u8, silence: u8, debounce_ms: u64) -> UtteranceSegmenter {
        UtteranceSegmenter::new(SegmenterConfig {
            voice_threshold: voice,
            silence_threshold: silence,
            silence_duration: Duration::from_millis(debounce_ms),
        })
        .unwrap()
    }

    /// Feed `levels` at a fixed tick interval, returning (tick, event) pairs.
    /// Tick numbering is 1-based to match by-hand traces.
    fn run(seg: &mut UtteranceSegmenter, levels: &[u8], tick_ms: u64) -> Vec<(usize, SegmentEvent)> {
        let base = Instant::now();
        levels
            .iter()
            .enumerate()
            .filter_map(|(i, &level)| {
                let now = base + Duration::from_millis(tick_ms * (i as u64 + 1));
                seg.push_sample(level, now).map(|ev| (i + 1, ev))
            })
            .collect()
    }

    #[test]
    fn invalid_threshold_order_is_rejected() {
        let result = UtteranceSegmenter::new(SegmenterConfig {
            voice_threshold: 10,
            silence_threshold: 12,
            silence_duration: Duration::from_millis(500),
        });
        assert!(result.is_err());
    }

    #[test]
    fn start_and_end_at_documented_ticks() {
        // Levels [5,5,15,15,15,5,5,5,5,5,5,5] at 100ms/tick with thresholds
        // 12/10 and a 500ms debounce: start at tick 3, end at tick 11
        // (silence armed at tick 6; tick 11 is 500ms later).
        let mut seg = segmenter(12, 10, 500);
        let events = run(&mut seg, &[5, 5, 15, 15, 15, 5, 5, 5, 5, 5, 5, 5], 100);

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], (3, SegmentEvent::UtteranceStart { .. })));
        assert!(matches!(events[1], (11, SegmentEvent::UtteranceEnd { .. })));
    }

    #[test]
    fn never_two_starts_without_an_end() {
        let mut seg = segmenter(12, 10, 500);
        // Voice, brief dip into the band, voice again: still one window.
        let events = run(&mut seg, &[15, 15, 11, 15, 15, 11, 15], 100);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], (1, SegmentEvent::UtteranceStart { .. })));
        assert!(seg.voice_detected());
    }

    #[test]
    fn band_levels_cause_no_state_change_before_voice() {
        let mut seg = segmenter(12, 10, 500);
        let events = run(&mut seg, &[11, 11, 11, 5, 5], 100);
        assert!(events.is_empty());
        assert!(!seg.voice_detected());
    }

    #[test]
    fn voice_resets_the_silence_clock() {
        let mut seg = segmenter(12, 10, 500);
        // Silence for 400ms, voice, then silence again: the debounce restarts,
        // so the end lands 500ms after the second silence onset.
        let events = run(&mut seg, &[15, 5, 5, 5, 5, 15, 5, 5, 5, 5, 5, 5], 100);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], (1, SegmentEvent::UtteranceStart { .. })));
        assert!(matches!(events[1], (12, SegmentEvent::UtteranceEnd { .. })));
    }

    #[test]
    fn end_requires_the_full_debounce() {
        let mut seg = segmenter(12, 10, 500);
        let events = run(&mut seg, &[15, 5, 5, 5, 5], 100);
        // Silence armed at tick 2; only 300ms of silence has elapsed by tick 5.
        assert_eq!(events.len(), 1);
        assert!(seg.voice_detected());
    }

    #[test]
    fn samples_after_stop_are_ignored() {
        let mut seg = segmenter(12, 10, 500);
        let base = Instant::now();
        assert!(seg.push_sample(15, base).is_some());

        seg.stop();
        assert!(seg
            .push_sample(5, base + Duration::from_millis(100))
            .is_none());
        assert!(seg
            .push_sample(5, base + Duration::from_secs(10))
            .is_none());

        // The aborted window is cleared by reset, not emitted as an end.
        seg.reset();
        seg.resume();
        assert!(!seg.voice_detected());
        let ev = seg.push_sample(20, base + Duration::from_secs(11));
        assert!(matches!(ev, Some(SegmentEvent::UtteranceStart { .. })));
    }

    #[test]
    fn equal_thresholds_disable_the_band() {
        let mut seg = segmenter(12, 12, 500);
        let events = run(&mut seg, &[12, 11, 11, 11, 11, 11, 11], 100);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], (1, SegmentEvent::UtteranceStart { .. })));
        assert!(matches!(events[1], (7, SegmentEvent::UtteranceEnd { .. })));
    }
}
