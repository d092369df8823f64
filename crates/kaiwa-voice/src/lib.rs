//! # Kaiwa Voice - Voice-Driven Conversation Front End
//!
//! This crate implements energy-based voice activity detection (VAD) and
//! turn-taking for a spoken conversation with a remote agent: speech is
//! segmented into utterances automatically, each utterance is transcribed and
//! sent as a turn, and the agent's reply is awaited before listening resumes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Session Controller                        │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Level Monitor│→ │  Segmenter   │→ │   Recorder   │       │
//! │  │  (0-255 RMS) │  │ (hysteresis) │  │ (chunk buf)  │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         ↑                                      ↓             │
//! │  ┌──────────────┐                    ┌──────────────┐       │
//! │  │   Mic (cpal) │                    │ Transcribe → │       │
//! │  │ AudioSession │                    │   Dispatch   │       │
//! │  └──────────────┘                    └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The controller acquires the microphone once per activation and keeps it
//! open for the whole session; segmentation and every state transition run on
//! one control-loop task, while transcription and turn dispatch run
//! asynchronously without ever blocking the sampling loop.

pub mod audio;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod recorder;
pub mod secrets;
pub mod segmenter;
pub mod session;
pub mod stt;

pub use audio::{
    AudioChunk, AudioConfig, AudioInput, AudioSession, CpalInput, LevelProbe, StreamGuard,
    CHUNK_ENCODING,
};
pub use dispatch::{
    ChatApiDispatcher, ChatMessage, PlaceholderDispatcher, ReplyEvent, TurnDispatcher, TurnStatus,
};
pub use error::{VoiceError, VoiceResult};
pub use monitor::{AudioLevelMonitor, LevelSample, MonitorConfig};
pub use recorder::{CaptureRecorder, CapturedUtterance, FinalizedCapture};
pub use segmenter::{SegmentEvent, SegmenterConfig, UtteranceSegmenter};
pub use session::{SessionConfig, SessionController, SessionEvent, TurnState};
pub use stt::{PlaceholderTranscriber, SpeechApiClient, TranscriptionClient};
