//! Session controller — the turn-taking state machine
//!
//! Owns the microphone for the life of an activation and coordinates
//! listen/capture/transcribe/await-reply phases so they never overlap, lose
//! audio, or double-send. Sampling, segmentation, and every state transition
//! run on one control-loop task (no parallel mutation of VAD state); capture
//! finalization, transcription, and turn dispatch run as separate tasks whose
//! outcomes come back tagged with an epoch so results that land after a
//! teardown or interrupt cannot resurrect a dead phase.

use crate::audio::{AudioConfig, AudioInput, AudioSession, CHUNK_ENCODING};
use crate::dispatch::{ReplyEvent, TurnDispatcher, TurnStatus};
use crate::error::{VoiceError, VoiceResult};
use crate::monitor::{AudioLevelMonitor, LevelSample, MonitorConfig};
use crate::recorder::{CaptureRecorder, CapturedUtterance, FinalizedCapture};
use crate::segmenter::{SegmentEvent, SegmenterConfig, UtteranceSegmenter};
use crate::stt::TranscriptionClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The session-wide phase. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Microphone off.
    Idle,
    /// Microphone on, segmenter running, no capture open.
    Listening,
    /// An utterance window is open and being recorded.
    Capturing,
    /// Capture sealed, awaiting transcription.
    Transcribing,
    /// Turn dispatched, awaiting the reply's terminal status.
    AwaitingReply,
}

/// Events emitted by the session controller
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An utterance window opened and recording began.
    UtteranceStarted { timestamp: DateTime<Utc> },

    /// A capture was dropped without transcription.
    UtteranceDiscarded {
        bytes: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Transcription produced non-empty text.
    TranscriptReady {
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// The transcript was handed to the turn dispatcher.
    TurnDispatched { timestamp: DateTime<Utc> },

    /// The dispatched turn reached a terminal status.
    ReplySettled {
        status: TurnStatus,
        timestamp: DateTime<Utc>,
    },

    /// Listening resumed after the post-reply debounce.
    ListeningResumed { timestamp: DateTime<Utc> },

    /// A recoverable failure; the session returned to a safe state.
    Failure {
        error: String,
        timestamp: DateTime<Utc>,
    },
}

/// Configuration for the session controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub monitor: MonitorConfig,
    pub segmenter: SegmenterConfig,

    /// Sealed captures smaller than this are discarded as clipped or
    /// false-positive triggers (default: 1000 bytes).
    pub min_capture_bytes: usize,

    /// Pause after a reply settles before listening resumes, so the tail of
    /// system audio or echo is not picked up as user speech (default: 300ms).
    pub resume_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            monitor: MonitorConfig::default(),
            segmenter: SegmenterConfig::default(),
            min_capture_bytes: 1000,
            resume_delay: Duration::from_millis(300),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> VoiceResult<()> {
        if self.audio.sample_rate == 0 {
            return Err(VoiceError::Config("sample rate must be non-zero".to_string()));
        }
        if self.audio.chunk_size == 0 {
            return Err(VoiceError::Config("chunk size must be non-zero".to_string()));
        }
        if self.monitor.poll_interval.is_zero() {
            return Err(VoiceError::Config(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.segmenter.silence_threshold > self.segmenter.voice_threshold {
            return Err(VoiceError::Config(format!(
                "silence threshold ({}) must not exceed voice threshold ({})",
                self.segmenter.silence_threshold, self.segmenter.voice_threshold
            )));
        }
        Ok(())
    }
}

enum Command {
    Stop,
    AgentTurnStarted,
    AgentTurnSettled,
}

enum Outcome {
    Transcribed {
        epoch: u64,
        result: VoiceResult<String>,
    },
    Dispatched {
        epoch: u64,
    },
    DispatchFailed {
        epoch: u64,
        error: String,
    },
    ReplySettled {
        epoch: u64,
        status: TurnStatus,
    },
    Resume {
        epoch: u64,
    },
}

/// The top-level coordinator: wires monitor → segmenter → recorder →
/// transcription → dispatch and enforces the turn-taking state machine.
pub struct SessionController {
    config: SessionConfig,
    input: Arc<dyn AudioInput>,
    stt: Arc<dyn TranscriptionClient>,
    dispatcher: Arc<dyn TurnDispatcher>,

    state_tx: watch::Sender<TurnState>,
    state_rx: watch::Receiver<TurnState>,

    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,

    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    loop_task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Create a controller. Validates the configuration up front.
    pub fn new(
        config: SessionConfig,
        input: Arc<dyn AudioInput>,
        stt: Arc<dyn TranscriptionClient>,
        dispatcher: Arc<dyn TurnDispatcher>,
    ) -> VoiceResult<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(TurnState::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            input,
            stt,
            dispatcher,
            state_tx,
            state_rx,
            event_tx,
            event_rx: Some(event_rx),
            cmd_tx: None,
            loop_task: None,
        })
    }

    /// Activate the session: acquire the microphone and start listening.
    /// Requires an explicit call because microphone access needs a
    /// user-initiated grant. Idempotent while already active (the open
    /// session is reused). On `PermissionDenied` the state stays Idle.
    pub fn activate(&mut self) -> VoiceResult<()> {
        if self
            .loop_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
        {
            debug!("Session already active; reusing the open audio session");
            return Ok(());
        }

        info!("🎤 Activating voice session");

        let session = self.input.open(&self.config.audio)?;
        let monitor = AudioLevelMonitor::start(session.probe(), self.config.monitor.clone());
        let segmenter = UtteranceSegmenter::new(self.config.segmenter.clone())?;
        let recorder = CaptureRecorder::new(self.config.min_capture_bytes);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let control = ControlLoop {
            config: self.config.clone(),
            stt: Arc::clone(&self.stt),
            dispatcher: Arc::clone(&self.dispatcher),
            session,
            monitor,
            segmenter,
            recorder,
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
            outcome_tx,
            outcome_rx,
            processing_lock: false,
            epoch: 0,
            pipeline: None,
        };

        self.cmd_tx = Some(cmd_tx);
        self.loop_task = Some(tokio::spawn(control.run()));

        Ok(())
    }

    /// Deactivate the session: stop the polling loop, discard any open
    /// capture, and release the microphone. Pending transcription or
    /// dispatch results are ignored once this returns.
    pub async fn deactivate(&mut self) {
        if let Some(cmd_tx) = self.cmd_tx.take() {
            let _ = cmd_tx.send(Command::Stop);
        }
        if let Some(task) = self.loop_task.take() {
            let _ = task.await;
        }
    }

    /// The conversational agent's own turn began outside this session (e.g.
    /// a typed message was submitted). Suspends listening immediately; an
    /// open utterance window is aborted, never sent.
    pub fn agent_turn_started(&self) {
        if let Some(ref cmd_tx) = self.cmd_tx {
            let _ = cmd_tx.send(Command::AgentTurnStarted);
        }
    }

    /// The externally dispatched turn reached a terminal status; listening
    /// resumes after the configured delay.
    pub fn agent_turn_settled(&self) {
        if let Some(ref cmd_tx) = self.cmd_tx {
            let _ = cmd_tx.send(Command::AgentTurnSettled);
        }
    }

    /// Current phase.
    pub fn state(&self) -> TurnState {
        *self.state_rx.borrow()
    }

    /// Watch phase changes (drives a status indicator).
    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state_rx.clone()
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Whether the control loop is running.
    pub fn is_active(&self) -> bool {
        self.loop_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(ref cmd_tx) = self.cmd_tx {
            let _ = cmd_tx.send(Command::Stop);
        }
    }
}

struct ControlLoop {
    config: SessionConfig,
    stt: Arc<dyn TranscriptionClient>,
    dispatcher: Arc<dyn TurnDispatcher>,

    session: AudioSession,
    monitor: AudioLevelMonitor,
    segmenter: UtteranceSegmenter,
    recorder: CaptureRecorder,

    state_tx: watch::Sender<TurnState>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
    outcome_tx: mpsc::UnboundedSender<Outcome>,
    outcome_rx: mpsc::UnboundedReceiver<Outcome>,

    /// Blocks a new utterance window while a prior capture is still being
    /// finalized, transcribed, or dispatched. Only this loop may flip it.
    processing_lock: bool,

    /// Bumped on interrupt and teardown; stale outcomes are dropped.
    epoch: u64,

    pipeline: Option<JoinHandle<()>>,
}

impl ControlLoop {
    async fn run(mut self) {
        self.set_state(TurnState::Listening);
        info!("✅ Voice session active, listening");

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Stop) | None => {
                            self.teardown();
                            break;
                        }
                        Some(Command::AgentTurnStarted) => self.on_agent_turn_started(),
                        Some(Command::AgentTurnSettled) => self.on_agent_turn_settled(),
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.on_outcome(outcome);
                }

                sample = self.monitor.next_sample() => {
                    match sample {
                        Some(sample) => self.on_level(sample),
                        None => {
                            // Monitor only ends on its own if the stream died.
                            warn!("🛑 Audio stream ended, deactivating session");
                            self.teardown();
                            break;
                        }
                    }
                }

                chunk = self.session.recv_chunk() => {
                    match chunk {
                        Some(chunk) => {
                            if self.recorder.is_capturing() {
                                self.recorder.append_chunk(&chunk.bytes);
                            }
                        }
                        None => {
                            warn!("🛑 Audio capture ended, deactivating session");
                            self.teardown();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn state(&self) -> TurnState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: TurnState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn on_level(&mut self, sample: LevelSample) {
        // Segmentation runs only while listening for (or inside) an
        // utterance; the processing lock covers the finalize window.
        if self.processing_lock
            || !matches!(self.state(), TurnState::Listening | TurnState::Capturing)
        {
            return;
        }

        let Some(event) = self.segmenter.push_sample(sample.level, sample.at) else {
            return;
        };

        match event {
            SegmentEvent::UtteranceStart { .. } => {
                if self.recorder.begin_capture() {
                    self.set_state(TurnState::Capturing);
                    self.emit(SessionEvent::UtteranceStarted {
                        timestamp: Utc::now(),
                    });
                }
            }
            SegmentEvent::UtteranceEnd { .. } => {
                // Lock the instant finalization is requested: no new window
                // may open while this one is pending.
                self.processing_lock = true;
                self.segmenter.stop();

                match self.recorder.end_capture() {
                    Some(FinalizedCapture::Utterance(utterance)) => {
                        info!(
                            "🎯 Utterance sealed: {} bytes in {} chunks ({:.1}s)",
                            utterance.bytes.len(),
                            utterance.chunk_count,
                            utterance.duration.as_secs_f32()
                        );
                        self.set_state(TurnState::Transcribing);
                        self.spawn_pipeline(utterance);
                    }
                    Some(FinalizedCapture::TooShort { bytes }) => {
                        self.emit(SessionEvent::UtteranceDiscarded {
                            bytes,
                            reason: "below minimum capture size".to_string(),
                            timestamp: Utc::now(),
                        });
                        self.resume_listening();
                    }
                    None => {
                        // End without an open buffer; nothing to forward.
                        self.resume_listening();
                    }
                }
            }
        }
    }

    fn spawn_pipeline(&mut self, utterance: CapturedUtterance) {
        let epoch = self.epoch;
        let stt = Arc::clone(&self.stt);
        let dispatcher = Arc::clone(&self.dispatcher);
        let outcome_tx = self.outcome_tx.clone();
        let sample_rate = self.config.audio.sample_rate;

        self.pipeline = Some(tokio::spawn(async move {
            let result = stt
                .transcribe(&utterance.bytes, CHUNK_ENCODING, sample_rate)
                .await;

            let text = match &result {
                Ok(text) => text.trim().to_string(),
                Err(_) => String::new(),
            };
            let proceed = result.is_ok() && !text.is_empty();
            let _ = outcome_tx.send(Outcome::Transcribed { epoch, result });

            if !proceed {
                return;
            }

            let mut reply_rx = match dispatcher.send_turn(&text).await {
                Ok(rx) => rx,
                Err(e) => {
                    let _ = outcome_tx.send(Outcome::DispatchFailed {
                        epoch,
                        error: e.to_string(),
                    });
                    return;
                }
            };
            let _ = outcome_tx.send(Outcome::Dispatched { epoch });

            // Drain the reply; only the terminal status matters here.
            let mut settled = None;
            while let Some(event) = reply_rx.recv().await {
                if let ReplyEvent::Settled(status) = event {
                    settled = Some(status);
                    break;
                }
            }
            let status = settled.unwrap_or_else(|| {
                warn!("Reply stream closed without settling");
                TurnStatus::Error
            });
            let _ = outcome_tx.send(Outcome::ReplySettled { epoch, status });
        }));
    }

    fn on_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Transcribed { epoch, result } if epoch == self.epoch => match result {
                Ok(text) if !text.trim().is_empty() => {
                    info!("📝 Transcript ready ({} chars)", text.trim().len());
                    self.emit(SessionEvent::TranscriptReady {
                        text: text.trim().to_string(),
                        timestamp: Utc::now(),
                    });
                    // The pipeline dispatches next; stay in Transcribing
                    // until the send is confirmed.
                }
                Ok(_) => {
                    debug!("Empty transcript, resuming listening");
                    self.emit(SessionEvent::UtteranceDiscarded {
                        bytes: 0,
                        reason: "empty transcript".to_string(),
                        timestamp: Utc::now(),
                    });
                    self.resume_listening();
                }
                Err(e) => {
                    warn!("Transcription failed: {}", e);
                    self.emit(SessionEvent::Failure {
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    self.resume_listening();
                }
            },
            Outcome::Dispatched { epoch } if epoch == self.epoch => {
                self.set_state(TurnState::AwaitingReply);
                self.emit(SessionEvent::TurnDispatched {
                    timestamp: Utc::now(),
                });
            }
            Outcome::DispatchFailed { epoch, error } if epoch == self.epoch => {
                warn!("Turn dispatch failed: {}", error);
                self.emit(SessionEvent::Failure {
                    error,
                    timestamp: Utc::now(),
                });
                self.resume_listening();
            }
            Outcome::ReplySettled { epoch, status } if epoch == self.epoch => {
                info!("💬 Reply settled: {:?}", status);
                self.emit(SessionEvent::ReplySettled {
                    status,
                    timestamp: Utc::now(),
                });
                self.schedule_resume();
            }
            Outcome::Resume { epoch } if epoch == self.epoch => {
                self.resume_listening();
                self.emit(SessionEvent::ListeningResumed {
                    timestamp: Utc::now(),
                });
            }
            _ => {
                // Stale epoch: the result of a torn-down or interrupted
                // phase. Dropped without touching current state.
                debug!("Ignoring stale pipeline outcome");
            }
        }
    }

    /// Forced interrupt: the agent's turn began elsewhere. Segmentation is
    /// suspended immediately and any open window is discarded, never raced
    /// against the outgoing reply.
    fn on_agent_turn_started(&mut self) {
        self.epoch += 1;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }

        self.segmenter.stop();
        self.segmenter.reset();
        if let Some(bytes) = self.recorder.abort() {
            self.emit(SessionEvent::UtteranceDiscarded {
                bytes,
                reason: "agent turn started".to_string(),
                timestamp: Utc::now(),
            });
        }

        info!("⚡ Agent turn started, listening suspended");
        self.set_state(TurnState::AwaitingReply);
    }

    fn on_agent_turn_settled(&mut self) {
        if self.state() == TurnState::AwaitingReply {
            self.schedule_resume();
        }
    }

    /// Resume after the post-reply debounce, so reply-tail audio and echo
    /// are not picked up as user speech.
    fn schedule_resume(&self) {
        let epoch = self.epoch;
        let delay = self.config.resume_delay;
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outcome_tx.send(Outcome::Resume { epoch });
        });
    }

    fn resume_listening(&mut self) {
        self.processing_lock = false;
        self.segmenter.reset();
        self.segmenter.resume();
        self.set_state(TurnState::Listening);
    }

    fn teardown(&mut self) {
        self.epoch += 1;
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.abort();
        }

        self.monitor.stop();
        if let Some(bytes) = self.recorder.abort() {
            debug!("Discarding {} buffered bytes on teardown", bytes);
        }
        self.segmenter.stop();
        self.segmenter.reset();
        self.processing_lock = false;

        self.set_state(TurnState::Idle);
        info!("🛑 Voice session deactivated");
        // Dropping `self.session` (with this loop) releases the microphone.
    }
}
