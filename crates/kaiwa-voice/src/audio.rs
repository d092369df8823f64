//! Microphone capture using CPAL
//!
//! Owns the live input stream for one session: the capture callback encodes
//! 16-bit PCM chunks for the recorder and writes a 0-255 energy reading into
//! the `LevelProbe` for the level monitor. The `cpal::Stream` lives on a
//! dedicated thread (it is not `Send` on some platforms); dropping the
//! `AudioSession` signals that thread to release the device.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Encoding label for captured chunks, passed to the transcription endpoint.
pub const CHUNK_ENCODING: &str = "LINEAR16";

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Chunk size in samples (default: 480 for 30ms at 16kHz). Shorter chunks
    /// reduce audio loss on an abrupt capture stop; not a correctness knob.
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480, // 30ms at 16kHz
        }
    }
}

/// One chunk of captured audio, already encoded as 16-bit little-endian PCM.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded bytes (2 bytes per sample, mono).
    pub bytes: Vec<u8>,

    /// When the chunk was captured.
    pub captured_at: Instant,
}

/// The "analyser node": holds the most recent 0-255 energy reading of the
/// input stream. Written by the capture callback, read by the level monitor.
#[derive(Debug, Default)]
pub struct LevelProbe {
    level: AtomicU8,
}

impl LevelProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest energy reading.
    pub fn store(&self, level: u8) {
        self.level.store(level, Ordering::Relaxed);
    }

    /// Read the latest energy reading.
    pub fn load(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }
}

/// Signals the capture thread to drop the stream when the session goes away.
#[derive(Debug)]
pub struct StreamGuard {
    stop_tx: std_mpsc::Sender<()>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// The live microphone stream plus its analysis taps. One per activation;
/// owned exclusively by the session controller. All exit paths release the
/// device: dropping the session drops the guard, which stops the stream.
pub struct AudioSession {
    probe: Arc<LevelProbe>,
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
    _guard: Option<StreamGuard>,
}

impl AudioSession {
    /// Assemble a session from raw parts. Used by `CpalInput` and by
    /// alternate inputs (tests, file playback) that have no stream to guard.
    pub fn from_parts(
        probe: Arc<LevelProbe>,
        chunks: mpsc::UnboundedReceiver<AudioChunk>,
        guard: Option<StreamGuard>,
    ) -> Self {
        Self {
            probe,
            chunks,
            _guard: guard,
        }
    }

    /// The level probe for this session's stream.
    pub fn probe(&self) -> &Arc<LevelProbe> {
        &self.probe
    }

    /// Receive the next captured chunk. `None` when the stream has ended.
    pub async fn recv_chunk(&mut self) -> Option<AudioChunk> {
        self.chunks.recv().await
    }
}

/// Source of microphone sessions. The seam between the session controller and
/// the audio backend; `CpalInput` is the production implementation.
pub trait AudioInput: Send + Sync {
    /// Acquire the microphone. Returns `PermissionDenied` when access is
    /// refused or no input device exists.
    fn open(&self, config: &AudioConfig) -> VoiceResult<AudioSession>;
}

/// Microphone input backed by the default CPAL host device.
#[derive(Debug, Default)]
pub struct CpalInput;

impl CpalInput {
    pub fn new() -> Self {
        Self
    }

    /// List available input devices.
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl AudioInput for CpalInput {
    fn open(&self, config: &AudioConfig) -> VoiceResult<AudioSession> {
        info!(
            "🎙️ Opening microphone ({}Hz, {} channel(s), {} samples/chunk)",
            config.sample_rate, config.channels, config.chunk_size
        );

        let probe = Arc::new(LevelProbe::new());
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_probe = Arc::clone(&probe);
        let thread_config = config.clone();

        // The stream is built, played, and eventually dropped on this thread.
        thread::Builder::new()
            .name("kaiwa-audio-capture".to_string())
            .spawn(move || {
                match build_capture_stream(&thread_config, thread_probe, chunk_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Hold the stream until the session is torn down.
                        let _ = stop_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::AudioDevice("capture thread exited early".to_string()))??;

        info!("✅ Microphone open");

        Ok(AudioSession::from_parts(
            probe,
            chunk_rx,
            Some(StreamGuard { stop_tx }),
        ))
    }
}

fn build_capture_stream(
    config: &AudioConfig,
    probe: Arc<LevelProbe>,
    chunk_tx: mpsc::UnboundedSender<AudioChunk>,
) -> VoiceResult<cpal::Stream> {
    let device = cpal::default_host().default_input_device().ok_or_else(|| {
        VoiceError::PermissionDenied(
            "no input device available (check microphone permissions)".to_string(),
        )
    })?;

    info!(
        "📱 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let chunk_size = config.chunk_size;
    let mut sample_buffer: Vec<f32> = Vec::with_capacity(chunk_size);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                sample_buffer.push(sample);

                if sample_buffer.len() >= chunk_size {
                    probe.store(energy_level(&sample_buffer));

                    let chunk = AudioChunk {
                        bytes: encode_s16le(&sample_buffer),
                        captured_at: Instant::now(),
                    };
                    if chunk_tx.send(chunk).is_err() {
                        // Session torn down; the stop signal is on its way.
                    }

                    sample_buffer.clear();
                }
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;

    Ok(stream)
}

/// RMS energy of one chunk, scaled to the 0-255 range the segmenter expects.
fn energy_level(samples: &[f32]) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    (rms.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Encode f32 samples (-1.0..1.0) as 16-bit little-endian PCM bytes.
fn encode_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let i = (clamped * 32767.0).round() as i16;
        bytes.extend_from_slice(&i.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.chunk_size, 480);
    }

    #[test]
    fn silence_has_zero_energy() {
        let silence = vec![0.0f32; 480];
        assert_eq!(energy_level(&silence), 0);
        assert_eq!(energy_level(&[]), 0);
    }

    #[test]
    fn full_scale_signal_has_max_energy() {
        let loud = vec![1.0f32; 480];
        assert_eq!(energy_level(&loud), 255);
    }

    #[test]
    fn quiet_speech_sits_above_default_thresholds() {
        // RMS 0.05 is a plausible quiet-speech level; it must land above the
        // default voice threshold (12) so defaults work on common mics.
        let quiet = vec![0.05f32; 480];
        assert!(energy_level(&quiet) >= 12);
    }

    #[test]
    fn s16le_encoding_round_trips_extremes() {
        let bytes = encode_s16le(&[0.0, 1.0, -1.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(&bytes[0..2], &0i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &32767i16.to_le_bytes());
        assert_eq!(&bytes[4..6], &(-32767i16).to_le_bytes());
    }

    #[test]
    fn probe_stores_latest_reading() {
        let probe = LevelProbe::new();
        assert_eq!(probe.load(), 0);
        probe.store(42);
        assert_eq!(probe.load(), 42);
        probe.store(7);
        assert_eq!(probe.load(), 7);
    }

    #[test]
    fn list_devices() {
        // This might fail in CI environments without audio devices
        let result = CpalInput::list_input_devices();
        if let Ok(devices) = result {
            println!("Available input devices: {:?}", devices);
        }
    }
}
