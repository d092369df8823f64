//! Example: Microphone Level Test
//!
//! Prints the live 0-255 energy level of the default input device. Use it to
//! tune `voice_threshold` and `silence_threshold` against your microphone
//! gain: speak normally and note the peaks, stay quiet and note the floor.

use kaiwa_voice::{AudioConfig, AudioInput, AudioLevelMonitor, CpalInput, MonitorConfig};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🎙️ Microphone Level Test");
    info!("Available inputs: {:?}", CpalInput::list_input_devices()?);
    info!("Speak into the microphone; Ctrl+C to stop.\n");

    let input = CpalInput::new();
    let mut session = input.open(&AudioConfig::default())?;

    let mut monitor = AudioLevelMonitor::start(
        session.probe(),
        MonitorConfig {
            poll_interval: Duration::from_millis(100),
        },
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            sample = monitor.next_sample() => {
                let Some(sample) = sample else { break };
                let bar = "#".repeat((sample.level as usize) / 4);
                info!("{:3} {}", sample.level, bar);
            }
            // Chunks must keep draining or the channel grows unbounded.
            chunk = session.recv_chunk() => {
                if chunk.is_none() { break }
            }
        }
    }

    info!("Done.");
    Ok(())
}
