//! Audio level monitor
//!
//! Samples the session's `LevelProbe` at a fixed cadence and yields a lazy,
//! infinite sequence of `LevelSample` until stopped. Holds only a weak
//! reference to the probe: when the audio session is torn down the monitor
//! ends silently rather than erroring (the session may be mid-teardown).

use crate::audio::LevelProbe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Configuration for level polling
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Polling cadence (default: 16ms, roughly a 60Hz display tick).
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(16),
        }
    }
}

/// One 0-255 energy reading. Ephemeral, not retained.
#[derive(Debug, Clone, Copy)]
pub struct LevelSample {
    pub level: u8,
    pub at: Instant,
}

/// Polls a `LevelProbe` on a fixed interval. Restartable by constructing a
/// new monitor against the same probe.
pub struct AudioLevelMonitor {
    rx: mpsc::Receiver<LevelSample>,
    task: JoinHandle<()>,
}

impl AudioLevelMonitor {
    /// Start polling. The spawned task exits on its own when the probe's
    /// session is dropped or when this monitor is dropped.
    pub fn start(probe: &Arc<LevelProbe>, config: MonitorConfig) -> Self {
        let weak: Weak<LevelProbe> = Arc::downgrade(probe);
        let (tx, rx) = mpsc::channel(64);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                // Probe gone means the session was torn down: stop silently.
                let Some(probe) = weak.upgrade() else { break };

                let sample = LevelSample {
                    level: probe.load(),
                    at: Instant::now(),
                };
                if tx.send(sample).await.is_err() {
                    break;
                }
            }
        });

        Self { rx, task }
    }

    /// Receive the next sample. `None` once the monitor has stopped.
    pub async fn next_sample(&mut self) -> Option<LevelSample> {
        self.rx.recv().await
    }

    /// Stop polling. Immediate and idempotent.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn samples_arrive_at_the_polling_cadence() {
        let probe = Arc::new(LevelProbe::new());
        probe.store(99);

        let config = MonitorConfig {
            poll_interval: Duration::from_millis(100),
        };
        let mut monitor = AudioLevelMonitor::start(&probe, config);

        let first = monitor.next_sample().await.expect("first sample");
        assert_eq!(first.level, 99);

        probe.store(3);
        let second = monitor.next_sample().await.expect("second sample");
        assert_eq!(second.level, 3);
        assert!(second.at.duration_since(first.at) >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_silently_when_probe_is_dropped() {
        let probe = Arc::new(LevelProbe::new());
        let mut monitor = AudioLevelMonitor::start(
            &probe,
            MonitorConfig {
                poll_interval: Duration::from_millis(10),
            },
        );

        assert!(monitor.next_sample().await.is_some());

        drop(probe);
        assert!(monitor.next_sample().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let probe = Arc::new(LevelProbe::new());
        let mut monitor = AudioLevelMonitor::start(&probe, MonitorConfig::default());

        monitor.stop();
        monitor.stop();
        assert!(monitor.next_sample().await.is_none());
    }
}
