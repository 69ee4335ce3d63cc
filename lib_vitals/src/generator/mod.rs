//! # Synthetic Generator
//!
//! Emits telemetry on independent fixed-period timers, one task per stream,
//! and pushes every envelope into a [`FanOut`] sink: the server's peer hub in
//! remote mode, or a client's normalizer in fully local mode.
//!
//! ## Streams:
//! - **`EcgStream`**: waveform samples (default every 100 ms).
//! - **`Activity`**: activity classification (default every 2500 ms).
//! - **`Summary`**: `ecg_update` followed by `temp_update` (default every 1000 ms).
//! - **`Alarm`**: alternates `alarm` / `alarm_clear` (default every 10000 ms).
//!
//! The first tick of each stream fires one period after `start`. No ordering
//! holds across streams.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::constants::{
    ACTIVITY_PERIOD, ALARM_PERIOD, DEFAULT_SUBJECT, ECG_STREAM_PERIOD, SUMMARY_PERIOD,
};
use crate::core::FanOut;
use crate::model::Envelope;

/// Payload synthesis.
pub mod synth;

pub use synth::Synthesizer;

/// One periodic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    EcgStream,
    Activity,
    Summary,
    Alarm,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] =
        [StreamKind::EcgStream, StreamKind::Activity, StreamKind::Summary, StreamKind::Alarm];

    fn index(self) -> usize {
        match self {
            StreamKind::EcgStream => 0,
            StreamKind::Activity => 1,
            StreamKind::Summary => 2,
            StreamKind::Alarm => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub subject: String,
    pub ecg_stream_period: Duration,
    pub activity_period: Duration,
    pub summary_period: Duration,
    pub alarm_period: Duration,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT.to_string(),
            ecg_stream_period: ECG_STREAM_PERIOD,
            activity_period: ACTIVITY_PERIOD,
            summary_period: SUMMARY_PERIOD,
            alarm_period: ALARM_PERIOD,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn period(&self, kind: StreamKind) -> Duration {
        match kind {
            StreamKind::EcgStream => self.ecg_stream_period,
            StreamKind::Activity => self.activity_period,
            StreamKind::Summary => self.summary_period,
            StreamKind::Alarm => self.alarm_period,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Generator {
    config: GeneratorConfig,
    sink: Arc<dyn FanOut>,
    synth: Arc<Mutex<Synthesizer>>,
    running: Mutex<Option<Running>>,
}

fn lock_synth(synth: &Mutex<Synthesizer>) -> MutexGuard<'_, Synthesizer> {
    synth.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Generator {
    pub fn new(config: GeneratorConfig, sink: Arc<dyn FanOut>) -> Self {
        let synth = Synthesizer::new(config.subject.clone(), config.seed);
        Self {
            config,
            sink,
            synth: Arc::new(Mutex::new(synth)),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts one timer task per stream. Returns `false` if already running.
    ///
    /// A stream configured with a zero period is not started; the others are.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.is_some() {
            log::debug!("Generator already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let tasks = StreamKind::ALL
            .into_iter()
            .filter_map(|kind| {
                let period = self.config.period(kind);
                if period.is_zero() {
                    log::error!("{:?} stream has a zero period, not starting it", kind);
                    return None;
                }
                let cancel = cancel.clone();
                let synth = Arc::clone(&self.synth);
                let sink = Arc::clone(&self.sink);
                Some(tokio::spawn(async move {
                    let mut ticker = interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = ticker.tick() => {
                                let envelopes = lock_synth(&synth).tick(kind);
                                for envelope in &envelopes {
                                    sink.publish(envelope);
                                }
                            }
                        }
                    }
                    log::debug!("{:?} stream stopped", kind);
                }))
            })
            .collect();

        *running = Some(Running { cancel, tasks });
        log::info!("Generator started for subject {}", self.config.subject);
        true
    }

    /// Cancels every timer. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let Some(running) = self.running().take() else {
            return false;
        };
        running.cancel.cancel();
        for task in running.tasks {
            task.abort();
        }
        log::info!("Generator stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Synthesizes one tick of `kind` right now and publishes it.
    pub fn emit(&self, kind: StreamKind) -> Vec<Envelope> {
        let envelopes = lock_synth(&self.synth).tick(kind);
        for envelope in &envelopes {
            self.sink.publish(envelope);
        }
        envelopes
    }

    /// Publishes a prepared envelope through the same path as the timers.
    pub fn push(&self, envelope: &Envelope) {
        self.sink.publish(envelope);
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Envelope>>);

    impl FanOut for Recorder {
        fn publish(&self, envelope: &Envelope) {
            self.0.lock().unwrap().push(envelope.clone());
        }
    }

    impl Recorder {
        fn count(&self, kind: MessageKind) -> usize {
            self.0.lock().unwrap().iter().filter(|e| e.kind() == kind).count()
        }
    }

    fn generator() -> (Generator, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let config = GeneratorConfig { seed: Some(1), ..GeneratorConfig::default() };
        (Generator::new(config, recorder.clone()), recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_follow_their_cadence() {
        let (generator, recorder) = generator();
        assert!(generator.start());

        sleep(Duration::from_millis(10_050)).await;

        assert_eq!(recorder.count(MessageKind::EcgStream), 100);
        assert_eq!(recorder.count(MessageKind::EcgUpdate), 10);
        assert_eq!(recorder.count(MessageKind::TempUpdate), 10);
        assert_eq!(recorder.count(MessageKind::Activity), 4);
        assert_eq!(recorder.count(MessageKind::Alarm), 1);
        assert_eq!(recorder.count(MessageKind::AlarmClear), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop_and_stop_is_idempotent() {
        let (generator, recorder) = generator();
        assert!(generator.start());
        assert!(!generator.start());

        sleep(Duration::from_millis(150)).await;
        assert_eq!(recorder.count(MessageKind::EcgStream), 1);

        assert!(generator.stop());
        assert!(!generator.stop());
        assert!(!generator.is_running());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.count(MessageKind::EcgStream), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (generator, recorder) = generator();
        generator.start();
        generator.stop();
        assert!(generator.start());

        sleep(Duration::from_millis(250)).await;
        assert_eq!(recorder.count(MessageKind::EcgStream), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_stream_is_skipped() {
        let recorder = Arc::new(Recorder::default());
        let config = GeneratorConfig {
            ecg_stream_period: Duration::ZERO,
            seed: Some(2),
            ..GeneratorConfig::default()
        };
        let generator = Generator::new(config, recorder.clone());
        assert!(generator.start());

        sleep(Duration::from_millis(3_050)).await;

        assert!(generator.is_running());
        assert_eq!(recorder.count(MessageKind::EcgStream), 0);
        assert_eq!(recorder.count(MessageKind::EcgUpdate), 3);
        assert_eq!(recorder.count(MessageKind::Activity), 1);
        assert!(generator.stop());
    }

    #[test]
    fn test_emit_and_push_publish_immediately() {
        let (generator, recorder) = generator();

        let emitted = generator.emit(StreamKind::Summary);
        assert_eq!(emitted.len(), 2);
        assert_eq!(recorder.count(MessageKind::EcgUpdate), 1);
        assert_eq!(recorder.count(MessageKind::TempUpdate), 1);

        generator.push(&emitted[0]);
        assert_eq!(recorder.count(MessageKind::EcgUpdate), 2);
    }
}
