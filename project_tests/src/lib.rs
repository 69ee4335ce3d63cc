//! Shared fixtures for the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_vitals::model::{AlarmMessage, ErrorMessage, TempUpdateMessage};
use lib_vitals::{listener, Envelope, Listener};

/// Collects every envelope handed to its listeners.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Envelope>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(&self) -> Listener {
        let seen = Arc::clone(&self.seen);
        listener(move |envelope| {
            seen.lock().unwrap().push(envelope.clone());
            Ok(())
        })
    }

    pub fn all(&self) -> Vec<Envelope> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `{type:"alarm", data:{user_id:"u1", type:"temp_high", code:"T1", threshold_s:30, duration_s:45, ts:1000}}`
pub fn sample_alarm() -> Envelope {
    Envelope::Alarm(AlarmMessage {
        user_id: "u1".to_string(),
        alarm_type: "temp_high".to_string(),
        code: "T1".to_string(),
        threshold_s: 30.0,
        duration_s: 45.0,
        ts: 1000,
    })
}

/// `{type:"error", data:{where:"server", msg:"bad json"}}`
pub fn sample_error() -> Envelope {
    Envelope::Error(ErrorMessage { origin: "server".to_string(), msg: "bad json".to_string() })
}

pub fn sample_temp(user: &str) -> Envelope {
    Envelope::TempUpdate(TempUpdateMessage {
        user_id: user.to_string(),
        object_c: 34.2,
        ambient_c: 27.5,
        smoothed_object_c: 34.0,
        alarm: None,
        ts: 2000,
    })
}

/// Polls `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A `log` backend that counts `info` records from one module path.
pub struct LineCounter {
    target: &'static str,
    count: AtomicUsize,
}

impl LineCounter {
    pub const fn new(target: &'static str) -> Self {
        Self { target, count: AtomicUsize::new(0) }
    }

    /// Installs `counter` as the global logger.
    pub fn install(counter: &'static LineCounter) {
        log::set_logger(counter).expect("logger already installed");
        log::set_max_level(log::LevelFilter::Trace);
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl log::Log for LineCounter {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() == log::Level::Info && metadata.target() == self.target
    }

    fn log(&self, record: &log::Record<'_>) {
        if self.enabled(record.metadata()) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flush(&self) {}
}
