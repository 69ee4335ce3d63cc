//! Named constants shared by the client, generator and server.

use std::time::Duration;

/// Fixed wait between an unexpected disconnect and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Number of inbound events the normalizer logs before it goes quiet.
pub const MAX_DIAGNOSTIC_LOGS: usize = 50;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8080/ws";

/// Port the broadcast server listens on when none is configured.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Subject the synthetic generator reports for.
pub const DEFAULT_SUBJECT: &str = "u1";

// Generator cadences.
pub const ECG_STREAM_PERIOD: Duration = Duration::from_millis(100);
pub const ACTIVITY_PERIOD: Duration = Duration::from_millis(2500);
/// Shared by `ecg_update` and `temp_update`, which are emitted together.
pub const SUMMARY_PERIOD: Duration = Duration::from_millis(1000);
pub const ALARM_PERIOD: Duration = Duration::from_millis(10_000);
