//! # Message Envelope
//!
//! A closed, tagged union of every message the system exchanges. On the wire an
//! envelope is the JSON object `{"type": "<kind>", "data": {...}}`; serde's
//! adjacent tagging maps that shape onto [`Envelope`] directly, so the `type`
//! discriminator and the payload shape can never disagree.
//!
//! Envelopes are values: they are built once per event, handed to listeners by
//! reference and dropped after dispatch.
//!
//! Producers are free to send any JSON number for timestamps and counts.
//! Millisecond timestamps drop their fractional part; counts must be whole.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Activity classification for one analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMessage {
    pub user_id: String,
    pub label: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub label_id: u32,
    /// Probability per label. Values sum to 1 when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probs: Option<BTreeMap<String, f64>>,
    /// Window size in samples.
    #[serde(deserialize_with = "deserialize_count")]
    pub win: u32,
    /// Hop size in samples.
    #[serde(deserialize_with = "deserialize_count")]
    pub hop: u32,
    #[serde(deserialize_with = "deserialize_count")]
    pub fs_hz: u32,
    #[serde(deserialize_with = "deserialize_ms")]
    pub ts: u64,
}

/// One raw ECG sample frame with its derived EASI lead values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcgStreamMessage {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub fs_hz: u32,
    /// Sample timestamp, milliseconds since the epoch.
    #[serde(deserialize_with = "deserialize_ms")]
    pub t: u64,
    pub easi_ai: f64,
    pub easi_es: f64,
    pub easi_as: f64,
}

/// Heart-rate summary computed over a window of ECG samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcgUpdateMessage {
    pub user_id: String,
    #[serde(deserialize_with = "deserialize_count")]
    pub fs_hz: u32,
    #[serde(deserialize_with = "deserialize_count")]
    pub rpeak_count: u32,
    pub hr_mean_bpm: f64,
    pub sdnn_ms: f64,
    pub rmssd_ms: f64,
    pub resp_rate_bpm: f64,
    #[serde(deserialize_with = "deserialize_count")]
    pub win_samples: u32,
    #[serde(deserialize_with = "deserialize_ms")]
    pub ts: u64,
}

/// Skin / ambient temperature reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempUpdateMessage {
    pub user_id: String,
    pub object_c: f64,
    pub ambient_c: f64,
    pub smoothed_object_c: f64,
    /// Marker of the alarm active at the time of the reading, if any. Local
    /// generators send the alarm code as a string; other producers may send
    /// any JSON value.
    #[serde(default)]
    pub alarm: Option<Value>,
    #[serde(deserialize_with = "deserialize_ms")]
    pub ts: u64,
}

impl TempUpdateMessage {
    /// The alarm code when the marker is a plain string.
    pub fn alarm_code(&self) -> Option<&str> {
        self.alarm.as_ref().and_then(Value::as_str)
    }
}

/// Shared payload of `alarm` and `alarm_clear`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmMessage {
    pub user_id: String,
    #[serde(rename = "type")]
    pub alarm_type: String,
    pub code: String,
    pub threshold_s: f64,
    pub duration_s: f64,
    #[serde(deserialize_with = "deserialize_ms")]
    pub ts: u64,
}

/// An error reported by a peer. Never carries a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(rename = "where")]
    pub origin: String,
    pub msg: String,
}

/// Sent by the server once per new peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedMessage {
    pub message: String,
    #[serde(deserialize_with = "deserialize_ms")]
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubscribeMessage {
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedMessage {
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(deserialize_with = "deserialize_ms")]
    pub timestamp: u64,
}

/// # Envelope
///
/// The normalized `{type, data}` unit dispatched to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    Activity(ActivityMessage),
    EcgStream(EcgStreamMessage),
    EcgUpdate(EcgUpdateMessage),
    TempUpdate(TempUpdateMessage),
    Alarm(AlarmMessage),
    AlarmClear(AlarmMessage),
    Error(ErrorMessage),
    Connected(ConnectedMessage),
    Subscribe(SubscribeMessage),
    Subscribed(SubscribedMessage),
}

/// Failures turning raw transport data into an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("malformed '{kind}' payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The message-type discriminator on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Activity,
    EcgStream,
    EcgUpdate,
    TempUpdate,
    Alarm,
    AlarmClear,
    Error,
    Connected,
    Subscribe,
    Subscribed,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Activity,
        MessageKind::EcgStream,
        MessageKind::EcgUpdate,
        MessageKind::TempUpdate,
        MessageKind::Alarm,
        MessageKind::AlarmClear,
        MessageKind::Error,
        MessageKind::Connected,
        MessageKind::Subscribe,
        MessageKind::Subscribed,
    ];

    /// The event names a data source pushes to subscribers.
    pub const TELEMETRY: [MessageKind; 7] = [
        MessageKind::Activity,
        MessageKind::EcgStream,
        MessageKind::EcgUpdate,
        MessageKind::TempUpdate,
        MessageKind::Alarm,
        MessageKind::AlarmClear,
        MessageKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Activity => "activity",
            MessageKind::EcgStream => "ecg_stream",
            MessageKind::EcgUpdate => "ecg_update",
            MessageKind::TempUpdate => "temp_update",
            MessageKind::Alarm => "alarm",
            MessageKind::AlarmClear => "alarm_clear",
            MessageKind::Error => "error",
            MessageKind::Connected => "connected",
            MessageKind::Subscribe => "subscribe",
            MessageKind::Subscribed => "subscribed",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownType(s.to_string()))
    }
}

impl Envelope {
    /// Builds an envelope from a transport event name and its raw payload.
    pub fn from_parts(name: &str, data: Value) -> Result<Self, EnvelopeError> {
        let kind: MessageKind = name.parse()?;
        serde_json::from_value(json!({ "type": kind.as_str(), "data": data }))
            .map_err(|source| EnvelopeError::Payload { kind, source })
    }

    /// Splits the envelope into the event name and payload a transport sends.
    pub fn to_parts(&self) -> Result<(MessageKind, Value), EnvelopeError> {
        let mut value = serde_json::to_value(self).map_err(EnvelopeError::Encode)?;
        let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        Ok((self.kind(), data))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Envelope::Activity(_) => MessageKind::Activity,
            Envelope::EcgStream(_) => MessageKind::EcgStream,
            Envelope::EcgUpdate(_) => MessageKind::EcgUpdate,
            Envelope::TempUpdate(_) => MessageKind::TempUpdate,
            Envelope::Alarm(_) => MessageKind::Alarm,
            Envelope::AlarmClear(_) => MessageKind::AlarmClear,
            Envelope::Error(_) => MessageKind::Error,
            Envelope::Connected(_) => MessageKind::Connected,
            Envelope::Subscribe(_) => MessageKind::Subscribe,
            Envelope::Subscribed(_) => MessageKind::Subscribed,
        }
    }

    /// The subject this envelope reports on. `None` for errors and control messages.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Envelope::Activity(m) => Some(&m.user_id),
            Envelope::EcgStream(m) => Some(&m.user_id),
            Envelope::EcgUpdate(m) => Some(&m.user_id),
            Envelope::TempUpdate(m) => Some(&m.user_id),
            Envelope::Alarm(m) | Envelope::AlarmClear(m) => Some(&m.user_id),
            Envelope::Error(_)
            | Envelope::Connected(_)
            | Envelope::Subscribe(_)
            | Envelope::Subscribed(_) => None,
        }
    }

    /// Serializes the envelope as a single `{type, data}` JSON text frame.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }
}

fn deserialize_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = f64::deserialize(deserializer)?;
    if ms.is_finite() && ms >= 0.0 && ms < u64::MAX as f64 {
        Ok(ms as u64)
    } else {
        Err(de::Error::custom(format!("invalid millisecond timestamp {}", ms)))
    }
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = f64::deserialize(deserializer)?;
    if n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n) {
        Ok(n as u32)
    } else {
        Err(de::Error::custom(format!("expected a whole non-negative number, got {}", n)))
    }
}
