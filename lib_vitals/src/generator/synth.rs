//! Payload synthesis for the generator streams.
//!
//! Every field is drawn uniformly from a fixed range. Timestamps are wall-clock
//! milliseconds, clamped so they never go backwards within a stream.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::generator::StreamKind;
use crate::model::{
    now_millis, ActivityMessage, AlarmMessage, EcgStreamMessage, EcgUpdateMessage, Envelope,
    TempUpdateMessage,
};

pub const ACTIVITY_LABELS: [&str; 8] = [
    "sit",
    "stand",
    "lie",
    "walk",
    "run",
    "climb_stairs",
    "descend_stairs",
    "jump",
];

const SAMPLE_RATE_HZ: u32 = 100;
const ACTIVITY_WINDOW: u32 = 200;
const ACTIVITY_HOP: u32 = 50;
const ECG_WINDOW_SAMPLES: u32 = 2000;

const ALARM_TYPE: &str = "temp_high";
const ALARM_CODE: &str = "T1";
const ALARM_THRESHOLD_S: f64 = 30.0;

pub struct Synthesizer {
    subject: String,
    rng: StdRng,
    last_ts: [u64; StreamKind::ALL.len()],
    active_alarm: Option<AlarmMessage>,
}

impl Synthesizer {
    /// A fixed `seed` makes every field except timestamps reproducible.
    pub fn new(subject: impl Into<String>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            subject: subject.into(),
            rng,
            last_ts: [0; StreamKind::ALL.len()],
            active_alarm: None,
        }
    }

    /// One tick of `kind`. The summary stream yields `ecg_update` then `temp_update`.
    pub fn tick(&mut self, kind: StreamKind) -> Vec<Envelope> {
        match kind {
            StreamKind::EcgStream => vec![Envelope::EcgStream(self.ecg_stream())],
            StreamKind::Activity => vec![Envelope::Activity(self.activity())],
            StreamKind::Summary => vec![
                Envelope::EcgUpdate(self.ecg_update()),
                Envelope::TempUpdate(self.temp_update()),
            ],
            StreamKind::Alarm => vec![self.toggle_alarm()],
        }
    }

    pub fn active_alarm(&self) -> Option<&AlarmMessage> {
        self.active_alarm.as_ref()
    }

    fn stamp(&mut self, kind: StreamKind) -> u64 {
        let now = now_millis();
        let slot = &mut self.last_ts[kind.index()];
        *slot = (*slot).max(now);
        *slot
    }

    fn ecg_stream(&mut self) -> EcgStreamMessage {
        let t = self.stamp(StreamKind::EcgStream);
        let rng = &mut self.rng;
        EcgStreamMessage {
            user_id: self.subject.clone(),
            fs_hz: SAMPLE_RATE_HZ,
            t,
            easi_ai: rng.random::<f64>() * 0.001 + 0.001 * rng.random::<f64>(),
            easi_es: rng.random_range(0.0..0.002),
            easi_as: rng.random_range(0.0..0.002),
        }
    }

    fn activity(&mut self) -> ActivityMessage {
        let ts = self.stamp(StreamKind::Activity);
        let selected = self.rng.random_range(0..ACTIVITY_LABELS.len());

        let mut weights: Vec<f64> =
            ACTIVITY_LABELS.iter().map(|_| self.rng.random::<f64>() * 0.3).collect();
        let max = weights.iter().copied().fold(0.0, f64::max);
        weights[selected] = max + 0.4;

        let total: f64 = weights.iter().sum();
        let probs: BTreeMap<String, f64> = ACTIVITY_LABELS
            .iter()
            .zip(&weights)
            .map(|(label, w)| (label.to_string(), w / total))
            .collect();

        ActivityMessage {
            user_id: self.subject.clone(),
            label: ACTIVITY_LABELS[selected].to_string(),
            label_id: selected as u32,
            probs: Some(probs),
            win: ACTIVITY_WINDOW,
            hop: ACTIVITY_HOP,
            fs_hz: SAMPLE_RATE_HZ,
            ts,
        }
    }

    fn ecg_update(&mut self) -> EcgUpdateMessage {
        let ts = self.stamp(StreamKind::Summary);
        let rng = &mut self.rng;
        EcgUpdateMessage {
            user_id: self.subject.clone(),
            fs_hz: SAMPLE_RATE_HZ,
            rpeak_count: rng.random_range(120..130),
            hr_mean_bpm: rng.random_range(60.0..80.0),
            sdnn_ms: rng.random_range(30.0..50.0),
            rmssd_ms: rng.random_range(30.0..50.0),
            resp_rate_bpm: rng.random_range(10.0..15.0),
            win_samples: ECG_WINDOW_SAMPLES,
            ts,
        }
    }

    fn temp_update(&mut self) -> TempUpdateMessage {
        let ts = self.stamp(StreamKind::Summary);
        let alarm = self.active_alarm.as_ref().map(|a| Value::String(a.code.clone()));
        let rng = &mut self.rng;
        TempUpdateMessage {
            user_id: self.subject.clone(),
            object_c: rng.random_range(30.0..35.0),
            ambient_c: rng.random_range(25.0..30.0),
            smoothed_object_c: rng.random_range(30.0..35.0),
            alarm,
            ts,
        }
    }

    /// Raises an alarm when none is active, otherwise clears the active one.
    fn toggle_alarm(&mut self) -> Envelope {
        let ts = self.stamp(StreamKind::Alarm);
        match self.active_alarm.take() {
            Some(alarm) => Envelope::AlarmClear(AlarmMessage { ts, ..alarm }),
            None => {
                let alarm = AlarmMessage {
                    user_id: self.subject.clone(),
                    alarm_type: ALARM_TYPE.to_string(),
                    code: ALARM_CODE.to_string(),
                    threshold_s: ALARM_THRESHOLD_S,
                    duration_s: self.rng.random_range(30.0..90.0),
                    ts,
                };
                self.active_alarm = Some(alarm.clone());
                Envelope::Alarm(alarm)
            }
        }
    }
}
