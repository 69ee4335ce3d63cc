//! # Inbound Normalizer
//!
//! Turns each transport-level event into an [`Envelope`] and routes it to the
//! [`ListenerRegistry`].
//!
//! ## Per event:
//! 1.  **Diagnostics**: while the [`LogBudget`] has room, one `info` line is
//!     written and the budget is charged; after that, nothing.
//! 2.  **Subject tracking**: a non-error payload carrying a subject id
//!     overwrites the [`SubjectStore`].
//! 3.  **Fan-out**: the envelope is dispatched to the listeners of its type.
//!
//! A payload that does not parse into its declared type is dropped with one
//! `warn` line and does not charge the budget. It never reaches the registry
//! and never touches the subject.

use std::sync::Arc;

use serde_json::Value;

use crate::constants::MAX_DIAGNOSTIC_LOGS;
use crate::core::budget::LogBudget;
use crate::core::fanout::FanOut;
use crate::core::registry::{DispatchReport, ListenerRegistry};
use crate::core::subject::SubjectStore;
use crate::model::{Envelope, EnvelopeError};

pub struct InboundNormalizer {
    registry: Arc<ListenerRegistry>,
    subject: Arc<SubjectStore>,
    budget: LogBudget,
}

impl InboundNormalizer {
    pub fn new(registry: Arc<ListenerRegistry>, subject: Arc<SubjectStore>) -> Self {
        Self::with_budget(registry, subject, LogBudget::new(MAX_DIAGNOSTIC_LOGS))
    }

    pub fn with_budget(
        registry: Arc<ListenerRegistry>,
        subject: Arc<SubjectStore>,
        budget: LogBudget,
    ) -> Self {
        Self { registry, subject, budget }
    }

    /// Handles one named event with its raw payload.
    pub fn ingest(&self, name: &str, data: Value) -> Result<DispatchReport, EnvelopeError> {
        match Envelope::from_parts(name, data) {
            Ok(envelope) => Ok(self.accept(&envelope)),
            Err(e) => {
                log::warn!("Dropping inbound '{}' event: {}", name, e);
                Err(e)
            }
        }
    }

    /// Handles an envelope that is already typed (local mode, no transport).
    pub fn accept(&self, envelope: &Envelope) -> DispatchReport {
        if self.budget.try_consume() {
            log::info!("Received event {}: {:?}", envelope.kind(), envelope);
        }
        self.route(envelope)
    }

    /// A frame the transport could not even split into name and payload.
    pub fn undecodable(&self, reason: &str) {
        log::warn!("Dropping undecodable inbound frame: {}", reason);
    }

    fn route(&self, envelope: &Envelope) -> DispatchReport {
        if let Some(subject_id) = envelope.subject_id() {
            self.subject.set(subject_id);
        }
        self.registry.dispatch(envelope.kind().as_str(), envelope)
    }

    /// Diagnostic lines written so far.
    pub fn diagnostics_logged(&self) -> usize {
        self.budget.used()
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    pub fn subject(&self) -> &Arc<SubjectStore> {
        &self.subject
    }
}

impl FanOut for InboundNormalizer {
    fn publish(&self, envelope: &Envelope) {
        self.accept(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::listener;
    use serde_json::json;
    use std::sync::Mutex;

    fn fixture() -> (InboundNormalizer, Arc<ListenerRegistry>, Arc<SubjectStore>) {
        let registry = Arc::new(ListenerRegistry::new());
        let subject = Arc::new(SubjectStore::new());
        let normalizer = InboundNormalizer::new(Arc::clone(&registry), Arc::clone(&subject));
        (normalizer, registry, subject)
    }

    fn alarm_data(user: &str) -> Value {
        json!({"user_id": user, "type": "temp_high", "code": "T1",
               "threshold_s": 30, "duration_s": 45, "ts": 1000})
    }

    #[test]
    fn test_ingest_dispatches_and_updates_subject() {
        let (normalizer, registry, subject) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on("alarm", listener(move |env| {
            sink.lock().unwrap().push(env.clone());
            Ok(())
        }));

        let report = normalizer.ingest("alarm", alarm_data("u1")).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(subject.current(), "u1");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Envelope::from_parts("alarm", alarm_data("u1")).unwrap());
    }

    #[test]
    fn test_error_event_leaves_subject_alone() {
        let (normalizer, _registry, subject) = fixture();
        subject.set("u7");

        normalizer.ingest("error", json!({"where": "server", "msg": "bad json"})).unwrap();

        assert_eq!(subject.current(), "u7");
    }

    #[test]
    fn test_malformed_payload_never_reaches_listeners() {
        let (normalizer, registry, subject) = fixture();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        registry.on("ecg_update", listener(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        }));

        let result = normalizer.ingest("ecg_update", json!({"user_id": "u9", "fs_hz": "fast"}));

        assert!(result.is_err());
        assert_eq!(*hits.lock().unwrap(), 0);
        assert_eq!(subject.current(), "", "dropped payload must not update the subject");
        assert_eq!(normalizer.diagnostics_logged(), 0);
    }

    #[test]
    fn test_temp_update_with_object_alarm_marker_is_routed() {
        let (normalizer, registry, subject) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on("temp_update", listener(move |env| {
            sink.lock().unwrap().push(env.clone());
            Ok(())
        }));

        let report = normalizer
            .ingest(
                "temp_update",
                json!({"user_id": "u6", "object_c": 37.9, "ambient_c": 24.5,
                       "smoothed_object_c": 37.5, "alarm": {"code": "T1"}, "ts": 42}),
            )
            .unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(subject.current(), "u6");
        let seen = seen.lock().unwrap();
        let Envelope::TempUpdate(reading) = &seen[0] else {
            panic!("expected temp_update, got {:?}", seen[0]);
        };
        assert_eq!(reading.alarm, Some(json!({"code": "T1"})));
    }

    #[test]
    fn test_diagnostics_stop_at_ceiling() {
        let (normalizer, _registry, _subject) = fixture();
        for _ in 0..(MAX_DIAGNOSTIC_LOGS + 1) {
            normalizer.ingest("alarm", alarm_data("u1")).unwrap();
        }
        assert_eq!(normalizer.diagnostics_logged(), MAX_DIAGNOSTIC_LOGS);
    }

    #[test]
    fn test_accept_routes_typed_envelopes() {
        let (normalizer, registry, subject) = fixture();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        registry.on("alarm_clear", listener(move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        }));

        let envelope = Envelope::from_parts("alarm_clear", alarm_data("u3")).unwrap();
        normalizer.publish(&envelope);

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(subject.current(), "u3");
        assert_eq!(normalizer.diagnostics_logged(), 1);
    }
}
