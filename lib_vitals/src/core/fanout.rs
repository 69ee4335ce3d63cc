//! The sink publishers push envelopes into.
//!
//! The generator does not know whether its output goes to remote peers (the
//! server's hub) or straight into a local normalizer; both implement
//! [`FanOut`].

use std::sync::Arc;

use crate::model::Envelope;

pub trait FanOut: Send + Sync {
    /// Delivers `envelope` to every attached consumer. Never fails; delivery is
    /// best effort.
    fn publish(&self, envelope: &Envelope);
}

impl<T: FanOut + ?Sized> FanOut for Arc<T> {
    fn publish(&self, envelope: &Envelope) {
        (**self).publish(envelope)
    }
}

