//! Interpretation of the PHD2 event stream.
//!
//! The guider publishes newline-delimited JSON records: unsolicited events
//! (`{"Event": ...}`) and replies to our JSON-RPC requests. Everything in
//! this module is synchronous and free of I/O; records arrive already
//! decoded, outbound requests leave through a [`rpc::RequestSender`] and
//! samples through a [`crate::sink::MetricSink`].

pub mod dispatch;
pub mod event;
pub mod phase;
pub mod rms;
pub mod rpc;

use serde_json::Value;

use crate::labels::{Identity, LabelSet};

use self::phase::GuidingState;

/// A decoded inbound record.
pub type Record = serde_json::Map<String, Value>;

/// Context of the single guider session being observed.
#[derive(Debug, Clone, Default)]
pub struct Session {
    identity: Option<Identity>,
    guiding: GuidingState,
    pixel_scale: f64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Identity) {
        if self.identity.as_ref() != Some(&identity) {
            tracing::info!(host = %identity.host, inst = %identity.inst, "guider identified");
        }
        self.identity = Some(identity);
    }

    /// Identity labels, or `None` before the guider has identified itself.
    pub fn labels(&self) -> Option<LabelSet> {
        self.identity.as_ref().map(Identity::labels)
    }

    /// Identity labels, empty before the guider has identified itself.
    pub fn labels_or_empty(&self) -> LabelSet {
        self.labels().unwrap_or_default()
    }

    pub fn guiding(&self) -> &GuidingState {
        &self.guiding
    }

    pub fn guiding_mut(&mut self) -> &mut GuidingState {
        &mut self.guiding
    }

    /// Arcseconds per pixel; zero when unknown.
    pub fn pixel_scale(&self) -> f64 {
        self.pixel_scale
    }

    pub fn set_pixel_scale(&mut self, scale: f64) {
        self.pixel_scale = scale;
    }
}
