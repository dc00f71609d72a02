//! Per-record entry point.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use super::event::{field_value, EventKind, FieldGroup};
use super::rms::{RmsSample, RmsTracker};
use super::rpc::{CorrelationRegistry, Method, RegistryError, Request, RequestSender, SendError};
use super::{Record, Session};
use crate::labels::{Identity, LabelSet};
use crate::sink::{MetricSink, SinkError};

pub const METRIC_STATUS: &str = "status";

/// Errors raised while handling a record.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("recording metric: {0}")]
    Sink(#[from] SinkError),

    #[error("sending request: {0}")]
    Send(#[from] SendError),

    #[error("claiming request id: {0}")]
    Registry(#[from] RegistryError),
}

/// Shape of an inbound record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// An event with its `Event` name.
    Event(&'a str),
    /// A JSON-RPC response with its integer id.
    Response(u64),
    /// Neither; dropped.
    Ignored,
}

impl<'a> Inbound<'a> {
    pub fn classify(record: &'a Record) -> Self {
        if let Some(event) = record.get("Event") {
            return event.as_str().map_or(Self::Ignored, Self::Event);
        }
        if record.contains_key("jsonrpc") {
            if let Some(id) = record.get("id").and_then(serde_json::Value::as_u64) {
                return Self::Response(id);
            }
        }
        Self::Ignored
    }
}

/// Drives session state and metric emission from inbound records.
///
/// Owns the session context, RMS windows and correlation registry, all of
/// which outlive any single connection to the guider.
pub struct Dispatcher<S> {
    session: Session,
    rms: RmsTracker,
    registry: Arc<CorrelationRegistry>,
    sink: S,
}

impl<S: MetricSink> Dispatcher<S> {
    pub fn new(sink: S, rms_samples: usize) -> Self {
        Self {
            session: Session::new(),
            rms: RmsTracker::new(rms_samples),
            registry: Arc::new(CorrelationRegistry::new()),
            sink,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn rms(&self) -> &RmsTracker {
        &self.rms
    }

    /// Shared handle on the registry, for issuing requests from elsewhere.
    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Routes a record to the event or response path.
    pub fn handle_record(
        &mut self,
        record: &Record,
        sender: &dyn RequestSender,
    ) -> Result<(), DispatchError> {
        match Inbound::classify(record) {
            Inbound::Event(name) => self.handle_event(name, record, sender),
            Inbound::Response(id) => self.handle_response(id, record),
            Inbound::Ignored => {
                debug!("ignoring record without event or response id");
                Ok(())
            }
        }
    }

    /// Applies one event: state transitions, correlated requests, field
    /// gauges, RMS and the per-event counter.
    pub fn handle_event(
        &mut self,
        name: &str,
        record: &Record,
        sender: &dyn RequestSender,
    ) -> Result<(), DispatchError> {
        let kind = EventKind::from_name(name);
        trace!(event = %kind, "event");

        if kind.carries_identity() {
            if let Some(identity) = Identity::from_record(record) {
                self.session.set_identity(identity);
            }
        }

        if self.session.guiding_mut().apply(&kind, record) {
            self.rms.reset();
        }

        let labels = self.session.labels();

        if let Some(labels) = &labels {
            self.emit_status(labels)?;
        }

        for method in kind.requests() {
            self.issue(*method, sender)?;
        }

        if let Some(labels) = &labels {
            for group in kind.field_groups() {
                self.emit_fields(kind.as_str(), record, labels, group)?;
            }
        }

        if kind == EventKind::GuideStep && !self.session.guiding().settling() {
            let ready = self.rms.collect(&RmsSample::from_record(record));
            if ready {
                self.rms
                    .compute_and_emit(self.session.pixel_scale(), &self.sink)?;
            }
        }

        self.sink
            .increment(kind.as_str(), &labels.unwrap_or_default())?;

        Ok(())
    }

    /// Hands a response to the request awaiting it. Unknown ids are dropped.
    pub fn handle_response(&mut self, id: u64, record: &Record) -> Result<(), DispatchError> {
        let Some(method) = self.registry.resolve(id) else {
            debug!(id, "response for unknown request id");
            return Ok(());
        };

        trace!(id, method = method.as_str(), "response");
        method.handle(record, &mut self.session, &self.sink)?;

        Ok(())
    }

    /// Claims an id, registers the pending request and sends it.
    fn issue(&self, method: Method, sender: &dyn RequestSender) -> Result<u64, DispatchError> {
        let id = self.registry.claim_id()?;
        self.registry.register(id, method);

        if let Err(e) = sender.send(&Request { method, id }) {
            self.registry.release(id);
            return Err(e.into());
        }

        debug!(id, method = method.as_str(), "sent request");
        Ok(id)
    }

    fn emit_status(&self, labels: &LabelSet) -> Result<(), SinkError> {
        for (status, value) in self.session.guiding().status_values() {
            self.sink
                .set(METRIC_STATUS, value, &labels.with("status", status))?;
        }
        Ok(())
    }

    fn emit_fields(
        &self,
        event: &str,
        record: &Record,
        labels: &LabelSet,
        group: &FieldGroup,
    ) -> Result<(), SinkError> {
        let labels = if group.labels.is_empty() {
            labels.clone()
        } else {
            labels.merge(&LabelSet::from_fields(record, group.labels))
        };

        for field in group.fields {
            match field_value(record, field) {
                Some(value) => self.sink.set(&format!("{event}_{field}"), value, &labels)?,
                None if record.contains_key(*field) => {
                    trace!(event, field, "skipping non-numeric field");
                }
                None => {}
            }
        }

        Ok(())
    }
}
