//! JSON-RPC requests to PHD2 and correlation of their responses.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Record, Session};
use crate::sink::{MetricSink, SinkError};

/// Upper bound (inclusive) of the request id space.
pub const MAX_REQUEST_ID: u64 = 50_000;

pub const METRIC_PIXEL_SCALE: &str = "pixel_scale";
pub const METRIC_CONNECTED: &str = "connected";
pub const METRIC_CURRENT_EQUIPMENT: &str = "current_equipment";

/// Requests the exporter issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    GetPixelScale,
    GetConnected,
    GetCurrentEquipment,
}

impl Method {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetPixelScale => "get_pixel_scale",
            Self::GetConnected => "get_connected",
            Self::GetCurrentEquipment => "get_current_equipment",
        }
    }

    /// Applies a response to the session and emits the resulting metrics.
    pub fn handle<S: MetricSink + ?Sized>(
        self,
        response: &Record,
        session: &mut Session,
        sink: &S,
    ) -> Result<(), SinkError> {
        let Some(result) = response.get("result") else {
            warn!(
                method = self.as_str(),
                error = ?response.get("error"),
                "request failed",
            );
            return Ok(());
        };

        match self {
            Self::GetPixelScale => {
                let Some(scale) = result.as_f64() else {
                    debug!(result = %result, "ignoring non-numeric pixel scale");
                    return Ok(());
                };
                session.set_pixel_scale(scale);
                if let Some(labels) = session.labels() {
                    sink.set(METRIC_PIXEL_SCALE, scale, &labels)?;
                }
            }
            Self::GetConnected => {
                if let Some(labels) = session.labels() {
                    sink.set(METRIC_CONNECTED, truthy(result), &labels)?;
                }
            }
            Self::GetCurrentEquipment => {
                let Some(labels) = session.labels() else {
                    return Ok(());
                };
                let Some(devices) = result.as_object() else {
                    debug!(result = %result, "ignoring malformed equipment list");
                    return Ok(());
                };
                // Device names are left out of the labels: they change as
                // drivers connect and would only add cardinality.
                for (device, info) in devices {
                    let connected = info.get("connected").map_or(0.0, truthy);
                    sink.set(
                        METRIC_CURRENT_EQUIPMENT,
                        connected,
                        &labels.with("device", device.as_str()),
                    )?;
                }
            }
        }

        Ok(())
    }
}

fn truthy(value: &Value) -> f64 {
    match value {
        Value::Bool(true) => 1.0,
        Value::Number(n) if n.as_f64().is_some_and(|v| v != 0.0) => 1.0,
        _ => 0.0,
    }
}

/// An outbound request, serialized as `{"method": ..., "id": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Request {
    pub method: Method,
    pub id: u64,
}

impl Request {
    /// Encodes the request as a CRLF-terminated JSON line.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push_str("\r\n");
        Ok(line)
    }
}

/// Errors sending a request to the guider.
#[derive(Error, Debug)]
pub enum SendError {
    #[error("request channel closed")]
    Closed,

    #[error("encoding request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Fire-and-forget delivery of requests to the guider.
pub trait RequestSender {
    fn send(&self, request: &Request) -> Result<(), SendError>;
}

/// Errors claiming a request id.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("all {0} request ids are pending")]
    Exhausted(u64),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Claimed,
    Awaiting(Method),
}

/// Outstanding requests keyed by id.
///
/// Claiming is an atomic check-and-insert so ids can be drawn from more than
/// one task. Entries are only removed when their response arrives.
#[derive(Debug)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<u64, Slot>>,
    max_id: u64,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::with_id_space(MAX_REQUEST_ID)
    }

    /// Creates a registry drawing ids from `1..=max_id`.
    pub fn with_id_space(max_id: u64) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_id: max_id.max(1),
        }
    }

    /// Draws a random id not currently pending and reserves it.
    pub fn claim_id(&self) -> Result<u64, RegistryError> {
        let mut pending = self.pending.lock();
        if pending.len() as u64 >= self.max_id {
            return Err(RegistryError::Exhausted(self.max_id));
        }

        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1..=self.max_id);
            if !pending.contains_key(&id) {
                pending.insert(id, Slot::Claimed);
                return Ok(id);
            }
        }
    }

    /// Associates a claimed id with the request awaiting its response.
    pub fn register(&self, id: u64, method: Method) {
        self.pending.lock().insert(id, Slot::Awaiting(method));
    }

    /// Removes and returns the request awaiting `id`.
    ///
    /// Returns `None` for ids that are unknown or not yet registered; such
    /// responses are dropped.
    pub fn resolve(&self, id: u64) -> Option<Method> {
        let mut pending = self.pending.lock();
        match pending.get(&id) {
            Some(Slot::Awaiting(method)) => {
                let method = *method;
                pending.remove(&id);
                Some(method)
            }
            Some(Slot::Claimed) | None => None,
        }
    }

    /// Drops an id without waiting for its response.
    pub fn release(&self, id: u64) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
