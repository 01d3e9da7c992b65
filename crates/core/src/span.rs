//! Span model
//!
//! Spans are immutable once built. Service names and span names are
//! lowercased on construction so every index key and query compares
//! the same form.

use crate::error::{Error, Result};
use crate::trace_id::TraceId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Role of a span in an RPC or messaging exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Kind {
    /// Outgoing request
    Client,
    /// Incoming request
    Server,
    /// Message sent to a broker
    Producer,
    /// Message received from a broker
    Consumer,
}

/// Network context of one side of a span
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub(crate) service_name: Option<String>,
    pub(crate) ip: Option<IpAddr>,
    pub(crate) port: Option<u16>,
}

impl Endpoint {
    /// Endpoint with only a service name
    pub fn of(service_name: impl Into<String>) -> Self {
        Self::default().with_service_name(service_name)
    }

    /// Set the service name, lowercased. Empty names are dropped.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        let name = service_name.into().to_lowercase();
        self.service_name = if name.is_empty() { None } else { Some(name) };
        self
    }

    /// Set the IP address
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Lowercase service name, if known
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// IP address, if known
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Port, if known
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

/// Timestamped event on a span
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    /// Epoch microseconds
    pub timestamp: u64,
    /// Event description, such as "wr" or "error"
    pub value: String,
}

impl Annotation {
    /// Create an annotation
    pub fn new(timestamp: u64, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }
}

/// A single timed operation within a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub(crate) trace_id: TraceId,
    pub(crate) parent_id: Option<u64>,
    pub(crate) id: u64,
    pub(crate) kind: Option<Kind>,
    pub(crate) name: Option<String>,
    pub(crate) timestamp: Option<u64>,
    pub(crate) duration: Option<u64>,
    pub(crate) local_endpoint: Option<Endpoint>,
    pub(crate) remote_endpoint: Option<Endpoint>,
    pub(crate) annotations: Vec<Annotation>,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) debug: bool,
    pub(crate) shared: bool,
}

impl Span {
    /// Start building a span
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Copy this span into a builder
    pub fn to_builder(&self) -> SpanBuilder {
        SpanBuilder {
            trace_id: Some(self.trace_id),
            parent_id: self.parent_id,
            id: Some(self.id),
            kind: self.kind,
            name: self.name.clone(),
            timestamp: self.timestamp,
            duration: self.duration,
            local_endpoint: self.local_endpoint.clone(),
            remote_endpoint: self.remote_endpoint.clone(),
            annotations: self.annotations.clone(),
            tags: self.tags.clone(),
            debug: self.debug,
            shared: self.shared,
        }
    }

    /// Trace identifier
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Parent span id, absent on the root span
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Span id, unique within a trace (shared by a client/server pair)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Span kind
    pub fn kind(&self) -> Option<Kind> {
        self.kind
    }

    /// Lowercase operation name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Start timestamp in epoch microseconds
    pub fn timestamp(&self) -> Option<u64> {
        self.timestamp
    }

    /// Start timestamp, or zero when absent
    pub fn timestamp_as_micros(&self) -> u64 {
        self.timestamp.unwrap_or(0)
    }

    /// Duration in microseconds
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    /// Duration, or zero when absent
    pub fn duration_as_micros(&self) -> u64 {
        self.duration.unwrap_or(0)
    }

    /// Endpoint that recorded the span
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local_endpoint.as_ref()
    }

    /// Other side of the connection
    pub fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote_endpoint.as_ref()
    }

    /// Service name of the local endpoint
    pub fn local_service_name(&self) -> Option<&str> {
        self.local_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    /// Service name of the remote endpoint
    pub fn remote_service_name(&self) -> Option<&str> {
        self.remote_endpoint.as_ref().and_then(Endpoint::service_name)
    }

    /// Annotations sorted by timestamp
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// String tags
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Debug flag
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// True when this span shares its id with the client span that caused it
    pub fn shared(&self) -> bool {
        self.shared
    }
}

/// Builder for [`Span`]
#[derive(Debug, Clone, Default)]
pub struct SpanBuilder {
    trace_id: Option<TraceId>,
    parent_id: Option<u64>,
    id: Option<u64>,
    kind: Option<Kind>,
    name: Option<String>,
    timestamp: Option<u64>,
    duration: Option<u64>,
    local_endpoint: Option<Endpoint>,
    remote_endpoint: Option<Endpoint>,
    annotations: Vec<Annotation>,
    tags: BTreeMap<String, String>,
    debug: bool,
    shared: bool,
}

impl SpanBuilder {
    /// Set the trace id
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Set the parent id
    pub fn parent_id(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Clear the parent id
    pub fn clear_parent_id(mut self) -> Self {
        self.parent_id = None;
        self
    }

    /// Set the span id
    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the kind
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the span name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the start timestamp in epoch microseconds
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Clear the start timestamp
    pub fn clear_timestamp(mut self) -> Self {
        self.timestamp = None;
        self
    }

    /// Set the duration in microseconds
    pub fn duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the local endpoint
    pub fn local_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.local_endpoint = Some(endpoint);
        self
    }

    /// Set the remote endpoint
    pub fn remote_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.remote_endpoint = Some(endpoint);
        self
    }

    /// Add an annotation
    pub fn add_annotation(mut self, timestamp: u64, value: impl Into<String>) -> Self {
        self.annotations.push(Annotation::new(timestamp, value));
        self
    }

    /// Add or replace a tag
    pub fn put_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the debug flag
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the shared flag
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Build the span.
    ///
    /// Fails when the trace id or span id was never set.
    pub fn build(self) -> Result<Span> {
        let trace_id = self
            .trace_id
            .ok_or_else(|| Error::InvalidSpan("traceId is required".into()))?;
        let id = self
            .id
            .ok_or_else(|| Error::InvalidSpan("id is required".into()))?;

        let name = self
            .name
            .map(|n| n.to_lowercase())
            .filter(|n| !n.is_empty());
        let mut annotations = self.annotations;
        annotations.sort();
        annotations.dedup();

        Ok(Span {
            trace_id,
            parent_id: self.parent_id.filter(|p| *p != 0),
            id,
            kind: self.kind,
            name,
            timestamp: self.timestamp.filter(|t| *t != 0),
            duration: self.duration.filter(|d| *d != 0),
            local_endpoint: self.local_endpoint.filter(|e| *e != Endpoint::default()),
            remote_endpoint: self.remote_endpoint.filter(|e| *e != Endpoint::default()),
            annotations,
            tags: self.tags,
            debug: self.debug,
            shared: self.shared,
        })
    }
}
