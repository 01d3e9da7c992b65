//! Trace search requests
//!
//! A [`QueryRequest`] is a conjunction of predicates over one time window:
//! service, span name, remote service, duration range and annotation/tag
//! terms. Requests are validated when built so the read path never sees an
//! impossible window or limit.

use crate::error::{Error, Result};
use crate::span::Span;
use std::collections::BTreeMap;

/// A validated trace search.
///
/// Timestamps are epoch milliseconds, durations are microseconds.
///
/// # Example
///
/// ```
/// use tracestore_core::QueryRequest;
///
/// let request = QueryRequest::builder()
///     .service_name("Frontend")
///     .parse_annotation_query("error and http.method=GET")
///     .end_ts(1_467_676_800_150)
///     .lookback(86_400_000)
///     .limit(10)
///     .build()
///     .unwrap();
///
/// assert_eq!(request.service_name(), Some("frontend"));
/// assert_eq!(request.annotation_query().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    service_name: Option<String>,
    remote_service_name: Option<String>,
    span_name: Option<String>,
    annotation_query: BTreeMap<String, String>,
    min_duration: Option<u64>,
    max_duration: Option<u64>,
    end_ts: u64,
    lookback: u64,
    limit: usize,
}

impl QueryRequest {
    /// Start building a request
    pub fn builder() -> QueryRequestBuilder {
        QueryRequestBuilder::default()
    }

    /// Copy this request into a builder
    pub fn to_builder(&self) -> QueryRequestBuilder {
        QueryRequestBuilder {
            service_name: self.service_name.clone(),
            remote_service_name: self.remote_service_name.clone(),
            span_name: self.span_name.clone(),
            annotation_query: self.annotation_query.clone(),
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            end_ts: self.end_ts,
            lookback: self.lookback,
            limit: self.limit,
        }
    }

    /// Local service name; absent means every service
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Remote service name
    pub fn remote_service_name(&self) -> Option<&str> {
        self.remote_service_name.as_deref()
    }

    /// Span name
    pub fn span_name(&self) -> Option<&str> {
        self.span_name.as_deref()
    }

    /// Annotation values and tag terms. An empty value matches an
    /// annotation value or the presence of a tag key; otherwise the tag
    /// value must be equal.
    pub fn annotation_query(&self) -> &BTreeMap<String, String> {
        &self.annotation_query
    }

    /// Minimum duration in microseconds, inclusive
    pub fn min_duration(&self) -> Option<u64> {
        self.min_duration
    }

    /// Maximum duration in microseconds, inclusive
    pub fn max_duration(&self) -> Option<u64> {
        self.max_duration
    }

    /// End of the window, epoch milliseconds
    pub fn end_ts(&self) -> u64 {
        self.end_ts
    }

    /// Window width in milliseconds
    pub fn lookback(&self) -> u64 {
        self.lookback
    }

    /// Maximum traces to return
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// True when the request constrains anything besides the time window
    pub fn has_predicates(&self) -> bool {
        self.service_name.is_some()
            || self.remote_service_name.is_some()
            || self.span_name.is_some()
            || self.min_duration.is_some()
            || !self.annotation_query.is_empty()
    }

    /// Render the annotation query back to `key=value and key` form
    pub fn annotation_query_string(&self) -> Option<String> {
        if self.annotation_query.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .annotation_query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        Some(parts.join(" and "))
    }

    /// Test a hydrated trace against every predicate of this request.
    ///
    /// The trace timestamp is the root span's timestamp, or the earliest
    /// timestamp when no root is present. Annotation, name and duration
    /// predicates only consider spans recorded by the requested service.
    pub fn test(&self, spans: &[Span]) -> bool {
        let mut timestamp = 0u64;
        for span in spans {
            let ts = span.timestamp_as_micros();
            if ts == 0 {
                continue;
            }
            if span.parent_id().is_none() {
                timestamp = ts;
                break;
            }
            if timestamp == 0 || timestamp > ts {
                timestamp = ts;
            }
        }
        let window_start = self.end_ts.saturating_sub(self.lookback).saturating_mul(1000);
        let window_end = self.end_ts.saturating_mul(1000);
        if timestamp == 0 || timestamp < window_start || timestamp > window_end {
            return false;
        }

        let mut service_seen = self.service_name.is_none();
        let mut tested_duration = self.min_duration.is_none() && self.max_duration.is_none();
        let mut remote_to_match = self.remote_service_name.as_deref();
        let mut span_name_to_match = self.span_name.as_deref();
        let mut remaining = self.annotation_query.clone();

        for span in spans {
            let local = span.local_service_name();
            let in_scope = match self.service_name.as_deref() {
                None => true,
                Some(service) => local == Some(service),
            };
            if !in_scope {
                continue;
            }
            if self.service_name.is_some() {
                service_seen = true;
            }

            for annotation in span.annotations() {
                if remaining.get(&annotation.value).map(String::is_empty) == Some(true) {
                    remaining.remove(&annotation.value);
                }
            }
            for (key, value) in span.tags() {
                let matched = match remaining.get(key) {
                    Some(wanted) => wanted.is_empty() || wanted == value,
                    None => false,
                };
                if matched {
                    remaining.remove(key);
                }
            }

            if remote_to_match.is_some() && remote_to_match == span.remote_service_name() {
                remote_to_match = None;
            }
            if span_name_to_match.is_some() && span_name_to_match == span.name() {
                span_name_to_match = None;
            }

            if !tested_duration {
                let duration = span.duration_as_micros();
                tested_duration = match (self.min_duration, self.max_duration) {
                    (Some(min), Some(max)) => duration >= min && duration <= max,
                    (Some(min), None) => duration >= min,
                    _ => false,
                };
            }
        }

        service_seen
            && remote_to_match.is_none()
            && span_name_to_match.is_none()
            && remaining.is_empty()
            && tested_duration
    }
}

/// Builder for [`QueryRequest`]
#[derive(Debug, Clone, Default)]
pub struct QueryRequestBuilder {
    service_name: Option<String>,
    remote_service_name: Option<String>,
    span_name: Option<String>,
    annotation_query: BTreeMap<String, String>,
    min_duration: Option<u64>,
    max_duration: Option<u64>,
    end_ts: u64,
    lookback: u64,
    limit: usize,
}

impl QueryRequestBuilder {
    /// Restrict to traces that include this local service
    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Restrict to traces calling this remote service
    pub fn remote_service_name(mut self, remote_service_name: impl Into<String>) -> Self {
        self.remote_service_name = Some(remote_service_name.into());
        self
    }

    /// Restrict to traces including this span name
    pub fn span_name(mut self, span_name: impl Into<String>) -> Self {
        self.span_name = Some(span_name.into());
        self
    }

    /// Parse terms like `error and http.method=GET`
    pub fn parse_annotation_query(mut self, query: &str) -> Self {
        if query.is_empty() {
            return self;
        }
        let mut terms = BTreeMap::new();
        for term in query.split(" and ") {
            match term.find('=') {
                Some(idx) => terms.insert(term[..idx].to_string(), term[idx + 1..].to_string()),
                None => terms.insert(term.to_string(), String::new()),
            };
        }
        self.annotation_query = terms;
        self
    }

    /// Replace the annotation query
    pub fn annotation_query(mut self, terms: BTreeMap<String, String>) -> Self {
        self.annotation_query = terms;
        self
    }

    /// Add one annotation query term
    pub fn add_annotation_term(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotation_query.insert(key.into(), value.into());
        self
    }

    /// Minimum duration in microseconds
    pub fn min_duration(mut self, min_duration: u64) -> Self {
        self.min_duration = Some(min_duration);
        self
    }

    /// Maximum duration in microseconds; requires a minimum
    pub fn max_duration(mut self, max_duration: u64) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// End of the window in epoch milliseconds
    pub fn end_ts(mut self, end_ts: u64) -> Self {
        self.end_ts = end_ts;
        self
    }

    /// Window width in milliseconds
    pub fn lookback(mut self, lookback: u64) -> Self {
        self.lookback = lookback;
        self
    }

    /// Maximum traces to return
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Normalise and validate the request
    pub fn build(self) -> Result<QueryRequest> {
        let lower = |s: Option<String>| {
            s.map(|s| s.to_lowercase()).filter(|s| !s.is_empty())
        };
        let service_name = lower(self.service_name);
        let remote_service_name = lower(self.remote_service_name);
        let span_name = lower(self.span_name).filter(|s| s != "all");
        let mut annotation_query = self.annotation_query;
        annotation_query.remove("");

        if self.end_ts == 0 {
            return Err(Error::InvalidQuery("endTs <= 0".into()));
        }
        if self.limit == 0 {
            return Err(Error::InvalidQuery("limit <= 0".into()));
        }
        if self.lookback == 0 {
            return Err(Error::InvalidQuery("lookback <= 0".into()));
        }
        match (self.min_duration, self.max_duration) {
            (Some(0), _) => return Err(Error::InvalidQuery("minDuration <= 0".into())),
            (Some(min), Some(max)) if max < min => {
                return Err(Error::InvalidQuery("maxDuration < minDuration".into()))
            }
            (None, Some(_)) => {
                return Err(Error::InvalidQuery(
                    "maxDuration is only valid with minDuration".into(),
                ))
            }
            _ => {}
        }

        Ok(QueryRequest {
            service_name,
            remote_service_name,
            span_name,
            annotation_query,
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            end_ts: self.end_ts,
            lookback: self.lookback,
            limit: self.limit,
        })
    }
}
