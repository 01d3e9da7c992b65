//! Trace assembly
//!
//! Spans for a trace arrive in many messages, sometimes from clients that
//! truncate trace ids to 64 bits and sometimes reporting the same span more
//! than once. This module groups spans into traces, merges spans reported
//! in pieces and corrects clock skew between hosts.

use crate::span::{Endpoint, Kind, Span};
use crate::trace_id::TraceId;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Group spans into traces, preserving first-seen order.
///
/// In strict mode spans group by the full trace id. Otherwise spans group
/// by the low 64 bits, so a 128-bit trace joins the 64-bit spans written by
/// clients that truncate ids.
pub fn group_by_trace_id(spans: Vec<Span>, strict: bool) -> Vec<Vec<Span>> {
    let mut index: FxHashMap<TraceId, usize> = FxHashMap::default();
    let mut traces: Vec<Vec<Span>> = Vec::new();
    for span in spans {
        let key = if strict {
            span.trace_id()
        } else {
            span.trace_id().to_low_64()
        };
        match index.get(&key) {
            Some(&i) => traces[i].push(span),
            None => {
                index.insert(key, traces.len());
                traces.push(vec![span]);
            }
        }
    }
    traces
}

/// The trace id a merged trace should report: the 128-bit form when any
/// span carried one.
pub fn best_trace_id(spans: &[Span]) -> Option<TraceId> {
    let first = spans.first()?.trace_id();
    Some(
        spans
            .iter()
            .map(Span::trace_id)
            .find(TraceId::is_128_bit)
            .unwrap_or(first),
    )
}

/// Merge spans that were reported in pieces.
///
/// Spans merge when they share an id, the shared flag and a compatible
/// local endpoint. Shared server spans missing a parent id inherit it from
/// the client span with the same id, and server spans that share an id
/// with a client span are flagged shared.
pub fn merge(mut spans: Vec<Span>) -> Vec<Span> {
    if spans.len() <= 1 {
        return spans;
    }
    if let Some(trace_id) = best_trace_id(&spans) {
        for span in spans.iter_mut() {
            if span.trace_id.low() == trace_id.low() {
                span.trace_id = trace_id;
            }
        }
    }
    spans.sort_by(compare_for_merge);

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        let target = merged
            .iter_mut()
            .rev()
            .take_while(|m| m.id == span.id)
            .find(|m| mergeable(m, &span));
        match target {
            Some(existing) => merge_into(existing, span),
            None => merged.push(span),
        }
    }

    backfill_shared(&mut merged);
    merged
}

fn compare_for_merge(a: &Span, b: &Span) -> Ordering {
    a.id.cmp(&b.id)
        .then(a.shared.cmp(&b.shared))
        .then_with(|| {
            // spans with a local service sort first so late fragments merge into them
            b.local_service_name()
                .is_some()
                .cmp(&a.local_service_name().is_some())
        })
        .then(a.timestamp.is_none().cmp(&b.timestamp.is_none()))
}

fn mergeable(a: &Span, b: &Span) -> bool {
    if a.id != b.id || a.shared != b.shared {
        return false;
    }
    let kinds = match (a.kind, b.kind) {
        (Some(l), Some(r)) => l == r,
        _ => true,
    };
    let endpoints = match (&a.local_endpoint, &b.local_endpoint) {
        (Some(x), Some(y)) => both_or_equal(&x.service_name, &y.service_name) && both_or_equal(&x.ip, &y.ip),
        _ => true,
    };
    kinds && endpoints
}

fn both_or_equal<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    match (a, b) {
        (Some(l), Some(r)) => l == r,
        _ => true,
    }
}

fn merge_endpoint(into: &mut Option<Endpoint>, from: Option<Endpoint>) {
    match (into.as_mut(), from) {
        (Some(e), Some(from)) => {
            e.service_name = e.service_name.take().or(from.service_name);
            e.ip = e.ip.or(from.ip);
            e.port = e.port.or(from.port);
        }
        (None, from) => *into = from,
        (Some(_), None) => {}
    }
}

fn merge_into(a: &mut Span, b: Span) {
    a.parent_id = a.parent_id.or(b.parent_id);
    a.kind = a.kind.or(b.kind);
    a.name = a.name.take().or(b.name);
    a.timestamp = a.timestamp.or(b.timestamp);
    a.duration = a.duration.or(b.duration);
    merge_endpoint(&mut a.local_endpoint, b.local_endpoint);
    merge_endpoint(&mut a.remote_endpoint, b.remote_endpoint);
    a.annotations.extend(b.annotations);
    a.annotations.sort();
    a.annotations.dedup();
    for (k, v) in b.tags {
        a.tags.entry(k).or_insert(v);
    }
    a.debug |= b.debug;
}

fn backfill_shared(spans: &mut [Span]) {
    let clients: FxHashMap<u64, Option<u64>> = spans
        .iter()
        .filter(|s| s.kind == Some(Kind::Client))
        .map(|s| (s.id, s.parent_id))
        .collect();

    for span in spans.iter_mut() {
        if span.kind != Some(Kind::Server) {
            continue;
        }
        if let Some(client_parent) = clients.get(&span.id) {
            span.shared = true;
            span.parent_id = span.parent_id.or(*client_parent);
        }
    }
}

/// Correct clock skew between a client and the server it called.
///
/// When a shared server span starts before its client span, or ends after
/// it, the server host's clock is assumed skewed. The server span and its
/// descendants recorded by the same service are shifted so the server sits
/// centred within the client's interval.
pub fn correct_clock_skew(mut spans: Vec<Span>) -> Vec<Span> {
    let clients: FxHashMap<u64, (u64, u64, Option<String>)> = spans
        .iter()
        .filter(|s| s.kind == Some(Kind::Client))
        .filter_map(|s| {
            let service = s.local_service_name().map(str::to_string);
            Some((s.id, (s.timestamp?, s.duration?, service)))
        })
        .collect();
    if clients.is_empty() {
        return spans;
    }

    let mut skews: Vec<(u64, String, i64)> = Vec::new();
    for span in &spans {
        if span.kind != Some(Kind::Server) || !span.shared {
            continue;
        }
        let (service, ts, duration) = match (span.local_service_name(), span.timestamp, span.duration) {
            (Some(s), Some(t), Some(d)) => (s, t, d),
            _ => continue,
        };
        let (client_ts, client_duration, client_service) = match clients.get(&span.id) {
            Some(c) => c,
            None => continue,
        };
        if client_service.as_deref() == Some(service) || *client_duration < duration {
            continue;
        }
        if ts >= *client_ts && ts + duration <= client_ts + client_duration {
            continue;
        }
        let latency = (client_duration - duration) / 2;
        let skew = ts as i64 - (client_ts + latency) as i64;
        skews.push((span.id, service.to_string(), skew));
    }
    if skews.is_empty() {
        return spans;
    }

    let mut children: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
    for (i, span) in spans.iter().enumerate() {
        if let Some(parent) = span.parent_id {
            children.entry(parent).or_default().push(i);
        }
    }

    let mut adjust: Vec<Option<i64>> = vec![None; spans.len()];
    for (id, service, skew) in skews {
        let mut stack: Vec<usize> = spans
            .iter()
            .enumerate()
            .filter(|(_, s)| s.id == id && s.local_service_name() == Some(service.as_str()))
            .map(|(i, _)| i)
            .collect();
        while let Some(i) = stack.pop() {
            if adjust[i].is_some() {
                continue;
            }
            adjust[i] = Some(skew);
            let descendants = children.get(&spans[i].id).map(Vec::as_slice).unwrap_or(&[]);
            for &child in descendants {
                if spans[child].local_service_name() == Some(service.as_str()) {
                    stack.push(child);
                }
            }
        }
    }

    for (span, skew) in spans.iter_mut().zip(adjust) {
        let skew = match skew {
            Some(skew) => skew,
            None => continue,
        };
        let shift = |ts: u64| (ts as i64 - skew).max(1) as u64;
        span.timestamp = span.timestamp.map(shift);
        for annotation in span.annotations.iter_mut() {
            annotation.timestamp = shift(annotation.timestamp);
        }
    }
    spans
}

/// Timestamp used to order traces: the root span's, else the earliest.
pub fn trace_timestamp(spans: &[Span]) -> u64 {
    spans
        .iter()
        .find(|s| s.parent_id().is_none() && s.timestamp().is_some())
        .or_else(|| {
            spans
                .iter()
                .filter(|s| s.timestamp().is_some())
                .min_by_key(|s| s.timestamp_as_micros())
        })
        .map(Span::timestamp_as_micros)
        .unwrap_or(0)
}
