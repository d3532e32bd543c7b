//! In-memory record of finished archive spans.
//!
//! `SpanLog` is a `tracing_subscriber` layer. Spans whose name starts with
//! `archive.` are timed from creation to close and kept in a bounded ring so
//! they can be exported for diagnostics without an external collector.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::clock::SharedClock;

const SPAN_PREFIX: &str = "archive.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
    Unset,
}

/// A closed span.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRecord {
    pub id: u64,
    pub name: String,
    pub parent_id: Option<u64>,
    pub start_time: u64,
    pub duration_ms: u64,
    pub status: SpanStatus,
    pub fields: BTreeMap<String, Value>,
}

/// Per-span bookkeeping stored in the registry's extensions.
struct OpenSpan {
    started: Instant,
    start_time: u64,
    fields: BTreeMap<String, Value>,
}

struct FieldVisitor<'a>(&'a mut BTreeMap<String, Value>);

impl Visit for FieldVisitor<'_> {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::from(format!("{value:?}")));
    }
}

/// Bounded ring of closed `archive.*` spans. Clones share the ring.
#[derive(Clone)]
pub struct SpanLog {
    spans: Arc<Mutex<VecDeque<SpanRecord>>>,
    max_spans: usize,
    clock: SharedClock,
}

impl fmt::Debug for SpanLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanLog")
            .field("spans", &self.len())
            .field("max_spans", &self.max_spans)
            .finish()
    }
}

impl SpanLog {
    pub fn new(max_spans: usize, clock: SharedClock) -> Self {
        Self {
            spans: Arc::new(Mutex::new(VecDeque::new())),
            max_spans,
            clock,
        }
    }

    /// Closed spans, oldest first.
    pub fn records(&self) -> Vec<SpanRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Closed spans with the given name, newest last.
    pub fn by_name(&self, name: &str) -> Vec<SpanRecord> {
        self.lock().iter().filter(|s| s.name == name).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn export(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.records())
    }

    pub(crate) fn export_value(&self) -> Value {
        serde_json::to_value(self.records()).unwrap_or_default()
    }

    fn push(&self, record: SpanRecord) {
        let mut spans = self.lock();
        spans.push_back(record);
        while spans.len() > self.max_spans {
            spans.pop_front();
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SpanRecord>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> Layer<S> for SpanLog
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !attrs.metadata().name().starts_with(SPAN_PREFIX) {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = BTreeMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(OpenSpan {
            started: Instant::now(),
            start_time: self.clock.now_millis(),
            fields,
        });
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(open) = extensions.get_mut::<OpenSpan>() {
            values.record(&mut FieldVisitor(&mut open.fields));
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(open) = span.extensions_mut().remove::<OpenSpan>() else {
            return;
        };
        let status = match open.fields.get("success") {
            Some(Value::Bool(true)) => SpanStatus::Ok,
            Some(Value::Bool(false)) => SpanStatus::Error,
            _ => SpanStatus::Unset,
        };
        self.push(SpanRecord {
            id: id.into_u64(),
            name: span.name().to_string(),
            parent_id: span.parent().map(|p| p.id().into_u64()),
            start_time: open.start_time,
            duration_ms: open.started.elapsed().as_millis() as u64,
            status,
            fields: open.fields,
        });
    }
}
