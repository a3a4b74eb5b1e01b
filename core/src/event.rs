use crate::runtime::ValidationResult;
use crate::store::Variables;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Structured progress of a case execution, handed to an [`EventSink`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    CaseStarted {
        case: String,
    },
    Request {
        case: String,
        method: String,
        url: Option<String>,
        path: Option<String>,
        headers: BTreeMap<String, Value>,
        params: BTreeMap<String, Value>,
        body: Value,
    },
    Response {
        case: String,
        status: u16,
        url: String,
        elapsed_secs: f64,
        headers: BTreeMap<String, String>,
        body: Value,
    },
    Extraction {
        case: String,
        variables: Variables,
    },
    Validation {
        case: String,
        result: ValidationResult,
    },
    Teardown {
        case: String,
        action: String,
    },
    CaseFinished {
        case: String,
        success: bool,
        error: Option<String>,
    },
}

impl Event {
    pub fn case(&self) -> &str {
        match self {
            Event::CaseStarted { case }
            | Event::Request { case, .. }
            | Event::Response { case, .. }
            | Event::Extraction { case, .. }
            | Event::Validation { case, .. }
            | Event::Teardown { case, .. }
            | Event::CaseFinished { case, .. } => case,
        }
    }
}

pub trait EventSink {
    fn emit(&self, event: &Event);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: &Event) {
        (**self).emit(event);
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::CaseStarted { case } => tracing::info!(case = %case, "case started"),
            Event::Request {
                case,
                method,
                url,
                path,
                body,
                ..
            } => tracing::info!(
                case = %case,
                method = %method,
                url = url.as_deref().unwrap_or(""),
                path = path.as_deref().unwrap_or(""),
                body = %body,
                "sending request"
            ),
            Event::Response {
                case,
                status,
                elapsed_secs,
                body,
                ..
            } => tracing::info!(
                case = %case,
                status = *status,
                elapsed_secs = *elapsed_secs,
                body = %body,
                "received response"
            ),
            Event::Extraction { case, variables } => {
                let names: Vec<&str> = variables.keys().map(String::as_str).collect();
                tracing::info!(case = %case, variables = ?names, "variables extracted");
            }
            Event::Validation { case, result } if result.pass => tracing::info!(
                case = %case,
                field = %result.field,
                comparator = %result.comparator,
                "validation passed"
            ),
            Event::Validation { case, result } => tracing::error!(
                case = %case,
                field = %result.field,
                comparator = %result.comparator,
                expected = %result.expected,
                actual = ?result.actual,
                "validation failed"
            ),
            Event::Teardown { case, action } => {
                tracing::debug!(case = %case, action = %action, "teardown")
            }
            Event::CaseFinished {
                case,
                success: true,
                ..
            } => tracing::info!(case = %case, "case passed"),
            Event::CaseFinished { case, error, .. } => tracing::error!(
                case = %case,
                error = error.as_deref().unwrap_or("unknown"),
                "case failed"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Keeps every event in memory with an RFC 3339 timestamp.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.records().into_iter().map(|record| record.event).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        if let Ok(mut records) = self.records.lock() {
            records.push(EventRecord {
                timestamp,
                event: event.clone(),
            });
        }
    }
}

/// Forwards each event to every wrapped sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_timestamps_events() {
        let sink = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new().with(TracingSink).with(sink.clone());

        fanout.emit(&Event::CaseStarted {
            case: "a".into(),
        });
        fanout.emit(&Event::CaseFinished {
            case: "a".into(),
            success: true,
            error: None,
        });

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.event.case() == "a"));
        assert!(!records[0].timestamp.is_empty());

        let encoded = serde_json::to_value(&records[1]).expect("serialize");
        assert_eq!(encoded["event"], "case_finished");
        assert_eq!(encoded["success"], true);
    }
}
