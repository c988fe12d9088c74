//! Operational event reporting.
//!
//! The cache never fails a public operation because of an error; it
//! reports it. Reports go to zero or more pluggable [`ReportSink`]s supplied
//! by the host (an APM agent, a file, `tracing`). Delivery is best-effort:
//! sinks must not block, and a panicking sink is contained.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::CacheSettings;
use crate::error::BgCacheError;

/// Value substituted for any missing or empty label.
pub const SENTINEL: &str = "none";

/// A sink that receives reporting events.
pub trait ReportSink: Send + Sync {
    /// Called for every error the cache swallows.
    fn report_error(&self, event: &ReportEvent);

    /// Called for accepted-but-suspicious observations.
    fn report_anomaly(&self, event: &ReportEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Error,
    Anomaly,
}

/// Deployment labels attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    pub environment: String,
    pub region: String,
    pub service_name: String,
}

impl Default for Labels {
    fn default() -> Self {
        Self {
            environment: SENTINEL.to_string(),
            region: SENTINEL.to_string(),
            service_name: SENTINEL.to_string(),
        }
    }
}

/// One reported event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEvent {
    pub kind: EventKind,
    /// Error category (an `ErrorKind` name) or anomaly name.
    pub name: String,
    pub message: String,
    pub attributes: BTreeMap<String, String>,
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
}

/// Reporting configuration handed to the cache at init.
#[derive(Clone, Default)]
pub struct ReportingConfig {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub service_name: Option<String>,
    pub sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReportingConfig {
    /// Labels from settings, no sinks.
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            environment: Some(settings.environment.clone()),
            region: Some(settings.region.clone()),
            service_name: Some(settings.service_name.clone()),
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Labels with the sentinel applied to missing or empty values.
    pub fn labels(&self) -> Labels {
        fn label(value: &Option<String>) -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => SENTINEL.to_string(),
            }
        }
        Labels {
            environment: label(&self.environment),
            region: label(&self.region),
            service_name: label(&self.service_name),
        }
    }
}

impl std::fmt::Debug for ReportingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingConfig")
            .field("labels", &self.labels())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Fans events out to the configured sinks.
#[derive(Clone, Default)]
pub struct Reporter {
    labels: Labels,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl Reporter {
    pub fn new(config: &ReportingConfig) -> Self {
        Self {
            labels: config.labels(),
            sinks: config.sinks.clone(),
        }
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Report a swallowed error with optional detail attributes.
    pub fn error(&self, err: &BgCacheError, details: &[(&str, &str)]) {
        if self.sinks.is_empty() {
            return;
        }
        let event = self.event(EventKind::Error, err.kind().as_str(), err.to_string(), details);
        self.dispatch(&event, |sink, event| sink.report_error(event));
    }

    /// Report an anomaly.
    pub fn anomaly(&self, name: &str, attributes: &[(&str, &str)]) {
        if self.sinks.is_empty() {
            return;
        }
        let event = self.event(EventKind::Anomaly, name, String::new(), attributes);
        self.dispatch(&event, |sink, event| sink.report_anomaly(event));
    }

    fn event(
        &self,
        kind: EventKind,
        name: &str,
        message: String,
        attributes: &[(&str, &str)],
    ) -> ReportEvent {
        ReportEvent {
            kind,
            name: name.to_string(),
            message,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            labels: self.labels.clone(),
            timestamp: Utc::now(),
        }
    }

    fn dispatch(&self, event: &ReportEvent, deliver: impl Fn(&dyn ReportSink, &ReportEvent)) {
        for sink in &self.sinks {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(sink.as_ref(), event)));
            if outcome.is_err() {
                error!(event = %event.name, "report sink panicked");
            }
        }
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("labels", &self.labels)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReportSink;

impl ReportSink for TracingReportSink {
    fn report_error(&self, event: &ReportEvent) {
        error!(
            category = %event.name,
            environment = %event.labels.environment,
            region = %event.labels.region,
            service = %event.labels.service_name,
            attributes = ?event.attributes,
            "{}",
            event.message
        );
    }

    fn report_anomaly(&self, event: &ReportEvent) {
        warn!(
            anomaly = %event.name,
            environment = %event.labels.environment,
            region = %event.labels.region,
            service = %event.labels.service_name,
            attributes = ?event.attributes,
            "anomaly observed"
        );
    }
}

/// Writes events as JSON lines (one per event) to a file.
///
/// Creates the file if it doesn't exist; appends if it does. Reporting only
/// queues the line; a dedicated writer thread does the file I/O. Dropping
/// the sink drains the queue and joins the writer.
pub struct FileReportSink {
    queue: Mutex<Option<mpsc::Sender<String>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl FileReportSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (queue, lines) = mpsc::channel::<String>();
        let writer = thread::Builder::new()
            .name("bgcache-report-file".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                for line in lines {
                    if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                        warn!("report file write failed");
                    }
                }
            })?;
        Ok(Self {
            queue: Mutex::new(Some(queue)),
            writer: Mutex::new(Some(writer)),
        })
    }

    fn write(&self, event: &ReportEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Some(queue) = self.queue.lock().as_ref() {
            let _ = queue.send(line);
        }
    }
}

impl Drop for FileReportSink {
    fn drop(&mut self) {
        self.queue.lock().take();
        if let Some(writer) = self.writer.lock().take() {
            let _ = writer.join();
        }
    }
}

impl ReportSink for FileReportSink {
    fn report_error(&self, event: &ReportEvent) {
        self.write(event);
    }

    fn report_anomaly(&self, event: &ReportEvent) {
        self.write(event);
    }
}
