//! Access decision journal: local CSV logs plus the optional remote mirror.

pub mod csv_log;
pub mod remote;

use chrono::{DateTime, Local};
use tracing::{error, info};

use crate::common::error::Result;
use crate::common::paths::DataLayout;

pub use csv_log::CsvLog;
pub use remote::{HttpSink, RemoteDocument, RemoteMirror, RemoteSink};

pub const MEASUREMENT_HEADER: &[&str] = &["datetime", "employee_name", "employee_id", "promille", "fallback_pin"];
pub const EVENT_HEADER: &[&str] = &["datetime", "event", "employee_name", "employee_id"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessResult {
    Pass,
    Deny,
}

impl AccessResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessResult::Pass => "pass",
            AccessResult::Deny => "deny",
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            AccessResult::Pass => "gate_open",
            AccessResult::Deny => "deny_access",
        }
    }
}

/// How the identity behind a decision was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationSource {
    Face,
    Pin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub employee_id: String,
    pub employee_name: String,
    pub employee_pin: String,
    pub promille: f64,
    pub decision: AccessResult,
    pub verification_source: VerificationSource,
    pub fallback_pin: bool,
}

impl LogEntry {
    fn datetime(&self) -> String {
        self.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
    }

    pub fn measurement_row(&self) -> Vec<String> {
        vec![
            self.datetime(),
            self.employee_name.clone(),
            self.employee_id.clone(),
            format!("{:.3}", self.promille),
            if self.fallback_pin { "1" } else { "0" }.to_string(),
        ]
    }

    pub fn event_row(&self) -> Vec<String> {
        vec![
            self.datetime(),
            self.decision.event_name().to_string(),
            self.employee_name.clone(),
            self.employee_id.clone(),
        ]
    }

    pub fn remote_document(&self) -> RemoteDocument {
        RemoteDocument {
            datetime: self.datetime(),
            employee_id: self.employee_id.clone(),
            employee_name: self.employee_name.clone(),
            employee_pin: self.employee_pin.clone(),
            promille: (self.promille * 1000.0).round() / 1000.0,
            result: self.decision.as_str().to_string(),
            fallback_pin: self.fallback_pin,
        }
    }
}

pub struct EventLogger {
    measurements: CsvLog,
    events: CsvLog,
    remote: Option<RemoteMirror>,
}

impl EventLogger {
    pub fn new(layout: &DataLayout, remote: Option<RemoteMirror>) -> Self {
        Self {
            measurements: CsvLog::new(layout.measurement_log(), MEASUREMENT_HEADER),
            events: CsvLog::new(layout.event_log(), EVENT_HEADER),
            remote,
        }
    }

    /// Writes both local rows synchronously, then queues the remote copy.
    /// Each local write is attempted even if the other fails.
    pub fn record(&self, entry: &LogEntry) -> Result<()> {
        let event = self.events.append(&entry.event_row());
        let measurement = self.measurements.append(&entry.measurement_row());
        if let Err(e) = &event {
            error!(error = %e, "event_log_write_failed");
        }
        if let Err(e) = &measurement {
            error!(error = %e, "measurement_log_write_failed");
        }

        if let Some(remote) = &self.remote {
            remote.submit(entry.remote_document());
        }

        info!(
            employee_id = %entry.employee_id,
            promille = entry.promille,
            result = entry.decision.as_str(),
            source = ?entry.verification_source,
            fallback_pin = entry.fallback_pin,
            "access_logged"
        );
        event.and(measurement)
    }

    pub fn remote_tripped(&self) -> bool {
        self.remote.as_ref().map_or(false, RemoteMirror::is_tripped)
    }

    /// Flushes the remote queue.
    pub fn shutdown(&mut self) {
        if let Some(remote) = self.remote.as_mut() {
            remote.shutdown();
        }
    }
}
