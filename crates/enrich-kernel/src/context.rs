//! Per-invocation callback context.
//!
//! What the host knows about the event that fired a callback: the
//! triggering `(id, property, value)`, the session token, and an optional
//! log sink that the log transform installs.

use crate::identifier::ComponentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// The property change that fired the callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triggered {
    pub id: ComponentId,
    pub property: String,
    #[serde(default)]
    pub value: Value,
}

impl Triggered {
    pub fn new(id: impl Into<ComponentId>, property: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            property: property.into(),
            value,
        }
    }

    /// The host's `"{id}.{property}"` key.
    pub fn prop_id(&self) -> String {
        format!("{}.{}", self.id, self.property)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

/// Collects user-facing log records for one invocation.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => tracing::info!(target: "enrich::log", "{message}"),
            LogLevel::Warning => tracing::warn!(target: "enrich::log", "{message}"),
            LogLevel::Error => tracing::error!(target: "enrich::log", "{message}"),
        }
        let mut records = self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(LogRecord { level, message });
    }

    /// Drain collected records.
    pub fn take(&self) -> Vec<LogRecord> {
        let mut records = self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *records)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CallbackContext {
    /// `None` when the host fired without a trigger (e.g. the initial call).
    pub triggered: Option<Triggered>,
    pub session_id: Option<String>,
    pub log: Option<LogSink>,
}

impl CallbackContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggered_by(triggered: Triggered) -> Self {
        Self {
            triggered: Some(triggered),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_log(mut self, sink: LogSink) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn triggered_id(&self) -> Option<&ComponentId> {
        self.triggered.as_ref().map(|t| &t.id)
    }

    /// Records are dropped when no sink is installed.
    pub fn log_info(&self, message: impl Into<String>) {
        self.log_at(LogLevel::Info, message);
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.log_at(LogLevel::Warning, message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log_at(LogLevel::Error, message);
    }

    fn log_at(&self, level: LogLevel, message: impl Into<String>) {
        if let Some(sink) = &self.log {
            sink.push(level, message);
        }
    }
}
