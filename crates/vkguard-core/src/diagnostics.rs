//! Diagnostic delivery: the logging-sink seam and the reporter that
//! filters messages before they reach it.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::MessageSettings;
use crate::location::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Performance,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Performance => "performance",
            Severity::Info => "info",
        })
    }
}

/// Receives every message that survives filtering. Presentation is
/// entirely the sink's business.
pub trait LogSink: Send + Sync {
    fn emit(&self, severity: Severity, vuid: &str, objects: &[u64], location: &Location<'_>, message: &str);
}

/// Default sink: one `tracing` event per message.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, severity: Severity, vuid: &str, objects: &[u64], location: &Location<'_>, message: &str) {
        let location = location.to_string();
        match severity {
            Severity::Error => error!(vuid, %location, ?objects, "{}", message),
            Severity::Warning | Severity::Performance => {
                warn!(vuid, %location, ?objects, %severity, "{}", message)
            }
            Severity::Info => info!(vuid, %location, ?objects, "{}", message),
        }
    }
}

/// A message captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMessage {
    pub severity: Severity,
    pub vuid: String,
    pub objects: Vec<u64>,
    pub location: String,
    pub message: String,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<RecordedMessage>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.messages.lock().clone()
    }

    pub fn count(&self, vuid: &str) -> usize {
        self.messages.lock().iter().filter(|m| m.vuid == vuid).count()
    }

    pub fn has(&self, vuid: &str) -> bool {
        self.count(vuid) > 0
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl LogSink for MemorySink {
    fn emit(&self, severity: Severity, vuid: &str, objects: &[u64], location: &Location<'_>, message: &str) {
        self.messages.lock().push(RecordedMessage {
            severity,
            vuid: vuid.to_string(),
            objects: objects.to_vec(),
            location: location.to_string(),
            message: message.to_string(),
        });
    }
}

/// Filters messages (mute list, severity switches, duplicate limit) and
/// hands the survivors to the sink.
///
/// Every `log_*` method returns the skip verdict for its severity, so a
/// validate routine can accumulate `skip |= reporter.log_error(..)`.
pub struct Reporter {
    sink: Arc<dyn LogSink>,
    settings: MessageSettings,
    muted: HashSet<String>,
    counts: DashMap<String, u32>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn LogSink>, settings: &MessageSettings) -> Self {
        Self {
            sink,
            muted: settings.mute.iter().cloned().collect(),
            settings: settings.clone(),
            counts: DashMap::new(),
        }
    }

    /// Reporter writing to `tracing` with default filters.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingSink), &MessageSettings::default())
    }

    pub fn log_error(
        &self,
        vuid: &str,
        objects: &[u64],
        location: &Location<'_>,
        message: impl fmt::Display,
    ) -> bool {
        self.emit(Severity::Error, vuid, objects, location, message);
        true
    }

    pub fn log_warning(
        &self,
        vuid: &str,
        objects: &[u64],
        location: &Location<'_>,
        message: impl fmt::Display,
    ) -> bool {
        if self.settings.report_warnings {
            self.emit(Severity::Warning, vuid, objects, location, message);
        }
        false
    }

    pub fn log_performance(
        &self,
        vuid: &str,
        objects: &[u64],
        location: &Location<'_>,
        message: impl fmt::Display,
    ) -> bool {
        if self.settings.report_performance {
            self.emit(Severity::Performance, vuid, objects, location, message);
        }
        false
    }

    pub fn log_info(
        &self,
        vuid: &str,
        objects: &[u64],
        location: &Location<'_>,
        message: impl fmt::Display,
    ) -> bool {
        if self.settings.report_info {
            self.emit(Severity::Info, vuid, objects, location, message);
        }
        false
    }

    fn emit(
        &self,
        severity: Severity,
        vuid: &str,
        objects: &[u64],
        location: &Location<'_>,
        message: impl fmt::Display,
    ) {
        if self.muted.contains(vuid) {
            return;
        }
        let limit = self.settings.duplicate_limit;
        if limit > 0 {
            let mut count = self.counts.entry(vuid.to_string()).or_insert(0);
            if *count >= limit {
                return;
            }
            *count += 1;
        }
        self.sink
            .emit(severity, vuid, objects, location, &message.to_string());
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
