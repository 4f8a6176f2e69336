//! Alert sinks: tracing-backed for services, recording for tests.

use job_types::AlertSink;
use std::sync::Mutex;

/// Logs every alert at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn show_error(&self, title: &str, message: &str) {
        tracing::error!(alert = %title, "{}", message);
    }
}

/// One alert as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

/// Keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => e.into_inner().clone(),
        }
    }
}

impl AlertSink for RecordingAlertSink {
    fn show_error(&self, title: &str, message: &str) {
        let alert = Alert {
            title: title.to_string(),
            message: message.to_string(),
        };
        match self.alerts.lock() {
            Ok(mut guard) => guard.push(alert),
            Err(e) => e.into_inner().push(alert),
        }
    }
}
