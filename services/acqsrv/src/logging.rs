//! Session logging and the driver log boundary
//!
//! Every session carries a `SessionLogger` that emits `tracing` events and
//! retains structured `DriverLogEntry` records in a bounded in-memory ring
//! for external observability/admin consumption. No error is swallowed
//! without a retrievable trace.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::runtime::session::SessionStatus;

/// Structured log record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverLogType {
    Init,
    Connect,
    Status,
    Poll,
    Decode,
    Write,
    Retry,
}

/// One structured driver log entry exposed on the status boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLogEntry {
    pub driver_id: String,
    pub log_type: DriverLogType,
    pub log_content: String,
    pub device_key: String,
    pub error_msg: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Bounded ring of driver log entries
#[derive(Debug)]
pub struct DriverLogRing {
    entries: Mutex<VecDeque<DriverLogEntry>>,
    capacity: usize,
}

impl DriverLogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, entry: DriverLogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Most recent entries, newest last
    pub fn recent(&self, count: usize) -> Vec<DriverLogEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(count)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries for one device key, newest last
    pub fn for_device(&self, device_key: &str) -> Vec<DriverLogEntry> {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.device_key == device_key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lightweight logger bound to one driver session
#[derive(Clone)]
pub struct SessionLogger {
    driver_id: String,
    device_key: String,
    ring: std::sync::Arc<DriverLogRing>,
}

impl SessionLogger {
    pub fn new(
        driver_id: impl Into<String>,
        device_key: impl Into<String>,
        ring: std::sync::Arc<DriverLogRing>,
    ) -> Self {
        Self {
            driver_id: driver_id.into(),
            device_key: device_key.into(),
            ring,
        }
    }

    fn record(&self, log_type: DriverLogType, content: String, error_msg: Option<String>) {
        self.ring.push(DriverLogEntry {
            driver_id: self.driver_id.clone(),
            log_type,
            log_content: content,
            device_key: self.device_key.clone(),
            error_msg,
            timestamp: Utc::now(),
        });
    }

    /// Log session initialization
    pub fn log_init(&self, message: &str) {
        info!(device = %self.device_key, driver = %self.driver_id, "{}", message);
        self.record(DriverLogType::Init, message.to_string(), None);
    }

    /// Log a connection attempt or result
    pub fn log_connect(&self, target: &str, detail: &str) {
        info!(device = %self.device_key, target, "{}", detail);
        self.record(
            DriverLogType::Connect,
            format!("{} - {}", target, detail),
            None,
        );
    }

    /// Log a session status transition
    pub fn log_status(&self, old: SessionStatus, new: SessionStatus, reason: &str) {
        info!(device = %self.device_key, "{} -> {} - {}", old, new, reason);
        self.record(
            DriverLogType::Status,
            format!("{} -> {} - {}", old, new, reason),
            None,
        );
    }

    /// Log a reconnect attempt
    pub fn log_retry(&self, attempt: u32, max_attempts: u32, delay_ms: u64, reason: &str) {
        warn!(
            device = %self.device_key,
            attempt, max_attempts, delay_ms, "reconnect: {}", reason
        );
        self.record(
            DriverLogType::Retry,
            format!("attempt {}/{}, delay {}ms", attempt, max_attempts, delay_ms),
            Some(reason.to_string()),
        );
    }

    /// Log a poll cycle outcome; failures also go to the service log
    pub fn log_poll_result(&self, points_emitted: usize, decode_errors: u32) {
        if decode_errors > 0 {
            warn!(
                device = %self.device_key,
                points_emitted, decode_errors, "poll cycle with decode errors"
            );
            self.record(
                DriverLogType::Poll,
                format!("ok={} err={}", points_emitted, decode_errors),
                None,
            );
        } else {
            debug!(device = %self.device_key, points_emitted, "poll cycle complete");
        }
    }

    /// Log one decode failure; local to a mapping, never aborts the cycle
    pub fn log_decode_error(&self, identifier: &str, error: &str) {
        warn!(device = %self.device_key, identifier, "decode failed: {}", error);
        self.record(
            DriverLogType::Decode,
            format!("identifier {}", identifier),
            Some(error.to_string()),
        );
    }

    /// Log a transport failure
    pub fn log_transport_error(&self, error: &str) {
        error!(device = %self.device_key, "transport failure: {}", error);
        self.record(
            DriverLogType::Connect,
            "transport failure".to_string(),
            Some(error.to_string()),
        );
    }

    /// Log a property write
    pub fn log_write(&self, identifier: &str, result: Result<(), &str>) {
        match result {
            Ok(()) => {
                info!(device = %self.device_key, identifier, "property written");
                self.record(DriverLogType::Write, format!("identifier {}", identifier), None);
            },
            Err(error) => {
                warn!(device = %self.device_key, identifier, "write failed: {}", error);
                self.record(
                    DriverLogType::Write,
                    format!("identifier {}", identifier),
                    Some(error.to_string()),
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ring_is_bounded() {
        let ring = Arc::new(DriverLogRing::new(3));
        let logger = SessionLogger::new("virtual", "meter-a", ring.clone());
        for i in 0..5 {
            logger.log_init(&format!("entry {}", i));
        }
        assert_eq!(ring.len(), 3);
        let recent = ring.recent(10);
        assert_eq!(recent.len(), 3);
        assert!(recent[2].log_content.contains("entry 4"));
    }

    #[test]
    fn test_for_device_filters() {
        let ring = Arc::new(DriverLogRing::new(10));
        SessionLogger::new("virtual", "meter-a", ring.clone()).log_init("a");
        SessionLogger::new("virtual", "meter-b", ring.clone()).log_init("b");

        let entries = ring.for_device("meter-a");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].device_key, "meter-a");
    }

    #[test]
    fn test_error_entries_carry_message() {
        let ring = Arc::new(DriverLogRing::new(10));
        let logger = SessionLogger::new("modbus_tcp", "meter-a", ring.clone());
        logger.log_decode_error("temp", "bit index 16 out of range");

        let entries = ring.recent(1);
        assert_eq!(entries[0].log_type, DriverLogType::Decode);
        assert!(entries[0].error_msg.as_deref().unwrap().contains("bit index"));
    }
}
