//! The bounded in-memory ring buffer backing `GET /scripts/:id/logs`
//! (§6.1, §9 resolved Open Question). Populated by the same rate limiter
//! that feeds `utils.log`/`console`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One adapter log record, with the fields emitted to the process log per
/// §4.2: `{script, script_type, level, message}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub script: String,
    pub script_type: String,
    pub level: LogLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

const MAX_MESSAGE_LEN: usize = 1000;

/// Truncates `message` to 1000 characters with a `"... (truncated)"` suffix,
/// per §4.2.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_MESSAGE_LEN).collect();
    truncated.push_str("... (truncated)");
    truncated
}

/// Fixed-capacity ring buffer of the most recent log records for one
/// adapter instance.
pub struct LogRingBuffer {
    capacity: usize,
    records: VecDeque<LogRecord>,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Most recent records first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.iter().rev().cloned().collect()
    }
}
