//! Run log sink.
//!
//! The orchestrator writes its stage and scene messages to an injected
//! [`LogSink`] instead of a process-wide logger. The CLI forwards them to
//! `tracing`; tests capture them with [`MemoryLogSink`].

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Append-only destination for run log records.
pub trait LogSink: Send + Sync {
    fn append(&self, record: LogRecord);

    fn info(&self, message: &str) {
        self.append(LogRecord::new(LogLevel::Info, message));
    }

    fn warn(&self, message: &str) {
        self.append(LogRecord::new(LogLevel::Warn, message));
    }

    fn error(&self, message: &str) {
        self.append(LogRecord::new(LogLevel::Error, message));
    }
}

/// Forwards records to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, record: LogRecord) {
        match record.level {
            LogLevel::Debug => tracing::debug!("{}", record.message),
            LogLevel::Info => tracing::info!("{}", record.message),
            LogLevel::Warn => tracing::warn!("{}", record.message),
            LogLevel::Error => tracing::error!("{}", record.message),
        }
    }
}

/// Keeps records in memory in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: LogRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Installs the `fmt` subscriber used by the binary. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
