//! Structured exception reports and their append-only in-memory store.
//!
//! Every classified error that renders also produces an [`ExceptionReport`]:
//! a flat record of the exception, the trace/request correlation ids, the
//! build and host identity, the acting user, and a structured context blob.
//! Records are written once and never mutated.
//!
//! [`ReportLog`] is a fixed-capacity ring-buffer: once full, the oldest
//! report is evicted to make room for the newest, keeping a bounded memory
//! footprint regardless of error volume. Recording is best-effort and
//! non-blocking — it returns a [`RecordError`] that callers deliberately
//! ignore, because reporting must never cause a secondary failure on the
//! request path.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One persisted exception record. Field set mirrors what an on-call
/// engineer needs to go from a user-reported error id to a diagnosis.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionReport {
    pub created_at: DateTime<Utc>,

    pub exception_class: String,
    /// Raw internal message.
    pub message: String,
    /// Fixed message the user saw.
    pub user_message: String,
    pub file: String,
    pub line: u32,
    pub code: i64,
    pub status_code: u16,
    /// The id shown to the user on the error page.
    pub error_id: Uuid,

    /// Session-stable trace id, for cross-request correlation.
    pub correlation_id: Option<Uuid>,
    pub request_id: Option<Uuid>,

    pub app_version: String,
    pub app_commit: Option<String>,
    pub app_build_date: Option<String>,
    pub app_role: String,

    pub host_name: String,
    pub host_ip: String,

    /// Acting user, redacted to the id here; name/email live only inside the
    /// context blob.
    pub user_id: Option<u64>,

    pub is_retryable: bool,
    pub stack_trace: String,

    /// Structured context: request method/uri/ip/user_agent/full_url plus the
    /// redacted user block.
    pub context: serde_json::Value,

    // Mirror fields for the wrapped cause, when one exists.
    pub previous_exception_class: Option<String>,
    pub previous_message: Option<String>,
    pub previous_code: Option<i64>,
    pub previous_stack_trace: Option<String>,
}

/// Why a report was not recorded. Callers on the request path ignore this by
/// contract; tests assert on it.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The log mutex was contended; blocking the request path is worse than
    /// losing one report.
    #[error("report log contended, record dropped")]
    Contended,
    /// The store was closed for fault-injection in tests.
    #[error("report log closed")]
    Closed,
}

/// Fixed-capacity, append-only store of [`ExceptionReport`]s.
///
/// Safe to share across threads via `Arc<ReportLog>`. [`record`][Self::record]
/// uses a non-blocking `try_lock` so it never delays error rendering.
pub struct ReportLog {
    capacity: usize,
    reports: Mutex<VecDeque<ExceptionReport>>,
    /// Fault-injection switch: when set, every record attempt fails. Lets
    /// tests prove that reporting failures never surface to the client.
    fail_writes: std::sync::atomic::AtomicBool,
}

impl ReportLog {
    /// Create a new log retaining at most `capacity` reports.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            reports: Mutex::new(VecDeque::with_capacity(capacity)),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Append a report.
    ///
    /// Best-effort and non-blocking: lock contention drops the report rather
    /// than stalling the request. Call sites ignore the result by contract.
    pub fn record(&self, report: ExceptionReport) -> Result<(), RecordError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(RecordError::Closed);
        }
        let mut reports = self.reports.try_lock().map_err(|_| RecordError::Contended)?;
        if reports.len() == self.capacity {
            reports.pop_front();
        }
        reports.push_back(report);
        Ok(())
    }

    /// Make every subsequent [`record`][Self::record] fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::Relaxed);
    }

    /// Up to `limit` recent reports, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<ExceptionReport> {
        let reports = self.reports.lock().await;
        reports.iter().rev().take(limit).cloned().collect()
    }

    /// Aggregate counts over the buffered window.
    pub async fn stats(&self) -> ReportStats {
        let reports = self.reports.lock().await;
        let mut by_status: std::collections::HashMap<u16, usize> =
            std::collections::HashMap::new();
        let mut retryable = 0;
        for report in reports.iter() {
            *by_status.entry(report.status_code).or_default() += 1;
            if report.is_retryable {
                retryable += 1;
            }
        }
        ReportStats {
            total: reports.len(),
            retryable,
            by_status,
        }
    }
}

/// Aggregate statistics over the buffered reports.
#[derive(Debug, Serialize)]
pub struct ReportStats {
    pub total: usize,
    pub retryable: usize,
    pub by_status: std::collections::HashMap<u16, usize>,
}
