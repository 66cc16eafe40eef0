//! Typed error enums for the paths that callers need to match on.
//!
//! Operation-level failures that just need to propagate and be logged use
//! `anyhow::Result` at the call site instead.

use thiserror::Error;

/// Errors from a single day's upstream fetch. All variants collapse to an
/// empty-day result after retry exhaustion (see `fetcher::Fetcher`); they
/// are never propagated past the fetcher itself.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("anomalous response shape: {0}")]
    Anomaly(String),
}

/// Reasons a raw record is rejected by the categorizer. All variants are
/// "skip record, continue batch" per the error-handling table; they are
/// surfaced only as debug logs and rejection counters, never as a hard
/// failure of the batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CategorizeError {
    #[error("AttachmentName missing or not a .pdf")]
    MissingAttachment,
    #[error("news_id already seen in this watermark window")]
    DuplicateNewsId,
    #[error("SCRIP_CD {0:?} not present in the company reference set")]
    UnknownScrip(String),
    #[error("Tradedate {0:?} could not be parsed as DD/MM/YYYY HH:MM:SS")]
    BadTradedate(String),
}

/// Errors surfaced while dividing categorized announcements into reports.
#[derive(Debug, Error)]
pub enum DivideError {
    #[error("duplicate key (benign, counted as skip)")]
    DuplicateKey,
    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Fiscal-calendar mapping failures — only possible for an out-of-range
/// month, which should never occur for a `chrono::NaiveDateTime`-derived
/// month but is modeled explicitly rather than panicking.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FiscalError {
    #[error("month {0} is out of range 1..=12")]
    InvalidMonth(u32),
}

/// Supervisor-fatal errors. Unlike worker-side errors these are not
/// recoverable by a restart loop because the supervisor itself can't run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn worker child process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("failed to write heartbeat file: {0}")]
    HeartbeatWriteFailed(#[source] std::io::Error),
}
