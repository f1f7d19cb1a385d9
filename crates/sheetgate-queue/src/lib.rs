//! # SheetGate Queue
//!
//! Turns completed requests into usage-store increments off the request path.
//!
//! Features:
//! - Non-blocking `submit` into a bounded buffer
//! - Fixed pool of long-lived workers
//! - Per-write deadline, no retries
//! - Cooperative shutdown with a drain grace period

pub mod event;
pub mod recorder;

pub use event::UsageEvent;
pub use recorder::{RecorderConfig, RecorderError, SubmitOutcome, UsageRecorder};
