//! Togglable synthetic health status
//!
//! The status starts unset (reported as `200`) and is replaced by every
//! accepted `POST /health`. Readers and writers share one mutex, so a read
//! always observes either the default or the last committed write.

use parking_lot::Mutex;
use std::ops::Range;
use thiserror::Error;

/// Status reported before any write
pub const DEFAULT_STATUS: u16 = 200;

/// Accepted status codes, inclusive-exclusive
pub const VALID_STATUS_RANGE: Range<i64> = 100..600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("statusCode must be >= 100 and < 600, got {0}")]
    OutOfRange(i64),
}

/// Shared health status code
#[derive(Debug, Default)]
pub struct HealthState {
    status: Mutex<Option<u16>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status code, or [`DEFAULT_STATUS`] if never set
    pub fn read(&self) -> u16 {
        let status = *self.status.lock();
        status.unwrap_or(DEFAULT_STATUS)
    }

    /// Replace the status code
    ///
    /// Out-of-range codes are rejected without touching the lock.
    pub fn write(&self, code: i64) -> Result<(), HealthError> {
        if !VALID_STATUS_RANGE.contains(&code) {
            return Err(HealthError::OutOfRange(code));
        }
        *self.status.lock() = Some(code as u16);
        Ok(())
    }
}
