//! Time sources for expiration checks.
//!
//! Layout expiration and certificate validity are evaluated against a
//! [`TimeSource`] rather than the system clock directly, so verification can
//! be replayed at a known point in time.
//!
//! ```rust,ignore
//! use intoto::time::{FixedTimeSource, SystemTimeSource, TimeSource};
//!
//! let now = SystemTimeSource.now()?;
//! let fixed = FixedTimeSource::from_rfc3339("2024-01-01T00:00:00Z")?;
//! ```

use crate::error::InTotoError;
use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time source abstraction for pluggable clocks.
///
/// # Implementors
///
/// - [`SystemTimeSource`]: Uses `std::time::SystemTime` (default)
/// - [`FixedTimeSource`]: Returns a fixed timestamp (for testing and replay)
pub trait TimeSource: Send + Sync {
    /// Get the current time from this source.
    fn now(&self) -> Result<SystemTime, InTotoError>;

    /// Current time as a UTC date.
    fn now_utc(&self) -> Result<DateTime<Utc>, InTotoError> {
        Ok(DateTime::<Utc>::from(self.now()?))
    }
}

/// System time source using `std::time::SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Result<SystemTime, InTotoError> {
        Ok(SystemTime::now())
    }
}

/// Fixed time source
///
/// Returns a predetermined timestamp, useful for:
/// - Unit testing with reproducible time
/// - Replaying verification at a known point in time
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    timestamp: SystemTime,
}

impl FixedTimeSource {
    /// Create from a Unix timestamp (seconds since 1970-01-01 00:00:00 UTC).
    pub fn from_unix_secs(secs: u64) -> Self {
        Self {
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    /// Create from an RFC 3339 date such as `2024-01-01T00:00:00Z`.
    pub fn from_rfc3339(date: &str) -> Result<Self, InTotoError> {
        let parsed = DateTime::parse_from_rfc3339(date)
            .map_err(|e| InTotoError::TimeError(format!("Invalid date '{}': {}", date, e)))?;
        Ok(Self {
            timestamp: SystemTime::from(parsed.with_timezone(&Utc)),
        })
    }

    /// Get the fixed timestamp.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Result<SystemTime, InTotoError> {
        Ok(self.timestamp)
    }
}
