//! Dependency injection traits for ambient capabilities.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// The commit store stamps `committed_at` through this trait so tests can
/// use a fixed clock (`commitstream-testing`) while production uses the
/// system clock (`commitstream-runtime`).
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}
