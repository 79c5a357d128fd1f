//! Database module for pulsewatch.
//!
//! Provides SQLite storage for targets, hits and failures.

mod models;
mod store;

pub use models::*;
pub use store::*;

/// Append-only sink for check records.
///
/// Implementations are called concurrently from every target's scheduler.
pub trait Persistence: Send + Sync {
    fn create_hit(&self, hit: &Hit) -> Result<i64, DbError>;
    fn create_failure(&self, failure: &Failure) -> Result<i64, DbError>;
}
