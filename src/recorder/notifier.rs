//! Alert hooks fired by the recorder.

use thiserror::Error;

use crate::db::{Failure, Target};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification dispatch failed: {0}")]
    Dispatch(String),
}

/// Receives success and failure events for a target.
///
/// Called from every target's scheduler concurrently. Calls must not block
/// for long; queue the work elsewhere if a back-end is slow.
pub trait Notifier: Send + Sync {
    fn on_success(&self, target: &Target) -> Result<(), NotifyError>;
    fn on_failure(&self, target: &Target, failure: &Failure) -> Result<(), NotifyError>;
}

/// Notifier that only writes a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn on_success(&self, target: &Target) -> Result<(), NotifyError> {
        tracing::debug!(target_id = target.id, "Notify: {} is online", target.name);
        Ok(())
    }

    fn on_failure(&self, target: &Target, failure: &Failure) -> Result<(), NotifyError> {
        tracing::info!(
            target_id = target.id,
            error_code = failure.error_code,
            "Notify: {} failed: {}",
            target.name,
            failure.issue
        );
        Ok(())
    }
}
