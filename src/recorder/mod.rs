//! Outcome recorder.
//!
//! Turns the result of one check into a hit or failure record, updates the
//! target's live status and fires the alert hooks.

mod notifier;

pub use notifier::*;

use crate::db::{Failure, Hit, Persistence, Target, TargetStatus};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Settings the recorder needs from the application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecorderConfig {
    /// Hour offset applied to `last_online`.
    pub timezone: f32,
    /// Whether alert hooks are called at all.
    pub notifications: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            timezone: 0.0,
            notifications: true,
        }
    }
}

impl RecorderConfig {
    /// Fixed offset for the configured timezone, UTC when out of range.
    pub fn offset(&self) -> FixedOffset {
        let seconds = (self.timezone * 3600.0).round() as i32;
        FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix())
    }
}

/// What a recorded check leaves behind once the status is updated.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Hit(Hit),
    Failure(Failure),
}

/// Applies check outcomes to targets.
///
/// Recording is split in two. `record_success`/`record_failure` only touch the
/// in-memory status and are meant to run under the status lock. `publish`
/// writes the record and fires the hooks after that lock is gone.
#[derive(Clone)]
pub struct Recorder {
    persistence: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
    config: RecorderConfig,
}

impl Recorder {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            persistence,
            notifier,
            config,
        }
    }

    /// Mark a successful check. `status` already holds the new measurements.
    #[must_use]
    pub fn record_success(&self, target: &Target, status: &mut TargetStatus) -> Record {
        let now = Utc::now();
        status.last_online = Some(now.with_timezone(&self.config.offset()));
        status.online = true;
        status.success_notified = true;
        status.failure_count = 0;
        status.down_since = None;
        status.down_text.clear();

        Record::Hit(Hit {
            target_id: target.id,
            latency: status.latency.as_secs_f64(),
            ping_time: status.ping_time.as_secs_f64(),
            created_at: now,
        })
    }

    /// Mark a failed check. `status` already holds whatever was measured.
    #[must_use]
    pub fn record_failure(&self, target: &Target, status: &mut TargetStatus, issue: &str) -> Record {
        let now = Utc::now();

        if status.down_since.is_none() {
            status.down_since = Some(now);
        }
        let since = status
            .last_online
            .map(|t| t.with_timezone(&Utc))
            .or(status.down_since)
            .unwrap_or(now);

        status.online = false;
        status.success_notified = false;
        status.down_text = downtime_text(&target.name, now, since);
        status.failure_count += 1;

        Record::Failure(Failure {
            target_id: target.id,
            issue: issue.to_string(),
            ping_time: status.ping_time.as_secs_f64(),
            error_code: status.last_status_code,
            created_at: now,
        })
    }

    /// Log, persist and notify. Storage and hooks run on a blocking thread.
    pub async fn publish(&self, target: &Target, record: Record) {
        match &record {
            Record::Hit(hit) => tracing::info!(
                target_id = target.id,
                latency_ms = hit.latency * 1000.0,
                dns_ms = hit.ping_time * 1000.0,
                "Service {} Successful Response: {:.2} ms | Lookup in: {:.2} ms",
                target.name,
                hit.latency * 1000.0,
                hit.ping_time * 1000.0
            ),
            Record::Failure(failure) => tracing::warn!(
                target_id = target.id,
                issue = %failure.issue,
                error_code = failure.error_code,
                "Service {} Failing: {} | Lookup in: {:.2} ms",
                target.name,
                failure.issue,
                failure.ping_time * 1000.0
            ),
        }

        let persistence = self.persistence.clone();
        let notifier = self.notifier.clone();
        let notifications = self.config.notifications;
        let owned = target.clone();

        let task = tokio::task::spawn_blocking(move || {
            store_and_notify(&*persistence, &*notifier, notifications, &owned, &record)
        });
        if let Err(e) = task.await {
            tracing::error!(target_id = target.id, "Recording {} failed: {}", target.name, e);
        }
    }
}

fn store_and_notify(
    persistence: &dyn Persistence,
    notifier: &dyn Notifier,
    notifications: bool,
    target: &Target,
    record: &Record,
) {
    match record {
        Record::Hit(hit) => {
            if let Err(e) = persistence.create_hit(hit) {
                tracing::error!(target_id = target.id, "Failed to store hit for {}: {}", target.name, e);
            }
            if notifications {
                if let Err(e) = notifier.on_success(target) {
                    tracing::error!(target_id = target.id, "Success hook for {} failed: {}", target.name, e);
                }
            }
        }
        Record::Failure(failure) => {
            if let Err(e) = persistence.create_failure(failure) {
                tracing::error!(
                    target_id = target.id,
                    "Failed to store failure for {}: {}",
                    target.name,
                    e
                );
            }
            if notifications {
                if let Err(e) = notifier.on_failure(target, failure) {
                    tracing::error!(target_id = target.id, "Failure hook for {} failed: {}", target.name, e);
                }
            }
        }
    }
}

/// `"{name} has been offline for {readable}"`.
pub fn downtime_text(name: &str, now: DateTime<Utc>, since: DateTime<Utc>) -> String {
    let offline = (now - since).to_std().unwrap_or_default();
    format!("{} has been offline for {}", name, duration_readable(offline))
}

/// Largest whole unit of a duration: hours, minutes, seconds or milliseconds.
pub fn duration_readable(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{} hours", secs / 3600)
    } else if secs >= 60 {
        format!("{} minutes", secs / 60)
    } else if secs >= 1 {
        format!("{} seconds", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        hits: Mutex<Vec<Hit>>,
        failures: Mutex<Vec<Failure>>,
        broken: bool,
    }

    impl Persistence for RecordingStore {
        fn create_hit(&self, hit: &Hit) -> Result<i64, DbError> {
            if self.broken {
                return Err(DbError::Poisoned);
            }
            let mut hits = self.hits.lock().unwrap();
            hits.push(hit.clone());
            Ok(hits.len() as i64)
        }

        fn create_failure(&self, failure: &Failure) -> Result<i64, DbError> {
            if self.broken {
                return Err(DbError::Poisoned);
            }
            let mut failures = self.failures.lock().unwrap();
            failures.push(failure.clone());
            Ok(failures.len() as i64)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        successes: Mutex<Vec<i64>>,
        failures: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn on_success(&self, target: &Target) -> Result<(), NotifyError> {
            self.successes.lock().unwrap().push(target.id);
            Ok(())
        }

        fn on_failure(&self, _target: &Target, failure: &Failure) -> Result<(), NotifyError> {
            self.failures.lock().unwrap().push(failure.issue.clone());
            Err(NotifyError::Dispatch("webhook unreachable".to_string()))
        }
    }

    fn setup(
        config: RecorderConfig,
    ) -> (Recorder, Arc<RecordingStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(RecordingStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let recorder = Recorder::new(store.clone(), notifier.clone(), config);
        (recorder, store, notifier)
    }

    fn api() -> Target {
        Target {
            id: 4,
            name: "api".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failure_count_increments_and_resets() {
        let (recorder, store, notifier) = setup(RecorderConfig::default());
        let target = api();
        let mut status = TargetStatus {
            last_status_code: 503,
            ..Default::default()
        };

        for _ in 0..2 {
            let record =
                recorder.record_failure(&target, &mut status, "HTTP Status Code 503 did not match 200");
            recorder.publish(&target, record).await;
        }
        assert_eq!(status.failure_count, 2);
        assert!(!status.online);
        assert!(!status.success_notified);
        assert!(status.down_text.starts_with("api has been offline for "));

        let failures = store.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].error_code, 503);
        assert_eq!(notifier.failures.lock().unwrap().len(), 2);

        status.latency = Duration::from_millis(42);
        let record = recorder.record_success(&target, &mut status);
        recorder.publish(&target, record).await;
        assert_eq!(status.failure_count, 0);
        assert!(status.online);
        assert!(status.success_notified);
        assert!(status.last_online.is_some());
        assert!(status.down_since.is_none());

        let hits = store.hits.lock().unwrap().clone();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].latency - 0.042).abs() < 1e-9);
        assert_eq!(*notifier.successes.lock().unwrap(), vec![4]);
    }

    #[test]
    fn test_status_transition_has_no_side_effects() {
        let (recorder, store, notifier) = setup(RecorderConfig::default());
        let target = api();
        let mut status = TargetStatus {
            last_status_code: 502,
            ..Default::default()
        };

        let record = recorder.record_failure(&target, &mut status, "Dial Error refused");
        match record {
            Record::Failure(failure) => {
                assert_eq!(failure.issue, "Dial Error refused");
                assert_eq!(failure.error_code, 502);
            }
            Record::Hit(_) => panic!("expected a failure record"),
        }
        assert_eq!(status.failure_count, 1);
        assert!(store.failures.lock().unwrap().is_empty());
        assert!(notifier.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_disabled_skips_hooks() {
        let (recorder, store, notifier) = setup(RecorderConfig {
            timezone: 0.0,
            notifications: false,
        });
        let target = api();
        let mut status = TargetStatus::default();

        let record = recorder.record_failure(&target, &mut status, "Dial Error refused");
        recorder.publish(&target, record).await;
        let record = recorder.record_success(&target, &mut status);
        recorder.publish(&target, record).await;

        assert_eq!(store.failures.lock().unwrap().len(), 1);
        assert_eq!(store.hits.lock().unwrap().len(), 1);
        assert!(notifier.failures.lock().unwrap().is_empty());
        assert!(notifier.successes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_errors_do_not_abort() {
        let store = Arc::new(RecordingStore {
            broken: true,
            ..Default::default()
        });
        let recorder = Recorder::new(store, Arc::new(LogNotifier), RecorderConfig::default());
        let target = api();
        let mut status = TargetStatus::default();

        let record = recorder.record_failure(&target, &mut status, "Dial Error refused");
        recorder.publish(&target, record).await;
        assert_eq!(status.failure_count, 1);
        let record = recorder.record_success(&target, &mut status);
        recorder.publish(&target, record).await;
        assert!(status.online);
    }

    #[test]
    fn test_downtime_measured_from_last_success() {
        let (recorder, _, _) = setup(RecorderConfig::default());
        let target = api();
        let two_hours_ago = Utc::now() - chrono::Duration::minutes(125);
        let mut status = TargetStatus {
            last_online: Some(two_hours_ago.fixed_offset()),
            ..Default::default()
        };

        let _ = recorder.record_failure(&target, &mut status, "Dial Error refused");
        assert_eq!(status.down_text, "api has been offline for 2 hours");
    }

    #[test]
    fn test_last_online_uses_timezone() {
        let (recorder, _, _) = setup(RecorderConfig {
            timezone: 5.5,
            notifications: true,
        });
        let mut status = TargetStatus::default();
        let _ = recorder.record_success(&api(), &mut status);

        let last_online = status.last_online.unwrap();
        assert_eq!(last_online.offset().local_minus_utc(), 5 * 3600 + 1800);
    }

    #[test]
    fn test_out_of_range_timezone_falls_back_to_utc() {
        let config = RecorderConfig {
            timezone: 30.0,
            notifications: true,
        };
        assert_eq!(config.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_duration_readable() {
        assert_eq!(duration_readable(Duration::from_millis(250)), "250ms");
        assert_eq!(duration_readable(Duration::from_secs(12)), "12 seconds");
        assert_eq!(duration_readable(Duration::from_secs(150)), "2 minutes");
        assert_eq!(duration_readable(Duration::from_secs(7300)), "2 hours");
    }

    #[test]
    fn test_downtime_text_never_negative() {
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(5);
        assert_eq!(downtime_text("db", now, later), "db has been offline for 0ms");
    }
}
