//! Database model types.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Intervals at or above this value are microseconds, below it seconds.
pub const MICROSECOND_INTERVAL_THRESHOLD: u64 = 10_000;

/// Timeout used when a target is configured with `0`.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Protocol used to check a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Tcp,
    Udp,
    Icmp,
    Grpc,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Http => "http",
            ProtocolKind::Tcp => "tcp",
            ProtocolKind::Udp => "udp",
            ProtocolKind::Icmp => "icmp",
            ProtocolKind::Grpc => "grpc",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ProtocolKind::Http),
            "tcp" => Ok(ProtocolKind::Tcp),
            "udp" => Ok(ProtocolKind::Udp),
            "icmp" => Ok(ProtocolKind::Icmp),
            "grpc" => Ok(ProtocolKind::Grpc),
            other => Err(format!("unknown protocol kind: {}", other)),
        }
    }
}

/// A monitored service. Configuration only; live state is in [`TargetStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub kind: ProtocolKind,
    pub address: String,
    pub port: Option<u16>,
    /// HTTP method, empty means GET.
    pub method: String,
    pub post_data: Option<String>,
    /// Comma separated `Key=Value` pairs.
    pub headers: Option<String>,
    pub verify_ssl: bool,
    /// Regular expression the HTTP body must match.
    pub expected: Option<String>,
    pub expected_status: u16,
    /// Check interval, see [`Target::interval_duration`] for units.
    pub interval: u64,
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: ProtocolKind::Http,
            address: String::new(),
            port: None,
            method: "GET".to_string(),
            post_data: None,
            headers: None,
            verify_ssl: false,
            expected: None,
            expected_status: 200,
            interval: 60,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Target {
    /// Nominal period between two checks.
    ///
    /// Values of 10000 and above are read as microseconds, anything lower as
    /// seconds. Existing configuration files depend on this, so keep it.
    pub fn interval_duration(&self) -> Duration {
        if self.interval >= MICROSECOND_INTERVAL_THRESHOLD {
            Duration::from_micros(self.interval)
        } else if self.interval == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.interval)
        }
    }

    /// Bound for a single check attempt.
    pub fn timeout_duration(&self) -> Duration {
        if self.timeout == 0 {
            Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

/// Live status of a target, mutated by its scheduler after every check.
#[derive(Debug, Clone, Default)]
pub struct TargetStatus {
    pub online: bool,
    pub latency: Duration,
    /// Time spent resolving the target's host.
    pub ping_time: Duration,
    pub last_response: String,
    pub last_status_code: i32,
    pub failure_count: u32,
    /// Last success, in the configured timezone.
    pub last_online: Option<DateTime<FixedOffset>>,
    /// First failure of the current failure streak.
    pub down_since: Option<DateTime<Utc>>,
    pub down_text: String,
    pub success_notified: bool,
}

/// A successful check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub target_id: i64,
    /// Seconds.
    pub latency: f64,
    /// Seconds.
    pub ping_time: f64,
    pub created_at: DateTime<Utc>,
}

/// A failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub target_id: i64,
    pub issue: String,
    /// Seconds.
    pub ping_time: f64,
    pub error_code: i32,
    pub created_at: DateTime<Utc>,
}
