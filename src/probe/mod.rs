//! Probe module for service checks.
//!
//! Supports HTTP, TCP/UDP socket, ICMP and gRPC health probes. Every probe
//! performs exactly one attempt and always yields a [`CheckOutcome`].

mod dns;
mod grpc;
mod http;
mod ping;
mod socket;

pub use dns::*;
pub use grpc::*;
pub use http::*;
pub use ping::*;
pub use socket::*;

use crate::db::{ProtocolKind, Target};

use std::time::Duration;
use thiserror::Error;

/// Probe error types. The `Display` text becomes the failure issue.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Could not get IP address for domain {host}, {reason}")]
    Resolve { host: String, reason: String },
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Result of a single probe attempt.
///
/// Measurement fields are `None` when the attempt never got far enough to
/// take them; the previous values on the target are then left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckOutcome {
    pub latency: Option<Duration>,
    pub ping_time: Option<Duration>,
    pub response: Option<String>,
    pub status_code: Option<i32>,
    /// Why the attempt failed, `None` on success.
    pub issue: Option<String>,
}

impl CheckOutcome {
    pub fn is_success(&self) -> bool {
        self.issue.is_none()
    }

    pub(crate) fn failed(mut self, issue: impl Into<String>) -> Self {
        self.issue = Some(issue.into());
        self
    }
}

/// One probe strategy per protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Http,
    Socket(Transport),
    Icmp,
    Grpc,
}

impl Probe {
    pub fn for_kind(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Http => Probe::Http,
            ProtocolKind::Tcp => Probe::Socket(Transport::Tcp),
            ProtocolKind::Udp => Probe::Socket(Transport::Udp),
            ProtocolKind::Icmp => Probe::Icmp,
            ProtocolKind::Grpc => Probe::Grpc,
        }
    }

    /// Run a single check attempt against the target.
    pub async fn attempt(&self, target: &Target) -> CheckOutcome {
        match self {
            Probe::Http => run_http_probe(target).await,
            Probe::Socket(transport) => run_socket_probe(target, *transport).await,
            Probe::Icmp => run_icmp_probe(target).await,
            Probe::Grpc => run_grpc_probe(target).await,
        }
    }
}

/// Addresses with two or more colons are IPv6 literals.
pub fn is_ipv6(address: &str) -> bool {
    address.matches(':').count() >= 2
}
