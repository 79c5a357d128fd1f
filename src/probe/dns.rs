//! DNS timing for probes that talk to a hostname.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use url::Url;

use super::ProbeError;
use crate::db::{ProtocolKind, Target};

/// How the host is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Always ask the resolver, even for literals.
    Host,
    /// IP literals are taken as-is.
    Ip,
}

impl Lookup {
    pub fn for_kind(kind: ProtocolKind) -> Self {
        match kind {
            ProtocolKind::Tcp => Lookup::Host,
            _ => Lookup::Ip,
        }
    }
}

/// Bare host of a target's address.
///
/// Socket targets store the host directly. gRPC targets may carry a scheme
/// (`https://api.internal`), which is dropped. HTTP and ICMP addresses may be
/// URLs, in which case the URL host is used without port or brackets.
pub fn parse_host(target: &Target) -> String {
    match target.kind {
        ProtocolKind::Tcp | ProtocolKind::Udp => target.address.clone(),
        ProtocolKind::Grpc if !target.address.contains("://") => target.address.clone(),
        ProtocolKind::Grpc | ProtocolKind::Http | ProtocolKind::Icmp => {
            match Url::parse(&target.address) {
                Ok(url) => match url.host_str() {
                    Some(host) => host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    None => target.address.clone(),
                },
                Err(e) => {
                    if target.kind == ProtocolKind::Grpc {
                        tracing::warn!(
                            "GRPC Service: '{}', Unable to parse URL '{}': {}",
                            target.name,
                            target.address,
                            e
                        );
                    }
                    target.address.clone()
                }
            }
        }
    }
}

/// Resolve the target's host and return how long it took.
pub async fn lookup_latency(target: &Target) -> Result<Duration, ProbeError> {
    let host = parse_host(target);
    let start = Instant::now();
    resolve(&host, Lookup::for_kind(target.kind)).await?;
    Ok(start.elapsed())
}

/// Resolve `host` to its addresses.
pub async fn resolve(host: &str, lookup: Lookup) -> Result<Vec<IpAddr>, ProbeError> {
    if lookup == Lookup::Ip {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
    }

    let resolve_err = |reason: String| ProbeError::Resolve {
        host: host.to_string(),
        reason,
    };

    if host.is_empty() {
        return Err(resolve_err("empty host".to_string()));
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| resolve_err(e.to_string()))?
        .map(|sa| sa.ip())
        .collect();

    if addrs.is_empty() {
        return Err(resolve_err("no addresses found".to_string()));
    }

    Ok(addrs)
}
