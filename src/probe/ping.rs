//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! The blocking echo runs in `spawn_blocking` for precise timing and reports
//! back over a oneshot channel, so every attempt produces exactly one result
//! no matter whether a reply arrives.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tokio::sync::oneshot;

use super::{is_ipv6, parse_host, CheckOutcome, ProbeError};
use crate::db::Target;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

/// Ping sequence counter for unique identification
static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged when ping_group_range allows it
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ICMP probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("ICMP probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Send one echo request to the target and wait for the reply.
pub async fn run_icmp_probe(target: &Target) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    let host = parse_host(target);

    let ip = match resolve_icmp_address(&host).await {
        Ok(ip) => ip,
        Err(e) => {
            return outcome.failed(format!("Could not send ICMP to service {}, {}", host, e))
        }
    };

    match ping(ip, target.timeout_duration()).await {
        Ok(rtt) => {
            outcome.latency = Some(rtt);
            outcome.response = Some(String::new());
            outcome
        }
        Err(e) => outcome.failed(format!("Issue running ICMP to service {}, {}", host, e)),
    }
}

/// Resolve the host in the family implied by its colon count.
async fn resolve_icmp_address(host: &str) -> Result<IpAddr, ProbeError> {
    let want_v6 = is_ipv6(host);
    let family_matches = |ip: &IpAddr| ip.is_ipv6() == want_v6;

    if let Ok(ip) = host.parse::<IpAddr>() {
        if family_matches(&ip) {
            return Ok(ip);
        }
    }

    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| ProbeError::Network(format!("lookup {}: {}", host, e)))?
        .map(|sa| sa.ip())
        .find(family_matches)
        .ok_or_else(|| {
            ProbeError::Network(format!(
                "no {} address found for {}",
                if want_v6 { "IPv6" } else { "IPv4" },
                host
            ))
        })
}

async fn ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(ip, timeout).await;
    }

    let (tx, rx) = oneshot::channel();
    tokio::task::spawn_blocking(move || {
        let _ = tx.send(run_blocking_ping(ip, timeout));
    });

    match await_reply(rx, timeout).await {
        Err(ProbeError::PermissionDenied(reason)) => {
            tracing::warn!(
                "Native ping to {} not permitted, falling back to command: {}",
                ip,
                reason
            );
            run_ping_command(ip, timeout).await
        }
        other => other,
    }
}

/// Wait for the echo worker's single result, at most `timeout`.
async fn await_reply(
    rx: oneshot::Receiver<Result<Duration, ProbeError>>,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ProbeError::Network(
            "ICMP worker exited without a result".to_string(),
        )),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Blocking ICMP echo with precise timing. Runs on a blocking thread.
fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    // Try RAW first (privileged), then DGRAM (unprivileged)
    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => (
            Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(io_error)?,
            false,
        ),
    };

    socket.set_read_timeout(Some(timeout)).map_err(io_error)?;
    socket.set_write_timeout(Some(timeout)).map_err(io_error)?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(io_error)?;

    let (identifier, sequence) = generate_ping_id();
    let packet = build_echo_request(ip.is_ipv6(), identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(io_error)?;

    let mut buf = [0u8; 1500];
    loop {
        let len = (&socket).read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => io_error(e),
        })?;
        let elapsed = start.elapsed();

        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // DGRAM sockets get their identifier rewritten by the kernel
        if is_echo_reply(&buf[..len], ip.is_ipv6(), identifier, sequence, raw) {
            return Ok(elapsed);
        }
    }
}

fn io_error(e: std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ProbeError::PermissionDenied(e.to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}

/// Whether `buf` is the reply to our echo request.
///
/// IPv4 RAW sockets deliver the IP header too; everything else starts at
/// the ICMP header.
fn is_echo_reply(buf: &[u8], v6: bool, identifier: u16, sequence: u16, check_id: bool) -> bool {
    let offset = if !v6 && buf.first().map(|b| b >> 4) == Some(4) {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };

    let expected_type = if v6 { ECHO_REPLY_V6 } else { ECHO_REPLY_V4 };
    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);

    icmp[0] == expected_type && reply_seq == sequence && (!check_id || reply_id == identifier)
}

/// Build an ICMP or ICMPv6 echo request with a timestamp payload.
fn build_echo_request(v6: bool, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64]; // 8 byte header + 56 byte payload

    packet[0] = if v6 { ECHO_REQUEST_V6 } else { ECHO_REQUEST_V4 };
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum
    if !v6 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run ping via command execution (fallback).
async fn run_ping_command(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);
    let family = if ip.is_ipv6() { "-6" } else { "-4" };

    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        Command::new("ping")
            .args([family, "-c", "1", "-W", &timeout_secs.to_string(), &ip.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout") || stdout.contains("100% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!(
            "ping failed: {}",
            format!("{} {}", stdout.trim(), stderr.trim()).trim()
        )));
    }

    parse_ping_output(&stdout)
}

/// Parse ping command output for the round-trip time.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    // Per-packet "time=X.XXX ms"
    static PER_PACKET: OnceLock<Option<Regex>> = OnceLock::new();
    // Summary "rtt min/avg/max/mdev = ..." (Linux) or "round-trip min/avg/max/stddev = ..." (BSD)
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();

    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").ok())
        .as_ref();
    let summary = SUMMARY
        .get_or_init(|| {
            Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<val>[0-9.]+)/")
                .ok()
        })
        .as_ref();

    [per_packet, summary]
        .into_iter()
        .flatten()
        .find_map(|re| {
            re.captures(output)?
                .name("val")?
                .as_str()
                .parse::<f64>()
                .ok()
        })
        .map(|ms| Duration::from_nanos((ms * 1_000_000.0).round() as u64))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
