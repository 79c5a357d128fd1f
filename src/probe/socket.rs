//! TCP and UDP socket probes.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::{is_ipv6, lookup_latency, CheckOutcome};
use crate::db::Target;

/// Socket protocol used by a socket probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn close(self) -> io::Result<()> {
        match self {
            Connection::Tcp(mut stream) => stream.shutdown().await,
            Connection::Udp(socket) => {
                drop(socket);
                Ok(())
            }
        }
    }
}

/// Address to dial: the bare host without a port, otherwise `host:port`
/// with IPv6 literals bracketed.
pub fn dial_address(address: &str, port: Option<u16>) -> String {
    match port {
        None | Some(0) => address.to_string(),
        Some(port) if is_ipv6(address) => format!("[{}]:{}", address, port),
        Some(port) => format!("{}:{}", address, port),
    }
}

/// Open and immediately close a connection to the target.
pub async fn run_socket_probe(target: &Target, transport: Transport) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();

    match lookup_latency(target).await {
        Ok(ping_time) => outcome.ping_time = Some(ping_time),
        Err(e) => return outcome.failed(e.to_string()),
    }

    let addr = dial_address(&target.address, target.port);
    let timeout = target.timeout_duration();
    let start = Instant::now();

    let conn = match tokio::time::timeout(timeout, dial(transport, &addr)).await {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return outcome.failed(format!("Dial Error {}", e)),
        Err(_) => {
            return outcome.failed(format!(
                "Dial Error dial {} {}: i/o timeout after {:?}",
                transport, addr, timeout
            ))
        }
    };

    if let Err(e) = conn.close().await {
        return outcome.failed(format!(
            "{} Socket Close Error {}",
            transport.to_string().to_uppercase(),
            e
        ));
    }

    outcome.latency = Some(start.elapsed());
    outcome.response = Some(String::new());
    outcome
}

async fn dial(transport: Transport, addr: &str) -> io::Result<Connection> {
    match transport {
        Transport::Tcp => Ok(Connection::Tcp(TcpStream::connect(addr).await?)),
        Transport::Udp => {
            let remote = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no addresses for {}", addr),
                )
            })?;
            let local: SocketAddr = if remote.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(local).await?;
            socket.connect(remote).await?;
            Ok(Connection::Udp(socket))
        }
    }
}
