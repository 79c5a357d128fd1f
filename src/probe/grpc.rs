//! gRPC health probe using the standard `grpc.health.v1.Health/Check` RPC.

use std::error::Error;
use std::time::Instant;

use tonic::transport::{ClientTlsConfig, Endpoint};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use super::{dial_address, lookup_latency, parse_host, CheckOutcome};
use crate::db::Target;

/// Response text a healthy server renders to.
pub const EXPECTED_GRPC_RESPONSE: &str = "status:SERVING";

/// gRPC targets always expect SERVING; the target's own expected body and
/// status are not consulted. The rendered response is derived from the
/// status, so checking the status covers the response text too.
const EXPECTED_GRPC_STATUS: ServingStatus = ServingStatus::Serving;

/// Ask the target's health service whether it is serving.
pub async fn run_grpc_probe(target: &Target) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();
    let host = parse_host(target);

    match lookup_latency(target).await {
        Ok(ping_time) => outcome.ping_time = Some(ping_time),
        Err(e) => return outcome.failed(e.to_string()),
    }

    let timeout = target.timeout_duration();
    let scheme = if target.verify_ssl { "https" } else { "http" };
    let uri = format!("{}://{}", scheme, dial_address(&host, target.port));

    let endpoint = match Endpoint::from_shared(uri) {
        Ok(endpoint) => endpoint.connect_timeout(timeout),
        Err(e) => return outcome.failed(format!("GRPC Error {}", error_chain(&e))),
    };

    // rustls only offers h2 via ALPN, which keeps TLS proxies on HTTP/2
    let endpoint = if target.verify_ssl {
        let tls = ClientTlsConfig::new()
            .with_webpki_roots()
            .domain_name(host.clone());
        match endpoint.tls_config(tls) {
            Ok(endpoint) => endpoint,
            Err(e) => return outcome.failed(format!("GRPC Error {}", error_chain(&e))),
        }
    } else {
        endpoint
    };

    let start = Instant::now();

    let channel = match tokio::time::timeout(timeout, endpoint.connect()).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => return outcome.failed(format!("GRPC Error {}", error_chain(&e))),
        Err(_) => {
            return outcome.failed(format!("GRPC Error context deadline exceeded after {:?}", timeout))
        }
    };

    let mut client = HealthClient::new(channel);
    let request = HealthCheckRequest {
        service: String::new(),
    };

    let response = match tokio::time::timeout(timeout, client.check(request)).await {
        Ok(Ok(response)) => response.into_inner(),
        Ok(Err(status)) => return outcome.failed(format!("GRPC Error {}", status)),
        Err(_) => {
            return outcome.failed(format!("GRPC Error context deadline exceeded after {:?}", timeout))
        }
    };

    let status_name = serving_status_name(response.status);
    outcome.latency = Some(start.elapsed());
    outcome.status_code = Some(response.status);
    outcome.response = Some(format!("status:{}", status_name));

    if response.status != EXPECTED_GRPC_STATUS as i32 {
        return outcome.failed(format!(
            "GRPC Service: '{}', Status Code: expected '{}', got '{}'",
            target.name,
            EXPECTED_GRPC_STATUS.as_str_name(),
            status_name
        ));
    }

    outcome
}

fn serving_status_name(status: i32) -> &'static str {
    ServingStatus::try_from(status)
        .map(|s| s.as_str_name())
        .unwrap_or("UNKNOWN")
}

/// Render an error with its sources; tonic's top-level messages are terse.
fn error_chain(e: &dyn Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProtocolKind;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_stream::wrappers::TcpListenerStream;

    async fn serve_health(status: tonic_health::ServingStatus) -> (u16, JoinHandle<()>) {
        let (mut reporter, service) = tonic_health::server::health_reporter();
        reporter.set_service_status("", status).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let _reporter = reporter;
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
                .unwrap();
        });

        (port, server)
    }

    fn grpc_target(address: &str, port: u16) -> Target {
        Target {
            id: 3,
            name: "health".to_string(),
            kind: ProtocolKind::Grpc,
            address: address.to_string(),
            port: Some(port),
            timeout: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_grpc_probe_serving() {
        let (port, server) = serve_health(tonic_health::ServingStatus::Serving).await;

        let outcome = run_grpc_probe(&grpc_target("127.0.0.1", port)).await;
        assert!(outcome.is_success(), "{:?}", outcome.issue);
        assert_eq!(outcome.response.as_deref(), Some(EXPECTED_GRPC_RESPONSE));
        assert_eq!(outcome.status_code, Some(ServingStatus::Serving as i32));
        assert!(outcome.latency.is_some());

        server.abort();
    }

    #[tokio::test]
    async fn test_grpc_probe_not_serving() {
        let (port, server) = serve_health(tonic_health::ServingStatus::NotServing).await;

        let outcome = run_grpc_probe(&grpc_target("127.0.0.1", port)).await;
        assert_eq!(
            outcome.issue.as_deref(),
            Some("GRPC Service: 'health', Status Code: expected 'SERVING', got 'NOT_SERVING'")
        );
        assert_eq!(outcome.response.as_deref(), Some("status:NOT_SERVING"));
        assert_eq!(outcome.status_code, Some(ServingStatus::NotServing as i32));

        server.abort();
    }

    #[tokio::test]
    async fn test_grpc_probe_ignores_configured_expectations() {
        let (port, server) = serve_health(tonic_health::ServingStatus::Serving).await;

        let target = Target {
            expected: Some("status:NOT_SERVING".to_string()),
            expected_status: 500,
            ..grpc_target("127.0.0.1", port)
        };
        let outcome = run_grpc_probe(&target).await;
        assert!(outcome.is_success(), "{:?}", outcome.issue);
        assert_eq!(outcome.response.as_deref(), Some(EXPECTED_GRPC_RESPONSE));

        server.abort();
    }

    #[tokio::test]
    async fn test_grpc_probe_strips_scheme() {
        let (port, server) = serve_health(tonic_health::ServingStatus::Serving).await;

        let outcome = run_grpc_probe(&grpc_target("http://127.0.0.1", port)).await;
        assert!(outcome.is_success(), "{:?}", outcome.issue);

        server.abort();
    }

    #[tokio::test]
    async fn test_grpc_probe_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = run_grpc_probe(&grpc_target("127.0.0.1", port)).await;
        let issue = outcome.issue.unwrap();
        assert!(issue.starts_with("GRPC Error"), "{}", issue);
        assert!(outcome.latency.is_none());
    }

    #[test]
    fn test_serving_status_name() {
        assert_eq!(serving_status_name(1), "SERVING");
        assert_eq!(serving_status_name(2), "NOT_SERVING");
        assert_eq!(serving_status_name(42), "UNKNOWN");
    }
}
