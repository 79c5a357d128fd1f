//! HTTP probe implementation.

use std::time::Instant;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;

use super::{lookup_latency, CheckOutcome};
use crate::db::Target;

/// Run an HTTP probe against the target's URL.
pub async fn run_http_probe(target: &Target) -> CheckOutcome {
    let mut outcome = CheckOutcome::default();

    match lookup_latency(target).await {
        Ok(ping_time) => outcome.ping_time = Some(ping_time),
        Err(e) => return outcome.failed(e.to_string()),
    }

    let client = match reqwest::Client::builder()
        .timeout(target.timeout_duration())
        .danger_accept_invalid_certs(!target.verify_ssl)
        .user_agent("pulsewatch")
        .build()
    {
        Ok(client) => client,
        Err(e) => return outcome.failed(format!("HTTP Error {}", e)),
    };

    let method = if target.method.trim().is_empty() {
        Method::GET
    } else {
        match Method::from_bytes(target.method.trim().to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(e) => return outcome.failed(format!("HTTP Error {}", e)),
        }
    };

    let mut request = client
        .request(method.clone(), &target.address)
        .headers(parse_headers(target.headers.as_deref()));
    if method == Method::POST {
        request = request
            .header(CONTENT_TYPE, "application/json")
            .body(target.post_data.clone().unwrap_or_default());
    }

    let start = Instant::now();

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => return outcome.failed(format!("HTTP Error {}", e)),
    };
    let status = response.status().as_u16();

    // Read the full body to measure complete transfer time
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return outcome.failed(format!("HTTP Error {}", e)),
    };

    outcome.latency = Some(start.elapsed());
    outcome.status_code = Some(i32::from(status));
    outcome.response = Some(body);

    if let Some(pattern) = target.expected.as_deref().filter(|p| !p.is_empty()) {
        let body = outcome.response.as_deref().unwrap_or_default();
        if !body_matches(&target.name, pattern, body) {
            return outcome.failed(format!("HTTP Response Body did not match '{}'", pattern));
        }
    }

    if status != target.expected_status {
        return outcome.failed(format!(
            "HTTP Status Code {} did not match {}",
            status, target.expected_status
        ));
    }

    outcome
}

/// Match the body against the expected pattern. A pattern that does not
/// compile never matches.
fn body_matches(name: &str, pattern: &str, body: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(body),
        Err(e) => {
            tracing::warn!(
                "Service {} expected pattern '{}' is not a valid regular expression: {}",
                name,
                pattern,
                e
            );
            false
        }
    }
}

/// Parse configured headers: comma separated `Key=Value` pairs.
fn parse_headers(raw: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(raw) = raw else {
        return headers;
    };

    for pair in raw.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }

        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid header '{}'", pair.trim()),
        }
    }

    headers
}
