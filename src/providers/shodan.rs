//! Shodan port and vulnerability scan provider.

use super::{check_status, Payload, ProviderError, ProviderKind, SignalProvider};
use crate::subject::Subject;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.shodan.io";

/// SMB port; its exposure is the strongest scan signal.
pub const SMB_PORT: u64 = 445;

/// Shodan host response, reduced to what scoring needs.
#[derive(Debug, Deserialize)]
struct HostResponse {
    #[serde(default)]
    ports: Vec<u64>,
    /// Either a list of CVE ids or an object keyed by CVE id.
    #[serde(default)]
    vulns: Option<Value>,
}

impl HostResponse {
    fn vuln_count(&self) -> usize {
        match &self.vulns {
            Some(Value::Array(list)) => list.len(),
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }
    }
}

fn scan_payload(open_ports: &[u64], vuln_count: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("source".to_string(), json!("shodan"));
    payload.insert("open_ports".to_string(), json!(open_ports));
    payload.insert("vuln_count".to_string(), json!(vuln_count));
    payload
}

/// Synthetic scan: common web ports on even trailing segments, a lone SMB
/// port (and one vulnerability) otherwise.
pub fn synthetic_report(subject: &Subject) -> Payload {
    let open_ports: &[u64] = if subject.trailing_segment() % 2 == 0 {
        &[22, 80, 443]
    } else {
        &[SMB_PORT]
    };
    let vuln_count = usize::from(open_ports.contains(&SMB_PORT));
    scan_payload(open_ports, vuln_count)
}

/// Live Shodan provider.
pub struct ShodanProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ShodanProvider {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl SignalProvider for ShodanProvider {
    async fn lookup(&self, subject: &Subject) -> Result<Payload, ProviderError> {
        let url = format!("{}/shodan/host/{}", self.base_url, subject);

        debug!(ip = %subject, "Querying Shodan");

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;

        let host: HostResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let vuln_count = host.vuln_count();
        debug!(
            ip = %subject,
            ports = host.ports.len(),
            vulns = vuln_count,
            "Shodan lookup complete"
        );

        Ok(scan_payload(&host.ports, vuln_count))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Shodan
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::http_client;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_synthetic_even_segment() {
        let payload = synthetic_report(&Subject::parse("192.168.1.10").unwrap());
        assert_eq!(payload["open_ports"], json!([22, 80, 443]));
        assert_eq!(payload["vuln_count"], json!(0));
    }

    #[test]
    fn test_synthetic_odd_segment() {
        let payload = synthetic_report(&Subject::parse("192.168.1.11").unwrap());
        assert_eq!(payload["open_ports"], json!([445]));
        assert_eq!(payload["vuln_count"], json!(1));
    }

    #[test]
    fn test_synthetic_ipv6_uses_last_group() {
        let payload = synthetic_report(&Subject::parse("2001:db8::b").unwrap());
        assert_eq!(payload["open_ports"], json!([445]));
    }

    #[tokio::test]
    async fn test_live_lookup_counts_vulns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shodan/host/5.6.7.8"))
            .and(query_param("key", "shodan-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ip_str": "5.6.7.8",
                "ports": [21, 445],
                "vulns": {"CVE-2017-0144": {}, "CVE-2020-0796": {}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ShodanProvider::new(
            http_client(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "shodan-key".to_string(),
        );
        let payload = provider
            .lookup(&Subject::parse("5.6.7.8").unwrap())
            .await
            .unwrap();
        assert_eq!(payload["open_ports"], json!([21, 445]));
        assert_eq!(payload["vuln_count"], json!(2));
    }

    #[tokio::test]
    async fn test_live_lookup_without_vulns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ports": [443]})))
            .mount(&server)
            .await;

        let provider = ShodanProvider::new(
            http_client(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "shodan-key".to_string(),
        );
        let payload = provider
            .lookup(&Subject::parse("5.6.7.8").unwrap())
            .await
            .unwrap();
        assert_eq!(payload["vuln_count"], json!(0));
    }

    #[tokio::test]
    async fn test_live_lookup_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"error": "No information available"}"#),
            )
            .mount(&server)
            .await;

        let provider = ShodanProvider::new(
            http_client(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "shodan-key".to_string(),
        );
        let err = provider
            .lookup(&Subject::parse("5.6.7.8").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 404, .. }));
    }
}
