//! VirusTotal reputation provider.

use super::{check_status, Payload, ProviderError, ProviderKind, SignalProvider};
use crate::subject::Subject;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://www.virustotal.com";

/// Harmless verdict count reported when no credential is configured.
const SYNTHETIC_HARMLESS: u64 = 70;

/// Synthetic reputation: one malicious verdict for subjects ending in "7".
pub fn synthetic_report(subject: &Subject) -> Payload {
    let malicious = u64::from(subject.as_str().ends_with('7'));
    let mut payload = Payload::new();
    payload.insert("source".to_string(), json!("virustotal"));
    payload.insert("harmless".to_string(), json!(SYNTHETIC_HARMLESS));
    payload.insert("malicious".to_string(), json!(malicious));
    payload
}

/// Live VirusTotal provider.
pub struct VirusTotalProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl VirusTotalProvider {
    pub fn new(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl SignalProvider for VirusTotalProvider {
    async fn lookup(&self, subject: &Subject) -> Result<Payload, ProviderError> {
        let url = format!("{}/api/v3/ip_addresses/{}", self.base_url, subject);

        debug!(ip = %subject, "Querying VirusTotal");

        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let mut payload = Payload::new();
        payload.insert("source".to_string(), json!("virustotal"));
        if let Some(stats) = body
            .pointer("/data/attributes/last_analysis_stats")
            .and_then(Value::as_object)
        {
            payload.extend(stats.clone());
        }

        debug!(
            ip = %subject,
            malicious = ?payload.get("malicious"),
            harmless = ?payload.get("harmless"),
            "VirusTotal lookup complete"
        );

        Ok(payload)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::VirusTotal
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{http_client, SignalResult};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> VirusTotalProvider {
        VirusTotalProvider::new(
            http_client(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "vt-key".to_string(),
        )
    }

    #[test]
    fn test_synthetic_report() {
        let bad = synthetic_report(&Subject::parse("10.0.0.7").unwrap());
        assert_eq!(bad["malicious"], json!(1));
        assert_eq!(bad["harmless"], json!(70));
        assert_eq!(bad["source"], json!("virustotal"));

        let good = synthetic_report(&Subject::parse("10.0.0.8").unwrap());
        assert_eq!(good["malicious"], json!(0));
    }

    #[tokio::test]
    async fn test_live_lookup_extracts_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ip_addresses/1.2.3.4"))
            .and(header("x-apikey", "vt-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"attributes": {"last_analysis_stats": {
                    "harmless": 60, "malicious": 3, "suspicious": 1, "undetected": 10
                }}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = provider(&server)
            .lookup(&Subject::parse("1.2.3.4").unwrap())
            .await
            .unwrap();
        assert_eq!(payload["source"], json!("virustotal"));
        assert_eq!(payload["malicious"], json!(3));
        assert_eq!(payload["harmless"], json!(60));
        assert_eq!(payload["suspicious"], json!(1));
    }

    #[tokio::test]
    async fn test_live_lookup_error_status_becomes_error_signal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("WrongCredentialsError"))
            .mount(&server)
            .await;

        let result = provider(&server)
            .fetch(&Subject::parse("1.2.3.4").unwrap())
            .await;
        assert_eq!(result, SignalResult::Error("WrongCredentialsError".to_string()));
    }
}
