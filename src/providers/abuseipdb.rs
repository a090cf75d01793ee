//! AbuseIPDB abuse confidence provider.

use super::{check_status, Payload, ProviderError, ProviderKind, SignalProvider};
use crate::subject::Subject;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.abuseipdb.com";

/// AbuseIPDB API response.
#[derive(Debug, Deserialize)]
struct AbuseIpdbResponse {
    #[serde(default)]
    data: AbuseIpdbData,
}

/// AbuseIPDB API response data.
#[derive(Debug, Default, Deserialize)]
struct AbuseIpdbData {
    /// Abuse confidence score (0-100).
    #[serde(rename = "abuseConfidenceScore", default)]
    abuse_confidence_score: u64,

    /// Total number of reports.
    #[serde(rename = "totalReports", default)]
    total_reports: u64,
}

fn abuse_payload(confidence_score: u64, total_reports: u64) -> Payload {
    let mut payload = Payload::new();
    payload.insert("source".to_string(), json!("abuseipdb"));
    payload.insert("confidence_score".to_string(), json!(confidence_score));
    payload.insert("total_reports".to_string(), json!(total_reports));
    payload
}

/// Synthetic abuse report: high confidence for subjects ending in "3".
pub fn synthetic_report(subject: &Subject) -> Payload {
    if subject.as_str().ends_with('3') {
        abuse_payload(85, 12)
    } else {
        abuse_payload(0, 0)
    }
}

/// Live AbuseIPDB provider.
pub struct AbuseIpdbProvider {
    client: Client,
    base_url: String,
    api_key: String,
    max_age_days: u32,
}

impl AbuseIpdbProvider {
    pub fn new(client: Client, base_url: String, api_key: String, max_age_days: u32) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_age_days,
        }
    }
}

#[async_trait]
impl SignalProvider for AbuseIpdbProvider {
    async fn lookup(&self, subject: &Subject) -> Result<Payload, ProviderError> {
        let url = format!("{}/api/v2/check", self.base_url);
        let max_age = self.max_age_days.to_string();

        debug!(ip = %subject, "Querying AbuseIPDB");

        let response = self
            .client
            .get(&url)
            .query(&[("ipAddress", subject.as_str()), ("maxAgeInDays", max_age.as_str())])
            .header("Key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;
        let response = check_status(response).await?;

        let api_response: AbuseIpdbResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let data = api_response.data;
        debug!(
            ip = %subject,
            score = data.abuse_confidence_score,
            reports = data.total_reports,
            "AbuseIPDB lookup complete"
        );

        Ok(abuse_payload(data.abuse_confidence_score, data.total_reports))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::AbuseIpdb
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
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> AbuseIpdbProvider {
        AbuseIpdbProvider::new(
            http_client(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "abuse-key".to_string(),
            90,
        )
    }

    #[test]
    fn test_synthetic_report() {
        let hot = synthetic_report(&Subject::parse("203.0.113.3").unwrap());
        assert_eq!(hot["confidence_score"], json!(85));
        assert_eq!(hot["total_reports"], json!(12));

        let cold = synthetic_report(&Subject::parse("203.0.113.4").unwrap());
        assert_eq!(cold["confidence_score"], json!(0));
        assert_eq!(cold["total_reports"], json!(0));
    }

    #[tokio::test]
    async fn test_live_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/check"))
            .and(query_param("ipAddress", "1.2.3.4"))
            .and(query_param("maxAgeInDays", "90"))
            .and(header("Key", "abuse-key"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "ipAddress": "1.2.3.4",
                    "abuseConfidenceScore": 42,
                    "totalReports": 7,
                    "isTor": false
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let payload = provider(&server)
            .lookup(&Subject::parse("1.2.3.4").unwrap())
            .await
            .unwrap();
        assert_eq!(payload["source"], json!("abuseipdb"));
        assert_eq!(payload["confidence_score"], json!(42));
        assert_eq!(payload["total_reports"], json!(7));
    }

    #[tokio::test]
    async fn test_live_lookup_missing_fields_default_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let payload = provider(&server)
            .lookup(&Subject::parse("1.2.3.4").unwrap())
            .await
            .unwrap();
        assert_eq!(payload["confidence_score"], json!(0));
        assert_eq!(payload["total_reports"], json!(0));
    }

    #[tokio::test]
    async fn test_live_lookup_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .lookup(&Subject::parse("1.2.3.4").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 429, .. }));
        assert_eq!(err.to_string(), "Too Many Requests");
    }

    #[test]
    fn test_provider_kind() {
        let provider = AbuseIpdbProvider::new(
            http_client(Duration::from_secs(1)).unwrap(),
            DEFAULT_BASE_URL.to_string(),
            "k".to_string(),
            90,
        );
        assert_eq!(provider.kind(), ProviderKind::AbuseIpdb);
        assert!(provider.is_live());
    }
}
