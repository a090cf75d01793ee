//! Threat intelligence signal providers.

pub mod abuseipdb;
pub mod shodan;
pub mod synthetic;
pub mod virustotal;

use crate::config::{ProviderConfig, Settings};
use crate::subject::Subject;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Structured opinion returned by a provider.
pub type Payload = Map<String, Value>;

/// The three signal sources consulted for every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    /// Reputation lookup.
    VirusTotal,
    /// Port and vulnerability scan lookup.
    Shodan,
    /// Abuse confidence lookup.
    AbuseIpdb,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::VirusTotal,
        ProviderKind::Shodan,
        ProviderKind::AbuseIpdb,
    ];

    /// Provider name used in payloads, reasons and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::VirusTotal => "virustotal",
            ProviderKind::Shodan => "shodan",
            ProviderKind::AbuseIpdb => "abuseipdb",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalResult {
    Success(Payload),
    Error(String),
}

impl SignalResult {
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            SignalResult::Success(payload) => Some(payload),
            SignalResult::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SignalResult::Error(_))
    }

    /// Raw document reported for this provider in a decision.
    pub fn to_value(&self, kind: ProviderKind) -> Value {
        match self {
            SignalResult::Success(payload) => Value::Object(payload.clone()),
            SignalResult::Error(message) => {
                let mut doc = Map::new();
                doc.insert("source".to_string(), Value::from(kind.name()));
                doc.insert("error".to_string(), Value::from(message.as_str()));
                Value::Object(doc)
            }
        }
    }
}

/// Error from a signal provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("Request timed out")]
    Timeout,
    /// Upstream answered with a failure status; renders as the raw body.
    #[error("{body}")]
    Status { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// A source of one opinion about a subject.
///
/// Whether a provider calls out or answers synthetically is decided when it
/// is built, never per call.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Look the subject up.
    async fn lookup(&self, subject: &Subject) -> Result<Payload, ProviderError>;

    /// Which signal this provider supplies.
    fn kind(&self) -> ProviderKind;

    /// Whether this provider calls a live upstream.
    fn is_live(&self) -> bool;

    /// Fetch one signal, folding any failure into an error signal.
    async fn fetch(&self, subject: &Subject) -> SignalResult {
        match self.lookup(subject).await {
            Ok(payload) => SignalResult::Success(payload),
            Err(e) => SignalResult::Error(e.to_string()),
        }
    }
}

/// Build the HTTP client shared by live providers.
pub fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ProviderError::Http)
}

/// Select the live or synthetic variant of a provider.
pub fn build(
    kind: ProviderKind,
    config: &ProviderConfig,
    client: &Client,
) -> Arc<dyn SignalProvider> {
    let Some(api_key) = config.credential() else {
        info!(provider = kind.name(), "No credential configured, using synthetic signals");
        return Arc::new(synthetic::SyntheticProvider::new(kind));
    };

    info!(provider = kind.name(), base_url = %config.base_url(kind), "Live provider enabled");
    let base_url = config.base_url(kind).to_string();
    match kind {
        ProviderKind::VirusTotal => Arc::new(virustotal::VirusTotalProvider::new(
            client.clone(),
            base_url,
            api_key.to_string(),
        )),
        ProviderKind::Shodan => Arc::new(shodan::ShodanProvider::new(
            client.clone(),
            base_url,
            api_key.to_string(),
        )),
        ProviderKind::AbuseIpdb => Arc::new(abuseipdb::AbuseIpdbProvider::new(
            client.clone(),
            base_url,
            api_key.to_string(),
            config.max_age_days,
        )),
    }
}

/// Build all three providers from configuration.
pub fn build_all(
    config: &crate::config::Config,
    settings: &Settings,
) -> Result<[Arc<dyn SignalProvider>; 3], ProviderError> {
    let client = http_client(settings.provider_timeout())?;
    Ok([
        build(ProviderKind::VirusTotal, &config.virustotal, &client),
        build(ProviderKind::Shodan, &config.shodan, &client),
        build(ProviderKind::AbuseIpdb, &config.abuseipdb, &client),
    ])
}

/// Turn a non-success response into a `ProviderError::Status`.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
