//! Deterministic stand-in used when a provider has no credential.

use super::{abuseipdb, shodan, virustotal, Payload, ProviderError, ProviderKind, SignalProvider};
use crate::subject::Subject;
use async_trait::async_trait;
use tracing::debug;

/// Provider that answers from a fixed rule instead of calling out.
pub struct SyntheticProvider {
    kind: ProviderKind,
}

impl SyntheticProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl SignalProvider for SyntheticProvider {
    async fn lookup(&self, subject: &Subject) -> Result<Payload, ProviderError> {
        debug!(ip = %subject, provider = self.kind.name(), "Synthetic lookup");
        Ok(match self.kind {
            ProviderKind::VirusTotal => virustotal::synthetic_report(subject),
            ProviderKind::Shodan => shodan::synthetic_report(subject),
            ProviderKind::AbuseIpdb => abuseipdb::synthetic_report(subject),
        })
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_live(&self) -> bool {
        false
    }
}
