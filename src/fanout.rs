//! Concurrent dispatch of the three signal lookups.

use crate::providers::{ProviderKind, SignalProvider, SignalResult};
use crate::subject::Subject;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default per-provider time budget.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// One settled result per provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSet {
    pub virustotal: SignalResult,
    pub shodan: SignalResult,
    pub abuseipdb: SignalResult,
}

impl SignalSet {
    pub fn get(&self, kind: ProviderKind) -> &SignalResult {
        match kind {
            ProviderKind::VirusTotal => &self.virustotal,
            ProviderKind::Shodan => &self.shodan,
            ProviderKind::AbuseIpdb => &self.abuseipdb,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProviderKind, &SignalResult)> {
        ProviderKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    /// Number of providers that failed.
    pub fn error_count(&self) -> usize {
        self.iter().filter(|(_, result)| result.is_error()).count()
    }

    /// Raw per-provider documents keyed by provider name.
    pub fn raw_payloads(&self) -> BTreeMap<String, Value> {
        self.iter()
            .map(|(kind, result)| (kind.name().to_string(), result.to_value(kind)))
            .collect()
    }
}

/// Runs all provider lookups concurrently and waits for every one to settle.
pub struct FanOutCoordinator {
    virustotal: Arc<dyn SignalProvider>,
    shodan: Arc<dyn SignalProvider>,
    abuseipdb: Arc<dyn SignalProvider>,
    timeout: Duration,
}

impl FanOutCoordinator {
    pub fn new(
        virustotal: Arc<dyn SignalProvider>,
        shodan: Arc<dyn SignalProvider>,
        abuseipdb: Arc<dyn SignalProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            virustotal,
            shodan,
            abuseipdb,
            timeout,
        }
    }

    pub fn from_providers(providers: [Arc<dyn SignalProvider>; 3], timeout: Duration) -> Self {
        let [virustotal, shodan, abuseipdb] = providers;
        Self::new(virustotal, shodan, abuseipdb, timeout)
    }

    /// Gather one signal from every provider.
    ///
    /// Never short-circuits: a failure or timeout in one lookup becomes an
    /// error signal while the others run to completion.
    pub async fn gather(&self, subject: &Subject) -> SignalSet {
        let (virustotal, shodan, abuseipdb) = tokio::join!(
            self.fetch_bounded(self.virustotal.as_ref(), ProviderKind::VirusTotal, subject),
            self.fetch_bounded(self.shodan.as_ref(), ProviderKind::Shodan, subject),
            self.fetch_bounded(self.abuseipdb.as_ref(), ProviderKind::AbuseIpdb, subject),
        );

        let set = SignalSet {
            virustotal,
            shodan,
            abuseipdb,
        };
        debug!(ip = %subject, errors = set.error_count(), "Fan-out settled");
        set
    }

    async fn fetch_bounded(
        &self,
        provider: &dyn SignalProvider,
        kind: ProviderKind,
        subject: &Subject,
    ) -> SignalResult {
        let result = match tokio::time::timeout(self.timeout, provider.fetch(subject)).await {
            Ok(result) => result,
            Err(_) => SignalResult::Error(format!(
                "{} lookup timed out after {}ms",
                kind,
                self.timeout.as_millis()
            )),
        };

        if let SignalResult::Error(message) = &result {
            warn!(
                provider = kind.name(),
                ip = %subject,
                error = %message,
                "Provider lookup failed"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::synthetic::SyntheticProvider;
    use crate::providers::{Payload, ProviderError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Instant;

    struct Slow {
        kind: ProviderKind,
        delay: Duration,
    }

    #[async_trait]
    impl SignalProvider for Slow {
        async fn lookup(&self, _subject: &Subject) -> Result<Payload, ProviderError> {
            tokio::time::sleep(self.delay).await;
            let mut payload = Payload::new();
            payload.insert("source".to_string(), json!(self.kind.name()));
            Ok(payload)
        }

        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_live(&self) -> bool {
            true
        }
    }

    struct Broken;

    #[async_trait]
    impl SignalProvider for Broken {
        async fn lookup(&self, _subject: &Subject) -> Result<Payload, ProviderError> {
            Err(ProviderError::Other("connection refused".to_string()))
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::VirusTotal
        }

        fn is_live(&self) -> bool {
            true
        }
    }

    fn slow(kind: ProviderKind, millis: u64) -> Arc<dyn SignalProvider> {
        Arc::new(Slow {
            kind,
            delay: Duration::from_millis(millis),
        })
    }

    #[tokio::test]
    async fn test_gather_runs_concurrently() {
        let coordinator = FanOutCoordinator::new(
            slow(ProviderKind::VirusTotal, 200),
            slow(ProviderKind::Shodan, 200),
            slow(ProviderKind::AbuseIpdb, 200),
            Duration::from_secs(5),
        );

        let started = Instant::now();
        let set = coordinator.gather(&Subject::parse("1.1.1.1").unwrap()).await;
        assert!(started.elapsed() < Duration::from_millis(550));
        assert_eq!(set.error_count(), 0);
    }

    #[tokio::test]
    async fn test_identity_preserved_regardless_of_completion_order() {
        let coordinator = FanOutCoordinator::new(
            slow(ProviderKind::VirusTotal, 60),
            slow(ProviderKind::Shodan, 30),
            slow(ProviderKind::AbuseIpdb, 1),
            Duration::from_secs(5),
        );

        let set = coordinator.gather(&Subject::parse("1.1.1.1").unwrap()).await;
        for (kind, result) in set.iter() {
            assert_eq!(result.payload().unwrap()["source"], json!(kind.name()));
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_signal() {
        let coordinator = FanOutCoordinator::new(
            Arc::new(SyntheticProvider::new(ProviderKind::VirusTotal)),
            slow(ProviderKind::Shodan, 5_000),
            Arc::new(SyntheticProvider::new(ProviderKind::AbuseIpdb)),
            Duration::from_millis(50),
        );

        let set = coordinator.gather(&Subject::parse("1.1.1.1").unwrap()).await;
        assert!(!set.virustotal.is_error());
        assert!(!set.abuseipdb.is_error());
        match &set.shodan {
            SignalResult::Error(message) => assert!(message.contains("timed out")),
            other => panic!("expected timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_short_circuit() {
        let coordinator = FanOutCoordinator::new(
            Arc::new(Broken),
            slow(ProviderKind::Shodan, 50),
            slow(ProviderKind::AbuseIpdb, 50),
            Duration::from_secs(5),
        );

        let set = coordinator.gather(&Subject::parse("1.1.1.1").unwrap()).await;
        assert_eq!(set.virustotal, SignalResult::Error("connection refused".to_string()));
        assert!(set.shodan.payload().is_some());
        assert!(set.abuseipdb.payload().is_some());
        assert_eq!(set.error_count(), 1);
    }

    #[test]
    fn test_raw_payloads_has_three_entries() {
        let set = SignalSet {
            virustotal: SignalResult::Success(Payload::new()),
            shodan: SignalResult::Error("down".to_string()),
            abuseipdb: SignalResult::Success(Payload::new()),
        };
        let raw = set.raw_payloads();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw["shodan"], json!({"source": "shodan", "error": "down"}));
    }
}
