//! Decision pipeline.
//!
//! `decide` checks the cache first; on a miss it fans out to the providers,
//! scores the settled signals, records the decision (counters, then the
//! decision log) and finally populates the cache. A cache hit has no side
//! effects at all.

use crate::cache::{cache_key, RequestCache};
use crate::config::Config;
use crate::counters::{CounterError, CounterStore, Counters, MemoryCounterRow};
use crate::decision_log::{
    DecisionLog, DecisionLogEntry, DecisionLogError, JsonlDecisionLog, TracingDecisionLog,
};
use crate::fanout::FanOutCoordinator;
use crate::org::{OrgResolver, StaticOrgResolver};
use crate::providers;
use crate::scoring::{self, Action, Reasons};
use crate::subject::{Subject, SubjectError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Incoming decision request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub subject: String,
    #[serde(default)]
    pub org_credential: Option<String>,
}

impl DecisionRequest {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            org_credential: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.org_credential = Some(credential.into());
        self
    }
}

/// Component scores plus the raw per-provider documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSignals {
    pub reasons: Reasons,
    #[serde(flatten)]
    pub providers: BTreeMap<String, Value>,
}

/// Outcome for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub subject: String,
    pub action: Action,
    pub risk_score: f64,
    pub signals: DecisionSignals,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidSubject(#[from] SubjectError),
    #[error("counter bookkeeping failed: {0}")]
    Counters(#[from] CounterError),
    #[error("decision log append failed: {0}")]
    DecisionLog(#[from] DecisionLogError),
    #[error("failed to encode decision: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the caller supplied bad input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PipelineError::InvalidSubject(_))
    }
}

/// Cache-aside decision pipeline.
pub struct DecisionPipeline {
    fanout: FanOutCoordinator,
    cache: Arc<RequestCache>,
    counters: Arc<CounterStore>,
    log: Arc<dyn DecisionLog>,
    orgs: Arc<dyn OrgResolver>,
    cache_ttl: Duration,
    cache_key_prefix: String,
}

impl DecisionPipeline {
    pub fn new(
        fanout: FanOutCoordinator,
        cache: Arc<RequestCache>,
        counters: Arc<CounterStore>,
        log: Arc<dyn DecisionLog>,
        orgs: Arc<dyn OrgResolver>,
    ) -> Self {
        Self {
            fanout,
            cache,
            counters,
            log,
            orgs,
            cache_ttl: crate::cache::DEFAULT_TTL,
            cache_key_prefix: crate::cache::DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    /// Build a pipeline and its collaborators from configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let settings = &config.settings;

        let providers = providers::build_all(config, settings)?;
        let live = providers.iter().filter(|p| p.is_live()).count();
        let fanout = FanOutCoordinator::from_providers(providers, settings.provider_timeout());

        let cache = Arc::new(RequestCache::new(settings.max_cache_entries));
        let counters = Arc::new(CounterStore::new(
            Arc::new(MemoryCounterRow::new()),
            config.counters,
            settings.counter_max_retries,
        ));

        let log: Arc<dyn DecisionLog> = match &settings.decision_log_path {
            Some(path) => {
                info!(path = %path.display(), "Decision log writing to file");
                Arc::new(JsonlDecisionLog::new(path.clone()))
            }
            None => Arc::new(TracingDecisionLog),
        };

        let orgs = Arc::new(StaticOrgResolver::new(
            config.orgs.default_org,
            config.orgs.credentials.clone(),
        ));

        info!(
            live_providers = live,
            cache_ttl_secs = settings.cache_ttl_seconds,
            "Decision pipeline initialized"
        );

        Ok(Self::new(fanout, cache, counters, log, orgs)
            .with_cache_ttl(settings.cache_ttl())
            .with_cache_key_prefix(settings.cache_key_prefix.clone()))
    }

    pub fn counters(&self) -> Arc<CounterStore> {
        self.counters.clone()
    }

    pub fn cache(&self) -> Arc<RequestCache> {
        self.cache.clone()
    }

    /// Decide on a raw request.
    pub async fn decide(&self, request: &DecisionRequest) -> Result<Decision, PipelineError> {
        let subject = Subject::parse(&request.subject)?;
        self.decide_subject(&subject, request.org_credential.as_deref())
            .await
    }

    /// Decide on an already validated subject.
    pub async fn decide_subject(
        &self,
        subject: &Subject,
        credential: Option<&str>,
    ) -> Result<Decision, PipelineError> {
        let key = cache_key(&self.cache_key_prefix, subject.as_str());

        if let Some(mut cached) = self.cache.get::<Decision>(&key) {
            debug!(ip = %subject, action = %cached.action, "Decision cache hit");
            cached.cached = true;
            return Ok(cached);
        }
        debug!(ip = %subject, "Decision cache miss");

        let org_id = self.orgs.resolve(credential);
        let signals = self.fanout.gather(subject).await;
        let assessment = scoring::score(&signals);

        let decision = Decision {
            subject: subject.to_string(),
            action: assessment.action,
            risk_score: assessment.risk,
            signals: DecisionSignals {
                reasons: assessment.reasons,
                providers: signals.raw_payloads(),
            },
            cached: false,
            timestamp: Utc::now(),
        };

        // Encode up front so nothing is committed for an unencodable decision.
        let document = serde_json::to_value(&decision)?;
        let encoded = serde_json::to_string(&document)?;

        self.counters
            .increment_decision(decision.action == Action::Deny)
            .await?;

        self.log
            .append(DecisionLogEntry {
                org_id,
                action: decision.action,
                reason: document,
                created_at: decision.timestamp,
            })
            .await?;

        self.cache.insert_raw(&key, encoded, self.cache_ttl);

        if decision.action == Action::Deny {
            info!(
                ip = %subject,
                risk = decision.risk_score,
                org = org_id,
                "Denying subject"
            );
        } else {
            debug!(
                ip = %subject,
                risk = decision.risk_score,
                action = %decision.action,
                "Decision made"
            );
        }

        Ok(decision)
    }

    /// Read the counters, creating the row from its seed if needed.
    pub async fn metrics(&self) -> Result<Counters, PipelineError> {
        Ok(self.counters.snapshot().await?)
    }
}
