//! Configuration types for the decision pipeline.

use crate::counters::{Counters, DEFAULT_MAX_RETRIES};
use crate::org::OrgId;
use crate::providers::{abuseipdb, shodan, virustotal, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Pipeline settings.
    #[serde(default)]
    pub settings: Settings,

    /// Reputation provider.
    #[serde(default)]
    pub virustotal: ProviderConfig,

    /// Port/vulnerability scan provider.
    #[serde(default)]
    pub shodan: ProviderConfig,

    /// Abuse confidence provider.
    #[serde(default)]
    pub abuseipdb: ProviderConfig,

    /// Seed values for the counters row.
    #[serde(default)]
    pub counters: Counters,

    /// Organisation resolution.
    #[serde(default)]
    pub orgs: OrgConfig,

    /// Periodic key rotation.
    #[serde(default)]
    pub key_rotation: KeyRotationConfig,
}

/// Pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// How long a decision stays cached.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    /// Namespace for cache keys.
    #[serde(default = "default_cache_key_prefix")]
    pub cache_key_prefix: String,

    /// Upper bound on cached decisions.
    #[serde(default = "default_max_cache_entries")]
    pub max_cache_entries: usize,

    /// Time budget for each provider lookup.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,

    /// Attempts for one counter update before giving up.
    #[serde(default = "default_counter_max_retries")]
    pub counter_max_retries: u32,

    /// Append decisions to this JSON-lines file instead of the tracing log.
    #[serde(default)]
    pub decision_log_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: default_cache_ttl(),
            cache_key_prefix: default_cache_key_prefix(),
            max_cache_entries: default_max_cache_entries(),
            provider_timeout_ms: default_provider_timeout(),
            counter_max_retries: default_counter_max_retries(),
            decision_log_path: None,
        }
    }
}

impl Settings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_cache_key_prefix() -> String {
    crate::cache::DEFAULT_KEY_PREFIX.to_string()
}

fn default_max_cache_entries() -> usize {
    100_000
}

fn default_provider_timeout() -> u64 {
    15_000
}

fn default_counter_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Signal provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// API key (supports ${ENV_VAR} syntax). Empty or absent selects the
    /// synthetic provider.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the upstream API host.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Only consider reports from the last N days (AbuseIPDB).
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            max_age_days: default_max_age_days(),
        }
    }
}

impl ProviderConfig {
    /// The configured credential, if any.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    /// Upstream host for this provider.
    pub fn base_url(&self, kind: ProviderKind) -> &str {
        match self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => match kind {
                ProviderKind::VirusTotal => virustotal::DEFAULT_BASE_URL,
                ProviderKind::Shodan => shodan::DEFAULT_BASE_URL,
                ProviderKind::AbuseIpdb => abuseipdb::DEFAULT_BASE_URL,
            },
        }
    }
}

fn default_max_age_days() -> u32 {
    90
}

/// Organisation resolution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrgConfig {
    /// Organisation for requests without a known credential.
    #[serde(default = "default_org")]
    pub default_org: OrgId,

    /// Credential to organisation id.
    #[serde(default)]
    pub credentials: HashMap<String, OrgId>,
}

impl Default for OrgConfig {
    fn default() -> Self {
        Self {
            default_org: default_org(),
            credentials: HashMap::new(),
        }
    }
}

fn default_org() -> OrgId {
    1
}

/// Key rotation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyRotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rotation_minutes")]
    pub interval_minutes: u64,
}

impl Default for KeyRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: default_rotation_minutes(),
        }
    }
}

impl KeyRotationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// One year.
pub const MAX_ROTATION_MINUTES: u64 = 525_600;

fn default_rotation_minutes() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML, expanding ${ENV_VAR} references.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let settings = &self.settings;
        if settings.cache_ttl_seconds == 0 {
            anyhow::bail!("cache_ttl_seconds must be greater than 0");
        }
        if settings.max_cache_entries == 0 {
            anyhow::bail!("max_cache_entries must be greater than 0");
        }
        if settings.provider_timeout_ms == 0 {
            anyhow::bail!("provider_timeout_ms must be greater than 0");
        }
        if settings.counter_max_retries == 0 {
            anyhow::bail!("counter_max_retries must be greater than 0");
        }
        if settings.cache_key_prefix.trim().is_empty() {
            anyhow::bail!("cache_key_prefix must not be empty");
        }

        for (kind, provider) in self.providers() {
            let url = provider.base_url(kind);
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("{} base_url must be an http(s) URL: {}", kind, url);
            }
        }

        if self.key_rotation.enabled && self.key_rotation.interval_minutes == 0 {
            anyhow::bail!("key_rotation.interval_minutes must be greater than 0");
        }
        if self.key_rotation.interval_minutes > MAX_ROTATION_MINUTES {
            anyhow::bail!(
                "key_rotation.interval_minutes must be at most {}",
                MAX_ROTATION_MINUTES
            );
        }

        Ok(())
    }

    /// Provider sections in fan-out order.
    pub fn providers(&self) -> [(ProviderKind, &ProviderConfig); 3] {
        [
            (ProviderKind::VirusTotal, &self.virustotal),
            (ProviderKind::Shodan, &self.shodan),
            (ProviderKind::AbuseIpdb, &self.abuseipdb),
        ]
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# IP Decision Pipeline Configuration

settings:
  cache_ttl_seconds: 86400     # Cache decisions for 24 hours
  cache_key_prefix: "ipcache"
  max_cache_entries: 100000
  provider_timeout_ms: 15000   # Per-provider lookup budget
  counter_max_retries: 64
  # decision_log_path: "/var/lib/aegis/decisions.jsonl"

# Providers without an api_key answer from deterministic synthetic rules
virustotal:
  api_key: "${VT_API_KEY}"

shodan:
  api_key: "${SHODAN_API_KEY}"

abuseipdb:
  api_key: "${ABUSEIPDB_API_KEY}"
  max_age_days: 90             # Only consider reports from last 90 days

# Seed values used when the counters row is first created
counters:
  live_threats: 302928
  threats_blocked_today: 298193
  ai_decisions_hour: 2495
  quantum_keys_active: 855

orgs:
  default_org: 1
  credentials:
    "example-org-key": 2

key_rotation:
  enabled: true
  interval_minutes: 15
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> Result<String, regex::Error> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;

    Ok(re
        .replace_all(content, |cap: &regex::Captures<'_>| {
            std::env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned())
}
