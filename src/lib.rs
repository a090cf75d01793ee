//! IP reputation decision pipeline.
//!
//! Decides whether to allow, flag or deny an IP address by consulting three
//! threat intelligence sources concurrently and combining their opinions into
//! a deterministic risk score.
//!
//! # Features
//!
//! - **Concurrent fan-out** - VirusTotal, Shodan and AbuseIPDB lookups run in
//!   parallel; a failed or slow provider degrades to a neutral signal
//! - **Synthetic mode** - Providers without an API key answer from fixed,
//!   deterministic rules
//! - **Deterministic scoring** - Weighted components with fixed thresholds
//! - **Caching** - Decisions are cached per subject for 24 hours
//! - **Counters** - Aggregate counters with conflict-retrying updates
//! - **Decision log** - Append-only record of every fresh decision
//! - **Key rotation** - Owned periodic task feeding the same counters
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   cache_ttl_seconds: 86400
//!   provider_timeout_ms: 15000
//!
//! virustotal:
//!   api_key: "${VT_API_KEY}"
//!
//! abuseipdb:
//!   api_key: "${ABUSEIPDB_API_KEY}"
//!   max_age_days: 90
//!
//! key_rotation:
//!   interval_minutes: 15
//! ```

pub mod cache;
pub mod config;
pub mod counters;
pub mod decision_log;
pub mod fanout;
pub mod org;
pub mod pipeline;
pub mod providers;
pub mod scheduler;
pub mod scoring;
pub mod subject;

pub use config::Config;
pub use counters::{CounterStore, Counters};
pub use pipeline::{Decision, DecisionPipeline, DecisionRequest, PipelineError};
pub use scoring::Action;
pub use subject::Subject;
