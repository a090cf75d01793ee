//! Risk scoring over a settled signal set.
//!
//! Scoring is pure and total: missing fields and error signals contribute
//! zero, and the combined risk is clamped into `[0, 1]`.

use crate::fanout::SignalSet;
use crate::providers::shodan::SMB_PORT;
use crate::providers::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const VIRUSTOTAL_WEIGHT: f64 = 0.5;
pub const SHODAN_WEIGHT: f64 = 0.3;
pub const ABUSE_WEIGHT: f64 = 0.2;

/// Risk at or above which a subject is denied.
pub const DENY_THRESHOLD: f64 = 0.6;
/// Risk at or above which a subject is flagged.
pub const FLAG_THRESHOLD: f64 = 0.3;

/// Action to take for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Flag,
    Deny,
}

impl Action {
    /// Map a risk score onto an action via the fixed thresholds.
    pub fn from_risk(risk: f64) -> Self {
        if risk >= DENY_THRESHOLD {
            Action::Deny
        } else if risk >= FLAG_THRESHOLD {
            Action::Flag
        } else {
            Action::Allow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Flag => "flag",
            Action::Deny => "deny",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-provider component scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reasons {
    pub virustotal: f64,
    pub shodan: f64,
    pub abuseipdb: f64,
}

/// Output of [`score`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub risk: f64,
    pub reasons: Reasons,
    pub action: Action,
}

/// Read a numeric field, accepting numbers and numeric strings. Anything
/// non-finite reads as zero.
fn number(payload: Option<&Payload>, field: &str) -> f64 {
    let value = match payload.and_then(|p| p.get(field)) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn has_port(payload: Option<&Payload>, port: u64) -> bool {
    payload
        .and_then(|p| p.get("open_ports"))
        .and_then(Value::as_array)
        .is_some_and(|ports| ports.iter().any(|p| p.as_u64() == Some(port)))
}

pub fn virustotal_component(payload: Option<&Payload>) -> f64 {
    let malicious = number(payload, "malicious");
    let harmless = number(payload, "harmless");
    malicious / f64::max(1.0, malicious + harmless)
}

pub fn shodan_component(payload: Option<&Payload>) -> f64 {
    let exposed = if has_port(payload, SMB_PORT) { 0.5 } else { 0.0 };
    exposed + f64::min(0.5, 0.1 * number(payload, "vuln_count"))
}

pub fn abuse_component(payload: Option<&Payload>) -> f64 {
    number(payload, "confidence_score") / 100.0
}

/// Score a settled signal set.
pub fn score(signals: &SignalSet) -> RiskAssessment {
    let reasons = Reasons {
        virustotal: virustotal_component(signals.virustotal.payload()),
        shodan: shodan_component(signals.shodan.payload()),
        abuseipdb: abuse_component(signals.abuseipdb.payload()),
    };

    let weighted = VIRUSTOTAL_WEIGHT * reasons.virustotal
        + SHODAN_WEIGHT * reasons.shodan
        + ABUSE_WEIGHT * reasons.abuseipdb;
    let risk = if weighted.is_nan() {
        0.0
    } else {
        weighted.clamp(0.0, 1.0)
    };

    RiskAssessment {
        risk,
        reasons,
        action: Action::from_risk(risk),
    }
}
