//! Subjects under investigation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{AddrParseError, IpAddr};
use thiserror::Error;

/// Kind of entity being investigated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    Ip,
}

/// Rejected subject input.
#[derive(Debug, Error)]
pub enum SubjectError {
    #[error("subject is empty")]
    Empty,
    #[error("'{input}' is not a valid IP address: {source}")]
    Malformed {
        input: String,
        #[source]
        source: AddrParseError,
    },
}

/// A validated IP subject.
///
/// The textual form is always the canonical rendering of the parsed address,
/// so `"2001:DB8::0001"` and `"2001:db8::1"` share one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subject {
    addr: IpAddr,
    text: String,
}

impl Subject {
    /// Parse and canonicalise a subject address.
    pub fn parse(input: &str) -> Result<Self, SubjectError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SubjectError::Empty);
        }

        let addr: IpAddr = trimmed.parse().map_err(|source| SubjectError::Malformed {
            input: trimmed.to_string(),
            source,
        })?;

        Ok(Self::from(addr))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn subject_type(&self) -> SubjectType {
        SubjectType::Ip
    }

    /// Value of the last address group: the final octet for IPv4, the final
    /// 16-bit group for IPv6.
    pub fn trailing_segment(&self) -> u16 {
        match self.addr {
            IpAddr::V4(v4) => u16::from(v4.octets()[3]),
            IpAddr::V6(v6) => v6.segments()[7],
        }
    }
}

impl From<IpAddr> for Subject {
    fn from(addr: IpAddr) -> Self {
        Self {
            addr,
            text: addr.to_string(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
