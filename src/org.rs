//! Mapping request credentials to organisations.

use std::collections::HashMap;

pub type OrgId = u64;

/// Resolves which organisation a request belongs to.
pub trait OrgResolver: Send + Sync {
    fn resolve(&self, credential: Option<&str>) -> OrgId;
}

/// Fixed credential table with a fallback organisation.
#[derive(Debug, Clone)]
pub struct StaticOrgResolver {
    default_org: OrgId,
    credentials: HashMap<String, OrgId>,
}

impl StaticOrgResolver {
    pub fn new(default_org: OrgId, credentials: HashMap<String, OrgId>) -> Self {
        Self {
            default_org,
            credentials,
        }
    }
}

impl Default for StaticOrgResolver {
    fn default() -> Self {
        Self::new(1, HashMap::new())
    }
}

impl OrgResolver for StaticOrgResolver {
    fn resolve(&self, credential: Option<&str>) -> OrgId {
        credential
            .and_then(|c| self.credentials.get(c.trim()))
            .copied()
            .unwrap_or(self.default_org)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_credential() {
        let resolver = StaticOrgResolver::new(1, HashMap::from([("acme-key".to_string(), 7)]));
        assert_eq!(resolver.resolve(Some("acme-key")), 7);
        assert_eq!(resolver.resolve(Some(" acme-key ")), 7);
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let resolver = StaticOrgResolver::new(3, HashMap::new());
        assert_eq!(resolver.resolve(None), 3);
        assert_eq!(resolver.resolve(Some("unknown")), 3);
    }
}
