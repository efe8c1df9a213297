use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use realmd_common::config::{AuthzPolicy, RealmdConfig};
use realmd_common::error::RealmError;

/// Who is on the other end of a connection, from `SO_PEERCRED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCred {
    pub uid: u32,
    pub gid: u32,
    pub pid: Option<i32>,
}

impl PeerCred {
    pub fn root() -> Self {
        PeerCred {
            uid: 0,
            gid: 0,
            pid: None,
        }
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Decide whether `peer` may perform `action`.
    async fn check(&self, peer: &PeerCred, action: &str) -> Result<(), RealmError>;
}

/// Authorizes from the `[authorization]` table of the configuration. The table is only
/// built the first time a check is made.
pub struct ConfigAuthorizer {
    config: Arc<RealmdConfig>,
    policy: Mutex<Option<BTreeMap<String, AuthzPolicy>>>,
}

impl ConfigAuthorizer {
    pub fn new(config: Arc<RealmdConfig>) -> Self {
        ConfigAuthorizer {
            config,
            policy: Mutex::new(None),
        }
    }

    fn policy_for(&self, action: &str) -> AuthzPolicy {
        let mut guard = match self.policy.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let table = guard.get_or_insert_with(|| {
            debug!("loading authorization policy");
            self.config.authorization.clone()
        });
        table.get(action).copied().unwrap_or(AuthzPolicy::Root)
    }
}

#[async_trait]
impl Authorizer for ConfigAuthorizer {
    async fn check(&self, peer: &PeerCred, action: &str) -> Result<(), RealmError> {
        let allowed = match self.policy_for(action) {
            AuthzPolicy::Any => true,
            AuthzPolicy::Root => peer.uid == 0,
        };
        if allowed {
            trace!(uid = %peer.uid, %action, "authorized");
            Ok(())
        } else {
            warn!(uid = %peer.uid, pid = ?peer.pid, %action, "not authorized");
            Err(RealmError::NotAuthorized(
                "Not authorized to perform this action".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmd_common::constants::{ACTION_CONFIGURE_REALM, ACTION_DISCOVER_REALM};

    #[tokio::test]
    async fn test_default_policy() {
        let authz = ConfigAuthorizer::new(Arc::new(RealmdConfig::new()));
        let user = PeerCred {
            uid: 1000,
            gid: 1000,
            pid: Some(42),
        };
        assert!(authz.check(&user, ACTION_DISCOVER_REALM).await.is_ok());
        assert!(matches!(
            authz.check(&user, ACTION_CONFIGURE_REALM).await,
            Err(RealmError::NotAuthorized(_))
        ));
        assert!(authz
            .check(&PeerCred::root(), ACTION_CONFIGURE_REALM)
            .await
            .is_ok());
        assert!(matches!(
            authz.check(&user, "org.example.unknown").await,
            Err(RealmError::NotAuthorized(_))
        ));
    }
}
