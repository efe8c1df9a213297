#![deny(warnings)]
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use realmd_common::error::RealmError;
use realmd_common::proto::{Options, RealmKind};
use realmd_service::diagnostics::Invocation;
use realmd_service::provider::interface::provider_path;
use realmd_service::provider::{AllProvider, Discovered, Provider};
use realmd_service::realm::Realm;
use realmd_service::registry::RealmRegistry;

/// Answers every name with one realm after an optional delay.
struct FixedProvider {
    name: &'static str,
    kind: RealmKind,
    relevance: i32,
    delay: Duration,
    fail: bool,
    registry: RealmRegistry,
}

impl FixedProvider {
    fn new(name: &'static str, kind: RealmKind, relevance: i32) -> Self {
        FixedProvider {
            name,
            kind,
            relevance,
            delay: Duration::ZERO,
            fail: false,
            registry: RealmRegistry::new(&provider_path(name)),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Provider for FixedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kinds(&self) -> &'static [RealmKind] {
        match self.kind {
            RealmKind::Kerberos => &[RealmKind::Kerberos],
            RealmKind::SambaAd => &[RealmKind::SambaAd],
            RealmKind::SssdAd => &[RealmKind::SssdAd],
            RealmKind::SssdIpa => &[RealmKind::SssdIpa],
        }
    }

    async fn discover(
        &self,
        string: &str,
        _options: &Options,
        _inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(RealmError::Failed(format!("{} failed", self.name)));
        }
        if self.relevance == 0 {
            return Ok(Discovered::none());
        }
        let realm = self
            .registry
            .lookup_or_register(self.kind, string, None)
            .await;
        Ok(Discovered::one(self.relevance, realm))
    }

    async fn realms(&self) -> Vec<Arc<Realm>> {
        self.registry.realms().await
    }

    async fn refresh(&self) {}
}

fn all(providers: Vec<FixedProvider>, timeout: Duration) -> AllProvider {
    sketching::test_init();
    let providers = providers
        .into_iter()
        .map(|p| Arc::new(p) as Arc<dyn Provider>)
        .collect();
    AllProvider::new(providers, timeout)
}

fn kinds(discovered: &Discovered) -> Vec<RealmKind> {
    discovered.realms.iter().map(|r| r.kind()).collect()
}

#[tokio::test]
async fn test_results_ranked_by_relevance() {
    let all = all(
        vec![
            FixedProvider::new("Samba", RealmKind::SambaAd, 50),
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100),
            FixedProvider::new("Kerberos", RealmKind::Kerberos, 0),
        ],
        Duration::ZERO,
    );
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(discovered.relevance, 100);
    assert_eq!(kinds(&discovered), vec![RealmKind::SssdAd, RealmKind::SambaAd]);
}

#[tokio::test]
async fn test_ties_keep_registration_order() {
    let all = all(
        vec![
            FixedProvider::new("Kerberos", RealmKind::Kerberos, 10)
                .delayed(Duration::from_millis(50)),
            FixedProvider::new("Samba", RealmKind::SambaAd, 10),
        ],
        Duration::ZERO,
    );
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(kinds(&discovered), vec![RealmKind::Kerberos, RealmKind::SambaAd]);
}

#[tokio::test]
async fn test_no_providers() {
    let all = all(Vec::new(), Duration::ZERO);
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert!(discovered.is_empty());
    assert_eq!(discovered.relevance, 0);
}

#[tokio::test]
async fn test_errors_only_surface_without_results() {
    let inv = Invocation::detached();

    let all_failing = all(
        vec![
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100).failing(),
            FixedProvider::new("Samba", RealmKind::SambaAd, 50)
                .failing()
                .delayed(Duration::from_millis(20)),
        ],
        Duration::ZERO,
    );
    assert_eq!(
        all_failing
            .discover("example.com", &Options::default(), &inv)
            .await
            .map(|d| d.relevance),
        Err(RealmError::Failed("Sssd failed".to_string()))
    );

    let one_failing = all(
        vec![
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100).failing(),
            FixedProvider::new("Samba", RealmKind::SambaAd, 50),
        ],
        Duration::ZERO,
    );
    let discovered = one_failing
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(discovered.relevance, 50);
    assert_eq!(kinds(&discovered), vec![RealmKind::SambaAd]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_returns_early_results() {
    let all = all(
        vec![
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100).delayed(Duration::from_secs(600)),
            FixedProvider::new("Samba", RealmKind::SambaAd, 50),
        ],
        Duration::from_secs(15),
    );
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(kinds(&discovered), vec![RealmKind::SambaAd]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_waits_for_a_first_result() {
    let all = all(
        vec![
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100).delayed(Duration::from_secs(60)),
            FixedProvider::new("Samba", RealmKind::SambaAd, 50).delayed(Duration::from_secs(600)),
        ],
        Duration::from_secs(15),
    );
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");
    assert_eq!(kinds(&discovered), vec![RealmKind::SssdAd]);
}

#[tokio::test]
async fn test_operations_route_to_owner() {
    let all = all(
        vec![
            FixedProvider::new("Sssd", RealmKind::SssdAd, 100),
            FixedProvider::new("Kerberos", RealmKind::Kerberos, 10),
        ],
        Duration::ZERO,
    );
    let inv = Invocation::detached();
    let discovered = all
        .discover("example.com", &Options::default(), &inv)
        .await
        .expect("discovery failed");

    for realm in discovered.realms.iter() {
        let owner = all.provider_for(realm).expect("no owner");
        assert!(owner.kinds().contains(&realm.kind()));
    }
    assert_eq!(all.realms().await.len(), 2);
}
