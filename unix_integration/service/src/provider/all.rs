//! Fans discovery out to every provider and merges what comes back, and routes the
//! other operations to whichever provider owns the realm.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use realmd_common::constants::OBJECT_PATH_PREFIX;
use realmd_common::error::RealmError;
use realmd_common::proto::{Options, RealmKind};

use super::interface::{Discovered, LoginPolicyChange, Provider};
use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::realm::Realm;

pub struct AllProvider {
    providers: Vec<Arc<dyn Provider>>,
    discovery_timeout: Option<Duration>,
}

/// Order results by relevance, highest first, then by the order the providers were
/// registered. The aggregate relevance is that of the best result.
pub fn merge(mut results: Vec<(usize, Discovered)>) -> Discovered {
    results.sort_by(|(ia, a), (ib, b)| b.relevance.cmp(&a.relevance).then(ia.cmp(ib)));
    let relevance = results.first().map(|(_, d)| d.relevance).unwrap_or(0);
    let mut realms: Vec<Arc<Realm>> = Vec::new();
    for (_, discovered) in results {
        for realm in discovered.realms {
            if !realms.iter().any(|r| Arc::ptr_eq(r, &realm)) {
                realms.push(realm);
            }
        }
    }
    Discovered { relevance, realms }
}

impl AllProvider {
    /// A zero timeout waits for every provider.
    pub fn new(providers: Vec<Arc<dyn Provider>>, discovery_timeout: Duration) -> Self {
        AllProvider {
            providers,
            discovery_timeout: if discovery_timeout.is_zero() {
                None
            } else {
                Some(discovery_timeout)
            },
        }
    }

    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    pub fn provider_for(&self, realm: &Realm) -> Option<Arc<dyn Provider>> {
        self.providers.iter().find(|p| p.owns(realm)).cloned()
    }

    fn owner(&self, realm: &Realm) -> Result<Arc<dyn Provider>, RealmError> {
        self.provider_for(realm).ok_or_else(|| {
            RealmError::Internal(format!("No provider for realm: {}", realm.name()))
        })
    }
}

#[async_trait]
impl Provider for AllProvider {
    fn name(&self) -> &'static str {
        "All"
    }

    fn path(&self) -> String {
        OBJECT_PATH_PREFIX.to_string()
    }

    fn kinds(&self) -> &'static [RealmKind] {
        &[
            RealmKind::Kerberos,
            RealmKind::SambaAd,
            RealmKind::SssdAd,
            RealmKind::SssdIpa,
        ]
    }

    fn owns(&self, realm: &Realm) -> bool {
        self.provider_for(realm).is_some()
    }

    #[instrument(level = "debug", skip_all, fields(%string))]
    async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        let mut pending: FuturesUnordered<_> = self
            .providers
            .iter()
            .enumerate()
            .map(|(i, provider)| async move { (i, provider.discover(string, options, inv).await) })
            .collect();

        let timer = async {
            match self.discovery_timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timer);

        let mut results: Vec<(usize, Discovered)> = Vec::new();
        let mut first_error: Option<RealmError> = None;
        let mut timed_out = false;

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    None => break,
                    Some((i, Ok(discovered))) => {
                        if !discovered.is_empty() {
                            debug!(provider = %self.providers[i].name(), relevance = %discovered.relevance, "provider discovered realms");
                            results.push((i, discovered));
                            if timed_out {
                                break;
                            }
                        }
                    }
                    Some((i, Err(e))) => {
                        error!(provider = %self.providers[i].name(), ?e, "discovery failed");
                        first_error.get_or_insert(e);
                    }
                },
                _ = &mut timer, if !timed_out => {
                    timed_out = true;
                    if !results.is_empty() {
                        debug!("discovery timed out, using the results found so far");
                        break;
                    }
                }
            }
        }

        if results.is_empty() {
            return match first_error {
                Some(e) => Err(e),
                None => Ok(Discovered::none()),
            };
        }
        Ok(merge(results))
    }

    async fn realms(&self) -> Vec<Arc<Realm>> {
        let mut realms = Vec::new();
        for provider in self.providers.iter() {
            realms.extend(provider.realms().await);
        }
        realms
    }

    async fn refresh(&self) {
        for provider in self.providers.iter() {
            provider.refresh().await;
        }
    }

    async fn check_join(
        &self,
        realm: &Arc<Realm>,
        credential: &Credential,
        options: &Options,
    ) -> Result<(), RealmError> {
        self.owner(realm)?
            .check_join(realm, credential, options)
            .await
    }

    async fn join(
        &self,
        realm: &Arc<Realm>,
        credential: Arc<Credential>,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        self.owner(realm)?
            .join(realm, credential, options, inv)
            .await
    }

    async fn check_leave(
        &self,
        realm: &Arc<Realm>,
        credential: &Credential,
        options: &Options,
    ) -> Result<(), RealmError> {
        self.owner(realm)?
            .check_leave(realm, credential, options)
            .await
    }

    async fn leave(
        &self,
        realm: &Arc<Realm>,
        credential: Arc<Credential>,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        self.owner(realm)?
            .leave(realm, credential, options, inv)
            .await
    }

    async fn change_login_policy(
        &self,
        realm: &Arc<Realm>,
        change: &LoginPolicyChange,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        self.owner(realm)?
            .change_login_policy(realm, change, inv)
            .await
    }
}
