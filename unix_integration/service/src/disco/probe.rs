//! DNS based domain probes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use realmd_common::constants::{
    DISCOVERY_CACHE_TIMEOUT, IDENTIFIER_ACTIVE_DIRECTORY, IDENTIFIER_IPA,
};
use realmd_common::error::RealmError;

use super::cache::DiscoCache;
use super::dns::{DnsError, SrvResolver, SrvTarget};
use super::*;
use crate::command::CommandRunner;
use crate::diagnostics::Invocation;

const FLAVOR_AD: &str = "ad";
const FLAVOR_KERBEROS: &str = "kerberos";

// Only the first few KDCs are asked whether they are IPA servers.
const IPA_PROBE_LIMIT: usize = 3;

/// Trim, lowercase and drop the trailing dot from a candidate name. An empty candidate
/// means the domain of this host.
pub fn normalize_candidate(candidate: &str) -> Option<String> {
    let name = candidate.trim().trim_end_matches('.').to_lowercase();
    if name.is_empty() {
        host_domain()
    } else {
        Some(name)
    }
}

pub fn host_name() -> Option<String> {
    nix::unistd::gethostname()
        .map_err(|e| {
            warn!(?e, "unable to read the host name");
        })
        .ok()
        .and_then(|h| h.into_string().ok())
}

/// The domain part of this host's name, if it has one.
pub fn host_domain() -> Option<String> {
    let host = host_name()?;
    let (_, domain) = host.split_once('.')?;
    let domain = domain.trim_end_matches('.').to_lowercase();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Wait for both futures. Fails with whichever error arrived first, but only after the
/// other branch has finished too.
pub async fn join_first_error<A, B, TA, TB>(a: A, b: B) -> Result<(TA, TB), RealmError>
where
    A: Future<Output = Result<TA, RealmError>>,
    B: Future<Output = Result<TB, RealmError>>,
{
    tokio::pin!(a);
    tokio::pin!(b);
    let mut done_a = false;
    let mut done_b = false;
    let mut value_a = None;
    let mut value_b = None;
    let mut first_error = None;

    while !(done_a && done_b) {
        tokio::select! {
            r = &mut a, if !done_a => {
                done_a = true;
                match r {
                    Ok(v) => value_a = Some(v),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            r = &mut b, if !done_b => {
                done_b = true;
                match r {
                    Ok(v) => value_b = Some(v),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
    }

    match (first_error, value_a, value_b) {
        (Some(e), _, _) => Err(e),
        (None, Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RealmError::internal("Discovery probe did not complete")),
    }
}

fn kdc_list(targets: &[SrvTarget]) -> Vec<String> {
    targets.iter().map(|t| t.to_string()).collect()
}

pub struct DiscoveryProbe {
    resolver: Arc<dyn SrvResolver>,
    runner: Arc<CommandRunner>,
    cache: DiscoCache,
}

impl DiscoveryProbe {
    pub fn new(resolver: Arc<dyn SrvResolver>, runner: Arc<CommandRunner>) -> Self {
        DiscoveryProbe {
            resolver,
            runner,
            cache: DiscoCache::new(Duration::from_secs(DISCOVERY_CACHE_TIMEOUT)),
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Is this name an Active Directory domain? Needs both the kerberos SRV records and
    /// the `_msdcs` zone to be present.
    #[instrument(level = "debug", skip_all, fields(%domain))]
    pub async fn discover_ad(
        &self,
        domain: &str,
        inv: &Invocation,
    ) -> Result<Option<Disco>, RealmError> {
        if let Some(cached) = self.cache.get(domain, FLAVOR_AD).await {
            debug!("using cached discovery");
            return Ok(cached);
        }

        inv.info(format!("Searching for kerberos SRV records on domain: {}", domain));

        let srv = async {
            match self.resolver.lookup_srv("kerberos", "udp", domain).await {
                Ok(targets) => Ok(targets),
                Err(DnsError::NotFound) => Ok(Vec::new()),
                Err(e) => {
                    inv.error(&e, "Couldn't look up SRV records");
                    Err(RealmError::Failed(format!(
                        "Couldn't look up SRV records for domain: {}: {}",
                        domain, e
                    )))
                }
            }
        };

        let soa = async {
            self.runner
                .run_known("host-soa", &[format!("_msdcs.{}", domain)], &[], None, inv)
                .await
                .map(|out| out.success())
        };

        let (targets, msdcs) = join_first_error(srv, soa).await?;

        let disco = if !targets.is_empty() && msdcs {
            inv.info(format!("Found AD style DNS records on domain: {}", domain));
            let mut disco = Disco::new(domain);
            disco.set(KEY_REALM, domain.to_uppercase());
            disco.set_list(KEY_KDCS, kdc_list(&targets));
            disco.set(KEY_TYPE, TYPE_KERBEROS_AD);
            disco.set(KEY_SERVER_SOFTWARE, IDENTIFIER_ACTIVE_DIRECTORY);
            Some(disco)
        } else {
            inv.info(format!(
                "Couldn't find AD style DNS records on domain: {}",
                domain
            ));
            None
        };

        self.cache.insert(domain, FLAVOR_AD, disco.clone()).await;
        Ok(disco)
    }

    /// Is this name a kerberos realm, and if so which kind?
    #[instrument(level = "debug", skip_all, fields(%domain))]
    pub async fn discover_kerberos(
        &self,
        domain: &str,
        inv: &Invocation,
    ) -> Result<Option<Disco>, RealmError> {
        if let Some(cached) = self.cache.get(domain, FLAVOR_KERBEROS).await {
            debug!("using cached discovery");
            return Ok(cached);
        }

        inv.info(format!("Searching for kerberos SRV records on domain: {}", domain));

        let lenient = |res: Result<Vec<SrvTarget>, DnsError>, what: &str| match res {
            Ok(t) => Ok(t),
            Err(DnsError::NotFound) => Ok(Vec::new()),
            Err(DnsError::TemporaryFailure(m)) => {
                inv.warn(format!("Temporary failure looking up {}: {}", what, m));
                Ok(Vec::new())
            }
            Err(e) => Err(RealmError::Failed(format!(
                "Couldn't look up {} for domain: {}: {}",
                what, domain, e
            ))),
        };

        let kdcs = async {
            lenient(
                self.resolver.lookup_srv("kerberos", "udp", domain).await,
                "kerberos SRV records",
            )
        };
        let msdcs_and_txt = join_first_error(
            async {
                lenient(
                    self.resolver
                        .lookup_srv("kerberos", "tcp", &format!("dc._msdcs.{}", domain))
                        .await,
                    "MSDCS SRV records",
                )
            },
            async {
                match self
                    .resolver
                    .lookup_txt(&format!("_kerberos.{}", domain))
                    .await
                {
                    Ok(txt) => Ok(txt),
                    Err(e) => {
                        debug!(%e, "no kerberos TXT record");
                        Ok(Vec::new())
                    }
                }
            },
        );

        let (targets, (msdcs, txt)) = join_first_error(kdcs, msdcs_and_txt).await?;

        if targets.is_empty() {
            inv.info(format!("No kerberos SRV records found on domain: {}", domain));
            self.cache.insert(domain, FLAVOR_KERBEROS, None).await;
            return Ok(None);
        }

        let realm = txt
            .into_iter()
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| domain.to_string())
            .to_uppercase();

        let mut disco = Disco::new(domain);
        disco.set(KEY_REALM, realm);
        disco.set_list(KEY_KDCS, kdc_list(&targets));

        if !msdcs.is_empty() {
            inv.info(format!("Found MSDCS records on domain: {}", domain));
            disco.set(KEY_TYPE, TYPE_KERBEROS_AD);
            disco.set(KEY_SERVER_SOFTWARE, IDENTIFIER_ACTIVE_DIRECTORY);
        } else if self.probe_ipa(&targets, inv).await? {
            disco.set(KEY_TYPE, TYPE_KERBEROS_IPA);
            disco.set(KEY_SERVER_SOFTWARE, IDENTIFIER_IPA);
        } else {
            disco.set(KEY_TYPE, TYPE_KERBEROS);
        }

        self.cache
            .insert(domain, FLAVOR_KERBEROS, Some(disco.clone()))
            .await;
        Ok(Some(disco))
    }

    async fn probe_ipa(&self, targets: &[SrvTarget], inv: &Invocation) -> Result<bool, RealmError> {
        for target in targets.iter().take(IPA_PROBE_LIMIT) {
            let url = format!("https://{}/ipa/config/ca.crt", target.host);
            match self
                .runner
                .run_known("ipa-probe", &[url], &[], None, inv)
                .await
            {
                Ok(out) if out.success() => {
                    inv.info(format!("Found IPA server: {}", target.host));
                    return Ok(true);
                }
                Ok(_) => debug!(host = %target.host, "not an IPA server"),
                Err(RealmError::Cancelled(m)) => return Err(RealmError::Cancelled(m)),
                Err(e) => inv.warn(format!("Couldn't probe {}: {}", target.host, e)),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_error_wins_after_both_finish() {
        let slow_err = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<(), _>(RealmError::Failed("slow".into()))
        };
        let fast_err = async { Err::<(), _>(RealmError::Failed("fast".into())) };
        assert_eq!(
            join_first_error(slow_err, fast_err).await,
            Err(RealmError::Failed("fast".into()))
        );

        let ok = async { Ok::<_, RealmError>(1) };
        let err = async { Err::<u8, _>(RealmError::internal("boom")) };
        assert_eq!(
            join_first_error(ok, err).await,
            Err(RealmError::internal("boom"))
        );

        let a = async { Ok::<_, RealmError>(1) };
        let b = async { Ok::<_, RealmError>("two") };
        assert_eq!(join_first_error(a, b).await, Ok((1, "two")));
    }

    #[test]
    fn test_normalize_candidate() {
        assert_eq!(
            normalize_candidate("  Example.COM. ").as_deref(),
            Some("example.com")
        );
    }
}
