use std::sync::Arc;

use async_trait::async_trait;
use realmd_common::error::RealmError;
use realmd_common::proto::{Options, RealmKind};

use super::interface::{provider_path, Discovered, Provider};
use super::{run_enroll, run_unenroll};
use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::disco::probe::normalize_candidate;
use crate::membership::kerberos::{parse_dropin, KerberosMembership, DROPIN_PREFIX};
use crate::pipeline::{check_enroll, check_unenroll};
use crate::realm::{Realm, RealmState};
use crate::registry::RealmRegistry;
use crate::tools::Tools;

const NAME: &str = "Kerberos";

/// Plain kerberos realms. This answers last, only when no more specific backend was
/// asked for.
pub struct KerberosProvider {
    tools: Arc<Tools>,
    registry: RealmRegistry,
}

impl KerberosProvider {
    pub fn new(tools: Arc<Tools>) -> Self {
        KerberosProvider {
            tools,
            registry: RealmRegistry::new(&provider_path(NAME)),
        }
    }

    /// The (realm, domain) of each snippet we have written.
    fn configured_realms(&self) -> Vec<(String, String)> {
        let dir = &self.tools.config.krb5_conf_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                debug!(?e, dir = %dir.display(), "unable to read kerberos config dir");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(DROPIN_PREFIX))
            })
            .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
            .filter_map(|text| parse_dropin(&text))
            .collect()
    }
}

#[async_trait]
impl Provider for KerberosProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kinds(&self) -> &'static [RealmKind] {
        &[RealmKind::Kerberos]
    }

    async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        if options.client_software.is_some() || options.membership_software.is_some() {
            return Ok(Discovered::none());
        }
        let Some(domain) = normalize_candidate(string) else {
            return Ok(Discovered::none());
        };

        let Some(disco) = self.tools.probe.discover_kerberos(&domain, inv).await? else {
            return Ok(Discovered::none());
        };
        // Only answer for a more specific server type if it was asked for.
        let server = disco.server_software().unwrap_or("kerberos");
        if let Some(want) = &options.server_software {
            if !want.eq_ignore_ascii_case(server) {
                return Ok(Discovered::none());
            }
        }

        let realm = self
            .registry
            .lookup_or_register(RealmKind::Kerberos, &domain, Some(disco))
            .await;
        Ok(Discovered::one(10, realm))
    }

    async fn realms(&self) -> Vec<Arc<Realm>> {
        self.registry.realms().await
    }

    async fn refresh(&self) {
        let configured = self.configured_realms();
        for (_, domain) in configured.iter() {
            self.registry
                .lookup_or_register(RealmKind::Kerberos, domain, None)
                .await;
        }

        for realm in self.registry.realms().await {
            let found = configured
                .iter()
                .find(|(_, domain)| domain.eq_ignore_ascii_case(realm.name()));
            let state = match found {
                Some((realm_name, domain)) => RealmState {
                    configured: true,
                    realm_name: Some(realm_name.clone()),
                    domain_name: Some(domain.clone()),
                    ..Default::default()
                },
                None => RealmState::default(),
            };
            realm.set_state(state).await;
        }
    }

    async fn check_join(
        &self,
        realm: &Arc<Realm>,
        credential: &Credential,
        options: &Options,
    ) -> Result<(), RealmError> {
        check_enroll(
            realm,
            credential,
            None,
            options,
            self.tools.host_name.as_deref(),
        )
        .await
    }

    async fn join(
        &self,
        realm: &Arc<Realm>,
        credential: Arc<Credential>,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let res = run_enroll(&KerberosMembership, &self.tools, realm, credential, options, inv).await;
        self.refresh().await;
        res
    }

    async fn check_leave(
        &self,
        realm: &Arc<Realm>,
        credential: &Credential,
        options: &Options,
    ) -> Result<(), RealmError> {
        check_unenroll(realm, credential, options).await
    }

    async fn leave(
        &self,
        realm: &Arc<Realm>,
        credential: Arc<Credential>,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let res =
            run_unenroll(&KerberosMembership, &self.tools, realm, credential, options, inv).await;
        self.refresh().await;
        res
    }
}
