use std::sync::Arc;

use async_trait::async_trait;
use realmd_common::constants::{IDENTIFIER_ACTIVE_DIRECTORY, IDENTIFIER_SAMBA, IDENTIFIER_WINBIND};
use realmd_common::error::RealmError;
use realmd_common::proto::{LoginPolicy, Options, RealmKind};

use super::interface::{match_software, provider_path, Discovered, Provider};
use super::{run_enroll, run_unenroll};
use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::disco::probe::normalize_candidate;
use crate::disco::{KEY_CLIENT_SOFTWARE, KEY_MEMBERSHIP_SOFTWARE};
use crate::ini::IniConfig;
use crate::membership::samba::{read_smb_realm, SambaMembership, SmbRealm};
use crate::pipeline::{check_enroll, check_unenroll};
use crate::realm::{Realm, RealmState};
use crate::registry::RealmRegistry;
use crate::tools::Tools;

const NAME: &str = "Samba";

/// Active Directory through winbind. The host can only be a member of one domain at a
/// time this way.
pub struct SambaProvider {
    tools: Arc<Tools>,
    registry: RealmRegistry,
}

impl SambaProvider {
    pub fn new(tools: Arc<Tools>) -> Self {
        SambaProvider {
            tools,
            registry: RealmRegistry::new(&provider_path(NAME)),
        }
    }

    fn read_config(&self) -> Option<SmbRealm> {
        match IniConfig::read(&self.tools.config.smb_conf) {
            Ok(conf) => read_smb_realm(&conf),
            Err(e) => {
                warn!(?e, "unable to read samba configuration");
                None
            }
        }
    }
}

#[async_trait]
impl Provider for SambaProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kinds(&self) -> &'static [RealmKind] {
        &[RealmKind::SambaAd]
    }

    async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        if !match_software(
            options,
            IDENTIFIER_ACTIVE_DIRECTORY,
            Some(IDENTIFIER_WINBIND),
            Some(IDENTIFIER_SAMBA),
        ) {
            return Ok(Discovered::none());
        }
        let Some(domain) = normalize_candidate(string) else {
            return Ok(Discovered::none());
        };
        let Some(mut disco) = self.tools.probe.discover_ad(&domain, inv).await? else {
            return Ok(Discovered::none());
        };
        disco.set(KEY_CLIENT_SOFTWARE, IDENTIFIER_WINBIND);
        disco.set(KEY_MEMBERSHIP_SOFTWARE, IDENTIFIER_SAMBA);

        let realm = self
            .registry
            .lookup_or_register(RealmKind::SambaAd, &domain, Some(disco))
            .await;
        let relevance = if self
            .tools
            .config
            .ad_default_client
            .eq_ignore_ascii_case(IDENTIFIER_WINBIND)
        {
            100
        } else {
            50
        };
        Ok(Discovered::one(relevance, realm))
    }

    async fn realms(&self) -> Vec<Arc<Realm>> {
        self.registry.realms().await
    }

    async fn refresh(&self) {
        let smb = self.read_config();
        if let Some(smb) = &smb {
            self.registry
                .lookup_or_register(RealmKind::SambaAd, &smb.realm.to_lowercase(), None)
                .await;
        }

        for realm in self.registry.realms().await {
            let state = match &smb {
                Some(smb) if smb.realm.eq_ignore_ascii_case(realm.name()) => RealmState {
                    configured: true,
                    realm_name: Some(smb.realm.clone()),
                    domain_name: Some(smb.realm.to_lowercase()),
                    login_formats: vec![format!("{}{}%U", smb.workgroup, smb.separator)],
                    login_policy: LoginPolicy::AllowRealmLogins,
                    permitted_logins: Vec::new(),
                },
                _ => RealmState::default(),
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
        let mut conflict = None;
        for other in self.registry.realms().await {
            if !Arc::ptr_eq(&other, realm) && other.is_configured().await {
                conflict = Some(RealmError::AlreadyConfigured(
                    "Already enrolled in a realm".to_string(),
                ));
                break;
            }
        }
        check_enroll(
            realm,
            credential,
            conflict,
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
        let res = run_enroll(&SambaMembership, &self.tools, realm, credential, options, inv).await;
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
        let res = run_unenroll(&SambaMembership, &self.tools, realm, credential, options, inv).await;
        self.refresh().await;
        res
    }
}
