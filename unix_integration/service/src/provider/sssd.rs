use std::sync::Arc;

use async_trait::async_trait;
use realmd_common::constants::{
    IDENTIFIER_ACTIVE_DIRECTORY, IDENTIFIER_IPA, IDENTIFIER_SAMBA, IDENTIFIER_SSSD,
};
use realmd_common::error::RealmError;
use realmd_common::proto::{LoginPolicy, Options, RealmKind};

use super::interface::{match_software, provider_path, Discovered, LoginPolicyChange, Provider};
use super::{run_enroll, run_unenroll};
use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::disco::probe::normalize_candidate;
use crate::disco::{KEY_CLIENT_SOFTWARE, KEY_MEMBERSHIP_SOFTWARE};
use crate::ini::{self, IniChanges, IniConfig};
use crate::login::{format_login, parse_all};
use crate::membership::sssd::{domain_section, SssdAdMembership, SssdIpaMembership, SSSD};
use crate::membership::Membership;
use crate::pipeline::{check_enroll, check_unenroll};
use crate::realm::{Realm, RealmState};
use crate::registry::RealmRegistry;
use crate::services;
use crate::tools::Tools;

const NAME: &str = "Sssd";
const ALLOW_USERS: &str = "simple_allow_users";
const ALLOW_GROUPS: &str = "simple_allow_groups";

fn is_true(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v == "1"
    })
}

/// Turn sssd's printf style `full_name_format` into one of our login formats.
pub fn login_format(full_name_format: Option<&str>, domain: &str) -> String {
    full_name_format
        .unwrap_or("%1$s@%2$s")
        .replace("%1$s", "%U")
        .replace("%2$s", domain)
        .replace("%3$s", "")
}

/// Work out a login policy from a domain section.
pub fn read_login_policy(conf: &IniConfig, section: &str) -> (LoginPolicy, Vec<String>) {
    let users = conf.get_list(section, ALLOW_USERS, ',');
    let policy = match conf.get(section, "access_provider") {
        Some("permit") => LoginPolicy::AllowAnyLogin,
        Some("deny") => LoginPolicy::DenyAnyLogin,
        Some("simple") => {
            if users.is_empty() && conf.get_list(section, ALLOW_GROUPS, ',').is_empty() {
                LoginPolicy::DenyAnyLogin
            } else {
                LoginPolicy::AllowPermittedLogins
            }
        }
        Some("ad") | Some("ipa") | None => LoginPolicy::AllowRealmLogins,
        Some(other) => {
            debug!(%other, "unrecognised access provider");
            LoginPolicy::Unknown
        }
    };
    (policy, users)
}

/// Active Directory and IPA domains through sssd. Any number of domains may be joined.
pub struct SssdProvider {
    tools: Arc<Tools>,
    registry: RealmRegistry,
}

impl SssdProvider {
    pub fn new(tools: Arc<Tools>) -> Self {
        SssdProvider {
            tools,
            registry: RealmRegistry::new(&provider_path(NAME)),
        }
    }

    fn read_config(&self) -> IniConfig {
        IniConfig::read(&self.tools.config.sssd_conf).unwrap_or_else(|e| {
            warn!(?e, "unable to read sssd configuration");
            IniConfig::default()
        })
    }

    fn membership(kind: RealmKind) -> &'static dyn Membership {
        match kind {
            RealmKind::SssdIpa => &SssdIpaMembership,
            _ => &SssdAdMembership,
        }
    }

    fn kind_for(id_provider: Option<&str>) -> Option<RealmKind> {
        match id_provider {
            Some("ad") => Some(RealmKind::SssdAd),
            Some("ipa") => Some(RealmKind::SssdIpa),
            _ => None,
        }
    }

    fn read_state(conf: &IniConfig, realm: &Realm) -> RealmState {
        let section = domain_section(realm.name());
        let active = conf
            .get_list(SSSD, "domains", ',')
            .iter()
            .any(|d| d.eq_ignore_ascii_case(realm.name()));
        if !active || Self::kind_for(conf.get(&section, "id_provider")) != Some(realm.kind()) {
            return RealmState::default();
        }

        let domain = conf
            .get(&section, "ad_domain")
            .or_else(|| conf.get(&section, "ipa_domain"))
            .unwrap_or(realm.name())
            .to_lowercase();
        let login_formats = if is_true(conf.get(&section, "use_fully_qualified_names")) {
            vec![login_format(conf.get(&section, "full_name_format"), &domain)]
        } else {
            vec!["%U".to_string()]
        };
        let (login_policy, permitted_logins) = read_login_policy(conf, &section);

        RealmState {
            configured: true,
            realm_name: conf.get(&section, "krb5_realm").map(str::to_string),
            domain_name: Some(domain),
            login_formats,
            login_policy,
            permitted_logins,
        }
    }
}

#[async_trait]
impl Provider for SssdProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kinds(&self) -> &'static [RealmKind] {
        &[RealmKind::SssdAd, RealmKind::SssdIpa]
    }

    async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        let want_ad = match_software(
            options,
            IDENTIFIER_ACTIVE_DIRECTORY,
            Some(IDENTIFIER_SSSD),
            Some(IDENTIFIER_SAMBA),
        );
        let want_ipa = match_software(
            options,
            IDENTIFIER_IPA,
            Some(IDENTIFIER_SSSD),
            Some(IDENTIFIER_IPA),
        );
        if !want_ad && !want_ipa {
            return Ok(Discovered::none());
        }
        let Some(domain) = normalize_candidate(string) else {
            return Ok(Discovered::none());
        };

        if want_ad {
            if let Some(mut disco) = self.tools.probe.discover_ad(&domain, inv).await? {
                disco.set(KEY_CLIENT_SOFTWARE, IDENTIFIER_SSSD);
                disco.set(KEY_MEMBERSHIP_SOFTWARE, IDENTIFIER_SAMBA);
                let realm = self
                    .registry
                    .lookup_or_register(RealmKind::SssdAd, &domain, Some(disco))
                    .await;
                let relevance = if self
                    .tools
                    .config
                    .ad_default_client
                    .eq_ignore_ascii_case(IDENTIFIER_SSSD)
                {
                    100
                } else {
                    50
                };
                return Ok(Discovered::one(relevance, realm));
            }
        }

        if want_ipa {
            if let Some(mut disco) = self.tools.probe.discover_kerberos(&domain, inv).await? {
                if disco.server_software() == Some(IDENTIFIER_IPA) {
                    disco.set(KEY_CLIENT_SOFTWARE, IDENTIFIER_SSSD);
                    disco.set(KEY_MEMBERSHIP_SOFTWARE, IDENTIFIER_IPA);
                    let realm = self
                        .registry
                        .lookup_or_register(RealmKind::SssdIpa, &domain, Some(disco))
                        .await;
                    return Ok(Discovered::one(100, realm));
                }
            }
        }

        Ok(Discovered::none())
    }

    async fn realms(&self) -> Vec<Arc<Realm>> {
        self.registry.realms().await
    }

    async fn refresh(&self) {
        let conf = self.read_config();
        for name in conf.get_list(SSSD, "domains", ',') {
            let section = domain_section(&name);
            if let Some(kind) = Self::kind_for(conf.get(&section, "id_provider")) {
                self.registry.lookup_or_register(kind, &name, None).await;
            }
        }
        for realm in self.registry.realms().await {
            realm.set_state(Self::read_state(&conf, &realm)).await;
        }
    }

    async fn check_join(
        &self,
        realm: &Arc<Realm>,
        credential: &Credential,
        options: &Options,
    ) -> Result<(), RealmError> {
        let conflict = if self
            .read_config()
            .has_section(&domain_section(realm.name()))
        {
            Some(RealmError::AlreadyConfigured(
                "A domain with this name is already configured".to_string(),
            ))
        } else {
            None
        };
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
        let membership = Self::membership(realm.kind());
        let res = run_enroll(membership, &self.tools, realm, credential, options, inv).await;
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
        let membership = Self::membership(realm.kind());
        let res = run_unenroll(membership, &self.tools, realm, credential, options, inv).await;
        self.refresh().await;
        res
    }

    #[instrument(level = "debug", skip_all, fields(realm = %realm.name(), policy = %change.policy))]
    async fn change_login_policy(
        &self,
        realm: &Arc<Realm>,
        change: &LoginPolicyChange,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let state = realm.state().await;
        if !state.configured {
            return Err(RealmError::NotConfigured(
                "Not joined to this domain".to_string(),
            ));
        }

        let invalid = |login: String| {
            RealmError::InvalidArgument(format!(
                "Invalid login argument '{}' does not match the login format.",
                login
            ))
        };
        let add = parse_all(&state.login_formats, &change.add).map_err(invalid)?;
        let remove = parse_all(&state.login_formats, &change.remove).map_err(invalid)?;
        let canonical = |users: Vec<String>| -> Vec<String> {
            match state.login_formats.first() {
                Some(format) => users.iter().map(|u| format_login(format, u)).collect(),
                None => users,
            }
        };
        let add = canonical(add);
        let remove = canonical(remove);

        let section = domain_section(realm.name());
        let mut changes = IniChanges::new();
        match change.policy {
            LoginPolicy::Unknown => {}
            LoginPolicy::AllowAnyLogin => {
                changes = changes.set(&section, "access_provider", "permit");
            }
            LoginPolicy::AllowRealmLogins => {
                let provider = match realm.kind() {
                    RealmKind::SssdIpa => "ipa",
                    _ => "ad",
                };
                changes = changes.set(&section, "access_provider", provider);
            }
            LoginPolicy::AllowPermittedLogins => {
                changes = changes.set(&section, "access_provider", "simple");
            }
            LoginPolicy::DenyAnyLogin => {
                changes = changes.set(&section, "access_provider", "deny");
            }
        }
        if !add.is_empty() || !remove.is_empty() {
            changes = changes.change_list(&section, ALLOW_USERS, ',', &add, &remove, Some(","));
        }
        if changes.is_empty() {
            return Ok(());
        }

        ini::change_file(&self.tools.config.sssd_conf, &changes)?;
        inv.info(format!(
            "Updated the login policy for {} in {}",
            realm.name(),
            self.tools.config.sssd_conf.display()
        ));
        let res = services::restart(&self.tools, SSSD, inv).await;
        self.refresh().await;
        res
    }
}
