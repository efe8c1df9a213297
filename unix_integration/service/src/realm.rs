use realmd_common::constants::{
    IDENTIFIER_ACTIVE_DIRECTORY, IDENTIFIER_IPA, IDENTIFIER_KERBEROS, IDENTIFIER_SAMBA,
    IDENTIFIER_SSSD, IDENTIFIER_WINBIND,
};
use realmd_common::proto::{LoginPolicy, RealmInfo, RealmKind, SupportedCredential};
use tokio::sync::RwLock;

use crate::disco::Disco;

/// What a provider last read about a realm from the local configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmState {
    pub configured: bool,
    pub realm_name: Option<String>,
    pub domain_name: Option<String>,
    pub login_formats: Vec<String>,
    pub login_policy: LoginPolicy,
    pub permitted_logins: Vec<String>,
}

pub struct Realm {
    kind: RealmKind,
    name: String,
    path: String,
    disco: RwLock<Option<Disco>>,
    state: RwLock<RealmState>,
}

fn creds(pairs: &[(&str, &str)]) -> Vec<SupportedCredential> {
    pairs
        .iter()
        .map(|(kind, owner)| SupportedCredential {
            kind: kind.to_string(),
            owner: owner.to_string(),
        })
        .collect()
}

impl Realm {
    pub(crate) fn new(kind: RealmKind, name: &str, path: String, disco: Option<Disco>) -> Self {
        Realm {
            kind,
            name: name.to_string(),
            path,
            disco: RwLock::new(disco),
            state: RwLock::new(RealmState::default()),
        }
    }

    pub fn kind(&self) -> RealmKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn disco(&self) -> Option<Disco> {
        self.disco.read().await.clone()
    }

    pub async fn set_disco(&self, disco: Disco) {
        *self.disco.write().await = Some(disco);
    }

    pub async fn state(&self) -> RealmState {
        self.state.read().await.clone()
    }

    pub async fn set_state(&self, state: RealmState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!(realm = %self.name, ?state, "realm state changed");
            *current = state;
        }
    }

    pub async fn is_configured(&self) -> bool {
        self.state.read().await.configured
    }

    /// The realm name, from configuration if joined, otherwise from discovery.
    pub async fn realm_name(&self) -> String {
        if let Some(name) = self.state.read().await.realm_name.clone() {
            return name;
        }
        match self.disco.read().await.as_ref().and_then(|d| d.realm()) {
            Some(r) => r.to_string(),
            None => self.name.to_uppercase(),
        }
    }

    pub async fn domain_name(&self) -> String {
        if let Some(name) = self.state.read().await.domain_name.clone() {
            return name;
        }
        match self.disco.read().await.as_ref().and_then(|d| d.domain()) {
            Some(d) => d.to_string(),
            None => self.name.to_lowercase(),
        }
    }

    pub fn server_software(&self) -> &'static str {
        match self.kind {
            RealmKind::Kerberos => IDENTIFIER_KERBEROS,
            RealmKind::SambaAd | RealmKind::SssdAd => IDENTIFIER_ACTIVE_DIRECTORY,
            RealmKind::SssdIpa => IDENTIFIER_IPA,
        }
    }

    pub fn client_software(&self) -> Option<&'static str> {
        match self.kind {
            RealmKind::Kerberos => None,
            RealmKind::SambaAd => Some(IDENTIFIER_WINBIND),
            RealmKind::SssdAd | RealmKind::SssdIpa => Some(IDENTIFIER_SSSD),
        }
    }

    pub fn membership_software(&self) -> Option<&'static str> {
        match self.kind {
            RealmKind::Kerberos => None,
            RealmKind::SambaAd | RealmKind::SssdAd => Some(IDENTIFIER_SAMBA),
            RealmKind::SssdIpa => Some(IDENTIFIER_IPA),
        }
    }

    pub fn suggested_administrator(&self) -> Option<&'static str> {
        match self.kind {
            RealmKind::Kerberos => None,
            RealmKind::SambaAd | RealmKind::SssdAd => Some("Administrator"),
            RealmKind::SssdIpa => Some("admin"),
        }
    }

    pub fn supported_join_credentials(&self) -> Vec<SupportedCredential> {
        match self.kind {
            RealmKind::Kerberos => creds(&[("password", "administrator"), ("password", "user")]),
            RealmKind::SambaAd | RealmKind::SssdAd => creds(&[
                ("ccache", "administrator"),
                ("password", "administrator"),
                ("password", "user"),
            ]),
            RealmKind::SssdIpa => creds(&[
                ("password", "administrator"),
                ("secret", "none"),
                ("automatic", "none"),
            ]),
        }
    }

    pub fn supported_leave_credentials(&self) -> Vec<SupportedCredential> {
        match self.kind {
            RealmKind::Kerberos => creds(&[("automatic", "none")]),
            RealmKind::SambaAd | RealmKind::SssdAd => creds(&[
                ("ccache", "administrator"),
                ("password", "administrator"),
                ("automatic", "none"),
            ]),
            RealmKind::SssdIpa => creds(&[("password", "administrator"), ("automatic", "none")]),
        }
    }

    pub async fn info(&self) -> RealmInfo {
        let state = self.state().await;
        let realm_name = self.realm_name().await;
        let domain_name = self.domain_name().await;
        RealmInfo {
            name: self.name.clone(),
            path: self.path.clone(),
            kind: self.kind,
            realm_name: Some(realm_name),
            domain_name: Some(domain_name),
            configured: state.configured,
            server_software: Some(self.server_software().to_string()),
            client_software: self.client_software().map(str::to_string),
            login_formats: state.login_formats,
            login_policy: state.login_policy,
            permitted_logins: state.permitted_logins,
            suggested_administrator: self.suggested_administrator().map(str::to_string),
            supported_join_credentials: self.supported_join_credentials(),
            supported_leave_credentials: self.supported_leave_credentials(),
        }
    }
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("path", &self.path)
            .finish()
    }
}
