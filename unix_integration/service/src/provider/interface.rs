use std::sync::Arc;

use async_trait::async_trait;
use realmd_common::constants::OBJECT_PATH_PREFIX;
use realmd_common::error::RealmError;
use realmd_common::proto::{LoginPolicy, Options, RealmKind};

use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::realm::Realm;

/// The outcome of asking a provider about a name. Realms are in the order the provider
/// prefers them.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub relevance: i32,
    pub realms: Vec<Arc<Realm>>,
}

impl Discovered {
    pub fn none() -> Self {
        Discovered::default()
    }

    pub fn one(relevance: i32, realm: Arc<Realm>) -> Self {
        Discovered {
            relevance,
            realms: vec![realm],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.realms.is_empty()
    }
}

/// A requested change to a realm's login policy.
#[derive(Debug, Clone, Default)]
pub struct LoginPolicyChange {
    pub policy: LoginPolicy,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

pub fn provider_path(name: &str) -> String {
    format!("{}/{}", OBJECT_PATH_PREFIX, name)
}

/// Does the caller's choice of software allow this provider to answer? Unset options
/// match anything.
pub fn match_software(
    options: &Options,
    server: &str,
    client: Option<&str>,
    membership: Option<&str>,
) -> bool {
    let matches = |want: &Option<String>, have: Option<&str>| match want {
        None => true,
        Some(w) => have.is_some_and(|h| h.eq_ignore_ascii_case(w)),
    };
    matches(&options.server_software, Some(server))
        && matches(&options.client_software, client)
        && matches(&options.membership_software, membership)
}

/// A backend which can discover, join, leave and manage logins for some kinds of realm.
/// Operations that a backend has no notion of are refused with `NotSupported`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    fn path(&self) -> String {
        provider_path(self.name())
    }

    /// The realm kinds this provider owns.
    fn kinds(&self) -> &'static [RealmKind];

    fn owns(&self, realm: &Realm) -> bool {
        self.kinds().contains(&realm.kind())
    }

    /// Probe `string` for realms this provider handles. `Ok` with nothing in it means the
    /// name isn't for us, or we declined because of the options.
    async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError>;

    async fn realms(&self) -> Vec<Arc<Realm>>;

    /// Re-read the local configuration and bring every known realm up to date.
    async fn refresh(&self);

    /// Checks which must pass before the operation lock is taken.
    async fn check_join(
        &self,
        _realm: &Arc<Realm>,
        _credential: &Credential,
        _options: &Options,
    ) -> Result<(), RealmError> {
        Err(RealmError::NotSupported(
            "Joining this realm is not supported".to_string(),
        ))
    }

    async fn join(
        &self,
        _realm: &Arc<Realm>,
        _credential: Arc<Credential>,
        _options: &Options,
        _inv: &Invocation,
    ) -> Result<(), RealmError> {
        Err(RealmError::NotSupported(
            "Joining this realm is not supported".to_string(),
        ))
    }

    async fn check_leave(
        &self,
        _realm: &Arc<Realm>,
        _credential: &Credential,
        _options: &Options,
    ) -> Result<(), RealmError> {
        Err(RealmError::NotSupported(
            "Leaving this realm is not supported".to_string(),
        ))
    }

    async fn leave(
        &self,
        _realm: &Arc<Realm>,
        _credential: Arc<Credential>,
        _options: &Options,
        _inv: &Invocation,
    ) -> Result<(), RealmError> {
        Err(RealmError::NotSupported(
            "Leaving this realm is not supported".to_string(),
        ))
    }

    async fn change_login_policy(
        &self,
        _realm: &Arc<Realm>,
        _change: &LoginPolicyChange,
        _inv: &Invocation,
    ) -> Result<(), RealmError> {
        Err(RealmError::NotSupported(
            "Changing the login policy is not supported for this realm".to_string(),
        ))
    }
}
