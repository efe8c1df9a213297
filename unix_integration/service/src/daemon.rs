//! The daemon's state and the handlers behind each request.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use hashbrown::HashMap;
use realmd_common::config::RealmdConfig;
use realmd_common::constants::{
    ACTION_CONFIGURE_REALM, ACTION_DECONFIGURE_REALM, ACTION_DISCOVER_REALM, ACTION_LOGIN_POLICY,
};
use realmd_common::error::RealmError;
use realmd_common::proto::{
    ClientRequest, ClientResponse, CredentialArg, DaemonStatus, LoginPolicy, Options, RealmInfo,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use crate::authz::{Authorizer, PeerCred};
use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::disco::dns::SrvResolver;
use crate::disco::probe::host_domain;
use crate::pipeline::OperationLock;
use crate::provider::{
    AllProvider, Discovered, KerberosProvider, LoginPolicyChange, Provider, SambaProvider,
    SssdProvider,
};
use crate::realm::Realm;
use crate::tools::Tools;

pub const HOLD_CURRENT_INVOCATION: &str = "current-invocation";

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps the daemon from exiting while it lives.
pub struct Hold {
    name: String,
    holds: Arc<StdMutex<HashMap<String, usize>>>,
}

impl Drop for Hold {
    fn drop(&mut self) {
        let mut holds = lock(&self.holds);
        if let Some(count) = holds.get_mut(&self.name) {
            *count -= 1;
            if *count == 0 {
                holds.remove(&self.name);
            }
        }
        trace!(name = %self.name, "released hold");
    }
}

/// Tracks an invocation by its caller supplied operation id, so it can be cancelled.
struct OperationGuard<'a> {
    id: Option<String>,
    inv: Invocation,
    operations: &'a StdMutex<HashMap<String, (u32, Invocation)>>,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let Some(id) = &self.id else {
            return;
        };
        let mut operations = lock(self.operations);
        if operations
            .get(id)
            .is_some_and(|(_, inv)| inv.is_same(&self.inv))
        {
            operations.remove(id);
        }
    }
}

pub struct Daemon {
    config: Arc<RealmdConfig>,
    tools: Arc<Tools>,
    all: AllProvider,
    authz: Box<dyn Authorizer>,
    busy: Arc<Mutex<()>>,
    holds: Arc<StdMutex<HashMap<String, usize>>>,
    operations: StdMutex<HashMap<String, (u32, Invocation)>>,
    last_activity: StdMutex<Instant>,
}

impl Daemon {
    pub fn new(
        config: Arc<RealmdConfig>,
        resolver: Arc<dyn SrvResolver>,
        authz: Box<dyn Authorizer>,
    ) -> Self {
        let tools = Arc::new(Tools::new(config, resolver));
        Daemon::with_tools(tools, authz)
    }

    /// The providers are registered in preference order, which breaks ties in
    /// discovery relevance.
    pub fn with_tools(tools: Arc<Tools>, authz: Box<dyn Authorizer>) -> Self {
        let providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(SssdProvider::new(Arc::clone(&tools))),
            Arc::new(SambaProvider::new(Arc::clone(&tools))),
            Arc::new(KerberosProvider::new(Arc::clone(&tools))),
        ];
        let all = AllProvider::new(
            providers,
            Duration::from_secs(tools.config.discovery_timeout),
        );
        Daemon {
            config: Arc::clone(&tools.config),
            tools,
            all,
            authz,
            busy: Arc::new(Mutex::new(())),
            holds: Arc::new(StdMutex::new(HashMap::new())),
            operations: StdMutex::new(HashMap::new()),
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    pub fn config(&self) -> &RealmdConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<Tools> {
        &self.tools
    }

    pub fn provider(&self) -> &AllProvider {
        &self.all
    }

    /// Re-read every provider's configuration.
    pub async fn refresh(&self) {
        debug!("refreshing realms");
        self.all.refresh().await;
    }

    pub fn poke(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn hold(&self, name: &str) -> Hold {
        *lock(&self.holds).entry(name.to_string()).or_insert(0) += 1;
        trace!(%name, "taking hold");
        Hold {
            name: name.to_string(),
            holds: Arc::clone(&self.holds),
        }
    }

    pub fn holds(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.holds).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_busy(&self) -> bool {
        self.busy.try_lock().is_err()
    }

    /// Completes once nothing holds the daemon and it has sat idle for the configured
    /// timeout. Never completes when the daemon is set to persist.
    pub async fn wait_for_idle(&self) {
        if self.config.persist || self.config.idle_timeout == 0 {
            return std::future::pending().await;
        }
        let timeout = Duration::from_secs(self.config.idle_timeout);
        loop {
            let deadline = *lock(&self.last_activity) + timeout;
            tokio::time::sleep_until(deadline).await;
            if !lock(&self.holds).is_empty() {
                self.poke();
                continue;
            }
            if lock(&self.last_activity).elapsed() >= timeout {
                info!("idle timeout reached");
                return;
            }
        }
    }

    /// An operation id names at most one running request.
    fn track_operation(
        &self,
        peer: &PeerCred,
        inv: &Invocation,
    ) -> Result<OperationGuard<'_>, RealmError> {
        let id = inv.operation().map(str::to_string);
        if let Some(id) = &id {
            let mut operations = lock(&self.operations);
            if operations.contains_key(id) {
                return Err(RealmError::InvalidArgument(format!(
                    "The operation id is already in use: {}",
                    id
                )));
            }
            operations.insert(id.clone(), (peer.uid, inv.clone()));
        }
        Ok(OperationGuard {
            id,
            inv: inv.clone(),
            operations: &self.operations,
        })
    }

    async fn infos(realms: &[Arc<Realm>]) -> Vec<RealmInfo> {
        let mut infos = Vec::with_capacity(realms.len());
        for realm in realms {
            infos.push(realm.info().await);
        }
        infos
    }

    #[instrument(level = "debug", skip_all, fields(%string))]
    pub async fn discover(
        &self,
        string: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Discovered, RealmError> {
        let candidate = match string.trim() {
            "" => match host_domain() {
                Some(d) => {
                    inv.info(format!("Looking up our DHCP or host domain name: {}", d));
                    d
                }
                None => {
                    inv.info("No default domain could be determined");
                    return Ok(Discovered::none());
                }
            },
            s => s.to_string(),
        };

        self.all
            .discover(&candidate, options, inv)
            .await
            .map_err(|e| {
                inv.error(&e, "Discovery failed");
                match e {
                    RealmError::Cancelled(m) => RealmError::Cancelled(m),
                    _ => RealmError::Failed("Failed to discover realm. See diagnostics.".to_string()),
                }
            })
    }

    pub async fn list_realms(&self) -> Vec<Arc<Realm>> {
        self.all.realms().await
    }

    fn matches_name(realm: &Realm, name: &str) -> bool {
        realm.path() == name || realm.name().eq_ignore_ascii_case(name)
    }

    async fn find_configured(&self, name: &str) -> Result<Arc<Realm>, RealmError> {
        for realm in self.all.realms().await {
            if !realm.is_configured().await {
                continue;
            }
            if name.is_empty()
                || Self::matches_name(&realm, name)
                || realm.realm_name().await.eq_ignore_ascii_case(name)
            {
                return Ok(realm);
            }
        }
        if name.is_empty() {
            Err(RealmError::NotConfigured(
                "Not configured in any realm".to_string(),
            ))
        } else {
            Err(RealmError::NotConfigured(format!(
                "Not configured in the realm: {}",
                name
            )))
        }
    }

    /// A realm to join: an object path we handed out earlier, or a name to discover.
    async fn find_for_join(
        &self,
        name: &str,
        options: &Options,
        inv: &Invocation,
    ) -> Result<Arc<Realm>, RealmError> {
        if name.starts_with('/') {
            return self
                .all
                .realms()
                .await
                .into_iter()
                .find(|r| r.path() == name)
                .ok_or_else(|| RealmError::InvalidArgument(format!("No such realm: {}", name)));
        }
        let discovered = self.discover(name, options, inv).await?;
        discovered.realms.into_iter().next().ok_or_else(|| {
            RealmError::DiscoveredNothing(format!("No such realm found: {}", name))
        })
    }

    #[instrument(level = "debug", skip_all, fields(%name))]
    pub async fn join(
        &self,
        name: &str,
        credential: &CredentialArg,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let credential =
            Credential::parse(credential, &self.config.tmp_dir, self.config.keep_temp_files)?;
        let realm = self.find_for_join(name, options, inv).await?;
        self.all.check_join(&realm, &credential, options).await?;
        let _lock = OperationLock::try_acquire(&self.busy)?;
        self.all.join(&realm, credential, options, inv).await
    }

    #[instrument(level = "debug", skip_all, fields(%name))]
    pub async fn leave(
        &self,
        name: &str,
        credential: &CredentialArg,
        options: &Options,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let credential =
            Credential::parse(credential, &self.config.tmp_dir, self.config.keep_temp_files)?;
        let realm = self.find_configured(name).await?;
        self.all.check_leave(&realm, &credential, options).await?;
        let _lock = OperationLock::try_acquire(&self.busy)?;
        self.all.leave(&realm, credential, options, inv).await
    }

    #[instrument(level = "debug", skip_all, fields(%name, %policy))]
    pub async fn change_login_policy(
        &self,
        name: &str,
        policy: &str,
        add: Vec<String>,
        remove: Vec<String>,
        inv: &Invocation,
    ) -> Result<(), RealmError> {
        let change = LoginPolicyChange {
            policy: policy.parse::<LoginPolicy>()?,
            add,
            remove,
        };
        let realm = self.find_configured(name).await?;
        let _lock = OperationLock::try_acquire(&self.busy)?;
        self.all.change_login_policy(&realm, &change, inv).await
    }

    /// Cancel a running operation. Only its caller, or root, may do so. An unknown id is
    /// not an error, the operation may just have finished.
    pub fn cancel(&self, peer: &PeerCred, operation: &str) -> Result<(), RealmError> {
        let found = lock(&self.operations).get(operation).cloned();
        match found {
            Some((uid, inv)) if uid == peer.uid || peer.uid == 0 => {
                info!(%operation, "cancelling operation");
                inv.cancel();
                Ok(())
            }
            Some(_) => Err(RealmError::NotAuthorized(
                "Not authorized to cancel this operation".to_string(),
            )),
            None => {
                debug!(%operation, "no such operation to cancel");
                Ok(())
            }
        }
    }

    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            busy: self.is_busy(),
            holds: self.holds(),
            realms: self.all.realms().await.len(),
        }
    }

    async fn dispatch(
        &self,
        peer: &PeerCred,
        req: ClientRequest,
        inv: &Invocation,
    ) -> Result<ClientResponse, RealmError> {
        match req {
            ClientRequest::Discover { string, options } => {
                self.authz.check(peer, ACTION_DISCOVER_REALM).await?;
                let discovered = self.discover(&string, &options, inv).await?;
                Ok(ClientResponse::Discovered {
                    relevance: discovered.relevance,
                    realms: Self::infos(&discovered.realms).await,
                })
            }
            ClientRequest::ListRealms => {
                self.authz.check(peer, ACTION_DISCOVER_REALM).await?;
                let realms = self.list_realms().await;
                Ok(ClientResponse::Realms(Self::infos(&realms).await))
            }
            ClientRequest::Join {
                realm,
                credential,
                options,
            } => {
                self.authz.check(peer, ACTION_CONFIGURE_REALM).await?;
                self.join(&realm, &credential, &options, inv).await?;
                Ok(ClientResponse::Success)
            }
            ClientRequest::Leave {
                realm,
                credential,
                options,
            } => {
                self.authz.check(peer, ACTION_DECONFIGURE_REALM).await?;
                self.leave(&realm, &credential, &options, inv).await?;
                Ok(ClientResponse::Success)
            }
            ClientRequest::ChangeLoginPolicy {
                realm,
                policy,
                add,
                remove,
                options: _,
            } => {
                self.authz.check(peer, ACTION_LOGIN_POLICY).await?;
                self.change_login_policy(&realm, &policy, add, remove, inv)
                    .await?;
                Ok(ClientResponse::Success)
            }
            ClientRequest::Cancel { operation } => {
                self.cancel(peer, &operation)?;
                Ok(ClientResponse::Success)
            }
            ClientRequest::Status => {
                self.authz.check(peer, ACTION_DISCOVER_REALM).await?;
                Ok(ClientResponse::Status(self.status().await))
            }
        }
    }

    /// Run one request to completion and produce its final response.
    pub async fn handle_request(
        &self,
        peer: &PeerCred,
        req: ClientRequest,
        inv: &Invocation,
    ) -> ClientResponse {
        self.poke();
        let _hold = self.hold(HOLD_CURRENT_INVOCATION);

        let span = info_span!("client_request", uid = %peer.uid, request = %req.as_safe_string());
        let res = match self.track_operation(peer, inv) {
            Ok(_operation) => self.dispatch(peer, req, inv).instrument(span).await,
            Err(e) => Err(e),
        };
        self.poke();

        match res {
            Ok(resp) => resp,
            Err(e) => {
                debug!(kind = %e.kind(), error = %e, "request failed");
                ClientResponse::Error(e)
            }
        }
    }
}
