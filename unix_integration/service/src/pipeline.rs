//! The join and leave sequences.
//!
//! Both are a fixed run of stages, driven one at a time by [`enroll`] and [`unenroll`].
//! A stage failing ends the run with that error, with one exception: failing to leave
//! the domain is only a warning, so that local configuration is always torn down.

use std::sync::Arc;

use realmd_common::error::RealmError;
use realmd_common::proto::{Options, RealmKind};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;

use crate::credential::{CcacheFile, Credential, CredentialKind};
use crate::diagnostics::Invocation;
use crate::disco::Disco;
use crate::kinit::{kinit, principal_for};
use crate::membership::Membership;
use crate::packages;
use crate::realm::Realm;
use crate::tools::Tools;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Enroll,
    Unenroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Discover,
    InstallPackages,
    Authenticate,
    Join,
    ConfigureLocalServices,
    EnableServices,
    Leave,
    DeconfigureLocalServices,
    DisableServices,
    Completed,
}

impl Stage {
    pub fn next(self, direction: Direction) -> Stage {
        match direction {
            Direction::Enroll => match self {
                Stage::Start => Stage::Discover,
                Stage::Discover => Stage::InstallPackages,
                Stage::InstallPackages => Stage::Authenticate,
                Stage::Authenticate => Stage::Join,
                Stage::Join => Stage::ConfigureLocalServices,
                Stage::ConfigureLocalServices => Stage::EnableServices,
                _ => Stage::Completed,
            },
            Direction::Unenroll => match self {
                Stage::Start => Stage::Discover,
                Stage::Discover => Stage::Authenticate,
                Stage::Authenticate => Stage::Leave,
                Stage::Leave => Stage::DeconfigureLocalServices,
                Stage::DeconfigureLocalServices => Stage::DisableServices,
                _ => Stage::Completed,
            },
        }
    }
}

/// Only one join, leave or policy change may run at a time. Holding this is what
/// makes the daemon busy, it is released when dropped.
pub struct OperationLock {
    _guard: OwnedMutexGuard<()>,
}

impl OperationLock {
    pub fn try_acquire(lock: &Arc<Mutex<()>>) -> Result<Self, RealmError> {
        Arc::clone(lock)
            .try_lock_owned()
            .map(|guard| {
                debug!("operation lock acquired");
                OperationLock { _guard: guard }
            })
            .map_err(|_| RealmError::busy())
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        debug!("operation lock released");
    }
}

/// State owned by a single run through the stages.
pub struct PipelineContext {
    pub realm: Arc<Realm>,
    pub credential: Arc<Credential>,
    pub options: Options,
    pub inv: Invocation,
    pub disco: Option<Disco>,
    /// Ticket obtained by the authenticate stage.
    pub ccache: Option<CcacheFile>,
    /// The stages which actually ran, in order.
    pub ran: Vec<Stage>,
}

impl PipelineContext {
    pub async fn new(
        realm: Arc<Realm>,
        credential: Arc<Credential>,
        options: Options,
        inv: Invocation,
    ) -> Self {
        let disco = realm.disco().await;
        PipelineContext {
            realm,
            credential,
            options,
            inv,
            disco,
            ccache: None,
            ran: Vec::new(),
        }
    }

    /// `KRB5CCNAME` for the tools, from the authenticate stage or the caller.
    pub fn ccname(&self) -> Option<String> {
        match (&self.ccache, &self.credential.kind) {
            (Some(c), _) => Some(c.ccname()),
            (None, CredentialKind::Ccache(c)) => Some(c.ccname()),
            _ => None,
        }
    }

    pub async fn realm_name(&self) -> String {
        match self.disco.as_ref().and_then(|d| d.realm()) {
            Some(r) => r.to_string(),
            None => self.realm.realm_name().await,
        }
    }

    pub async fn domain_name(&self) -> String {
        match self.disco.as_ref().and_then(|d| d.domain()) {
            Some(d) => d.to_string(),
            None => self.realm.domain_name().await,
        }
    }
}

fn host_name_is_bad(name: &str) -> bool {
    let name = name.to_lowercase();
    name == "localhost" || name.starts_with("localhost.")
}

/// Checks made before taking the lock or running anything. `conflict` is the backend's
/// own objection to joining, such as already being joined elsewhere.
pub async fn check_enroll(
    realm: &Realm,
    credential: &Credential,
    conflict: Option<RealmError>,
    options: &Options,
    host_name: Option<&str>,
) -> Result<(), RealmError> {
    if realm.is_configured().await {
        return Err(RealmError::AlreadyConfigured(
            "Already joined to this domain".to_string(),
        ));
    }
    if let Some(e) = conflict {
        return Err(e);
    }
    if !credential.is_supported(&realm.supported_join_credentials()) {
        return Err(RealmError::NotSupported(format!(
            "Joining this realm using a {} credential owned by {} is not supported",
            credential.type_name(),
            credential.owner.as_str()
        )));
    }
    if host_name.is_some_and(host_name_is_bad) {
        return Err(RealmError::BadHostname(
            "This computer's host name is not set correctly.".to_string(),
        ));
    }
    if realm.kind() == RealmKind::SssdIpa && options.computer_ou.is_some() {
        return Err(RealmError::InvalidArgument(
            "The computer-ou argument is not supported when joining an IPA domain."
                .to_string(),
        ));
    }
    Ok(())
}

pub async fn check_unenroll(
    realm: &Realm,
    credential: &Credential,
    options: &Options,
) -> Result<(), RealmError> {
    if !realm.is_configured().await {
        return Err(RealmError::NotConfigured(
            "Not currently joined to this domain".to_string(),
        ));
    }
    if !credential.is_supported(&realm.supported_leave_credentials()) {
        return Err(RealmError::NotSupported(format!(
            "Leaving this realm using a {} credential owned by {} is not supported",
            credential.type_name(),
            credential.owner.as_str()
        )));
    }
    if options.computer_ou.is_some() {
        return Err(RealmError::InvalidArgument(
            "The computer-ou argument is not supported when leaving a domain".to_string(),
        ));
    }
    Ok(())
}

async fn discover(tools: &Tools, ctx: &PipelineContext) -> Result<Option<Disco>, RealmError> {
    let domain = ctx.realm.domain_name().await;
    match ctx.realm.kind() {
        RealmKind::SambaAd | RealmKind::SssdAd => tools.probe.discover_ad(&domain, &ctx.inv).await,
        RealmKind::Kerberos | RealmKind::SssdIpa => {
            tools.probe.discover_kerberos(&domain, &ctx.inv).await
        }
    }
}

async fn authenticate(
    membership: &dyn Membership,
    tools: &Tools,
    ctx: &mut PipelineContext,
) -> Result<(), RealmError> {
    if !membership.uses_kinit() {
        return Ok(());
    }
    let CredentialKind::Password { name, secret } = &ctx.credential.kind else {
        return Ok(());
    };
    let principal = principal_for(name, &ctx.realm_name().await);
    let ccache = kinit(tools, &principal, secret, &ctx.inv).await?;
    ctx.ccache = Some(ccache);
    Ok(())
}

async fn run_stage(
    stage: Stage,
    membership: &dyn Membership,
    tools: &Tools,
    ctx: &mut PipelineContext,
) -> Result<(), RealmError> {
    match stage {
        Stage::Discover => match discover(tools, ctx).await? {
            Some(disco) => {
                ctx.realm.set_disco(disco.clone()).await;
                ctx.disco = Some(disco);
                Ok(())
            }
            None => Err(RealmError::Failed(format!(
                "Couldn't discover the realm: {}",
                ctx.realm.name()
            ))),
        },
        Stage::InstallPackages => {
            packages::install(
                tools,
                membership.package_sets(),
                ctx.options.automatic_install,
                &ctx.inv,
            )
            .await
        }
        Stage::Authenticate => authenticate(membership, tools, ctx).await,
        Stage::Join => membership.join(tools, ctx).await,
        Stage::ConfigureLocalServices => membership.configure(tools, ctx).await,
        Stage::EnableServices => membership.enable_services(tools, ctx).await,
        Stage::Leave => membership.leave(tools, ctx).await,
        Stage::DeconfigureLocalServices => membership.deconfigure(tools, ctx).await,
        Stage::DisableServices => membership.disable_services(tools, ctx).await,
        Stage::Start | Stage::Completed => Ok(()),
    }
}

fn skip_stage(stage: Stage, ctx: &PipelineContext) -> bool {
    match stage {
        Stage::Discover => ctx.disco.is_some(),
        Stage::Start | Stage::Completed => true,
        _ => false,
    }
}

/// Drive the stages for `direction` until completion or the first failure.
pub async fn run(
    direction: Direction,
    membership: &dyn Membership,
    tools: &Tools,
    ctx: &mut PipelineContext,
) -> Result<(), RealmError> {
    let mut stage = Stage::Start;
    loop {
        stage = stage.next(direction);
        if stage == Stage::Completed {
            return Ok(());
        }
        if skip_stage(stage, ctx) {
            debug!(?stage, "skipping stage");
            continue;
        }
        ctx.inv.check_cancelled()?;
        ctx.ran.push(stage);

        let span = debug_span!("stage", ?stage);
        let res = run_stage(stage, membership, tools, ctx)
            .instrument(span)
            .await;

        match (direction, stage, res) {
            (_, _, Ok(())) => {}
            (_, _, Err(RealmError::Cancelled(m))) => return Err(RealmError::Cancelled(m)),
            (Direction::Unenroll, Stage::Discover | Stage::Leave, Err(e)) => {
                ctx.inv.warn(format!(
                    "Couldn't leave the domain, continuing to remove the local configuration: {}",
                    e
                ));
            }
            (_, Stage::EnableServices, Err(e)) => {
                ctx.inv.warn(format!(
                    "Joined the domain, but couldn't enable the local services: {}",
                    e
                ));
                return Err(e);
            }
            (_, _, Err(e)) => {
                ctx.inv.error(&e, format!("Failed at stage {:?}", stage));
                return Err(e);
            }
        }
    }
}

/// Join a realm. The caller holds the [`OperationLock`].
#[instrument(level = "debug", skip_all, fields(realm = %ctx.realm.name()))]
pub async fn enroll(
    membership: &dyn Membership,
    tools: &Tools,
    ctx: &mut PipelineContext,
) -> Result<(), RealmError> {
    ctx.inv.info(format!("Joining the realm: {}", ctx.realm.name()));
    run(Direction::Enroll, membership, tools, ctx).await?;

    if !tools.config.install_mode {
        match tools
            .runner
            .run_known("name-caches-flush", &[], &[], None, &ctx.inv)
            .await
        {
            Ok(out) if out.success() => {}
            Ok(_) => ctx.inv.warn("Couldn't flush the name caches"),
            Err(e) => ctx.inv.warn(format!("Couldn't flush the name caches: {}", e)),
        }
    }

    ctx.inv
        .info(format!("Successfully enrolled machine in realm: {}", ctx.realm.name()));
    Ok(())
}

/// Leave a realm. The caller holds the [`OperationLock`].
#[instrument(level = "debug", skip_all, fields(realm = %ctx.realm.name()))]
pub async fn unenroll(
    membership: &dyn Membership,
    tools: &Tools,
    ctx: &mut PipelineContext,
) -> Result<(), RealmError> {
    ctx.inv.info(format!("Leaving the realm: {}", ctx.realm.name()));
    run(Direction::Unenroll, membership, tools, ctx).await?;
    ctx.inv
        .info(format!("Successfully unenrolled machine from realm: {}", ctx.realm.name()));
    Ok(())
}
