//! Backends which own realms, and the aggregator that fronts them.

use std::sync::Arc;

use realmd_common::error::RealmError;
use realmd_common::proto::Options;

use crate::credential::Credential;
use crate::diagnostics::Invocation;
use crate::membership::Membership;
use crate::pipeline::{self, PipelineContext};
use crate::realm::Realm;
use crate::tools::Tools;

pub mod all;
pub mod interface;
pub mod kerberos;
pub mod samba;
pub mod sssd;

pub use self::all::AllProvider;
pub use self::interface::{Discovered, LoginPolicyChange, Provider};
pub use self::kerberos::KerberosProvider;
pub use self::samba::SambaProvider;
pub use self::sssd::SssdProvider;

pub(crate) async fn run_enroll(
    membership: &dyn Membership,
    tools: &Tools,
    realm: &Arc<Realm>,
    credential: Arc<Credential>,
    options: &Options,
    inv: &Invocation,
) -> Result<(), RealmError> {
    let mut ctx =
        PipelineContext::new(Arc::clone(realm), credential, options.clone(), inv.clone()).await;
    pipeline::enroll(membership, tools, &mut ctx).await
}

pub(crate) async fn run_unenroll(
    membership: &dyn Membership,
    tools: &Tools,
    realm: &Arc<Realm>,
    credential: Arc<Credential>,
    options: &Options,
    inv: &Invocation,
) -> Result<(), RealmError> {
    let mut ctx =
        PipelineContext::new(Arc::clone(realm), credential, options.clone(), inv.clone()).await;
    pipeline::unenroll(membership, tools, &mut ctx).await
}
