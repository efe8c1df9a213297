use async_trait::async_trait;
use realmd_common::error::RealmError;

use crate::pipeline::PipelineContext;
use crate::tools::Tools;

pub mod kerberos;
pub mod samba;
pub mod sssd;

/// The backend specific steps of joining and leaving. The pipeline decides when each
/// is called, an implementation only does the work of one step.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Package sets (from the `[packages]` configuration) the backend needs.
    fn package_sets(&self) -> &'static [&'static str];

    /// Whether a password is first turned into a kerberos ticket. Backends whose tool
    /// takes the password directly return false.
    fn uses_kinit(&self) -> bool {
        true
    }

    async fn join(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError>;

    async fn configure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError>;

    async fn enable_services(&self, tools: &Tools, ctx: &PipelineContext)
        -> Result<(), RealmError>;

    async fn leave(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError>;

    async fn deconfigure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError>;

    async fn disable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError>;
}
