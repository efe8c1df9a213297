use async_trait::async_trait;
use realmd_common::error::RealmError;

use super::samba::{net_join, net_leave, run_login_command};
use super::Membership;
use crate::credential::CredentialKind;
use crate::diagnostics::Invocation;
use crate::ini::{self, IniChanges, IniConfig};
use crate::login::sssd_home_template;
use crate::pipeline::PipelineContext;
use crate::services;
use crate::tools::Tools;

pub const SSSD: &str = "sssd";

pub fn domain_section(name: &str) -> String {
    format!("domain/{}", name)
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Settings common to both AD and IPA domains, plus adding the domain to the list of
/// active domains.
fn base_changes(tools: &Tools, ctx: &PipelineContext, section: &str) -> IniChanges {
    IniChanges::new()
        .change_list(
            SSSD,
            "domains",
            ',',
            &[ctx.realm.name().to_string()],
            &[],
            None,
        )
        .change_list(
            SSSD,
            "services",
            ',',
            &["nss".to_string(), "pam".to_string()],
            &[],
            None,
        )
        .set(SSSD, "config_file_version", "2")
        .set(section, "cache_credentials", "True")
        .set(section, "krb5_store_password_if_offline", "True")
        .set(section, "use_fully_qualified_names", "True")
        .set(section, "default_shell", tools.config.default_shell.as_str())
        .set(
            section,
            "fallback_homedir",
            sssd_home_template(&tools.config.default_home),
        )
}

async fn enable_sssd(tools: &Tools, inv: &Invocation) -> Result<(), RealmError> {
    services::enable_and_restart(tools, SSSD, inv).await?;
    run_login_command(
        tools,
        "sssd-enable-logins",
        "Enabling SSSD in nsswitch.conf and PAM failed.",
        inv,
    )
    .await
}

fn remove_domain(tools: &Tools, ctx: &PipelineContext) -> Result<IniConfig, RealmError> {
    let name = ctx.realm.name().to_string();
    ini::change_file(
        &tools.config.sssd_conf,
        &IniChanges::new()
            .remove_section(&domain_section(&name))
            .change_list(SSSD, "domains", ',', &[], &[name], None),
    )
}

/// Stop sssd once the last domain is gone, otherwise restart it to drop the old one.
async fn disable_sssd_if_unused(tools: &Tools, inv: &Invocation) -> Result<(), RealmError> {
    let conf = IniConfig::read(&tools.config.sssd_conf)?;
    if conf.get_list(SSSD, "domains", ',').is_empty() {
        run_login_command(
            tools,
            "sssd-disable-logins",
            "Disabling SSSD in nsswitch.conf and PAM failed.",
            inv,
        )
        .await?;
        services::disable_and_stop(tools, SSSD, inv).await
    } else {
        services::restart(tools, SSSD, inv).await
    }
}

pub struct SssdAdMembership;

#[async_trait]
impl Membership for SssdAdMembership {
    fn package_sets(&self) -> &'static [&'static str] {
        &["sssd-ad"]
    }

    async fn join(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        net_join(tools, ctx).await
    }

    async fn configure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let section = domain_section(ctx.realm.name());
        let id_mapping = ctx.options.automatic_id_mapping.unwrap_or(true);
        let changes = base_changes(tools, ctx, &section)
            .set(&section, "id_provider", "ad")
            .set(&section, "access_provider", "ad")
            .set(&section, "ad_domain", ctx.domain_name().await)
            .set(&section, "krb5_realm", ctx.realm_name().await)
            .set(&section, "realmd_tags", "manages-system joined-with-samba")
            .set(&section, "ldap_id_mapping", bool_str(id_mapping));
        ini::change_file(&tools.config.sssd_conf, &changes)?;
        ctx.inv.info(format!(
            "Configured sssd domain {} in {}",
            ctx.realm.name(),
            tools.config.sssd_conf.display()
        ));
        Ok(())
    }

    async fn enable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        enable_sssd(tools, &ctx.inv).await
    }

    async fn leave(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        net_leave(tools, ctx).await
    }

    async fn deconfigure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        remove_domain(tools, ctx).map(|_| ())
    }

    async fn disable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        disable_sssd_if_unused(tools, &ctx.inv).await
    }
}

pub struct SssdIpaMembership;

#[async_trait]
impl Membership for SssdIpaMembership {
    fn package_sets(&self) -> &'static [&'static str] {
        &["sssd-ipa"]
    }

    // ipa-client-install authenticates on its own.
    fn uses_kinit(&self) -> bool {
        false
    }

    async fn join(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let domain = ctx.domain_name().await;
        let mut args = vec![
            "--domain".to_string(),
            domain.clone(),
            "--realm".to_string(),
            ctx.realm_name().await,
        ];
        match &ctx.credential.kind {
            CredentialKind::Password { name, secret } => {
                args.extend([
                    "--principal".to_string(),
                    name.clone(),
                    "--password".to_string(),
                    secret.clone(),
                ]);
            }
            CredentialKind::Secret(otp) => {
                args.extend([
                    "--password".to_string(),
                    String::from_utf8_lossy(otp).into_owned(),
                ]);
            }
            CredentialKind::Ccache(_) | CredentialKind::Automatic => {}
        }
        args.extend(
            ["--mkhomedir", "--no-ntp", "--enable-dns-updates", "--unattended"]
                .iter()
                .map(|s| s.to_string()),
        );

        let out = tools
            .runner
            .run_known(
                "ipa-client-install",
                &args,
                &[("LANG", "C".to_string())],
                None,
                &ctx.inv,
            )
            .await?;
        if out.success() {
            Ok(())
        } else if out.output.contains("kinit: Password incorrect") {
            Err(RealmError::AuthFailed(
                "Password is incorrect".to_string(),
            ))
        } else {
            Err(RealmError::Internal(format!(
                "Joining the domain {} failed",
                domain
            )))
        }
    }

    async fn configure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let section = domain_section(ctx.realm.name());
        let changes = base_changes(tools, ctx, &section)
            .set(&section, "id_provider", "ipa")
            .set(&section, "ipa_domain", ctx.domain_name().await)
            .set(&section, "krb5_realm", ctx.realm_name().await)
            .set(&section, "re_expression", "(?P<name>[^@]+)@(?P<domain>.+$)")
            .set(&section, "full_name_format", "%1$s@%2$s")
            .set(&section, "realmd_tags", "manages-system joined-with-ipa");
        ini::change_file(&tools.config.sssd_conf, &changes)?;
        Ok(())
    }

    async fn enable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        enable_sssd(tools, &ctx.inv).await
    }

    async fn leave(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let out = tools
            .runner
            .run_known(
                "ipa-client-install",
                &["--uninstall".to_string(), "--unattended".to_string()],
                &[("LANG", "C".to_string())],
                None,
                &ctx.inv,
            )
            .await?;
        if out.success() {
            Ok(())
        } else {
            Err(RealmError::Internal(format!(
                "Leaving the domain {} failed",
                ctx.realm.name()
            )))
        }
    }

    async fn deconfigure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        remove_domain(tools, ctx).map(|_| ())
    }

    async fn disable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        disable_sssd_if_unused(tools, &ctx.inv).await
    }
}
