//! Active Directory membership through Samba's `net ads`. Used by the winbind client,
//! and by sssd for its AD join.

use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use realmd_common::error::RealmError;
use tempfile::TempPath;

use super::Membership;
use crate::diagnostics::Invocation;
use crate::ini::{self, IniChanges, IniConfig};
use crate::pipeline::PipelineContext;
use crate::services;
use crate::tools::Tools;

pub const GLOBAL: &str = "global";

const WINBIND_KEYS: &[&str] = &[
    "winbind use default domain",
    "winbind enum users",
    "winbind enum groups",
    "winbind offline logon",
    "winbind refresh tickets",
    "winbind nss info",
];

/// A throwaway smb.conf, so that `net` talks to the domain being joined no matter what
/// the system smb.conf currently says.
struct TempSmbConf {
    path: Option<TempPath>,
    keep: bool,
}

impl TempSmbConf {
    fn write(tools: &Tools, realm_name: &str, workgroup: &str) -> Result<Self, RealmError> {
        let conf = IniConfig::default().with_changes(
            &IniChanges::new()
                .set(GLOBAL, "security", "ads")
                .set(GLOBAL, "realm", realm_name)
                .set(GLOBAL, "workgroup", workgroup)
                .set(GLOBAL, "kerberos method", "system keytab"),
        )?;
        let mut tmp = tempfile::Builder::new()
            .prefix("realmd-smb-conf.")
            .permissions(Permissions::from_mode(0o600))
            .tempfile_in(&tools.config.tmp_dir)
            .and_then(|mut f| {
                f.write_all(conf.to_string().as_bytes())?;
                Ok(f)
            })
            .map_err(|e| {
                error!(?e, "unable to write temporary smb.conf");
                RealmError::internal("Couldn't write out a temporary samba configuration")
            })?;
        tmp.flush()?;
        Ok(TempSmbConf {
            path: Some(tmp.into_temp_path()),
            keep: tools.config.keep_temp_files,
        })
    }

    fn path_str(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

impl Drop for TempSmbConf {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if self.keep {
                let _ = path.keep();
            } else if let Err(e) = path.close() {
                warn!(?e, "unable to remove temporary smb.conf");
            }
        }
    }
}

fn classify_join_failure(output: &str, domain: &str) -> RealmError {
    let lower = output.to_lowercase();
    if lower.contains("insufficient") || lower.contains("access denied") {
        RealmError::AuthFailed(format!(
            "Insufficient permissions to join the domain {}",
            domain
        ))
    } else if lower.contains("logon failure") || lower.contains("preauthentication failed") {
        RealmError::AuthFailed(format!(
            "The credentials were rejected by the domain {}",
            domain
        ))
    } else {
        RealmError::Internal(format!("Joining the domain {} failed", domain))
    }
}

async fn run_net(
    tools: &Tools,
    ctx: &PipelineContext,
    conf: &TempSmbConf,
    args: Vec<String>,
) -> Result<crate::command::CommandOutput, RealmError> {
    let mut argv = vec!["-s".to_string(), conf.path_str()];
    let mut env = vec![("LANG", "C".to_string())];
    if let Some(ccname) = ctx.ccname() {
        argv.push("-k".to_string());
        env.push(("KRB5CCNAME", ccname));
    }
    argv.extend(args);
    tools
        .runner
        .run_known("net", &argv, &env, None, &ctx.inv)
        .await
}

/// Join the machine to the domain and write out its keytab.
pub async fn net_join(tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
    let domain = ctx.domain_name().await;
    let realm_name = ctx.realm_name().await;
    let workgroup = ctx
        .disco
        .as_ref()
        .and_then(|d| d.workgroup())
        .unwrap_or_else(|| default_workgroup(&domain));
    let conf = TempSmbConf::write(tools, &realm_name, &workgroup)?;

    let mut args = Vec::new();
    if let Some(server) = ctx.disco.as_ref().and_then(|d| d.first_kdc_host()) {
        args.push("-S".to_string());
        args.push(server.to_string());
    }
    args.extend(["ads".to_string(), "join".to_string(), domain.clone()]);
    if let Some(ou) = &ctx.options.computer_ou {
        args.push(format!("createcomputer={}", ou));
    }
    if let Some(os_name) = &ctx.options.os_name {
        args.push(format!("osName={}", os_name));
    }
    if let Some(os_version) = &ctx.options.os_version {
        args.push(format!("osVer={}", os_version));
    }
    if ctx.options.user_principal.unwrap_or(false) {
        args.push("createupn".to_string());
    }

    let out = run_net(tools, ctx, &conf, args).await?;
    if !out.success() {
        return Err(classify_join_failure(&out.output, &domain));
    }

    let out = run_net(
        tools,
        ctx,
        &conf,
        vec!["ads".to_string(), "keytab".to_string(), "create".to_string()],
    )
    .await?;
    if !out.success() {
        return Err(RealmError::Internal(format!(
            "Couldn't create the keytab for the domain {}",
            domain
        )));
    }
    Ok(())
}

/// Remove the computer account from the domain.
pub async fn net_leave(tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
    let domain = ctx.domain_name().await;
    if ctx.ccname().is_none() {
        ctx.inv.warn(format!(
            "No credentials to remove the computer account from {}",
            domain
        ));
        return Ok(());
    }
    let workgroup = ctx
        .disco
        .as_ref()
        .and_then(|d| d.workgroup())
        .unwrap_or_else(|| default_workgroup(&domain));
    let conf = TempSmbConf::write(tools, &ctx.realm_name().await, &workgroup)?;
    let out = run_net(tools, ctx, &conf, vec!["ads".to_string(), "leave".to_string()]).await?;
    if out.success() {
        Ok(())
    } else {
        Err(RealmError::Internal(format!(
            "Leaving the domain {} failed",
            domain
        )))
    }
}

pub fn default_workgroup(domain: &str) -> String {
    domain.split('.').next().unwrap_or(domain).to_uppercase()
}

/// Samba realm settings read back from smb.conf.
pub struct SmbRealm {
    pub realm: String,
    pub workgroup: String,
    pub separator: String,
}

pub fn read_smb_realm(conf: &IniConfig) -> Option<SmbRealm> {
    if !conf
        .get(GLOBAL, "security")
        .is_some_and(|s| s.eq_ignore_ascii_case("ads"))
    {
        return None;
    }
    let realm = conf.get(GLOBAL, "realm")?.to_uppercase();
    let workgroup = conf
        .get(GLOBAL, "workgroup")
        .map(str::to_string)
        .unwrap_or_else(|| default_workgroup(&realm));
    let separator = conf
        .get(GLOBAL, "winbind separator")
        .unwrap_or("\\")
        .to_string();
    Some(SmbRealm {
        realm,
        workgroup,
        separator,
    })
}

fn idmap_keys(workgroup: &str) -> [String; 4] {
    [
        "idmap config * : backend".to_string(),
        "idmap config * : range".to_string(),
        format!("idmap config {} : backend", workgroup),
        format!("idmap config {} : range", workgroup),
    ]
}

pub struct SambaMembership;

#[async_trait]
impl Membership for SambaMembership {
    fn package_sets(&self) -> &'static [&'static str] {
        &["samba"]
    }

    async fn join(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        net_join(tools, ctx).await
    }

    async fn configure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let domain = ctx.domain_name().await;
        let workgroup = ctx
            .disco
            .as_ref()
            .and_then(|d| d.workgroup())
            .unwrap_or_else(|| default_workgroup(&domain));
        let [star_backend, star_range, wg_backend, wg_range] = idmap_keys(&workgroup);

        let mut changes = IniChanges::new()
            .set(GLOBAL, "security", "ads")
            .set(GLOBAL, "realm", ctx.realm_name().await)
            .set(GLOBAL, "workgroup", workgroup.as_str())
            .set(GLOBAL, "kerberos method", "system keytab")
            .set(GLOBAL, "template shell", tools.config.default_shell.as_str())
            .set(GLOBAL, "template homedir", tools.config.default_home.as_str())
            .set(GLOBAL, "winbind use default domain", "no")
            .set(GLOBAL, "winbind enum users", "no")
            .set(GLOBAL, "winbind enum groups", "no")
            .set(GLOBAL, "winbind offline logon", "yes")
            .set(GLOBAL, "winbind refresh tickets", "yes")
            .set(GLOBAL, &star_backend, "tdb")
            .set(GLOBAL, &star_range, "10000-999999");

        changes = if ctx.options.automatic_id_mapping.unwrap_or(true) {
            changes
                .set(GLOBAL, &wg_backend, "rid")
                .set(GLOBAL, &wg_range, "2000000-2999999")
        } else {
            changes
                .set(GLOBAL, &wg_backend, "ad")
                .set(GLOBAL, &wg_range, "10000000-19999999")
                .set(GLOBAL, "winbind nss info", "rfc2307")
        };

        ini::change_file(&tools.config.smb_conf, &changes)?;
        ctx.inv.info(format!(
            "Configured samba in {}",
            tools.config.smb_conf.display()
        ));
        Ok(())
    }

    async fn enable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        run_login_command(
            tools,
            "winbind-enable-logins",
            "Enabling winbind in nsswitch.conf and PAM failed",
            &ctx.inv,
        )
        .await?;
        services::enable_and_restart(tools, "winbind", &ctx.inv).await
    }

    async fn leave(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        net_leave(tools, ctx).await
    }

    async fn deconfigure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let current = IniConfig::read(&tools.config.smb_conf)?;
        let workgroup = current
            .get(GLOBAL, "workgroup")
            .map(str::to_string)
            .unwrap_or_else(|| default_workgroup(ctx.realm.name()));

        let mut changes = IniChanges::new()
            .remove(GLOBAL, "security")
            .remove(GLOBAL, "realm")
            .remove(GLOBAL, "workgroup")
            .remove(GLOBAL, "kerberos method")
            .remove(GLOBAL, "template shell")
            .remove(GLOBAL, "template homedir");
        for key in WINBIND_KEYS {
            changes = changes.remove(GLOBAL, key);
        }
        for key in idmap_keys(&workgroup).iter() {
            changes = changes.remove(GLOBAL, key);
        }
        ini::change_file(&tools.config.smb_conf, &changes)?;
        Ok(())
    }

    async fn disable_services(
        &self,
        tools: &Tools,
        ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        run_login_command(
            tools,
            "winbind-disable-logins",
            "Disabling winbind in nsswitch.conf and PAM failed",
            &ctx.inv,
        )
        .await?;
        services::disable_and_stop(tools, "winbind", &ctx.inv).await
    }
}

/// Run one of the `*-enable-logins` style commands which switch the host's NSS and PAM
/// stacks.
pub async fn run_login_command(
    tools: &Tools,
    command: &str,
    failure: &str,
    inv: &Invocation,
) -> Result<(), RealmError> {
    let out = tools.runner.run_known(command, &[], &[], None, inv).await?;
    if out.success() {
        Ok(())
    } else {
        Err(RealmError::Internal(failure.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_join_failure() {
        assert!(matches!(
            classify_join_failure(
                "Failed to join domain: Insufficient access rights",
                "example.com"
            ),
            RealmError::AuthFailed(_)
        ));
        assert_eq!(
            classify_join_failure("Failed to join domain: no logon servers", "example.com"),
            RealmError::Internal("Joining the domain example.com failed".to_string())
        );
    }

    #[test]
    fn test_read_smb_realm() {
        let conf = IniConfig::parse(
            "[global]\nsecurity = ADS\nrealm = example.com\nworkgroup = EXAMPLE\n",
        );
        let smb = read_smb_realm(&conf).expect("samba realm");
        assert_eq!(smb.realm, "EXAMPLE.COM");
        assert_eq!(smb.workgroup, "EXAMPLE");
        assert_eq!(smb.separator, "\\");

        let user = IniConfig::parse("[global]\nsecurity = user\nrealm = example.com\n");
        assert!(read_smb_realm(&user).is_none());
    }
}
