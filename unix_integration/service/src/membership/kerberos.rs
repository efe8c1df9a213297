//! Plain kerberos realms have no enrollment tool. Joining checks the credential with
//! kinit and drops a krb5.conf snippet describing the realm, leaving removes it.

use std::fs::Permissions;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use realmd_common::error::RealmError;

use super::Membership;
use crate::pipeline::PipelineContext;
use crate::tools::Tools;

pub const DROPIN_PREFIX: &str = "realmd-";

pub fn dropin_path(dir: &Path, realm_name: &str) -> PathBuf {
    dir.join(format!("{}{}", DROPIN_PREFIX, realm_name.to_uppercase()))
}

pub fn render_dropin(realm_name: &str, domain: &str, kdcs: &[String]) -> String {
    let realm_name = realm_name.to_uppercase();
    let mut out = String::from("# Kerberos realm configured by realmd\n[realms]\n");
    out.push_str(&format!("    {} = {{\n", realm_name));
    for kdc in kdcs {
        out.push_str(&format!("        kdc = {}\n", kdc));
    }
    out.push_str("    }\n\n[domain_realm]\n");
    out.push_str(&format!("    .{} = {}\n", domain, realm_name));
    out.push_str(&format!("    {} = {}\n", domain, realm_name));
    out
}

/// Read back the realm and domain from a snippet we wrote.
pub fn parse_dropin(text: &str) -> Option<(String, String)> {
    let mut in_domain_realm = false;
    for line in text.lines().map(str::trim) {
        if line.starts_with('[') {
            in_domain_realm = line == "[domain_realm]";
            continue;
        }
        if !in_domain_realm {
            continue;
        }
        if let Some((domain, realm)) = line.split_once('=') {
            let domain = domain.trim();
            if !domain.starts_with('.') && !domain.is_empty() {
                return Some((realm.trim().to_string(), domain.to_lowercase()));
            }
        }
    }
    None
}

pub struct KerberosMembership;

#[async_trait]
impl Membership for KerberosMembership {
    fn package_sets(&self) -> &'static [&'static str] {
        &["kerberos"]
    }

    async fn join(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let realm_name = ctx.realm_name().await;
        let domain = ctx.domain_name().await;
        let kdcs = ctx
            .disco
            .as_ref()
            .map(|d| d.kdcs().to_vec())
            .unwrap_or_default();
        let dir = &tools.config.krb5_conf_dir;
        let path = dropin_path(dir, &realm_name);

        let write_err = |e: std::io::Error| {
            error!(?e, path = %path.display(), "unable to write kerberos config");
            RealmError::Internal(format!(
                "Couldn't write kerberos configuration: {}: {}",
                path.display(),
                e
            ))
        };

        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".realmd-")
            .permissions(Permissions::from_mode(0o644))
            .tempfile_in(dir)
            .map_err(write_err)?;
        tmp.write_all(render_dropin(&realm_name, &domain, &kdcs).as_bytes())
            .map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;
        ctx.inv
            .info(format!("Wrote kerberos configuration: {}", path.display()));
        Ok(())
    }

    async fn configure(&self, _tools: &Tools, _ctx: &PipelineContext) -> Result<(), RealmError> {
        Ok(())
    }

    async fn enable_services(
        &self,
        _tools: &Tools,
        _ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        Ok(())
    }

    async fn leave(&self, _tools: &Tools, _ctx: &PipelineContext) -> Result<(), RealmError> {
        Ok(())
    }

    async fn deconfigure(&self, tools: &Tools, ctx: &PipelineContext) -> Result<(), RealmError> {
        let path = dropin_path(&tools.config.krb5_conf_dir, &ctx.realm_name().await);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                ctx.inv
                    .info(format!("Removed kerberos configuration: {}", path.display()));
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RealmError::Internal(format!(
                "Couldn't remove kerberos configuration: {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn disable_services(
        &self,
        _tools: &Tools,
        _ctx: &PipelineContext,
    ) -> Result<(), RealmError> {
        Ok(())
    }
}
