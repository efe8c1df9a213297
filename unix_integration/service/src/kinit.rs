//! Obtaining a ticket with a password, by way of the `kinit` tool.

use realmd_common::error::{Krb5ErrorKind, RealmError};

use crate::credential::CcacheFile;
use crate::diagnostics::Invocation;
use crate::tools::Tools;

/// Qualify a bare user name with the realm.
pub fn principal_for(name: &str, realm: &str) -> String {
    if name.contains('@') {
        name.to_string()
    } else {
        format!("{}@{}", name, realm.to_uppercase())
    }
}

/// Map what kinit printed into a kerberos error kind.
pub fn classify_output(output: &str) -> Krb5ErrorKind {
    let lower = output.to_lowercase();
    if lower.contains("preauthentication failed") || lower.contains("password incorrect") {
        Krb5ErrorKind::PreauthFailed
    } else if lower.contains("not found in kerberos database") {
        Krb5ErrorKind::PrincipalUnknown
    } else if lower.contains("password has expired") || lower.contains("key has expired") {
        Krb5ErrorKind::KeyExpired
    } else if lower.contains("credentials have been revoked") {
        Krb5ErrorKind::ClientRevoked
    } else if lower.contains("kdc policy rejects request") {
        Krb5ErrorKind::Policy
    } else if lower.contains("kdc has no support for encryption type") {
        Krb5ErrorKind::EncTypeUnsupported
    } else {
        Krb5ErrorKind::Other
    }
}

fn kinit_error(kind: Krb5ErrorKind, principal: &str, output: &str) -> RealmError {
    let message = match kind {
        Krb5ErrorKind::PreauthFailed => {
            format!("Couldn't authenticate as {}: the password is incorrect", principal)
        }
        Krb5ErrorKind::PrincipalUnknown => {
            format!("Couldn't authenticate as {}: no such user", principal)
        }
        Krb5ErrorKind::KeyExpired => {
            format!("Couldn't authenticate as {}: the password has expired", principal)
        }
        Krb5ErrorKind::ClientRevoked => format!(
            "Couldn't authenticate as {}: the account is disabled or locked",
            principal
        ),
        Krb5ErrorKind::Policy => format!(
            "Couldn't authenticate as {}: refused by the KDC policy",
            principal
        ),
        Krb5ErrorKind::EncTypeUnsupported => format!(
            "Couldn't authenticate as {}: no supported encryption types",
            principal
        ),
        Krb5ErrorKind::Other => {
            let last = output
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or("unknown error");
            format!("Couldn't authenticate to the realm: {}", last)
        }
    };
    RealmError::from_krb5(kind, message)
}

/// Acquire a ticket for `principal` into a fresh credential cache.
#[instrument(level = "debug", skip(tools, password, inv))]
pub async fn kinit(
    tools: &Tools,
    principal: &str,
    password: &str,
    inv: &Invocation,
) -> Result<CcacheFile, RealmError> {
    let tmp = tempfile::Builder::new()
        .prefix("realmd-krb5-cache.")
        .tempfile_in(&tools.config.tmp_dir)
        .map_err(|e| {
            error!(?e, "unable to create credential cache file");
            RealmError::internal("Couldn't create credential cache file")
        })?;
    let ccache = CcacheFile::new(tmp.into_temp_path(), tools.config.keep_temp_files);

    inv.info(format!("Authenticating as {}", principal));
    let input = format!("{}\n", password);
    let out = tools
        .runner
        .run_known(
            "kinit",
            &[principal.to_string()],
            &[("KRB5CCNAME", ccache.ccname()), ("LANG", "C".to_string())],
            Some(input.as_bytes()),
            inv,
        )
        .await?;

    if out.success() {
        Ok(ccache)
    } else {
        let kind = classify_output(&out.output);
        debug!(?kind, "kinit failed");
        Err(kinit_error(kind, principal, &out.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_for() {
        assert_eq!(principal_for("admin", "example.com"), "admin@EXAMPLE.COM");
        assert_eq!(principal_for("admin@OTHER.ORG", "example.com"), "admin@OTHER.ORG");
    }

    #[test]
    fn test_classify_output() {
        assert_eq!(
            classify_output(
                "kinit: Preauthentication failed while getting initial credentials\n"
            ),
            Krb5ErrorKind::PreauthFailed
        );
        assert_eq!(
            classify_output("kinit: Client 'x@EXAMPLE.COM' not found in Kerberos database"),
            Krb5ErrorKind::PrincipalUnknown
        );
        assert_eq!(
            classify_output("kinit: Cannot contact any KDC for realm 'EXAMPLE.COM'"),
            Krb5ErrorKind::Other
        );
    }

    #[test]
    fn test_kinit_error_promotion() {
        assert!(matches!(
            kinit_error(Krb5ErrorKind::KeyExpired, "a@B", ""),
            RealmError::AuthFailed(_)
        ));
        assert_eq!(
            kinit_error(
                Krb5ErrorKind::Other,
                "a@B",
                "Password for a@B:\nkinit: Cannot contact any KDC\n"
            ),
            RealmError::Kerberos(
                Krb5ErrorKind::Other,
                "Couldn't authenticate to the realm: kinit: Cannot contact any KDC".to_string()
            )
        );
    }
}
