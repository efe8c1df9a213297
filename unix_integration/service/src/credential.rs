use std::fs::Permissions;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use realmd_common::error::RealmError;
use realmd_common::proto::{CredentialArg, SupportedCredential};
use serde_json::Value;
use tempfile::TempPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    None,
    Admin,
    User,
    Computer,
}

impl Owner {
    pub fn as_str(self) -> &'static str {
        match self {
            Owner::None => "none",
            Owner::Admin => "administrator",
            Owner::User => "user",
            Owner::Computer => "computer",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "administrator" => Some(Owner::Admin),
            "user" => Some(Owner::User),
            "computer" => Some(Owner::Computer),
            "none" => Some(Owner::None),
            _ => None,
        }
    }
}

/// A kerberos credential cache written out on behalf of a caller. Removed from disk when
/// dropped, unless temp files are being kept for debugging.
pub struct CcacheFile {
    path: Option<TempPath>,
    keep: bool,
}

impl CcacheFile {
    pub(crate) fn new(path: TempPath, keep: bool) -> Self {
        CcacheFile {
            path: Some(path),
            keep,
        }
    }

    pub fn path(&self) -> &Path {
        match &self.path {
            Some(p) => p,
            None => Path::new(""),
        }
    }

    /// The value for `KRB5CCNAME`.
    pub fn ccname(&self) -> String {
        format!("FILE:{}", self.path().display())
    }
}

impl std::fmt::Debug for CcacheFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CcacheFile({})", self.path().display())
    }
}

impl Drop for CcacheFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if self.keep {
                match path.keep() {
                    Ok(p) => debug!(path = %p.display(), "keeping credential cache"),
                    Err(e) => warn!(?e, "unable to keep credential cache"),
                }
            } else if let Err(e) = path.close() {
                warn!(?e, "unable to remove credential cache");
            }
        }
    }
}

pub enum CredentialKind {
    Ccache(CcacheFile),
    Password { name: String, secret: String },
    Secret(Vec<u8>),
    Automatic,
}

pub struct Credential {
    pub kind: CredentialKind,
    pub owner: Owner,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            CredentialKind::Ccache(c) => write!(f, "Ccache({:?}, {:?})", c, self.owner),
            CredentialKind::Password { name, .. } => {
                write!(f, "Password({}, ********, {:?})", name, self.owner)
            }
            CredentialKind::Secret(_) => write!(f, "Secret(********, {:?})", self.owner),
            CredentialKind::Automatic => write!(f, "Automatic({:?})", self.owner),
        }
    }
}

fn json_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn write_ccache(data: &[u8], tmp_dir: &Path, keep: bool) -> Result<CcacheFile, RealmError> {
    let mut file = tempfile::Builder::new()
        .prefix("realm-ad-kerberos-")
        .permissions(Permissions::from_mode(0o600))
        .tempfile_in(tmp_dir)
        .map_err(|e| {
            error!(?e, dir = %tmp_dir.display(), "unable to create credential cache file");
            RealmError::internal("Couldn't create credential cache file")
        })?;
    file.write_all(data)
        .and_then(|_| file.flush())
        .map_err(|e| {
            error!(?e, "unable to write credential cache file");
            RealmError::internal("Couldn't write credential cache file")
        })?;
    Ok(CcacheFile::new(file.into_temp_path(), keep))
}

impl Credential {
    /// Validate a caller supplied credential. Nothing is written to disk unless the whole
    /// argument is valid.
    pub fn parse(
        arg: &CredentialArg,
        tmp_dir: &Path,
        keep_temp_files: bool,
    ) -> Result<Arc<Credential>, RealmError> {
        let Some(owner) = Owner::parse(&arg.owner) else {
            return Err(RealmError::InvalidArgument(
                "Credential cache argument has invalid or unsupported owner".to_string(),
            ));
        };

        let kind = match arg.kind.as_str() {
            "ccache" => {
                let data = json_bytes(&arg.payload).ok_or_else(|| {
                    RealmError::InvalidArgument(
                        "Credential cache argument is of wrong type".to_string(),
                    )
                })?;
                if data.is_empty() {
                    return Err(RealmError::InvalidArgument(
                        "Invalid zero length credential cache argument".to_string(),
                    ));
                }
                CredentialKind::Ccache(write_ccache(&data, tmp_dir, keep_temp_files)?)
            }
            "password" => match arg.payload.as_array().map(|a| a.as_slice()) {
                Some([Value::String(name), Value::String(secret)]) => CredentialKind::Password {
                    name: name.clone(),
                    secret: secret.clone(),
                },
                _ => {
                    return Err(RealmError::InvalidArgument(
                        "Password credentials are of wrong type".to_string(),
                    ))
                }
            },
            "secret" => match json_bytes(&arg.payload) {
                Some(data) if !data.is_empty() => CredentialKind::Secret(data),
                _ => {
                    return Err(RealmError::InvalidArgument(
                        "Secret credentials are of wrong type".to_string(),
                    ))
                }
            },
            "automatic" => CredentialKind::Automatic,
            _ => {
                return Err(RealmError::InvalidArgument(
                    "Invalid or unsupported credential type".to_string(),
                ))
            }
        };

        Ok(Arc::new(Credential { kind, owner }))
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            CredentialKind::Ccache(_) => "ccache",
            CredentialKind::Password { .. } => "password",
            CredentialKind::Secret(_) => "secret",
            CredentialKind::Automatic => "automatic",
        }
    }

    pub fn is_supported(&self, supported: &[SupportedCredential]) -> bool {
        supported
            .iter()
            .any(|s| s.kind == self.type_name() && s.owner == self.owner.as_str())
    }

    pub fn ccache_path(&self) -> Option<PathBuf> {
        match &self.kind {
            CredentialKind::Ccache(c) => Some(c.path().to_path_buf()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_credential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cred = Credential::parse(
            &CredentialArg::password("administrator", "admin", "hunter2"),
            dir.path(),
            false,
        )
        .expect("valid credential");
        assert_eq!(cred.owner, Owner::Admin);
        assert_eq!(cred.type_name(), "password");
        assert!(!format!("{:?}", cred).contains("hunter2"));
    }

    #[test]
    fn test_bad_payloads_create_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");

        let bad_password = CredentialArg {
            kind: "password".to_string(),
            owner: "administrator".to_string(),
            payload: serde_json::json!(["admin"]),
        };
        assert_eq!(
            Credential::parse(&bad_password, dir.path(), false).map(|_| ()),
            Err(RealmError::InvalidArgument(
                "Password credentials are of wrong type".to_string()
            ))
        );

        assert_eq!(
            Credential::parse(&CredentialArg::ccache("administrator", &[]), dir.path(), false)
                .map(|_| ()),
            Err(RealmError::InvalidArgument(
                "Invalid zero length credential cache argument".to_string()
            ))
        );

        let bad_owner = CredentialArg::automatic("root");
        assert!(matches!(
            Credential::parse(&bad_owner, dir.path(), false),
            Err(RealmError::InvalidArgument(_))
        ));

        let bad_kind = CredentialArg {
            kind: "smartcard".to_string(),
            owner: "user".to_string(),
            payload: Value::Null,
        };
        assert_eq!(
            Credential::parse(&bad_kind, dir.path(), false).map(|_| ()),
            Err(RealmError::InvalidArgument(
                "Invalid or unsupported credential type".to_string()
            ))
        );

        let count = std::fs::read_dir(dir.path()).expect("read_dir").count();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_ccache_file_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cred = Credential::parse(
            &CredentialArg::ccache("administrator", b"\x05\x04ticket"),
            dir.path(),
            false,
        )
        .expect("valid credential");
        let path = cred.ccache_path().expect("ccache path");
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("realm-ad-kerberos-")));
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&path).expect("read"), b"\x05\x04ticket");

        let shared = Arc::clone(&cred);
        drop(cred);
        assert!(path.exists());
        drop(shared);
        assert!(!path.exists());
    }

    #[test]
    fn test_ccache_kept_for_debugging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cred = Credential::parse(
            &CredentialArg::ccache("user", b"ticket"),
            dir.path(),
            true,
        )
        .expect("valid credential");
        let path = cred.ccache_path().expect("ccache path");
        drop(cred);
        assert!(path.exists());
    }
}
