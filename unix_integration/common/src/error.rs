use serde::{Deserialize, Serialize};

/// Failures reported by the kerberos tooling while acquiring a ticket. These are kept apart
/// from [`RealmError`] so that callers can decide which of them are really a rejected
/// credential.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Krb5ErrorKind {
    /// Pre-authentication failed, usually a wrong password.
    PreauthFailed,
    /// The KDC does not know the principal.
    PrincipalUnknown,
    /// The password or key has expired.
    KeyExpired,
    /// The account is disabled or locked.
    ClientRevoked,
    /// The KDC refused the request by policy.
    Policy,
    /// No usable encryption type in common with the KDC.
    EncTypeUnsupported,
    Other,
}

impl Krb5ErrorKind {
    /// Kinds which mean the supplied credential itself was refused.
    pub fn is_auth_failure(self) -> bool {
        !matches!(self, Krb5ErrorKind::Other)
    }
}

/// The error kinds a caller of the daemon can observe. Each carries a one line, human
/// readable message. The detail of what went wrong lives in the diagnostics stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum RealmError {
    #[error("{0}")]
    Internal(String),
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Busy(String),
    #[error("{0}")]
    AlreadyConfigured(String),
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    AuthFailed(String),
    #[error("{0}")]
    BadHostname(String),
    #[error("{0}")]
    Cancelled(String),
    #[error("{1}")]
    Kerberos(Krb5ErrorKind, String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotSupported(String),
    #[error("{0}")]
    NotAuthorized(String),
    #[error("{0}")]
    DiscoveredNothing(String),
}

impl RealmError {
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        RealmError::Internal(msg.into())
    }

    pub fn cancelled() -> Self {
        RealmError::Cancelled("The operation was cancelled".to_string())
    }

    pub fn busy() -> Self {
        RealmError::Busy("Already running another action".to_string())
    }

    /// A short stable name for the kind, used by the command line tool and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RealmError::Internal(_) => "internal",
            RealmError::Failed(_) => "failed",
            RealmError::Busy(_) => "busy",
            RealmError::AlreadyConfigured(_) => "already-configured",
            RealmError::NotConfigured(_) => "not-configured",
            RealmError::AuthFailed(_) => "auth-failed",
            RealmError::BadHostname(_) => "bad-hostname",
            RealmError::Cancelled(_) => "cancelled",
            RealmError::Kerberos(_, _) => "kerberos",
            RealmError::InvalidArgument(_) => "invalid-argument",
            RealmError::NotSupported(_) => "not-supported",
            RealmError::NotAuthorized(_) => "not-authorized",
            RealmError::DiscoveredNothing(_) => "discovered-nothing",
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Promote the kerberos failures that mean "wrong credential" into the general
    /// authentication failure kind.
    pub fn from_krb5(kind: Krb5ErrorKind, message: String) -> Self {
        if kind.is_auth_failure() {
            RealmError::AuthFailed(message)
        } else {
            RealmError::Kerberos(kind, message)
        }
    }
}

impl From<std::io::Error> for RealmError {
    fn from(e: std::io::Error) -> Self {
        RealmError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_error_display_is_message() {
        assert_eq!(RealmError::busy().to_string(), "Already running another action");
        assert_eq!(
            RealmError::Kerberos(Krb5ErrorKind::Other, "Cannot contact any KDC".into())
                .to_string(),
            "Cannot contact any KDC"
        );
        assert_eq!(RealmError::cancelled().kind(), "cancelled");
    }

    #[test]
    fn test_krb5_promotion() {
        assert!(matches!(
            RealmError::from_krb5(Krb5ErrorKind::PreauthFailed, "bad".into()),
            RealmError::AuthFailed(_)
        ));
        assert!(matches!(
            RealmError::from_krb5(Krb5ErrorKind::Other, "odd".into()),
            RealmError::Kerberos(Krb5ErrorKind::Other, _)
        ));
    }

    #[test]
    fn test_realm_error_wire_shape() {
        let json = serde_json::to_string(&RealmError::AuthFailed("nope".into()))
            .expect("failed to serialise");
        assert_eq!(json, r#"{"auth-failed":"nope"}"#);
    }
}
