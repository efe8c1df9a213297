use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RealmError;

/// Caller supplied credential, as it travels on the wire. The payload shape depends on
/// the `kind`, and is validated by the daemon rather than by serde so that a malformed
/// payload is reported as an argument error instead of a protocol error.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialArg {
    pub kind: String,
    pub owner: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CredentialArg {
    pub fn password(owner: &str, name: &str, secret: &str) -> Self {
        CredentialArg {
            kind: "password".to_string(),
            owner: owner.to_string(),
            payload: serde_json::json!([name, secret]),
        }
    }

    pub fn automatic(owner: &str) -> Self {
        CredentialArg {
            kind: "automatic".to_string(),
            owner: owner.to_string(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn ccache(owner: &str, data: &[u8]) -> Self {
        CredentialArg {
            kind: "ccache".to_string(),
            owner: owner.to_string(),
            payload: serde_json::json!(data),
        }
    }

    pub fn secret(owner: &str, data: &[u8]) -> Self {
        CredentialArg {
            kind: "secret".to_string(),
            owner: owner.to_string(),
            payload: serde_json::json!(data),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Options {
    /// Caller chosen id, used to cancel the operation from another connection.
    pub operation: Option<String>,
    pub server_software: Option<String>,
    pub client_software: Option<String>,
    pub membership_software: Option<String>,
    pub computer_ou: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub automatic_install: Option<bool>,
    pub automatic_id_mapping: Option<bool>,
    pub user_principal: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoginPolicy {
    #[default]
    Unknown,
    AllowAnyLogin,
    AllowRealmLogins,
    AllowPermittedLogins,
    DenyAnyLogin,
}

impl LoginPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginPolicy::Unknown => "",
            LoginPolicy::AllowAnyLogin => "allow-any-login",
            LoginPolicy::AllowRealmLogins => "allow-realm-logins",
            LoginPolicy::AllowPermittedLogins => "allow-permitted-logins",
            LoginPolicy::DenyAnyLogin => "deny-any-login",
        }
    }
}

impl fmt::Display for LoginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginPolicy {
    type Err = RealmError;

    /// Accepts a list of policy names separated by commas or whitespace. Naming two
    /// different policies is an error, repeating the same one is not.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut policy = LoginPolicy::Unknown;
        for word in s
            .split(|c: char| c == ',' || c == ' ' || c == '\t')
            .filter(|w| !w.is_empty())
        {
            let next = match word {
                "allow-any-login" => LoginPolicy::AllowAnyLogin,
                "allow-realm-logins" => LoginPolicy::AllowRealmLogins,
                "allow-permitted-logins" => LoginPolicy::AllowPermittedLogins,
                "deny-any-login" => LoginPolicy::DenyAnyLogin,
                other => {
                    return Err(RealmError::InvalidArgument(format!(
                        "Invalid or unknown login policy argument: {}",
                        other
                    )))
                }
            };
            if policy != LoginPolicy::Unknown && policy != next {
                return Err(RealmError::InvalidArgument(format!(
                    "Conflicting flags in login policy argument: {}",
                    s
                )));
            }
            policy = next;
        }
        Ok(policy)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum RealmKind {
    Kerberos,
    SambaAd,
    SssdAd,
    SssdIpa,
}

impl fmt::Display for RealmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RealmKind::Kerberos => "kerberos",
            RealmKind::SambaAd => "samba-ad",
            RealmKind::SssdAd => "sssd-ad",
            RealmKind::SssdIpa => "sssd-ipa",
        })
    }
}

/// A (credential type, owner) pair a realm accepts for join or leave.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SupportedCredential {
    pub kind: String,
    pub owner: String,
}

/// A snapshot of a realm as presented to callers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RealmInfo {
    pub name: String,
    pub path: String,
    pub kind: RealmKind,
    pub realm_name: Option<String>,
    pub domain_name: Option<String>,
    pub configured: bool,
    pub server_software: Option<String>,
    pub client_software: Option<String>,
    pub login_formats: Vec<String>,
    pub login_policy: LoginPolicy,
    pub permitted_logins: Vec<String>,
    pub suggested_administrator: Option<String>,
    pub supported_join_credentials: Vec<SupportedCredential>,
    pub supported_leave_credentials: Vec<SupportedCredential>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub version: String,
    pub busy: bool,
    pub holds: Vec<String>,
    pub realms: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum ClientRequest {
    Discover {
        string: String,
        options: Options,
    },
    ListRealms,
    Join {
        realm: String,
        credential: CredentialArg,
        options: Options,
    },
    Leave {
        realm: String,
        credential: CredentialArg,
        options: Options,
    },
    ChangeLoginPolicy {
        realm: String,
        policy: String,
        add: Vec<String>,
        remove: Vec<String>,
        options: Options,
    },
    Cancel {
        operation: String,
    },
    Status,
}

impl ClientRequest {
    /// Render the request for logs without leaking credential material.
    pub fn as_safe_string(&self) -> String {
        match self {
            ClientRequest::Discover { string, .. } => format!("Discover({})", string),
            ClientRequest::ListRealms => "ListRealms".to_string(),
            ClientRequest::Join {
                realm, credential, ..
            } => format!(
                "Join({}, {}/{}, ********)",
                realm, credential.kind, credential.owner
            ),
            ClientRequest::Leave {
                realm, credential, ..
            } => format!(
                "Leave({}, {}/{}, ********)",
                realm, credential.kind, credential.owner
            ),
            ClientRequest::ChangeLoginPolicy { realm, policy, .. } => {
                format!("ChangeLoginPolicy({}, {})", realm, policy)
            }
            ClientRequest::Cancel { operation } => format!("Cancel({})", operation),
            ClientRequest::Status => "Status".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ClientResponse {
    /// A line of diagnostic output for the request in progress. Zero or more of these
    /// precede the final response.
    Diagnostics(String),
    Discovered {
        relevance: i32,
        realms: Vec<RealmInfo>,
    },
    Realms(Vec<RealmInfo>),
    Status(DaemonStatus),
    Success,
    Error(RealmError),
}

impl ClientResponse {
    pub fn is_final(&self) -> bool {
        !matches!(self, ClientResponse::Diagnostics(_))
    }
}
