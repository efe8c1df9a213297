use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::constants::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read configuration file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Who may perform an action.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthzPolicy {
    /// Only callers running as uid 0.
    Root,
    /// Any local caller.
    Any,
}

impl Display for AuthzPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AuthzPolicy::Root => "root",
            AuthzPolicy::Any => "any",
        })
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PathsInt {
    smb_conf: Option<String>,
    sssd_conf: Option<String>,
    krb5_conf_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct UsersInt {
    default_home: Option<String>,
    default_shell: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ActiveDirectoryInt {
    default_client: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConfigInt {
    sock_path: Option<String>,
    idle_timeout: Option<u64>,
    persist: Option<bool>,
    keep_temp_files: Option<bool>,
    install_mode: Option<bool>,
    automatic_install: Option<bool>,
    command_timeout: Option<u64>,
    discovery_timeout: Option<u64>,
    tmp_dir: Option<String>,
    paths: Option<PathsInt>,
    #[serde(default)]
    commands: BTreeMap<String, String>,
    #[serde(default)]
    services: BTreeMap<String, String>,
    #[serde(default)]
    packages: BTreeMap<String, BTreeMap<String, String>>,
    users: Option<UsersInt>,
    #[serde(rename = "active-directory")]
    active_directory: Option<ActiveDirectoryInt>,
    #[serde(default)]
    authorization: BTreeMap<String, AuthzPolicy>,
}

#[derive(Debug, Clone)]
pub struct RealmdConfig {
    pub sock_path: String,
    pub idle_timeout: u64,
    pub persist: bool,
    /// Leave credential caches and generated files behind for debugging.
    pub keep_temp_files: bool,
    /// Running inside an installer: packages are assumed present and caches are not
    /// flushed.
    pub install_mode: bool,
    pub automatic_install: bool,
    /// Zero disables the timeout.
    pub command_timeout: u64,
    pub discovery_timeout: u64,
    pub tmp_dir: PathBuf,
    pub smb_conf: PathBuf,
    pub sssd_conf: PathBuf,
    pub krb5_conf_dir: PathBuf,
    pub commands: BTreeMap<String, String>,
    pub services: BTreeMap<String, String>,
    pub packages: BTreeMap<String, BTreeMap<String, String>>,
    pub default_home: String,
    pub default_shell: String,
    pub ad_default_client: String,
    pub authorization: BTreeMap<String, AuthzPolicy>,
}

impl Default for RealmdConfig {
    fn default() -> Self {
        RealmdConfig::new()
    }
}

fn default_commands() -> BTreeMap<String, String> {
    [
        ("host-soa", "/usr/bin/host -t SOA"),
        (
            "ipa-probe",
            "/usr/bin/curl --silent --fail --insecure --max-time 10 --output /dev/null",
        ),
        ("kinit", "/usr/bin/kinit"),
        ("net", "/usr/bin/net"),
        ("ipa-client-install", "/usr/sbin/ipa-client-install"),
        ("install-packages", "/usr/bin/dnf install --assumeyes"),
        ("service-enable", "/usr/bin/systemctl enable"),
        ("service-disable", "/usr/bin/systemctl disable"),
        ("service-restart", "/usr/bin/systemctl restart"),
        ("service-stop", "/usr/bin/systemctl stop"),
        (
            "sssd-enable-logins",
            "/usr/bin/authselect select sssd with-mkhomedir --force",
        ),
        ("sssd-disable-logins", "/usr/bin/authselect select local --force"),
        (
            "winbind-enable-logins",
            "/usr/bin/authselect select winbind with-mkhomedir --force",
        ),
        ("winbind-disable-logins", "/usr/bin/authselect select local --force"),
        (
            "name-caches-flush",
            "/usr/sbin/sss_cache --users --groups --netgroups --services --autofs-maps",
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_packages() -> BTreeMap<String, BTreeMap<String, String>> {
    let sets: [(&str, &[(&str, &str)]); 4] = [
        ("kerberos", &[("krb5-workstation", "/usr/bin/kinit")]),
        (
            "samba",
            &[
                ("samba-common-tools", "/usr/bin/net"),
                ("samba-winbind", "/usr/sbin/winbindd"),
                ("krb5-workstation", "/usr/bin/kinit"),
            ],
        ),
        (
            "sssd-ad",
            &[
                ("sssd", "/usr/sbin/sssd"),
                ("samba-common-tools", "/usr/bin/net"),
                ("krb5-workstation", "/usr/bin/kinit"),
            ],
        ),
        (
            "sssd-ipa",
            &[
                ("sssd", "/usr/sbin/sssd"),
                ("ipa-client", "/usr/sbin/ipa-client-install"),
            ],
        ),
    ];
    sets.iter()
        .map(|(set, pkgs)| {
            (
                set.to_string(),
                pkgs.iter()
                    .map(|(p, f)| (p.to_string(), f.to_string()))
                    .collect(),
            )
        })
        .collect()
}

fn default_services() -> BTreeMap<String, String> {
    [("sssd", "sssd.service"), ("winbind", "winbind.service")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_authorization() -> BTreeMap<String, AuthzPolicy> {
    [
        (ACTION_DISCOVER_REALM, AuthzPolicy::Any),
        (ACTION_CONFIGURE_REALM, AuthzPolicy::Root),
        (ACTION_DECONFIGURE_REALM, AuthzPolicy::Root),
        (ACTION_LOGIN_POLICY, AuthzPolicy::Root),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Display for RealmdConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sock_path: {}", self.sock_path)?;
        writeln!(f, "idle_timeout: {}", self.idle_timeout)?;
        writeln!(f, "persist: {}", self.persist)?;
        writeln!(f, "keep_temp_files: {}", self.keep_temp_files)?;
        writeln!(f, "install_mode: {}", self.install_mode)?;
        writeln!(f, "automatic_install: {}", self.automatic_install)?;
        writeln!(f, "command_timeout: {}", self.command_timeout)?;
        writeln!(f, "discovery_timeout: {}", self.discovery_timeout)?;
        writeln!(f, "tmp_dir: {}", self.tmp_dir.display())?;
        writeln!(f, "smb_conf: {}", self.smb_conf.display())?;
        writeln!(f, "sssd_conf: {}", self.sssd_conf.display())?;
        writeln!(f, "krb5_conf_dir: {}", self.krb5_conf_dir.display())?;
        writeln!(f, "default_home: {}", self.default_home)?;
        writeln!(f, "default_shell: {}", self.default_shell)?;
        writeln!(f, "active-directory default_client: {}", self.ad_default_client)?;
        for (name, line) in self.commands.iter() {
            writeln!(f, "command {}: {}", name, line)?;
        }
        for (name, unit) in self.services.iter() {
            writeln!(f, "service {}: {}", name, unit)?;
        }
        for (set, packages) in self.packages.iter() {
            let names: Vec<&str> = packages.keys().map(|s| s.as_str()).collect();
            writeln!(f, "packages {}: {}", set, names.join(", "))?;
        }
        for (action, policy) in self.authorization.iter() {
            writeln!(f, "authorization {}: {}", action, policy)?;
        }
        Ok(())
    }
}

impl RealmdConfig {
    pub fn new() -> Self {
        RealmdConfig {
            sock_path: DEFAULT_SOCK_PATH.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            persist: false,
            keep_temp_files: false,
            install_mode: false,
            automatic_install: true,
            command_timeout: 0,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            tmp_dir: PathBuf::from(DEFAULT_TMP_DIR),
            smb_conf: PathBuf::from(DEFAULT_SMB_CONF_PATH),
            sssd_conf: PathBuf::from(DEFAULT_SSSD_CONF_PATH),
            krb5_conf_dir: PathBuf::from(DEFAULT_KRB5_CONF_DIR),
            commands: default_commands(),
            services: default_services(),
            packages: default_packages(),
            default_home: DEFAULT_HOME.to_string(),
            default_shell: DEFAULT_SHELL.to_string(),
            ad_default_client: DEFAULT_AD_CLIENT.to_string(),
            authorization: default_authorization(),
        }
    }

    /// Load the packaged distro defaults and then the administrator's overrides.
    pub fn load_layered<P: AsRef<Path> + std::fmt::Debug>(
        self,
        layers: &[P],
    ) -> Result<Self, ConfigError> {
        layers
            .iter()
            .try_fold(self, |cfg, path| cfg.read_options_from_optional_config(path))
    }

    pub fn read_options_from_optional_config<P: AsRef<Path> + std::fmt::Debug>(
        self,
        config_path: P,
    ) -> Result<Self, ConfigError> {
        debug!("Attempting to load configuration from {:#?}", &config_path);
        let mut f = match File::open(&config_path) {
            Ok(f) => {
                debug!("Successfully opened configuration file {:#?}", &config_path);
                f
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::NotFound => {
                        debug!(
                            "Configuration file {:#?} not found, skipping.",
                            &config_path
                        );
                    }
                    ErrorKind::PermissionDenied => {
                        warn!(
                            "Permission denied loading configuration file {:#?}, skipping.",
                            &config_path
                        );
                    }
                    _ => {
                        debug!(
                            "Unable to open config file {:#?} [{:?}], skipping ...",
                            &config_path, e
                        );
                    }
                };
                return Ok(self);
            }
        };

        let path_str = config_path.as_ref().display().to_string();

        let mut contents = String::new();
        f.read_to_string(&mut contents).map_err(|e| {
            error!("{:?}", e);
            ConfigError::Io {
                path: path_str.clone(),
                source: e,
            }
        })?;

        let config: ConfigInt = toml::from_str(contents.as_str()).map_err(|e| {
            error!("{:?}", e);
            ConfigError::Parse {
                path: path_str.clone(),
                source: e,
            }
        })?;

        Ok(self.merge(config))
    }

    fn merge(self, config: ConfigInt) -> Self {
        let paths = config.paths.unwrap_or_default();
        let users = config.users.unwrap_or_default();
        let ad = config.active_directory.unwrap_or_default();

        let mut commands = self.commands;
        commands.extend(config.commands);
        let mut services = self.services;
        services.extend(config.services);
        let mut packages = self.packages;
        for (set, entries) in config.packages {
            packages.entry(set).or_default().extend(entries);
        }
        let mut authorization = self.authorization;
        authorization.extend(config.authorization);

        // Now map the values into our config.
        RealmdConfig {
            sock_path: config.sock_path.unwrap_or(self.sock_path),
            idle_timeout: config.idle_timeout.unwrap_or(self.idle_timeout),
            persist: config.persist.unwrap_or(self.persist),
            keep_temp_files: config.keep_temp_files.unwrap_or(self.keep_temp_files),
            install_mode: config.install_mode.unwrap_or(self.install_mode),
            automatic_install: config.automatic_install.unwrap_or(self.automatic_install),
            command_timeout: config.command_timeout.unwrap_or(self.command_timeout),
            discovery_timeout: config.discovery_timeout.unwrap_or(self.discovery_timeout),
            tmp_dir: config.tmp_dir.map(PathBuf::from).unwrap_or(self.tmp_dir),
            smb_conf: paths.smb_conf.map(PathBuf::from).unwrap_or(self.smb_conf),
            sssd_conf: paths.sssd_conf.map(PathBuf::from).unwrap_or(self.sssd_conf),
            krb5_conf_dir: paths
                .krb5_conf_dir
                .map(PathBuf::from)
                .unwrap_or(self.krb5_conf_dir),
            commands,
            services,
            packages,
            default_home: users.default_home.unwrap_or(self.default_home),
            default_shell: users.default_shell.unwrap_or(self.default_shell),
            ad_default_client: ad.default_client.unwrap_or(self.ad_default_client),
            authorization,
        }
    }

    pub fn authz_policy(&self, action: &str) -> AuthzPolicy {
        self.authorization
            .get(action)
            .copied()
            .unwrap_or(AuthzPolicy::Root)
    }

    pub fn service_unit<'a>(&'a self, service: &'a str) -> &'a str {
        self.services
            .get(service)
            .map(|s| s.as_str())
            .unwrap_or(service)
    }
}
