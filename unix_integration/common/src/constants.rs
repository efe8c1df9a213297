pub const DEFAULT_CONFIG_PATH: &str = "/etc/realmd.toml";
pub const DEFAULT_DISTRO_CONFIG_PATH: &str = "/usr/lib/realmd/realmd-distro.toml";
pub const DEFAULT_SOCK_PATH: &str = "/run/realmd/sock";
pub const DEFAULT_TMP_DIR: &str = "/var/cache/realmd";

pub const DEFAULT_SMB_CONF_PATH: &str = "/etc/samba/smb.conf";
pub const DEFAULT_SSSD_CONF_PATH: &str = "/etc/sssd/sssd.conf";
pub const DEFAULT_KRB5_CONF_DIR: &str = "/etc/krb5.conf.d";

// Seconds the daemon may sit without work before it exits.
pub const DEFAULT_IDLE_TIMEOUT: u64 = 300;
// Once any provider has produced a result, stop waiting on the others after this.
pub const DEFAULT_DISCOVERY_TIMEOUT: u64 = 3;
pub const DISCOVERY_CACHE_TIMEOUT: u64 = 5;
pub const DEFAULT_CONN_TIMEOUT: u64 = 2;
// Joins can take a long while, the client waits far longer for those.
pub const DEFAULT_OPERATION_TIMEOUT: u64 = 3600;

pub const DEFAULT_HOME: &str = "/home/%U@%D";
pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_AD_CLIENT: &str = "sssd";

// The minimum size of a buffer for the unix stream codec
pub const CODEC_MIMIMUM_BYTESMUT_ALLOCATION: usize = 64;
// If the codec buffer exceeds this limit, then we swap the buffer
// with a fresh one to prevent memory explosions.
pub const CODEC_BYTESMUT_ALLOCATION_LIMIT: usize = 1024 * 1024;

pub const ACTION_DISCOVER_REALM: &str = "org.freedesktop.realmd.discover-realm";
pub const ACTION_CONFIGURE_REALM: &str = "org.freedesktop.realmd.configure-realm";
pub const ACTION_DECONFIGURE_REALM: &str = "org.freedesktop.realmd.deconfigure-realm";
pub const ACTION_LOGIN_POLICY: &str = "org.freedesktop.realmd.login-policy";

pub const IDENTIFIER_ACTIVE_DIRECTORY: &str = "active-directory";
pub const IDENTIFIER_IPA: &str = "ipa";
pub const IDENTIFIER_SSSD: &str = "sssd";
pub const IDENTIFIER_WINBIND: &str = "winbind";
pub const IDENTIFIER_SAMBA: &str = "samba";
pub const IDENTIFIER_KERBEROS: &str = "kerberos";

pub const OBJECT_PATH_PREFIX: &str = "/org/freedesktop/realmd";
