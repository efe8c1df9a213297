use clap::{Args, Subcommand};

#[derive(Debug, Args, Clone, Default)]
pub struct SoftwareOpt {
    /// Only match realms served by this kind of server, such as active-directory or ipa.
    #[clap(long = "server-software")]
    pub server_software: Option<String>,
    /// Use this client software, such as sssd or winbind.
    #[clap(long = "client-software")]
    pub client_software: Option<String>,
    /// Use this software to join, such as samba or adcli.
    #[clap(long = "membership-software")]
    pub membership_software: Option<String>,
}

#[derive(Debug, Subcommand)]
#[clap(about = "Manage enrollment in realms")]
pub enum RealmOpt {
    /// Discover the realms a name refers to. Without a name, this host's domain is used.
    Discover {
        name: Option<String>,
        /// Only show the realm names.
        #[clap(short = 'n', long = "name-only")]
        name_only: bool,
        #[clap(flatten)]
        software: SoftwareOpt,
    },
    /// List the realms this host is joined to.
    List {
        /// Include discovered realms that are not configured.
        #[clap(short, long)]
        all: bool,
        /// Only show the realm names.
        #[clap(short = 'n', long = "name-only")]
        name_only: bool,
    },
    /// Join this host to a realm.
    Join {
        realm: String,
        /// The administrative user to join as. Defaults to the realm's suggested
        /// administrator.
        #[clap(short = 'U', long = "user")]
        user: Option<String>,
        /// The organizational unit to create the computer account in.
        #[clap(long = "computer-ou")]
        computer_ou: Option<String>,
        /// Join without a password, if the realm supports it.
        #[clap(long = "no-password")]
        no_password: bool,
        /// Join with a one time password handed out by the realm's administrator.
        #[clap(long = "one-time-password")]
        one_time_password: Option<String>,
        #[clap(long = "automatic-id-mapping")]
        automatic_id_mapping: Option<bool>,
        #[clap(long = "os-name")]
        os_name: Option<String>,
        #[clap(long = "os-version")]
        os_version: Option<String>,
        /// Set the computer account's user principal name.
        #[clap(long = "user-principal")]
        user_principal: bool,
        /// Don't install missing packages.
        #[clap(long = "no-install")]
        no_install: bool,
        #[clap(flatten)]
        software: SoftwareOpt,
    },
    /// Leave a realm. Without a name, the first joined realm is left.
    Leave {
        realm: Option<String>,
        /// Remove the computer account from the domain, authenticating as this user.
        #[clap(short = 'U', long = "user")]
        user: Option<String>,
        /// Remove the computer account from the domain.
        #[clap(long)]
        remove: bool,
    },
    /// Permit logins.
    Permit {
        /// Permit any user of the realm to log in.
        #[clap(short, long)]
        all: bool,
        /// Withdraw permission from the named logins instead.
        #[clap(short = 'x', long)]
        withdraw: bool,
        /// The realm to change, defaults to the first joined realm.
        #[clap(short = 'R', long = "realm")]
        realm: Option<String>,
        logins: Vec<String>,
    },
    /// Deny logins.
    Deny {
        /// Deny every user of the realm.
        #[clap(short, long)]
        all: bool,
        /// The realm to change, defaults to the first joined realm.
        #[clap(short = 'R', long = "realm")]
        realm: Option<String>,
        logins: Vec<String>,
    },
    /// Show whether the daemon is busy and how many realms it knows of.
    Status,
}

#[derive(Debug, clap::Parser)]
#[clap(about = "Manage enrollment in realms", version)]
pub struct RealmParser {
    /// Show extra debug information.
    #[clap(short, long, global = true, env = "REALM_DEBUG")]
    pub debug: bool,
    /// Show the daemon's diagnostics as the operation runs.
    #[clap(short, long, global = true)]
    pub verbose: bool,
    /// Don't prompt for input.
    #[clap(long, global = true)]
    pub unattended: bool,
    #[clap(subcommand)]
    pub commands: RealmOpt,
}
