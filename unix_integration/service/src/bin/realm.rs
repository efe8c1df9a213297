#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use realmd_common::client::DaemonClient;
use realmd_common::config::RealmdConfig;
use realmd_common::constants::{
    DEFAULT_CONFIG_PATH, DEFAULT_CONN_TIMEOUT, DEFAULT_DISTRO_CONFIG_PATH,
    DEFAULT_OPERATION_TIMEOUT,
};
use realmd_common::proto::{
    ClientRequest, ClientResponse, CredentialArg, LoginPolicy, Options, RealmInfo,
};
use uuid::Uuid;

include!("../opt/realm.rs");

macro_rules! setup_client {
    () => {{
        let cfg = match RealmdConfig::new()
            .load_layered(&[DEFAULT_DISTRO_CONFIG_PATH, DEFAULT_CONFIG_PATH])
        {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                return ExitCode::FAILURE;
            }
        };

        debug!("Using realmd socket path: {:?}", cfg.sock_path.as_str());

        if !PathBuf::from(&cfg.sock_path).exists() {
            error!(
                "Failed to find unix socket at {}, is realmd running?",
                cfg.sock_path.as_str()
            );
            return ExitCode::FAILURE;
        }

        match DaemonClient::new(cfg.sock_path.as_str(), DEFAULT_OPERATION_TIMEOUT).await {
            Ok(dc) => dc,
            Err(err) => {
                error!(
                    "Failed to connect to realmd at {} -> {:?}",
                    cfg.sock_path.as_str(),
                    err
                );
                return ExitCode::FAILURE;
            }
        }
    }};
}

fn print_realm(info: &RealmInfo, name_only: bool) {
    println!("{}", info.name);
    if name_only {
        return;
    }
    println!("  type: kerberos");
    if let Some(realm_name) = &info.realm_name {
        println!("  realm-name: {}", realm_name);
    }
    if let Some(domain_name) = &info.domain_name {
        println!("  domain-name: {}", domain_name);
    }
    if info.configured {
        println!("  configured: kerberos-member");
    } else {
        println!("  configured: no");
    }
    if let Some(server) = &info.server_software {
        println!("  server-software: {}", server);
    }
    if let Some(client) = &info.client_software {
        println!("  client-software: {}", client);
    }
    if info.configured {
        if !info.login_formats.is_empty() {
            println!("  login-formats: {}", info.login_formats.join(" "));
        }
        println!("  login-policy: {}", info.login_policy);
        if !info.permitted_logins.is_empty() {
            println!("  permitted-logins: {}", info.permitted_logins.join(", "));
        }
    }
}

fn options_from(software: SoftwareOpt) -> Options {
    Options {
        server_software: software.server_software,
        client_software: software.client_software,
        membership_software: software.membership_software,
        ..Default::default()
    }
}

fn prompt_password(user: &str) -> Option<String> {
    match rpassword::prompt_password(format!("Password for {}: ", user)) {
        Ok(p) => Some(p),
        Err(e) => {
            error!("Problem getting input: {}", e);
            None
        }
    }
}

/// Send a request, printing diagnostics if asked, and report any error from the daemon.
/// Returns the final response if it wasn't an error.
async fn call(
    client: &mut DaemonClient,
    req: ClientRequest,
    timeout: Option<u64>,
    verbose: bool,
) -> Option<ClientResponse> {
    let res = client
        .call_with_diagnostics(req, timeout, |line| {
            if verbose {
                eprintln!("{}", line);
            } else {
                debug!(diagnostics = %line);
            }
        })
        .await;
    match res {
        Ok(ClientResponse::Error(err)) => {
            eprintln!("realm: {}", err);
            debug!(kind = %err.kind());
            None
        }
        Ok(resp) => Some(resp),
        Err(e) => {
            error!("Error communicating with realmd -> {:?}", e);
            None
        }
    }
}

async fn discover_one(
    client: &mut DaemonClient,
    name: &str,
    options: &Options,
    verbose: bool,
) -> Option<RealmInfo> {
    let req = ClientRequest::Discover {
        string: name.to_string(),
        options: options.clone(),
    };
    match call(client, req, None, verbose).await {
        Some(ClientResponse::Discovered { realms, .. }) => {
            let found = realms.into_iter().next();
            if found.is_none() {
                eprintln!("realm: No such realm found: {}", name);
            }
            found
        }
        Some(other) => {
            error!("Unexpected response -> {:?}", other);
            None
        }
        None => None,
    }
}

fn login_change(
    realm: Option<String>,
    policy: LoginPolicy,
    add: Vec<String>,
    remove: Vec<String>,
) -> ClientRequest {
    ClientRequest::ChangeLoginPolicy {
        realm: realm.unwrap_or_default(),
        policy: policy.as_str().to_string(),
        add,
        remove,
        options: Options::default(),
    }
}

fn success(resp: Option<ClientResponse>) -> ExitCode {
    match resp {
        Some(ClientResponse::Success) => ExitCode::SUCCESS,
        Some(other) => {
            error!("Unexpected response -> {:?}", other);
            ExitCode::FAILURE
        }
        None => ExitCode::FAILURE,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let opt = RealmParser::parse();
    sketching::cli_init(opt.debug);
    let verbose = opt.verbose;

    match opt.commands {
        RealmOpt::Discover {
            name,
            name_only,
            software,
        } => {
            let mut client = setup_client!();
            let req = ClientRequest::Discover {
                string: name.clone().unwrap_or_default(),
                options: options_from(software),
            };
            match call(&mut client, req, None, verbose).await {
                Some(ClientResponse::Discovered { realms, .. }) if realms.is_empty() => {
                    eprintln!(
                        "realm: No such realm found{}",
                        name.map(|n| format!(": {}", n)).unwrap_or_default()
                    );
                    ExitCode::FAILURE
                }
                Some(ClientResponse::Discovered { realms, .. }) => {
                    for realm in realms.iter() {
                        print_realm(realm, name_only);
                    }
                    ExitCode::SUCCESS
                }
                Some(other) => {
                    error!("Unexpected response -> {:?}", other);
                    ExitCode::FAILURE
                }
                None => ExitCode::FAILURE,
            }
        }
        RealmOpt::List { all, name_only } => {
            let mut client = setup_client!();
            match call(
                &mut client,
                ClientRequest::ListRealms,
                Some(DEFAULT_CONN_TIMEOUT),
                verbose,
            )
            .await
            {
                Some(ClientResponse::Realms(realms)) => {
                    for realm in realms.iter().filter(|r| all || r.configured) {
                        print_realm(realm, name_only);
                    }
                    ExitCode::SUCCESS
                }
                Some(other) => {
                    error!("Unexpected response -> {:?}", other);
                    ExitCode::FAILURE
                }
                None => ExitCode::FAILURE,
            }
        }
        RealmOpt::Join {
            realm,
            user,
            computer_ou,
            no_password,
            one_time_password,
            automatic_id_mapping,
            os_name,
            os_version,
            user_principal,
            no_install,
            software,
        } => {
            let mut client = setup_client!();
            let mut options = options_from(software);
            options.operation = Some(Uuid::new_v4().to_string());
            options.computer_ou = computer_ou;
            options.automatic_id_mapping = automatic_id_mapping;
            options.os_name = os_name;
            options.os_version = os_version;
            options.user_principal = user_principal.then_some(true);
            if no_install {
                options.automatic_install = Some(false);
            }

            let Some(info) = discover_one(&mut client, &realm, &options, verbose).await else {
                return ExitCode::FAILURE;
            };
            debug!(path = %info.path, operation = ?options.operation, "joining");

            let credential = if no_password {
                CredentialArg::automatic("none")
            } else if let Some(otp) = one_time_password {
                CredentialArg::secret("none", otp.as_bytes())
            } else {
                let Some(user) = user.or(info.suggested_administrator.clone()) else {
                    eprintln!("realm: Specify a user to join as with --user");
                    return ExitCode::FAILURE;
                };
                if opt.unattended {
                    eprintln!("realm: Cannot prompt for a password when running unattended");
                    return ExitCode::FAILURE;
                }
                let Some(password) = prompt_password(&user) else {
                    return ExitCode::FAILURE;
                };
                CredentialArg::password("administrator", &user, &password)
            };

            let req = ClientRequest::Join {
                realm: info.path,
                credential,
                options,
            };
            success(call(&mut client, req, None, verbose).await)
        }
        RealmOpt::Leave {
            realm,
            user,
            remove,
        } => {
            let mut client = setup_client!();
            let credential = match (user, remove) {
                (Some(user), _) => {
                    if opt.unattended {
                        eprintln!("realm: Cannot prompt for a password when running unattended");
                        return ExitCode::FAILURE;
                    }
                    let Some(password) = prompt_password(&user) else {
                        return ExitCode::FAILURE;
                    };
                    CredentialArg::password("administrator", &user, &password)
                }
                (None, true) => {
                    eprintln!("realm: Specify the user to remove the computer account with --user");
                    return ExitCode::FAILURE;
                }
                (None, false) => CredentialArg::automatic("none"),
            };
            let req = ClientRequest::Leave {
                realm: realm.unwrap_or_default(),
                credential,
                options: Options {
                    operation: Some(Uuid::new_v4().to_string()),
                    ..Default::default()
                },
            };
            success(call(&mut client, req, None, verbose).await)
        }
        RealmOpt::Permit {
            all,
            withdraw,
            realm,
            logins,
        } => {
            let req = if all {
                login_change(realm, LoginPolicy::AllowAnyLogin, Vec::new(), Vec::new())
            } else if logins.is_empty() {
                eprintln!("realm: Specify users to permit, or --all");
                return ExitCode::FAILURE;
            } else if withdraw {
                login_change(realm, LoginPolicy::AllowPermittedLogins, Vec::new(), logins)
            } else {
                login_change(realm, LoginPolicy::AllowPermittedLogins, logins, Vec::new())
            };
            let mut client = setup_client!();
            success(call(&mut client, req, None, verbose).await)
        }
        RealmOpt::Deny { all, realm, logins } => {
            let req = if all {
                login_change(realm, LoginPolicy::DenyAnyLogin, Vec::new(), Vec::new())
            } else if logins.is_empty() {
                eprintln!("realm: Specify users to deny, or --all");
                return ExitCode::FAILURE;
            } else {
                login_change(realm, LoginPolicy::AllowPermittedLogins, Vec::new(), logins)
            };
            let mut client = setup_client!();
            success(call(&mut client, req, None, verbose).await)
        }
        RealmOpt::Status => {
            let mut client = setup_client!();
            match call(
                &mut client,
                ClientRequest::Status,
                Some(DEFAULT_CONN_TIMEOUT),
                verbose,
            )
            .await
            {
                Some(ClientResponse::Status(status)) => {
                    println!("version: {}", status.version);
                    println!("busy: {}", status.busy);
                    println!("realms: {}", status.realms);
                    if !status.holds.is_empty() {
                        println!("holds: {}", status.holds.join(", "));
                    }
                    ExitCode::SUCCESS
                }
                Some(other) => {
                    error!("Unexpected response -> {:?}", other);
                    ExitCode::FAILURE
                }
                None => ExitCode::FAILURE,
            }
        }
    }
}
