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

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, ArgAction, Command};
use libc::umask;
use nix::unistd::geteuid;
use realmd_common::config::RealmdConfig;
use realmd_common::constants::{DEFAULT_CONFIG_PATH, DEFAULT_DISTRO_CONFIG_PATH};
use realmd_service::authz::ConfigAuthorizer;
use realmd_service::daemon::Daemon;
use realmd_service::disco::dns::SystemResolver;
use realmd_service::server::run_listener;
use sketching::tracing_forest::traits::*;
use sketching::tracing_forest::util::*;
use sketching::tracing_forest::{self};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::sync::mpsc::channel;

use notify_debouncer_full::{new_debouncer, notify::RecursiveMode, notify::Watcher};

#[cfg(not(target_os = "illumos"))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Pass this a file path and it'll look for the file and remove it if it's there.
fn rm_if_exist(p: &str) {
    if Path::new(p).exists() {
        debug!("Removing requested file {:?}", p);
        let _ = std::fs::remove_file(p).map_err(|e| {
            error!(
                "Failure while attempting to attempting to remove {:?} -> {:?}",
                p, e
            );
        });
    } else {
        debug!("Path {:?} doesn't exist, not attempting to remove.", p);
    }
}

/// Directories holding the configuration that providers read their realms from.
fn watched_dirs(cfg: &RealmdConfig) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [cfg.smb_conf.parent(), cfg.sssd_conf.parent()]
        .into_iter()
        .flatten()
        .map(Path::to_path_buf)
        .collect();
    dirs.push(cfg.krb5_conf_dir.clone());
    dirs.sort();
    dirs.dedup();
    dirs.retain(|d| d.is_dir());
    dirs
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // On linux when debug assertions are disabled, prevent ptrace
    // from attaching to us.
    #[cfg(all(target_os = "linux", not(debug_assertions)))]
    if let Err(code) = prctl::set_dumpable(false) {
        error!(?code, "CRITICAL: Unable to set prctl flags");
        return ExitCode::FAILURE;
    }

    let clap_args = Command::new("realmd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Realm discovery and enrollment daemon")
        .arg(
            Arg::new("skip-root-check")
                .help("Allow running as a user other than root, joins will not work!")
                .short('r')
                .long("skip-root-check")
                .env("REALMD_SKIP_ROOT_CHECK")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .help("Show extra debug information")
                .short('d')
                .long("debug")
                .env("REALMD_DEBUG")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("configtest")
                .help("Display the configuration and exit")
                .short('t')
                .long("configtest")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("persist")
                .help("Don't exit when idle")
                .short('p')
                .long("persist")
                .env("REALMD_PERSIST")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .help("Set the config file path")
                .short('c')
                .long("config")
                .default_value(DEFAULT_CONFIG_PATH)
                .env("REALMD_CONFIG")
                .action(ArgAction::Set),
        )
        .get_matches();

    if clap_args.get_flag("debug") {
        std::env::set_var("RUST_LOG", "debug");
    }

    #[allow(clippy::expect_used)]
    tracing_forest::worker_task()
        .set_global(true)
        // Fall back to stderr
        .map_sender(|sender| sender.or_stderr())
        .build_on(|subscriber| subscriber
            .with(EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new("info"))
                .expect("Failed to init envfilter")
            )
        )
        .on(async {
            if clap_args.get_flag("skip-root-check") {
                warn!("Skipping root user check, joining and leaving realms will fail.")
            } else if !geteuid().is_root() {
                error!("Refusing to run - this process must operate as root.");
                return ExitCode::FAILURE
            };

            let Some(cfg_path_str) = clap_args.get_one::<String>("config") else {
                error!("Failed to pull the config path");
                return ExitCode::FAILURE
            };

            let mut cfg = match RealmdConfig::new()
                .load_layered(&[DEFAULT_DISTRO_CONFIG_PATH, cfg_path_str.as_str()])
            {
                Ok(v) => v,
                Err(e) => {
                    error!("Could not parse configuration: {}", e);
                    return ExitCode::FAILURE
                }
            };
            if clap_args.get_flag("persist") {
                cfg.persist = true;
            }

            if clap_args.get_flag("configtest") {
                eprintln!("###################################");
                eprintln!("Dumping configs:\n###################################");
                eprintln!("realmd config (from {:#?})", cfg_path_str);
                eprintln!("{}", cfg);
                return ExitCode::SUCCESS
            }

            // Credential caches and generated files go here, keep them from prying eyes.
            if let Err(e) = std::fs::create_dir_all(&cfg.tmp_dir)
                .and_then(|_| std::fs::set_permissions(&cfg.tmp_dir, Permissions::from_mode(0o700)))
            {
                error!(?e, "Unable to prepare temporary directory {}", cfg.tmp_dir.display());
                return ExitCode::FAILURE
            }

            let resolver = match SystemResolver::new() {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    error!(?e, "Failed to configure the DNS resolver");
                    return ExitCode::FAILURE
                }
            };

            let cfg = Arc::new(cfg);
            let daemon = Arc::new(Daemon::new(
                Arc::clone(&cfg),
                resolver,
                Box::new(ConfigAuthorizer::new(Arc::clone(&cfg))),
            ));
            daemon.refresh().await;

            if let Some(sock_dir) = Path::new(cfg.sock_path.as_str()).parent() {
                if let Err(e) = std::fs::create_dir_all(sock_dir) {
                    error!(?e, "Unable to create socket directory {}", sock_dir.display());
                    return ExitCode::FAILURE
                }
            }
            rm_if_exist(cfg.sock_path.as_str());

            // Set the umask while we open the path, callers are checked per request.
            let before = unsafe { umask(0) };
            let listener = match UnixListener::bind(cfg.sock_path.as_str()) {
                Ok(l) => l,
                Err(_e) => {
                    error!("Failed to bind UNIX socket at {}", cfg.sock_path.as_str());
                    return ExitCode::FAILURE
                }
            };
            // Undo umask changes.
            let _ = unsafe { umask(before) };

            let (broadcast_tx, broadcast_rx) = broadcast::channel(4);
            let mut c_broadcast_rx = broadcast_tx.subscribe();

            let (inotify_tx, mut inotify_rx) = channel(4);

            let dirs = watched_dirs(&cfg);
            let watcher = new_debouncer(Duration::from_secs(2), None, move |_event| {
                let _ = inotify_tx.try_send(true);
            })
                .and_then(|mut debouncer| {
                    dirs.iter().try_for_each(|dir| {
                        debug!("Watching {} for changes", dir.display());
                        debouncer.watcher().watch(dir, RecursiveMode::NonRecursive)
                    })
                    .map(|()| debouncer)
                });
            let watcher =
            match watcher {
                Ok(watcher) => {
                    watcher
                }
                Err(e) => {
                    error!("Failed to setup inotify {:?}",  e);
                    return ExitCode::FAILURE
                }
            };

            let inotify_daemon = Arc::clone(&daemon);
            let task_c = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = c_broadcast_rx.recv() => {
                            break;
                        }
                        _ = inotify_rx.recv() => {
                            inotify_daemon.refresh().await;
                        }
                    }
                }
                info!("Stopped configuration watcher");
            });

            let task_a = tokio::spawn(run_listener(listener, Arc::clone(&daemon), broadcast_rx));

            info!("Server started ...");

            // On linux, notify systemd.
            #[cfg(target_os = "linux")]
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

            loop {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => {
                        break
                    }
                    Some(()) = async move {
                        let sigterm = tokio::signal::unix::SignalKind::terminate();
                        #[allow(clippy::unwrap_used)]
                        tokio::signal::unix::signal(sigterm).unwrap().recv().await
                    } => {
                        break
                    }
                    Some(()) = async move {
                        let sighup = tokio::signal::unix::SignalKind::hangup();
                        #[allow(clippy::unwrap_used)]
                        tokio::signal::unix::signal(sighup).unwrap().recv().await
                    } => {
                        info!("Hangup received, refreshing realms");
                        daemon.refresh().await;
                    }
                    Some(()) = async move {
                        let sigusr1 = tokio::signal::unix::SignalKind::user_defined1();
                        #[allow(clippy::unwrap_used)]
                        tokio::signal::unix::signal(sigusr1).unwrap().recv().await
                    } => {
                        // Ignore
                    }
                    () = daemon.wait_for_idle() => {
                        info!("Exiting after being idle");
                        break
                    }
                }
            }
            info!("Shutting down, sending down signal to tasks");
            // Send a broadcast that we are done.
            if let Err(e) = broadcast_tx.send(true) {
                error!("Unable to shutdown workers {:?}", e);
            }

            drop(watcher);

            let _ = task_a.await;
            let _ = task_c.await;

            rm_if_exist(cfg.sock_path.as_str());

            ExitCode::SUCCESS
    })
    .await
}
