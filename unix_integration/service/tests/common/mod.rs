#![allow(dead_code)]
use std::collections::HashMap;
use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use realmd_common::config::RealmdConfig;
use realmd_service::authz::ConfigAuthorizer;
use realmd_service::daemon::Daemon;
use realmd_service::disco::dns::{DnsError, SrvResolver, SrvTarget};
use realmd_service::tools::Tools;
use tempfile::TempDir;

pub const TEST_HOST_NAME: &str = "client.example.com";

/// Answers DNS lookups from fixed tables. Anything not in a table does not exist.
#[derive(Default)]
pub struct FakeResolver {
    srv: HashMap<String, Result<Vec<SrvTarget>, DnsError>>,
    txt: HashMap<String, Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        FakeResolver::default()
    }

    /// `name` is the full record name, such as `_kerberos._udp.example.com`.
    pub fn with_srv(mut self, name: &str, targets: &[(&str, u16)]) -> Self {
        let targets = targets
            .iter()
            .map(|(host, port)| SrvTarget {
                host: host.to_string(),
                port: *port,
            })
            .collect();
        self.srv.insert(name.to_string(), Ok(targets));
        self
    }

    pub fn with_srv_error(mut self, name: &str, err: DnsError) -> Self {
        self.srv.insert(name.to_string(), Err(err));
        self
    }

    pub fn with_txt(mut self, name: &str, value: &str) -> Self {
        self.txt
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }
}

#[async_trait]
impl SrvResolver for FakeResolver {
    async fn lookup_srv(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<SrvTarget>, DnsError> {
        let name = format!("_{}._{}.{}", service, protocol, domain);
        self.srv
            .get(&name)
            .cloned()
            .unwrap_or(Err(DnsError::NotFound))
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        self.txt.get(name).cloned().ok_or(DnsError::NotFound)
    }
}

/// A scratch root with its own configuration files, and every external command
/// replaced by a shell script which records its arguments and then succeeds.
pub struct Harness {
    pub dir: TempDir,
    pub config: RealmdConfig,
}

impl Harness {
    pub fn new() -> Self {
        sketching::test_init();

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("bin")).expect("Failed to create bin dir");
        std::fs::create_dir_all(root.join("tmp")).expect("Failed to create tmp dir");
        std::fs::create_dir_all(root.join("krb5.conf.d")).expect("Failed to create krb5 dir");

        let mut config = RealmdConfig::new();
        config.sock_path = root.join("realmd.sock").display().to_string();
        config.tmp_dir = root.join("tmp");
        config.smb_conf = root.join("smb.conf");
        config.sssd_conf = root.join("sssd.conf");
        config.krb5_conf_dir = root.join("krb5.conf.d");
        config.install_mode = true;
        config.discovery_timeout = 0;

        let mut harness = Harness { dir, config };
        let names: Vec<String> = harness.config.commands.keys().cloned().collect();
        for name in names {
            harness.stub(&name, "exit 0");
        }
        harness
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    fn log_path(&self) -> PathBuf {
        self.root().join("calls.log")
    }

    /// Replace the configured command `name` with a script running `body`.
    pub fn stub(&mut self, name: &str, body: &str) {
        let path = self.root().join("bin").join(name);
        let script = format!(
            "#!/bin/sh\necho \"{} $*\" >> {}\n{}\n",
            name,
            self.log_path().display(),
            body
        );
        std::fs::write(&path, script).expect("Failed to write stub");
        std::fs::set_permissions(&path, Permissions::from_mode(0o755))
            .expect("Failed to set stub permissions");
        self.config
            .commands
            .insert(name.to_string(), path.display().to_string());
    }

    /// Every stub run so far, as `name args...`.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls()
            .iter()
            .any(|c| c.split_whitespace().next() == Some(name))
    }

    pub fn write_file(&self, path: &Path, contents: &str) {
        std::fs::write(path, contents).expect("Failed to write file");
    }

    pub fn tools(&self, resolver: FakeResolver) -> Arc<Tools> {
        let mut tools = Tools::new(Arc::new(self.config.clone()), Arc::new(resolver));
        tools.host_name = Some(TEST_HOST_NAME.to_string());
        Arc::new(tools)
    }

    pub async fn daemon(&self, resolver: FakeResolver) -> Arc<Daemon> {
        let tools = self.tools(resolver);
        let authz = ConfigAuthorizer::new(Arc::clone(&tools.config));
        let daemon = Arc::new(Daemon::with_tools(tools, Box::new(authz)));
        daemon.refresh().await;
        daemon
    }
}
