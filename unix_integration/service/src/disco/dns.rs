use std::fmt;

use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use realmd_common::error::RealmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for SrvTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Errors from a DNS lookup. Discovery treats these differently: a name that does not
/// exist is a plain negative, the others may or may not be fatal depending on the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// The name or record does not exist.
    NotFound,
    /// The lookup timed out or the server could not be reached.
    TemporaryFailure(String),
    Failed(String),
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::NotFound => f.write_str("no such record"),
            DnsError::TemporaryFailure(m) => write!(f, "temporary failure: {}", m),
            DnsError::Failed(m) => f.write_str(m),
        }
    }
}

impl From<ResolveError> for DnsError {
    fn from(e: ResolveError) -> Self {
        match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound,
            ResolveErrorKind::Timeout | ResolveErrorKind::NoConnections => {
                DnsError::TemporaryFailure(e.to_string())
            }
            ResolveErrorKind::Io(_) => DnsError::TemporaryFailure(e.to_string()),
            _ => DnsError::Failed(e.to_string()),
        }
    }
}

/// The DNS lookups discovery depends on. Abstracted so tests can answer without a
/// network.
#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// Look up `_<service>._<protocol>.<domain>`, ordered by priority then weight.
    async fn lookup_srv(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<SrvTarget>, DnsError>;

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// Resolver backed by the host's `/etc/resolv.conf`.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Result<Self, RealmError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
            error!(?e, "unable to load the system resolver configuration");
            RealmError::Internal(format!("Couldn't set up DNS resolver: {}", e))
        })?;
        Ok(SystemResolver { resolver })
    }
}

fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

#[async_trait]
impl SrvResolver for SystemResolver {
    async fn lookup_srv(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<SrvTarget>, DnsError> {
        let name = fqdn(&format!("_{}._{}.{}", service, protocol, domain));
        trace!(%name, "SRV lookup");
        let lookup = self.resolver.srv_lookup(name.as_str()).await?;

        let mut records: Vec<_> = lookup.iter().collect();
        records.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then(b.weight().cmp(&a.weight()))
        });

        let targets: Vec<SrvTarget> = records
            .into_iter()
            .map(|srv| SrvTarget {
                host: srv.target().to_utf8().trim_end_matches('.').to_string(),
                port: srv.port(),
            })
            // A single "." target means the service is decidedly not available.
            .filter(|t| !t.host.is_empty())
            .collect();

        if targets.is_empty() {
            Err(DnsError::NotFound)
        } else {
            Ok(targets)
        }
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let name = fqdn(name);
        trace!(%name, "TXT lookup");
        let lookup = self.resolver.txt_lookup(name.as_str()).await?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|d| String::from_utf8_lossy(d).into_owned())
                    .collect::<String>()
            })
            .collect())
    }
}
