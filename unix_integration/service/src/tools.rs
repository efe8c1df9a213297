use std::sync::Arc;

use realmd_common::config::RealmdConfig;

use crate::command::CommandRunner;
use crate::disco::dns::SrvResolver;
use crate::disco::probe::{host_name, DiscoveryProbe};

/// Shared by every provider and membership.
pub struct Tools {
    pub config: Arc<RealmdConfig>,
    pub runner: Arc<CommandRunner>,
    pub probe: DiscoveryProbe,
    /// This host's name, as read at startup.
    pub host_name: Option<String>,
}

impl Tools {
    pub fn new(config: Arc<RealmdConfig>, resolver: Arc<dyn SrvResolver>) -> Self {
        let runner = Arc::new(CommandRunner::new(&config));
        let probe = DiscoveryProbe::new(resolver, Arc::clone(&runner));
        Tools {
            config,
            runner,
            probe,
            host_name: host_name(),
        }
    }
}
