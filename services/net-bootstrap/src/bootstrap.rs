//! The bootstrap sequence: resolve, build, submit.
//!
//! State machine:
//!
//! ```text
//! Unconfigured --submit ok--> Configured
//!      |
//!      +-------any error----> Failed (terminal)
//! ```
//!
//! Nothing is retried or rolled back. A failed host needs an operator.

use std::fmt;
use std::net::Ipv4Addr;

use tracing::{error, info, warn};

use hostnet_netconf::{NetworkConfig, SetupNetworks};

use crate::client::{ConfigServiceClient, Connector};
use crate::config::BootstrapConfig;
use crate::error::BootstrapError;
use crate::identity::HostIdentityProvider;

/// Where the bootstrap stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Unconfigured,
    Configured,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Unconfigured => f.write_str("unconfigured"),
            BootstrapState::Configured => f.write_str("configured"),
            BootstrapState::Failed => f.write_str("failed"),
        }
    }
}

/// One bootstrap attempt.
pub struct Bootstrap<P, C> {
    config: BootstrapConfig,
    identity: P,
    connector: C,
    state: BootstrapState,
}

impl<P, C> Bootstrap<P, C>
where
    P: HostIdentityProvider,
    C: Connector,
{
    pub fn new(config: BootstrapConfig, identity: P, connector: C) -> Self {
        Self {
            config,
            identity,
            connector,
            state: BootstrapState::Unconfigured,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Resolve this host's IPv4 address.
    pub async fn resolve_local_address(&self) -> Result<Ipv4Addr, BootstrapError> {
        self.identity.resolve_local_address().await
    }

    /// Build and validate the request for a host address.
    pub fn build_request(&self, ipaddr: Ipv4Addr) -> Result<SetupNetworks, BootstrapError> {
        let record = NetworkConfig::for_host(
            &self.config.nic,
            &ipaddr.to_string(),
            self.config.netmask,
            self.config.gateway,
        )?;
        if record.gateway_is_host() {
            warn!(
                ipaddr = %record.ipaddr,
                "gateway equals the host address, submitting anyway"
            );
        }
        let request = SetupNetworks::single(&self.config.network, record);
        request.validate()?;
        Ok(request)
    }

    /// Resolve the host address and build the request, without touching the
    /// configuration service.
    pub async fn prepare(&self) -> Result<SetupNetworks, BootstrapError> {
        let ipaddr = self.resolve_local_address().await?;
        info!(ipaddr = %ipaddr, "local address resolved");

        let request = self.build_request(ipaddr)?;
        if let Some(record) = request.networks.get(&self.config.network) {
            info!(
                network = %self.config.network,
                nic = %record.nic,
                ipaddr = %record.ipaddr,
                netmask = %record.netmask,
                gateway = %record.gateway,
                "network configuration built"
            );
        }
        Ok(request)
    }

    /// Submit a request over an open connection.
    pub async fn submit_network_config(
        &self,
        client: &mut dyn ConfigServiceClient,
        request: SetupNetworks,
    ) -> Result<(), BootstrapError> {
        client.apply_network_config(&request).await
    }

    /// Run the whole sequence once.
    pub async fn run(&mut self) -> Result<(), BootstrapError> {
        let outcome = self.run_inner().await;
        match &outcome {
            Ok(()) => self.transition(BootstrapState::Configured),
            Err(e) => {
                error!(reason = e.reason_code(), error = %e, "bootstrap failed");
                self.transition(BootstrapState::Failed);
            }
        }
        outcome
    }

    async fn run_inner(&self) -> Result<(), BootstrapError> {
        let request = self.prepare().await?;

        let mut client = self.connector.connect().await?;
        info!(network = %self.config.network, "submitting network configuration");
        self.submit_network_config(&mut *client, request).await
    }

    fn transition(&mut self, next: BootstrapState) {
        // Configured and Failed are terminal.
        if self.state != BootstrapState::Unconfigured {
            return;
        }
        info!(from = %self.state, to = %next, "bootstrap state changed");
        self.state = next;
    }
}
