//! Management network configuration records.
//!
//! This library provides:
//! - The `NetworkConfig` record submitted for the management network
//! - Gateway derivation (fixed or computed from the host address)
//! - The "setup networks" request shape (networks, bondings, options)
//! - Validation performed before anything is sent to the remote service

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the logical management network.
pub const MANAGEMENT_NETWORK: &str = "ovirtmgmt";

/// Interface attached to the management bridge.
pub const DEFAULT_NIC: &str = "veth_name0";

/// Subnet mask of the management network.
pub const DEFAULT_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 240, 0, 0);

/// Gateway used by the fixed policy when none is configured.
pub const DEFAULT_FIXED_GATEWAY: Ipv4Addr = Ipv4Addr::new(172, 17, 0, 1);

/// Network configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetconfError {
    /// Address is not a dotted-quad IPv4 address.
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),

    /// Netmask bits are not contiguous.
    #[error("invalid netmask: {0}")]
    InvalidNetmask(Ipv4Addr),

    /// Interface name is empty or malformed.
    #[error("invalid nic name: {0:?}")]
    InvalidNic(String),
}

// ============================================================================
// Addresses
// ============================================================================

/// Parse a strict dotted-quad IPv4 address (exactly four octets).
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, NetconfError> {
    s.trim()
        .parse()
        .map_err(|_| NetconfError::InvalidAddress(s.to_string()))
}

/// Gateway derived from the first three octets of `ipaddr`, with `1` appended.
pub fn derive_gateway(ipaddr: &str) -> Result<Ipv4Addr, NetconfError> {
    let addr = parse_ipv4(ipaddr)?;
    let [a, b, c, _] = addr.octets();
    Ok(Ipv4Addr::new(a, b, c, 1))
}

/// Check that a netmask is a run of ones followed by zeros.
pub fn validate_netmask(mask: Ipv4Addr) -> Result<(), NetconfError> {
    let bits = u32::from(mask);
    if bits.leading_ones() + bits.trailing_zeros() == 32 {
        Ok(())
    } else {
        Err(NetconfError::InvalidNetmask(mask))
    }
}

/// How the gateway of the management network is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatewayPolicy {
    /// Always use this gateway.
    Fixed(Ipv4Addr),

    /// `a.b.c.1` for a host address `a.b.c.d`.
    #[default]
    Derived,
}

impl GatewayPolicy {
    /// Resolve the gateway for a host address.
    ///
    /// The fixed policy ignores `ipaddr` entirely, so even a malformed
    /// address yields the configured gateway.
    pub fn gateway_for(&self, ipaddr: &str) -> Result<Ipv4Addr, NetconfError> {
        match self {
            GatewayPolicy::Fixed(gateway) => Ok(*gateway),
            GatewayPolicy::Derived => derive_gateway(ipaddr),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Static configuration of one bridged network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub nic: String,
    pub ipaddr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub default_route: bool,
    pub bridged: bool,
}

impl NetworkConfig {
    /// Create a bridged, default-route network record.
    pub fn new(nic: &str, ipaddr: Ipv4Addr, netmask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self {
            nic: nic.to_string(),
            ipaddr,
            netmask,
            gateway,
            default_route: true,
            bridged: true,
        }
    }

    /// Build the record for a host address using the given gateway policy.
    pub fn for_host(
        nic: &str,
        ipaddr: &str,
        netmask: Ipv4Addr,
        policy: GatewayPolicy,
    ) -> Result<Self, NetconfError> {
        let addr = parse_ipv4(ipaddr)?;
        let gateway = policy.gateway_for(ipaddr)?;
        Ok(Self::new(nic, addr, netmask, gateway))
    }

    /// Validate the record before submission.
    pub fn validate(&self) -> Result<(), NetconfError> {
        if self.nic.is_empty()
            || self
                .nic
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c.is_control())
        {
            return Err(NetconfError::InvalidNic(self.nic.clone()));
        }

        validate_netmask(self.netmask)
    }

    /// Whether the gateway is the host itself. Legal, but usually a sign the
    /// derived policy was applied to a router address.
    pub fn gateway_is_host(&self) -> bool {
        self.gateway == self.ipaddr
    }
}

/// Options passed alongside a setup-networks call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOptions {
    pub connectivity_check: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        // The check cannot pass while the management link is being rebuilt.
        Self {
            connectivity_check: false,
        }
    }
}

/// A complete setup-networks request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupNetworks {
    pub networks: BTreeMap<String, NetworkConfig>,
    pub bondings: BTreeMap<String, serde_json::Value>,
    pub options: SetupOptions,
}

impl SetupNetworks {
    /// Request naming a single network, with no bondings and the
    /// connectivity check disabled.
    pub fn single(name: &str, config: NetworkConfig) -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(name.to_string(), config);
        Self {
            networks,
            bondings: BTreeMap::new(),
            options: SetupOptions::default(),
        }
    }

    /// Request for the management network.
    pub fn management(config: NetworkConfig) -> Self {
        Self::single(MANAGEMENT_NETWORK, config)
    }

    /// Validate every network record in the request.
    pub fn validate(&self) -> Result<(), NetconfError> {
        self.networks.values().try_for_each(NetworkConfig::validate)
    }
}
