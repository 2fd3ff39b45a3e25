//! Command line and environment configuration.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use hostnet_netconf::{GatewayPolicy, DEFAULT_NETMASK, DEFAULT_NIC, MANAGEMENT_NETWORK};

use crate::client::{
    ApiKind, Endpoint, ServiceConnector, TlsSettings, Transport, DEFAULT_CA_FILE,
    DEFAULT_CERT_FILE, DEFAULT_KEY_FILE, DEFAULT_PORT,
};

/// Configure this host's management network through the virtualization
/// management daemon.
#[derive(Debug, Parser)]
#[command(name = "net-bootstrap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration service host.
    #[arg(long, env = "HOSTNET_HOST", default_value = "localhost")]
    pub host: String,

    /// Configuration service port.
    #[arg(long, env = "HOSTNET_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Remote API shape (stomp or xmlrpc).
    #[arg(long, env = "HOSTNET_API", default_value = "stomp")]
    pub api: ApiKind,

    /// Talk plain TCP instead of TLS, for daemons running with `ssl = false`.
    #[arg(long, env = "HOSTNET_PLAIN")]
    pub plain: bool,

    /// CA bundle that signed the service certificate.
    #[arg(long, env = "HOSTNET_CA_FILE", default_value = DEFAULT_CA_FILE)]
    pub ca_file: PathBuf,

    /// Client certificate presented to the service.
    #[arg(long, env = "HOSTNET_CERT_FILE", default_value = DEFAULT_CERT_FILE)]
    pub cert_file: PathBuf,

    /// Key of the client certificate.
    #[arg(long, env = "HOSTNET_KEY_FILE", default_value = DEFAULT_KEY_FILE)]
    pub key_file: PathBuf,

    /// Verify the service but present no client certificate.
    #[arg(long, conflicts_with = "plain")]
    pub no_client_cert: bool,

    /// Fixed gateway address. When omitted the gateway is derived from the
    /// host address (first three octets, then `.1`).
    #[arg(long, env = "HOSTNET_GATEWAY")]
    pub gateway: Option<Ipv4Addr>,

    /// Interface attached to the management bridge.
    #[arg(long, env = "HOSTNET_NIC", default_value = DEFAULT_NIC)]
    pub nic: String,

    /// Netmask of the management network.
    #[arg(long, env = "HOSTNET_NETMASK", default_value_t = DEFAULT_NETMASK)]
    pub netmask: Ipv4Addr,

    /// Logical network name.
    #[arg(long, env = "HOSTNET_NETWORK", default_value = MANAGEMENT_NETWORK)]
    pub network: String,

    /// Use this host address instead of resolving the hostname.
    #[arg(long)]
    pub ipaddr: Option<Ipv4Addr>,

    /// Connect and response timeout in seconds.
    #[arg(long, env = "HOSTNET_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Also write logs to this file.
    #[arg(long, env = "HOSTNET_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Print the request that would be sent and exit without connecting.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Everything the bootstrap needs to build and submit its request.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub network: String,
    pub nic: String,
    pub netmask: Ipv4Addr,
    pub gateway: GatewayPolicy,
    pub api: ApiKind,
    pub endpoint: Endpoint,
    pub transport: Transport,
    pub timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            network: MANAGEMENT_NETWORK.to_string(),
            nic: DEFAULT_NIC.to_string(),
            netmask: DEFAULT_NETMASK,
            gateway: GatewayPolicy::Derived,
            api: ApiKind::Stomp,
            endpoint: Endpoint::local(),
            transport: Transport::default(),
            timeout: crate::client::DEFAULT_TIMEOUT,
        }
    }
}

impl BootstrapConfig {
    /// Connector for the configured service.
    pub fn connector(&self) -> ServiceConnector {
        ServiceConnector {
            api: self.api,
            endpoint: self.endpoint.clone(),
            transport: self.transport.clone(),
            timeout: self.timeout,
        }
    }
}

impl From<&Cli> for BootstrapConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            network: cli.network.clone(),
            nic: cli.nic.clone(),
            netmask: cli.netmask,
            gateway: cli
                .gateway
                .map(GatewayPolicy::Fixed)
                .unwrap_or(GatewayPolicy::Derived),
            api: cli.api,
            endpoint: Endpoint::new(cli.host.clone(), cli.port),
            transport: transport(cli),
            timeout: Duration::from_secs(cli.timeout_secs),
        }
    }
}

fn transport(cli: &Cli) -> Transport {
    if cli.plain {
        return Transport::Plain;
    }
    if cli.no_client_cert {
        return Transport::Tls(TlsSettings::with_ca(cli.ca_file.clone()));
    }
    Transport::Tls(TlsSettings {
        ca_file: cli.ca_file.clone(),
        cert_file: Some(cli.cert_file.clone()),
        key_file: Some(cli.key_file.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["net-bootstrap"]).unwrap();
        let config = BootstrapConfig::from(&cli);

        assert_eq!(config.network, "ovirtmgmt");
        assert_eq!(config.nic, "veth_name0");
        assert_eq!(config.netmask, Ipv4Addr::new(255, 240, 0, 0));
        assert_eq!(config.gateway, GatewayPolicy::Derived);
        assert_eq!(config.api, ApiKind::Stomp);
        assert_eq!(config.endpoint, Endpoint::new("localhost", 54321));
        assert_eq!(config.transport, Transport::default());
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_fixed_gateway_and_legacy_api() {
        let cli = Cli::try_parse_from([
            "net-bootstrap",
            "--gateway",
            "172.17.0.1",
            "--api",
            "xmlrpc",
            "--plain",
            "--host",
            "vdsm.example",
        ])
        .unwrap();
        let config = BootstrapConfig::from(&cli);

        assert_eq!(
            config.gateway,
            GatewayPolicy::Fixed(Ipv4Addr::new(172, 17, 0, 1))
        );
        assert_eq!(config.api, ApiKind::XmlRpc);
        assert_eq!(config.transport, Transport::Plain);
        assert_eq!(config.connector().endpoint.host, "vdsm.example");
    }

    #[test]
    fn test_tls_paths() {
        let cli = Cli::try_parse_from([
            "net-bootstrap",
            "--ca-file",
            "/tmp/ca.pem",
            "--no-client-cert",
        ])
        .unwrap();
        assert_eq!(
            BootstrapConfig::from(&cli).transport,
            Transport::Tls(TlsSettings::with_ca("/tmp/ca.pem"))
        );

        let cli = Cli::try_parse_from([
            "net-bootstrap",
            "--cert-file",
            "/tmp/host.pem",
            "--key-file",
            "/tmp/host.key",
        ])
        .unwrap();
        let Transport::Tls(settings) = BootstrapConfig::from(&cli).transport else {
            panic!("expected TLS");
        };
        assert_eq!(settings.ca_file, PathBuf::from(DEFAULT_CA_FILE));
        assert_eq!(settings.cert_file, Some(PathBuf::from("/tmp/host.pem")));
        assert_eq!(settings.key_file, Some(PathBuf::from("/tmp/host.key")));

        assert!(Cli::try_parse_from(["net-bootstrap", "--plain", "--no-client-cert"]).is_err());
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        assert!(Cli::try_parse_from(["net-bootstrap", "--gateway", "172.17.0"]).is_err());
        assert!(Cli::try_parse_from(["net-bootstrap", "--ipaddr", "nope"]).is_err());
    }
}
