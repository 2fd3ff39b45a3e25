//! Configuration service clients.
//!
//! Two wire shapes of the same "setup networks" call are supported:
//! - `stomp`: `Host.setupNetworks` with named params, JSON-RPC over STOMP
//! - `xmlrpc`: legacy `setupNetworks(networks, bondings, options)`, XML-RPC
//!   posted to `/RPC2`
//!
//! Both run over TLS unless the transport is [`Transport::Plain`].

mod frame;
mod http;
mod rpc;
mod stomp;
mod tls;
mod xmlrpc;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hostnet_netconf::SetupNetworks;

use crate::error::BootstrapError;

pub use frame::{read_frame, Frame};
pub use http::{XmlRpcClient, RPC_PATH};
pub use rpc::{RpcRequest, RpcResponse, HOST_SETUP_NETWORKS};
pub use stomp::{StompClient, REQUEST_QUEUE, RESPONSE_QUEUE};
pub use tls::{
    TlsClient, TlsSettings, Transport, DEFAULT_CA_FILE, DEFAULT_CERT_FILE, DEFAULT_KEY_FILE,
};
pub use xmlrpc::{decode_call, decode_response, encode_call, SETUP_NETWORKS};

/// Default port of the management daemon.
pub const DEFAULT_PORT: u16 = 54321;

/// Default connection timeout of the management client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A connected configuration service.
#[async_trait]
pub trait ConfigServiceClient: Send {
    /// Apply a network configuration. Issued exactly once, never retried.
    async fn apply_network_config(&mut self, request: &SetupNetworks)
        -> Result<(), BootstrapError>;
}

/// Which remote API shape to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiKind {
    #[default]
    Stomp,
    XmlRpc,
}

impl FromStr for ApiKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stomp" | "jsonrpc" => Ok(ApiKind::Stomp),
            "xmlrpc" | "legacy" => Ok(ApiKind::XmlRpc),
            other => Err(format!("unknown api {:?} (expected stomp or xmlrpc)", other)),
        }
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKind::Stomp => f.write_str("stomp"),
            ApiKind::XmlRpc => f.write_str("xmlrpc"),
        }
    }
}

/// Where the configuration service listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The local daemon.
    pub fn local() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Open a connection to the service using the selected API shape.
pub async fn connect(
    api: ApiKind,
    endpoint: &Endpoint,
    transport: &Transport,
    timeout: Duration,
) -> Result<Box<dyn ConfigServiceClient>, BootstrapError> {
    match api {
        ApiKind::Stomp => Ok(Box::new(
            StompClient::connect(endpoint, transport, timeout).await?,
        )),
        ApiKind::XmlRpc => Ok(Box::new(XmlRpcClient::new(endpoint, transport, timeout)?)),
    }
}

/// Something that can open a configuration service connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn ConfigServiceClient>, BootstrapError>;
}

/// Connector for a real service endpoint.
#[derive(Debug, Clone)]
pub struct ServiceConnector {
    pub api: ApiKind,
    pub endpoint: Endpoint,
    pub transport: Transport,
    pub timeout: Duration,
}

#[async_trait]
impl Connector for ServiceConnector {
    async fn connect(&self) -> Result<Box<dyn ConfigServiceClient>, BootstrapError> {
        connect(self.api, &self.endpoint, &self.transport, self.timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_kind_parsing() {
        assert_eq!("stomp".parse::<ApiKind>().unwrap(), ApiKind::Stomp);
        assert_eq!("XMLRPC".parse::<ApiKind>().unwrap(), ApiKind::XmlRpc);
        assert_eq!("legacy".parse::<ApiKind>().unwrap(), ApiKind::XmlRpc);
        assert_eq!(ApiKind::XmlRpc.to_string(), "xmlrpc");
        assert!("http".parse::<ApiKind>().is_err());
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::local().to_string(), "localhost:54321");
        assert_eq!(Endpoint::new("::1", 1).to_string(), "[::1]:1");
    }
}
