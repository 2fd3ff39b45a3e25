//! Host identity: which IPv4 address this machine answers to.
//!
//! The system provider resolves the machine's own hostname, the same lookup
//! a provisioning script would do with `gethostbyname(gethostname())`.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use tracing::debug;

use crate::error::BootstrapError;

/// Source of the local host's primary address.
#[async_trait]
pub trait HostIdentityProvider: Send + Sync {
    /// Resolve the IPv4 address associated with this host.
    async fn resolve_local_address(&self) -> Result<Ipv4Addr, BootstrapError>;
}

/// Resolves the hostname reported by the kernel.
#[derive(Debug, Clone, Default)]
pub struct SystemHostIdentity {
    /// Overrides the kernel hostname.
    hostname: Option<String>,
}

impl SystemHostIdentity {
    /// Provider for the kernel hostname.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider resolving a specific hostname instead.
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
        }
    }

    fn hostname(&self) -> Result<String, BootstrapError> {
        if let Some(hostname) = &self.hostname {
            return Ok(hostname.clone());
        }

        let name = nix::unistd::gethostname()
            .map_err(|e| BootstrapError::Resolution(format!("gethostname failed: {}", e)))?;

        name.into_string()
            .map_err(|raw| BootstrapError::Resolution(format!("hostname is not UTF-8: {:?}", raw)))
    }
}

#[async_trait]
impl HostIdentityProvider for SystemHostIdentity {
    async fn resolve_local_address(&self) -> Result<Ipv4Addr, BootstrapError> {
        let hostname = self.hostname()?;
        if hostname.is_empty() {
            return Err(BootstrapError::Resolution("hostname is empty".to_string()));
        }

        let addrs = tokio::net::lookup_host((hostname.as_str(), 0))
            .await
            .map_err(|e| BootstrapError::Resolution(format!("cannot resolve {}: {}", hostname, e)))?;

        let mut seen = 0usize;
        for addr in addrs {
            seen += 1;
            if let IpAddr::V4(v4) = addr.ip() {
                debug!(hostname = %hostname, address = %v4, "hostname resolved");
                return Ok(v4);
            }
        }

        Err(BootstrapError::Resolution(format!(
            "{} has no IPv4 address ({} non-IPv4 results)",
            hostname, seen
        )))
    }
}

/// Provider returning a fixed answer.
#[derive(Debug, Clone)]
pub struct StaticHostIdentity {
    address: Result<Ipv4Addr, String>,
}

impl StaticHostIdentity {
    /// Always resolve to `address`.
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address: Ok(address),
        }
    }

    /// Always fail resolution with `reason`.
    pub fn unresolvable(reason: impl Into<String>) -> Self {
        Self {
            address: Err(reason.into()),
        }
    }
}

#[async_trait]
impl HostIdentityProvider for StaticHostIdentity {
    async fn resolve_local_address(&self) -> Result<Ipv4Addr, BootstrapError> {
        self.address.clone().map_err(BootstrapError::Resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_literal_hostname_resolves_without_dns() {
        let provider = SystemHostIdentity::with_hostname("127.0.0.1");
        let addr = provider.resolve_local_address().await.unwrap();
        assert_eq!(addr, Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn test_ipv6_only_hostname_is_a_resolution_error() {
        let provider = SystemHostIdentity::with_hostname("::1");
        let err = provider.resolve_local_address().await.unwrap_err();
        assert_eq!(err.reason_code(), "resolution_failed");
    }

    #[tokio::test]
    async fn test_empty_hostname_is_a_resolution_error() {
        let provider = SystemHostIdentity::with_hostname("");
        let err = provider.resolve_local_address().await.unwrap_err();
        assert!(matches!(err, BootstrapError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_static_provider() {
        let ok = StaticHostIdentity::new(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(
            ok.resolve_local_address().await.unwrap(),
            Ipv4Addr::new(10, 1, 2, 3)
        );

        let failing = StaticHostIdentity::unresolvable("no hosts entry");
        assert!(matches!(
            failing.resolve_local_address().await,
            Err(BootstrapError::Resolution(_))
        ));
    }
}
