//! Legacy XML-RPC over HTTP(S) client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use tracing::{error, info};

use hostnet_netconf::SetupNetworks;

use super::rpc::check_status;
use super::tls::Transport;
use super::xmlrpc::{self, SETUP_NETWORKS};
use super::{ConfigServiceClient, Endpoint};
use crate::error::BootstrapError;

/// Path of the XML-RPC endpoint.
pub const RPC_PATH: &str = "/RPC2";

/// HTTP client for the flat `setupNetworks` call.
#[derive(Debug, Clone)]
pub struct XmlRpcClient {
    client: reqwest::Client,
    url: String,
}

impl XmlRpcClient {
    /// Create a client for the endpoint. No connection is made until a call.
    pub fn new(
        endpoint: &Endpoint,
        transport: &Transport,
        timeout: Duration,
    ) -> Result<Self, BootstrapError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/xml"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/xml"));

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(timeout);

        if let Transport::Tls(settings) = transport {
            let tls_error = |e: reqwest::Error| BootstrapError::Tls(e.to_string());
            let ca = reqwest::Certificate::from_pem(&settings.ca_pem()?).map_err(tls_error)?;
            builder = builder
                .use_rustls_tls()
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca);
            if let Some(pem) = settings.identity_pem()? {
                builder = builder.identity(reqwest::Identity::from_pem(&pem).map_err(tls_error)?);
            }
        }

        let client = builder
            .build()
            .map_err(|e| BootstrapError::unavailable("failed to create HTTP client", e))?;

        Ok(Self {
            client,
            url: format!("{}://{}{}", transport.scheme(), endpoint, RPC_PATH),
        })
    }

    /// URL requests are posted to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConfigServiceClient for XmlRpcClient {
    async fn apply_network_config(
        &mut self,
        request: &SetupNetworks,
    ) -> Result<(), BootstrapError> {
        let body = xmlrpc::setup_networks_call(request)?;

        info!(url = %self.url, method = SETUP_NETWORKS, "posting request");
        let response = self
            .client
            .post(&self.url)
            .body(body)
            .send()
            .await
            .map_err(|e| BootstrapError::unavailable("request failed", e))?;

        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).to_string();
            error!(status = %status, message = %message, "configuration service HTTP error");
            return Err(BootstrapError::ServiceUnavailable(format!(
                "HTTP {}: {}",
                status.as_u16(),
                message
            )));
        }

        check_status(xmlrpc::decode_response(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TlsSettings;

    #[test]
    fn test_url_building() {
        let client = XmlRpcClient::new(
            &Endpoint::new("10.0.0.2", 8080),
            &Transport::Plain,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.url(), "http://10.0.0.2:8080/RPC2");
    }

    #[test]
    fn test_tls_requires_ca() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Transport::Tls(TlsSettings::with_ca(dir.path().join("cacert.pem")));

        let err = XmlRpcClient::new(&Endpoint::local(), &transport, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.reason_code(), "tls_setup_failed");
    }

    #[test]
    fn test_tls_url_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let ca = dir.path().join("cacert.pem");
        std::fs::write(&ca, generated.cert.pem()).unwrap();

        let client = XmlRpcClient::new(
            &Endpoint::local(),
            &Transport::Tls(TlsSettings::with_ca(&ca)),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.url(), "https://localhost:54321/RPC2");
    }
}
