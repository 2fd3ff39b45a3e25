//! JSON-RPC 2.0 envelopes for the STOMP transport, and the operation status
//! check shared with XML-RPC.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use hostnet_netconf::SetupNetworks;

use crate::error::BootstrapError;

/// Method name of the modern, namespaced API.
pub const HOST_SETUP_NETWORKS: &str = "Host.setupNetworks";

/// Outgoing JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: &'static str,
    pub params: Value,
}

impl RpcRequest {
    fn new(method: &'static str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Uuid::new_v4().to_string(),
            method,
            params,
        }
    }

    /// `Host.setupNetworks` with named parameters.
    pub fn setup_networks_named(request: &SetupNetworks) -> Result<Self, BootstrapError> {
        let params = serde_json::to_value(request)
            .map_err(|e| BootstrapError::Protocol(format!("cannot encode request: {}", e)))?;
        Ok(Self::new(HOST_SETUP_NETWORKS, params))
    }
}

/// Incoming JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Operation status embedded in results: `{"status": {"code", "message"}}`.
#[derive(Debug, Clone, Deserialize)]
struct StatusReply {
    status: Status,
}

#[derive(Debug, Clone, Deserialize)]
struct Status {
    code: i64,
    #[serde(default)]
    message: String,
}

impl RpcResponse {
    /// Parse a response body.
    pub fn parse(body: &[u8]) -> Result<Self, BootstrapError> {
        serde_json::from_slice(body)
            .map_err(|e| BootstrapError::Protocol(format!("invalid JSON-RPC response: {}", e)))
    }

    /// Whether this response answers the request with `id`.
    pub fn answers(&self, id: &str) -> bool {
        matches!(&self.id, Some(Value::String(s)) if s == id)
    }

    /// Turn the response into success or a rejection.
    pub fn into_result(self) -> Result<(), BootstrapError> {
        if let Some(err) = self.error {
            return Err(BootstrapError::ConfigurationRejected {
                code: err.code,
                message: err.message,
            });
        }

        let Some(result) = self.result else {
            return Err(BootstrapError::Protocol(
                "response carries neither result nor error".to_string(),
            ));
        };

        check_status(result)
    }
}

/// Reject a result whose embedded status code is not zero. Results without a
/// status block count as success.
pub(crate) fn check_status(result: Value) -> Result<(), BootstrapError> {
    if let Ok(reply) = serde_json::from_value::<StatusReply>(result) {
        if reply.status.code != 0 {
            return Err(BootstrapError::ConfigurationRejected {
                code: reply.status.code,
                message: reply.status.message,
            });
        }
        debug!(message = %reply.status.message, "service reported success");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use hostnet_netconf::{NetworkConfig, DEFAULT_NETMASK, DEFAULT_NIC};
    use serde_json::json;

    fn request() -> SetupNetworks {
        SetupNetworks::management(NetworkConfig::new(
            DEFAULT_NIC,
            Ipv4Addr::new(10, 1, 2, 3),
            DEFAULT_NETMASK,
            Ipv4Addr::new(10, 1, 2, 1),
        ))
    }

    #[test]
    fn test_named_params() {
        let rpc = RpcRequest::setup_networks_named(&request()).unwrap();
        assert_eq!(rpc.method, "Host.setupNetworks");
        assert_eq!(rpc.params["bondings"], json!({}));
        assert_eq!(rpc.params["options"]["connectivityCheck"], json!(false));
        assert_eq!(rpc.params["networks"]["ovirtmgmt"]["nic"], "veth_name0");
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RpcRequest::setup_networks_named(&request()).unwrap();
        let b = RpcRequest::setup_networks_named(&request()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_error_object_is_rejection() {
        let resp = RpcResponse::parse(
            br#"{"jsonrpc":"2.0","id":"1","error":{"code":25,"message":"Unknown nic"}}"#,
        )
        .unwrap();
        assert!(resp.answers("1"));
        match resp.into_result() {
            Err(BootstrapError::ConfigurationRejected { code, message }) => {
                assert_eq!(code, 25);
                assert_eq!(message, "Unknown nic");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_nonzero_status_is_rejection() {
        let resp = RpcResponse::parse(
            br#"{"id":"1","result":{"status":{"code":21,"message":"Bad address"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            resp.into_result(),
            Err(BootstrapError::ConfigurationRejected { code: 21, .. })
        ));
    }

    #[test]
    fn test_success_shapes() {
        let done = RpcResponse::parse(br#"{"id":"1","result":{"status":{"code":0,"message":"Done"}}}"#)
            .unwrap();
        assert!(done.into_result().is_ok());

        let bare = RpcResponse::parse(br#"{"jsonrpc":"2.0","id":"1","result":true}"#).unwrap();
        assert!(bare.into_result().is_ok());
    }

    #[test]
    fn test_empty_response_is_protocol_error() {
        let resp = RpcResponse::parse(br#"{"id":"1"}"#).unwrap();
        assert!(matches!(resp.into_result(), Err(BootstrapError::Protocol(_))));
        assert!(matches!(
            RpcResponse::parse(b"not json"),
            Err(BootstrapError::Protocol(_))
        ));
    }
}
