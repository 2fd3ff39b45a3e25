//! JSON-RPC over STOMP client.
//!
//! Protocol:
//! 1. Client connects over TCP (TLS by default) and sends CONNECT, service
//!    replies CONNECTED
//! 2. Client subscribes to the response topic
//! 3. Client SENDs the JSON-RPC request to the request queue
//! 4. Service publishes a MESSAGE whose body is the JSON-RPC response
//! 5. Client sends DISCONNECT

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hostnet_netconf::SetupNetworks;

use super::frame::{read_frame, Frame};
use super::rpc::{RpcRequest, RpcResponse};
use super::tls::{TlsClient, Transport};
use super::{ConfigServiceClient, Endpoint};
use crate::error::BootstrapError;

/// Destination requests are sent to.
pub const REQUEST_QUEUE: &str = "jms.topic.vdsm_requests";

/// Destination responses are published on.
pub const RESPONSE_QUEUE: &str = "jms.topic.vdsm_responses";

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// A connected STOMP session.
pub struct StompClient {
    stream: BufReader<Box<dyn Stream>>,
    timeout: Duration,
}

impl std::fmt::Debug for StompClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StompClient {
    /// Connect and complete the STOMP handshake.
    pub async fn connect(
        endpoint: &Endpoint,
        transport: &Transport,
        limit: Duration,
    ) -> Result<Self, BootstrapError> {
        info!(
            endpoint = %endpoint,
            tls = matches!(transport, Transport::Tls(_)),
            "connecting to configuration service"
        );

        let tls = match transport {
            Transport::Plain => None,
            Transport::Tls(settings) => Some(TlsClient::new(settings, &endpoint.host)?),
        };

        let stream = match timeout(limit, open(endpoint, tls.as_ref())).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(BootstrapError::ServiceUnavailable(format!(
                    "connect to {} timed out after {:?}",
                    endpoint, limit
                )))
            }
        };

        let mut client = Self {
            stream: BufReader::new(stream),
            timeout: limit,
        };

        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", &endpoint.host)
            .header("heart-beat", "0,0");
        client.send(&connect).await?;

        let reply = timeout(limit, read_frame(&mut client.stream))
            .await
            .map_err(|_| BootstrapError::ServiceUnavailable("STOMP handshake timed out".into()))??;

        match reply {
            Some(frame) if frame.command == "CONNECTED" => {
                debug!(version = frame.get("version").unwrap_or("?"), "STOMP session established");
            }
            Some(frame) if frame.command == "ERROR" => {
                return Err(BootstrapError::ServiceUnavailable(format!(
                    "service refused STOMP session: {}",
                    frame.get("message").unwrap_or("no message")
                )));
            }
            Some(frame) => {
                return Err(BootstrapError::Protocol(format!(
                    "expected CONNECTED, got {}",
                    frame.command
                )));
            }
            None => {
                return Err(BootstrapError::ServiceUnavailable(
                    "service closed connection during handshake".into(),
                ));
            }
        }

        let subscribe = Frame::new("SUBSCRIBE")
            .header("destination", RESPONSE_QUEUE)
            .header("id", &Uuid::new_v4().to_string())
            .header("ack", "auto");
        client.send(&subscribe).await?;

        Ok(client)
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), BootstrapError> {
        self.stream.write_all(&frame.encode()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the response to `id`, skipping unrelated messages.
    async fn await_response(&mut self, id: &str) -> Result<RpcResponse, BootstrapError> {
        loop {
            let Some(frame) = read_frame(&mut self.stream).await? else {
                return Err(BootstrapError::ServiceUnavailable(
                    "connection closed before a response arrived".into(),
                ));
            };

            match frame.command.as_str() {
                "MESSAGE" => {
                    let response = RpcResponse::parse(&frame.body)?;
                    if response.answers(id) {
                        return Ok(response);
                    }
                    debug!(id = ?response.id, "skipping unrelated message");
                }
                "ERROR" => {
                    return Err(BootstrapError::ServiceUnavailable(format!(
                        "service reported STOMP error: {}",
                        frame.get("message").unwrap_or("no message")
                    )));
                }
                other => debug!(command = other, "ignoring frame"),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.send(&Frame::new("DISCONNECT")).await {
            debug!(error = %e, "disconnect not delivered");
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "shutdown failed");
        }
    }
}

async fn open(
    endpoint: &Endpoint,
    tls: Option<&TlsClient>,
) -> Result<Box<dyn Stream>, BootstrapError> {
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| BootstrapError::unavailable("connect failed", e))?;

    match tls {
        None => Ok(Box::new(tcp)),
        Some(tls) => {
            let stream = tls.handshake(tcp).await?;
            debug!("TLS session established");
            Ok(Box::new(stream))
        }
    }
}

#[async_trait]
impl ConfigServiceClient for StompClient {
    async fn apply_network_config(
        &mut self,
        request: &SetupNetworks,
    ) -> Result<(), BootstrapError> {
        let rpc = RpcRequest::setup_networks_named(request)?;
        let body = serde_json::to_vec(&rpc)
            .map_err(|e| BootstrapError::Protocol(format!("cannot encode request: {}", e)))?;

        let send = Frame::new("SEND")
            .header("destination", REQUEST_QUEUE)
            .header("content-type", "application/json")
            .header("reply-to", RESPONSE_QUEUE)
            .body(body);
        self.send(&send).await?;
        info!(id = %rpc.id, method = rpc.method, "request sent");

        let limit = self.timeout;
        let response = match timeout(limit, self.await_response(&rpc.id)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(id = %rpc.id, "no response from configuration service");
                Err(BootstrapError::ServiceUnavailable(format!(
                    "no response within {:?}",
                    limit
                )))
            }
        };

        self.disconnect().await;
        response?.into_result()
    }
}
