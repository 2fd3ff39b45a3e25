//! A scripted STOMP broker standing in for the management daemon.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use hostnet_bootstrap::client::{read_frame, Endpoint, Frame, TlsSettings};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

static INIT_CRYPTO: Once = Once::new();

fn init_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();
    });
}

/// How the broker answers the SEND frame.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"result": {"status": {"code": 0, "message": "Done"}}}`
    Done,
    /// JSON-RPC error object.
    RpcError { code: i64, message: String },
    /// Refuse the CONNECT with an ERROR frame.
    RefuseSession,
    /// Accept the session and never answer the request.
    Silent,
}

/// Frames the broker received, in order.
#[derive(Debug, Default)]
pub struct Transcript {
    pub frames: Vec<Frame>,
}

impl Transcript {
    pub fn command(&self, command: &str) -> Option<&Frame> {
        self.frames.iter().find(|f| f.command == command)
    }

    pub fn request(&self) -> Value {
        let send = self.command("SEND").expect("no SEND frame received");
        serde_json::from_slice(&send.body).expect("SEND body is not JSON")
    }
}

pub struct FakeBroker {
    pub addr: SocketAddr,
    pub handle: JoinHandle<Transcript>,
}

impl FakeBroker {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.addr.ip().to_string(), self.addr.port())
    }
}

/// A broker behind TLS, with the CA that signed its certificate on disk.
pub struct TlsBroker {
    pub broker: FakeBroker,
    pub ca_file: PathBuf,
    _dir: TempDir,
}

impl TlsBroker {
    /// Endpoint by the name on the certificate.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("localhost", self.broker.addr.port())
    }

    pub fn settings(&self) -> TlsSettings {
        TlsSettings::with_ca(&self.ca_file)
    }
}

async fn write<W: AsyncWrite + Unpin>(stream: &mut W, frame: Frame) {
    stream.write_all(&frame.encode()).await.unwrap();
    stream.flush().await.unwrap();
}

/// Serve a single connection according to `reply`.
pub async fn spawn_broker(reply: Reply) -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, reply).await
    });

    FakeBroker { addr, handle }
}

/// Serve a single TLS connection according to `reply`.
pub async fn spawn_tls_broker(reply: Reply) -> TlsBroker {
    init_crypto_provider();

    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let ca_file = dir.path().join("cacert.pem");
    std::fs::write(&ca_file, generated.cert.pem()).unwrap();

    let certs = vec![CertificateDer::from(generated.cert.der().to_vec())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        match acceptor.accept(stream).await {
            Ok(tls) => serve(tls, reply).await,
            // Client gave up on the handshake.
            Err(_) => Transcript::default(),
        }
    });

    TlsBroker {
        broker: FakeBroker { addr, handle },
        ca_file,
        _dir: dir,
    }
}

/// A CA file that signed nothing the brokers present.
pub fn unrelated_ca(dir: &TempDir) -> PathBuf {
    let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let path = dir.path().join("other-ca.pem");
    std::fs::write(&path, generated.cert.pem()).unwrap();
    path
}

async fn serve<S>(stream: S, reply: Reply) -> Transcript
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut transcript = Transcript::default();
    let (read, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read);

    let connect = read_frame(&mut reader).await.unwrap().unwrap();
    transcript.frames.push(connect);

    if let Reply::RefuseSession = reply {
        write(
            &mut write_half,
            Frame::new("ERROR").header("message", "access denied"),
        )
        .await;
        return transcript;
    }

    write(&mut write_half, Frame::new("CONNECTED").header("version", "1.2")).await;

    while let Ok(Some(frame)) = read_frame(&mut reader).await {
        let command = frame.command.clone();
        let body = frame.body.clone();
        transcript.frames.push(frame);

        if command != "SEND" {
            if command == "DISCONNECT" {
                break;
            }
            continue;
        }

        let request: Value = serde_json::from_slice(&body).unwrap();
        let id = request["id"].clone();

        let response = match &reply {
            Reply::Done => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"status": {"code": 0, "message": "Done"}},
            }),
            Reply::RpcError { code, message } => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message},
            }),
            Reply::Silent => continue,
            Reply::RefuseSession => unreachable!(),
        };

        // An event for somebody else arrives first.
        let unrelated = json!({"jsonrpc": "2.0", "id": "someone-else", "result": true});
        write(
            &mut write_half,
            Frame::new("MESSAGE")
                .header("destination", "jms.topic.vdsm_responses")
                .body(serde_json::to_vec(&unrelated).unwrap()),
        )
        .await;

        write(
            &mut write_half,
            Frame::new("MESSAGE")
                .header("destination", "jms.topic.vdsm_responses")
                .body(serde_json::to_vec(&response).unwrap()),
        )
        .await;
    }

    transcript
}

/// An address nothing listens on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    Endpoint::new(addr.ip().to_string(), addr.port())
}
