use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convergent_config::TransportKind;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{HarnessError, RequestFailure};
use crate::topology::Node;

/// A request the harness sends to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for the node's current state.
    Get,
    /// Ask the node to durably record a value.
    Write(String),
}

impl Command {
    /// Command line as sent over the line protocol.
    pub fn as_line(&self) -> &str {
        match self {
            Command::Get => "get",
            Command::Write(value) => value,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Get => write!(f, "get"),
            Command::Write(value) => write!(f, "write '{}'", value),
        }
    }
}

/// Outcome of one request against one node.
#[derive(Debug)]
pub struct RequestResult {
    pub node: String,
    pub outcome: Result<String, RequestFailure>,
}

impl RequestResult {
    pub fn ok(node: impl Into<String>, payload: impl Into<String>) -> Self {
        RequestResult {
            node: node.into(),
            outcome: Ok(payload.into()),
        }
    }

    pub fn failed(node: impl Into<String>, failure: RequestFailure) -> Self {
        RequestResult {
            node: node.into(),
            outcome: Err(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }
}

/// Request/response primitive against a single node.
///
/// A failed request is reported in the result and never retried here.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn request(&self, node: &Node, command: &Command) -> RequestResult;
}

/// Build the transport selected in the configuration.
pub fn build_transport(
    kind: TransportKind,
    timeout: Duration,
) -> Result<Arc<dyn Transport>, HarnessError> {
    match kind {
        TransportKind::Tcp => Ok(Arc::new(TcpTransport::new(timeout))),
        TransportKind::Http => Ok(Arc::new(HttpTransport::new(timeout)?)),
    }
}

/// Newline-delimited request/response over a fresh TCP connection per request.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        TcpTransport { timeout }
    }

    async fn exchange(&self, node: &Node, command: &Command) -> Result<String, RequestFailure> {
        let endpoint = node.endpoint.to_string();
        let line = command.as_line();
        if line.contains('\n') || line.contains('\r') {
            return Err(RequestFailure::Protocol {
                endpoint,
                reason: "command must be a single line".to_string(),
            });
        }

        let connection_failed = |source: std::io::Error| RequestFailure::ConnectionFailed {
            endpoint: endpoint.clone(),
            source: Box::new(source),
        };

        let exchange = async {
            let mut stream = TcpStream::connect((node.endpoint.host.as_str(), node.endpoint.port))
                .await
                .map_err(connection_failed)?;
            stream
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(connection_failed)?;
            stream.flush().await.map_err(connection_failed)?;

            let mut reader = BufReader::new(stream);
            let mut response = String::new();
            let read = reader
                .read_line(&mut response)
                .await
                .map_err(connection_failed)?;
            if read == 0 {
                return Err(RequestFailure::Protocol {
                    endpoint: endpoint.clone(),
                    reason: "connection closed without a response".to_string(),
                });
            }
            Ok(response.trim_end_matches(['\r', '\n']).to_string())
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RequestFailure::Timeout {
                command: command.to_string(),
                endpoint,
            }),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn request(&self, node: &Node, command: &Command) -> RequestResult {
        debug!(node = %node.name, endpoint = %node.endpoint, %command, "tcp request");
        match self.exchange(node, command).await {
            Ok(payload) => RequestResult::ok(&node.name, payload),
            Err(failure) => RequestResult::failed(&node.name, failure),
        }
    }
}

/// `GET /get` for state, `POST /write` with the value as text body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, HarnessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(HttpTransport { client })
    }

    async fn exchange(&self, node: &Node, command: &Command) -> Result<String, RequestFailure> {
        let endpoint = node.endpoint.to_string();
        let request = match command {
            Command::Get => self.client.get(format!("http://{}/get", endpoint)),
            Command::Write(value) => self
                .client
                .post(format!("http://{}/write", endpoint))
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(value.clone()),
        };

        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                RequestFailure::Timeout {
                    command: command.to_string(),
                    endpoint: endpoint.clone(),
                }
            } else {
                RequestFailure::ConnectionFailed {
                    endpoint: endpoint.clone(),
                    source: Box::new(e),
                }
            }
        };

        let response = request.send().await.map_err(map_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RequestFailure::Status {
                endpoint: endpoint.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(map_err)?;
        Ok(body.trim_end().to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, node: &Node, command: &Command) -> RequestResult {
        debug!(node = %node.name, endpoint = %node.endpoint, %command, "http request");
        match self.exchange(node, command).await {
            Ok(payload) => RequestResult::ok(&node.name, payload),
            Err(failure) => RequestResult::failed(&node.name, failure),
        }
    }
}
