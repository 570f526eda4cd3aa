//! [`WsConnector`] – JSON node protocol over a WebSocket.
//!
//! Each session is one WebSocket connection.  Requests are strictly
//! sequential: a frame is sent and the next text frame is taken as its
//! answer.  Connect and every exchange are bounded by `io_timeout`; running
//! out of time is reported as a connection failure.

use std::time::Duration;

use async_trait::async_trait;
use cellbridge_types::wire::{FaultKind, Request, Response};
use cellbridge_types::{BridgeError, NodeId, Variant};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;

use crate::transport::{Connector, NodeSession};

/// Default bound on connect and on each request/response exchange.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connector`] for a `ws://host:port` node endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    io_timeout: Duration,
    batch_reads: bool,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            batch_reads: false,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Use `read_batch` frames; only enable for endpoints that understand them.
    pub fn with_batch_reads(mut self, enabled: bool) -> Self {
        self.batch_reads = enabled;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Box<dyn NodeSession>, BridgeError> {
        let (stream, _) = tokio::time::timeout(self.io_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| BridgeError::connection(&self.url, "connect timed out"))?
            .map_err(|e| BridgeError::connection(&self.url, e))?;
        debug!(endpoint = %self.url, "node session opened");
        Ok(Box::new(WsSession {
            url: self.url.clone(),
            io_timeout: self.io_timeout,
            batch_reads: self.batch_reads,
            stream,
        }))
    }
}

struct WsSession {
    url: String,
    io_timeout: Duration,
    batch_reads: bool,
    stream: WsStream,
}

impl WsSession {
    async fn request(&mut self, request: &Request) -> Result<Response, BridgeError> {
        let json = serde_json::to_string(request).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        let reply = tokio::time::timeout(self.io_timeout, exchange(&mut self.stream, json))
            .await
            .map_err(|_| BridgeError::connection(&self.url, "request timed out"))?
            .map_err(|details| BridgeError::connection(&self.url, details))?;
        serde_json::from_str(&reply).map_err(|e| BridgeError::Serialization(format!("bad response frame: {e}")))
    }

    fn fault(&self, node: &NodeId, kind: FaultKind, message: String) -> BridgeError {
        match kind {
            FaultKind::Connection => BridgeError::connection(&self.url, message),
            FaultKind::Invocation => BridgeError::InvocationFault(message),
            FaultKind::Protocol | FaultKind::Internal => BridgeError::protocol(node, message),
        }
    }

    fn unexpected(&self, node: &NodeId, response: &Response) -> BridgeError {
        BridgeError::protocol(node, format!("unexpected response {response:?}"))
    }
}

async fn exchange(stream: &mut WsStream, json: String) -> Result<String, String> {
    stream
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())?;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(Message::Close(_))) | None => return Err("connection closed by peer".to_string()),
            Some(Err(e)) => return Err(e.to_string()),
            // Ping/pong and binary frames are not answers.
            Some(Ok(_)) => continue,
        }
    }
}

#[async_trait]
impl NodeSession for WsSession {
    async fn read(&mut self, node: &NodeId) -> Result<Variant, BridgeError> {
        let response = self.request(&Request::Read { node: node.clone() }).await?;
        match response {
            Response::Value { value } => Ok(value),
            Response::Fault { kind, message } => Err(self.fault(node, kind, message)),
            other => Err(self.unexpected(node, &other)),
        }
    }

    async fn write(&mut self, node: &NodeId, value: Variant) -> Result<(), BridgeError> {
        let response = self
            .request(&Request::Write {
                node: node.clone(),
                value,
            })
            .await?;
        match response {
            Response::Ack => Ok(()),
            Response::Fault { kind, message } => Err(self.fault(node, kind, message)),
            other => Err(self.unexpected(node, &other)),
        }
    }

    fn supports_batch_read(&self) -> bool {
        self.batch_reads
    }

    async fn read_batch(&mut self, nodes: &[NodeId]) -> Result<Vec<Variant>, BridgeError> {
        let first = nodes.first().cloned().unwrap_or_else(|| NodeId::from(""));
        let response = self
            .request(&Request::ReadBatch {
                nodes: nodes.to_vec(),
            })
            .await?;
        match response {
            Response::Values { values } => Ok(values),
            Response::Fault { kind, message } => Err(self.fault(&first, kind, message)),
            other => Err(self.unexpected(&first, &other)),
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
