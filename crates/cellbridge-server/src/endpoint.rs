//! [`NodeSpaceEndpoint`] – serves a [`NodeSpace`] over the JSON node
//! protocol on WebSocket connections.
//!
//! Every client gets its own task.  Requests on one connection are answered
//! in order; separate connections are served concurrently, so method calls
//! from different clients may interleave.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cellbridge_link::Backoff;
use cellbridge_types::BridgeError;
use cellbridge_types::wire::{Request, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::node_space::NodeSpace;

/// Pause after a failed `accept`, doubled per consecutive failure.
const ACCEPT_ERROR_BACKOFF: Backoff = Backoff {
    initial: Duration::from_millis(10),
    max: Duration::from_secs(1),
};

pub struct NodeSpaceEndpoint {
    listener: TcpListener,
}

impl NodeSpaceEndpoint {
    /// Bind the listening socket.  Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] if the address cannot be bound.
    pub async fn bind(addr: SocketAddr) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Config(format!("cannot listen on {addr}: {e}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, BridgeError> {
        self.listener
            .local_addr()
            .map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Accept clients until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(self, space: Arc<NodeSpace>, mut shutdown: watch::Receiver<bool>) {
        let addr = self.listener.local_addr().ok();
        info!(space = %space.name(), addr = ?addr, "node space endpoint listening");
        let mut pause = ACCEPT_ERROR_BACKOFF.initial;
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        pause = ACCEPT_ERROR_BACKOFF.initial;
                        let space = Arc::clone(&space);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, peer, space, shutdown).await {
                                warn!(peer = %peer, error = %e, "node client error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, retry_in = ?pause, "accept error");
                        tokio::time::sleep(pause).await;
                        pause = ACCEPT_ERROR_BACKOFF.next(pause);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(space = %space.name(), "node space endpoint stopped");
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    space: Arc<NodeSpace>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BridgeError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| BridgeError::connection(peer.to_string(), format!("handshake failed: {e}")))?;
    debug!(peer = %peer, "node client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let response = match serde_json::from_str::<Request>(text.as_str()) {
                        Ok(request) => space.handle(request).await,
                        Err(e) => Response::fault(&BridgeError::InvocationFault(format!("malformed request: {e}"))),
                    };
                    let json = serde_json::to_string(&response)
                        .map_err(|e| BridgeError::Serialization(e.to_string()))?;
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    return Err(BridgeError::connection(peer.to_string(), e));
                }
                _ => {}
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
    debug!(peer = %peer, "node client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_link::{Connector, WsConnector};
    use cellbridge_types::wire::FaultKind;
    use cellbridge_types::{Variant, VariantType};

    async fn serve(space: NodeSpace) -> (SocketAddr, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let endpoint = NodeSpaceEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(endpoint.run(Arc::new(space), rx));
        (addr, tx, task)
    }

    #[tokio::test]
    async fn ws_connector_reads_and_writes_hosted_nodes() {
        let space = NodeSpace::new("loopback");
        space.declare("ns=2;s=pick_id".into(), VariantType::Int32);
        space.declare("ns=2;s=isBusy".into(), VariantType::Boolean);
        let (addr, tx, task) = serve(space).await;

        let connector = WsConnector::new(format!("ws://{addr}")).with_batch_reads(true);
        let mut session = connector.connect().await.unwrap();
        session.write(&"ns=2;s=pick_id".into(), Variant::Int32(6)).await.unwrap();
        assert_eq!(
            session.read(&"ns=2;s=pick_id".into()).await.unwrap(),
            Variant::Int32(6)
        );
        let values = session
            .read_batch(&["ns=2;s=isBusy".into(), "ns=2;s=pick_id".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Variant::Boolean(false), Variant::Int32(6)]);

        let err = session
            .write(&"ns=2;s=isBusy".into(), Variant::Int32(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ProtocolFault { .. }));
        session.close().await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_gets_invocation_fault() {
        let (addr, tx, _task) = serve(NodeSpace::new("loopback")).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        ws.send(Message::Text("{\"op\":\"teleport\"}".into())).await.unwrap();
        let reply = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text.as_str().to_string(),
                _ => continue,
            }
        };
        let response: Response = serde_json::from_str(&reply).unwrap();
        assert!(matches!(response, Response::Fault { kind: FaultKind::Invocation, .. }));
        tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_config_error() {
        let endpoint = NodeSpaceEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = endpoint.local_addr().unwrap();
        let err = NodeSpaceEndpoint::bind(addr).await.err().unwrap();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn accept_error_pause_grows_to_one_second() {
        let mut pause = ACCEPT_ERROR_BACKOFF.initial;
        let mut schedule = Vec::new();
        for _ in 0..9 {
            schedule.push(pause.as_millis());
            pause = ACCEPT_ERROR_BACKOFF.next(pause);
        }
        assert_eq!(schedule, [10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }
}
