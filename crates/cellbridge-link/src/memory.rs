//! [`MemoryConnector`] – in-process transport over a [`NodeStore`].
//!
//! Used by the simulated robot cell and throughout the test suites.  Every
//! connect, read, write and close is appended to a journal so callers can
//! audit the exact traffic a component produced.  Each operation yields to
//! the scheduler once, the same way a network round trip would.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cellbridge_types::{BridgeError, NodeId, Variant};

use crate::store::NodeStore;
use crate::transport::{Connector, NodeSession};

/// One entry of the traffic journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOp {
    Connect,
    Read(NodeId),
    ReadBatch(Vec<NodeId>),
    Write(NodeId, Variant),
    Close,
}

type Journal = Arc<Mutex<Vec<LinkOp>>>;

fn lock(journal: &Journal) -> MutexGuard<'_, Vec<LinkOp>> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Connector`].
pub struct MemoryConnector {
    endpoint: String,
    store: NodeStore,
    reachable: Arc<AtomicBool>,
    batch_reads: bool,
    journal: Journal,
    connections: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(store: NodeStore) -> Self {
        Self {
            endpoint: "memory://robot".to_string(),
            store,
            reachable: Arc::new(AtomicBool::new(true)),
            batch_reads: false,
            journal: Arc::default(),
            connections: AtomicUsize::new(0),
        }
    }

    /// Advertise native batched reads on sessions (builder-style).
    pub fn with_batch_reads(mut self) -> Self {
        self.batch_reads = true;
        self
    }

    pub fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Simulate the endpoint going away (or coming back).  Open sessions fail
    /// too while the endpoint is unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Snapshot of every operation recorded so far.
    pub fn journal(&self) -> Vec<LinkOp> {
        lock(&self.journal).clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.journal).clear();
    }

    /// Number of sessions successfully opened.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Box<dyn NodeSession>, BridgeError> {
        tokio::task::yield_now().await;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BridgeError::connection(&self.endpoint, "endpoint unreachable"));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        lock(&self.journal).push(LinkOp::Connect);
        Ok(Box::new(MemorySession {
            endpoint: self.endpoint.clone(),
            store: self.store.clone(),
            reachable: Arc::clone(&self.reachable),
            batch_reads: self.batch_reads,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct MemorySession {
    endpoint: String,
    store: NodeStore,
    reachable: Arc<AtomicBool>,
    batch_reads: bool,
    journal: Journal,
}

impl MemorySession {
    async fn round_trip(&self, op: LinkOp) -> Result<(), BridgeError> {
        tokio::task::yield_now().await;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(BridgeError::connection(&self.endpoint, "connection lost"));
        }
        lock(&self.journal).push(op);
        Ok(())
    }
}

#[async_trait]
impl NodeSession for MemorySession {
    async fn read(&mut self, node: &NodeId) -> Result<Variant, BridgeError> {
        self.round_trip(LinkOp::Read(node.clone())).await?;
        self.store.read(node)
    }

    async fn write(&mut self, node: &NodeId, value: Variant) -> Result<(), BridgeError> {
        self.round_trip(LinkOp::Write(node.clone(), value)).await?;
        self.store.write(node, value)
    }

    fn supports_batch_read(&self) -> bool {
        self.batch_reads
    }

    async fn read_batch(&mut self, nodes: &[NodeId]) -> Result<Vec<Variant>, BridgeError> {
        self.round_trip(LinkOp::ReadBatch(nodes.to_vec())).await?;
        nodes.iter().map(|node| self.store.read(node)).collect()
    }

    async fn close(&mut self) {
        lock(&self.journal).push(LinkOp::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_types::VariantType;

    fn robot_store() -> NodeStore {
        let store = NodeStore::new();
        store.declare("ns=2;s=isBusy".into(), VariantType::Boolean);
        store.declare("ns=2;s=service".into(), VariantType::Int32);
        store
    }

    #[tokio::test]
    async fn session_reads_and_writes_store() {
        let connector = MemoryConnector::new(robot_store());
        let mut session = connector.connect().await.unwrap();

        session.write(&"ns=2;s=service".into(), Variant::Int32(3)).await.unwrap();
        let value = session.read(&"ns=2;s=service".into()).await.unwrap();
        session.close().await;

        assert_eq!(value, Variant::Int32(3));
        assert_eq!(
            connector.journal(),
            vec![
                LinkOp::Connect,
                LinkOp::Write("ns=2;s=service".into(), Variant::Int32(3)),
                LinkOp::Read("ns=2;s=service".into()),
                LinkOp::Close,
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_refuses_connect() {
        let connector = MemoryConnector::new(robot_store());
        connector.set_reachable(false);
        let result = connector.connect().await;
        assert!(matches!(result, Err(BridgeError::ConnectionFailure { .. })));
        assert_eq!(connector.connections(), 0);
    }

    #[tokio::test]
    async fn open_session_fails_once_endpoint_drops() {
        let connector = MemoryConnector::new(robot_store());
        let mut session = connector.connect().await.unwrap();
        connector.set_reachable(false);
        let result = session.read(&"ns=2;s=isBusy".into()).await;
        assert!(matches!(result, Err(BridgeError::ConnectionFailure { .. })));
    }

    #[tokio::test]
    async fn batch_capable_session_records_one_exchange() {
        let connector = MemoryConnector::new(robot_store()).with_batch_reads();
        let mut session = connector.connect().await.unwrap();
        assert!(session.supports_batch_read());

        let nodes = [NodeId::from("ns=2;s=isBusy"), NodeId::from("ns=2;s=service")];
        session.read_batch(&nodes).await.unwrap();
        assert_eq!(
            connector.journal(),
            vec![LinkOp::Connect, LinkOp::ReadBatch(nodes.to_vec())]
        );
    }
}
