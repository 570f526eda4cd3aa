//! Node transport capability.
//!
//! A [`Connector`] knows how to reach one endpoint; each
//! [`Connector::connect`] yields an independent [`NodeSession`].  Every
//! session method is an `.await` point, so other gateway work may run while a
//! request is outstanding.

use async_trait::async_trait;
use cellbridge_types::{BridgeError, NodeId, Variant};

/// An open session against a node space.
///
/// # Contract
///
/// * `read` / `write` – fail with [`BridgeError::ConnectionFailure`] when the
///   endpoint is gone and [`BridgeError::ProtocolFault`] when the node is
///   unknown or the value does not match the node's declared type.
/// * `read_batch` – reads several nodes in one exchange.  Only called when
///   `supports_batch_read` is `true`; callers read node by node otherwise.
#[async_trait]
pub trait NodeSession: Send {
    async fn read(&mut self, node: &NodeId) -> Result<Variant, BridgeError>;

    async fn write(&mut self, node: &NodeId, value: Variant) -> Result<(), BridgeError>;

    fn supports_batch_read(&self) -> bool {
        false
    }

    async fn read_batch(&mut self, nodes: &[NodeId]) -> Result<Vec<Variant>, BridgeError>;

    /// Tear the session down.  Errors while closing are swallowed.
    async fn close(&mut self) {}
}

/// Factory for sessions against a single endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable endpoint address, used in errors and logs.
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Box<dyn NodeSession>, BridgeError>;
}
