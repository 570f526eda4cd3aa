//! [`RobotLink`] – accessor to the robot cell's control server.
//!
//! Two connection strategies, selected with [`LinkMode`]:
//!
//! | Mode | Behaviour |
//! |---|---|
//! | [`LinkMode::PerCall`] | Every operation opens its own session and closes it afterwards. No pooling, no retry. |
//! | [`LinkMode::Session`] | One long-lived session. A connection failure discards it; reconnects are spaced by exponential [`Backoff`]. |
//!
//! Neither mode retries a failed operation; errors propagate to the caller.
//! While a reconnect backoff window is open, operations fail fast with
//! [`BridgeError::ConnectionFailure`] instead of waiting.

use std::sync::Arc;
use std::time::Duration;

use cellbridge_types::{BridgeError, NodeId, Variant, VariantType};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use crate::transport::{Connector, NodeSession};

/// Exponential reconnect schedule for [`LinkMode::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay to use after another failed attempt following `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    PerCall,
    Session(Backoff),
}

struct SessionSlot {
    session: Option<Box<dyn NodeSession>>,
    retry_at: Option<Instant>,
    delay: Duration,
}

enum Step {
    Read(NodeId),
    ReadMany(Vec<NodeId>),
    Write(NodeId, Variant),
}

/// Shared accessor to the robot endpoint.  Hold it in an [`Arc`]; all
/// methods take `&self`.
pub struct RobotLink {
    connector: Arc<dyn Connector>,
    mode: LinkMode,
    slot: Mutex<SessionSlot>,
}

impl RobotLink {
    pub fn new(connector: Arc<dyn Connector>, mode: LinkMode) -> Self {
        let delay = match mode {
            LinkMode::Session(backoff) => backoff.initial,
            LinkMode::PerCall => Duration::ZERO,
        };
        Self {
            connector,
            mode,
            slot: Mutex::new(SessionSlot {
                session: None,
                retry_at: None,
                delay,
            }),
        }
    }

    /// Reference behaviour: a fresh connection for every operation.
    pub fn per_call(connector: Arc<dyn Connector>) -> Self {
        Self::new(connector, LinkMode::PerCall)
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub async fn read(&self, node: &NodeId) -> Result<Variant, BridgeError> {
        let mut values = self.execute(vec![Step::Read(node.clone())]).await?;
        values.pop().ok_or_else(|| BridgeError::protocol(node, "empty read"))
    }

    /// Read two nodes over one session, in order.
    pub async fn read_pair(&self, a: &NodeId, b: &NodeId) -> Result<(Variant, Variant), BridgeError> {
        let values = self
            .execute(vec![Step::Read(a.clone()), Step::Read(b.clone())])
            .await?;
        match values.as_slice() {
            [va, vb] => Ok((*va, *vb)),
            _ => Err(BridgeError::protocol(a, "short pair read")),
        }
    }

    /// Read `nodes` over one session.  Uses the transport's batched read when
    /// it offers one, otherwise one read per node (not atomic).
    pub async fn read_many(&self, nodes: &[NodeId]) -> Result<Vec<Variant>, BridgeError> {
        self.execute(vec![Step::ReadMany(nodes.to_vec())]).await
    }

    /// Write `value` to `node`, insisting that it is of type `ty`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ProtocolFault`] without any network traffic when `value`
    /// is not a `ty`; otherwise whatever the transport reports.
    pub async fn write_typed(&self, node: &NodeId, value: Variant, ty: VariantType) -> Result<(), BridgeError> {
        if value.variant_type() != ty {
            return Err(BridgeError::type_mismatch(node, ty, value.variant_type()));
        }
        self.execute(vec![Step::Write(node.clone(), value)]).await.map(|_| ())
    }

    /// Write two Int32 values over one session, `a` first.
    pub async fn write_pair(&self, a: &NodeId, b: &NodeId, value_a: i32, value_b: i32) -> Result<(), BridgeError> {
        self.execute(vec![
            Step::Write(a.clone(), Variant::Int32(value_a)),
            Step::Write(b.clone(), Variant::Int32(value_b)),
        ])
        .await
        .map(|_| ())
    }

    async fn execute(&self, steps: Vec<Step>) -> Result<Vec<Variant>, BridgeError> {
        match self.mode {
            LinkMode::PerCall => {
                let mut session = self.connector.connect().await?;
                let result = run_steps(session.as_mut(), &steps).await;
                session.close().await;
                result
            }
            LinkMode::Session(backoff) => {
                let mut slot = self.slot.lock().await;
                let mut session = match slot.session.take() {
                    Some(session) => session,
                    None => self.reconnect(&mut slot, backoff).await?,
                };
                let result = run_steps(session.as_mut(), &steps).await;
                match &result {
                    Err(e) if e.is_connection_failure() => {
                        warn!(endpoint = %self.endpoint(), error = %e, "robot session lost");
                        session.close().await;
                    }
                    _ => slot.session = Some(session),
                }
                result
            }
        }
    }

    async fn reconnect(&self, slot: &mut SessionSlot, backoff: Backoff) -> Result<Box<dyn NodeSession>, BridgeError> {
        let now = Instant::now();
        if let Some(retry_at) = slot.retry_at
            && now < retry_at
        {
            return Err(BridgeError::connection(
                self.endpoint(),
                format!("reconnect backing off for another {:?}", retry_at - now),
            ));
        }
        match self.connector.connect().await {
            Ok(session) => {
                info!(endpoint = %self.endpoint(), "robot session established");
                slot.retry_at = None;
                slot.delay = backoff.initial;
                Ok(session)
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint(), retry_in = ?slot.delay, error = %e, "robot reconnect failed");
                slot.retry_at = Some(Instant::now() + slot.delay);
                slot.delay = backoff.next(slot.delay);
                Err(e)
            }
        }
    }
}

async fn run_steps(session: &mut dyn NodeSession, steps: &[Step]) -> Result<Vec<Variant>, BridgeError> {
    let mut values = Vec::new();
    for step in steps {
        match step {
            Step::Read(node) => {
                let value = session.read(node).await?;
                trace!(node = %node, value = %value, "robot read");
                values.push(value);
            }
            Step::ReadMany(nodes) => {
                let batch = if session.supports_batch_read() {
                    session.read_batch(nodes).await?
                } else {
                    let mut batch = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        batch.push(session.read(node).await?);
                    }
                    batch
                };
                if batch.len() != nodes.len() {
                    let first = nodes.first().cloned().unwrap_or_else(|| NodeId::from(""));
                    return Err(BridgeError::protocol(
                        &first,
                        format!("batch read returned {} values for {} nodes", batch.len(), nodes.len()),
                    ));
                }
                values.extend(batch);
            }
            Step::Write(node, value) => {
                session.write(node, *value).await?;
                trace!(node = %node, value = %value, "robot write");
            }
        }
    }
    Ok(values)
}
