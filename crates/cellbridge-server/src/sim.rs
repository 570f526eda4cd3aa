//! [`SimulatedCell`] – a stand-in robot control server for demos and CI.
//!
//! Hosts the robot-side variables in a [`NodeSpace`] and emulates just
//! enough of the cell's behaviour for the bridge to work against it:
//!
//! * writing `start = true` clears `start` again and keeps `isBusy` set for
//!   one cycle time;
//! * `isUnderService` follows `service != 0`.
//!
//! Serve [`SimulatedCell::space`] with a [`NodeSpaceEndpoint`] to reach it
//! over the wire, or use [`SimulatedCell::connector`] in-process.
//!
//! [`NodeSpaceEndpoint`]: crate::endpoint::NodeSpaceEndpoint

use std::sync::Arc;
use std::time::Duration;

use cellbridge_link::{MemoryConnector, NodeStore};
use cellbridge_types::{BridgeError, RobotNodes, Variant};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::node_space::NodeSpace;

/// How often the simulated controller scans its variables.
const SCAN_INTERVAL: Duration = Duration::from_millis(20);

pub struct SimulatedCell {
    space: Arc<NodeSpace>,
    nodes: RobotNodes,
    cycle: Duration,
}

impl SimulatedCell {
    pub fn new(nodes: RobotNodes, cycle: Duration) -> Self {
        let space = Arc::new(NodeSpace::new("simulated robot cell"));
        for (node, ty) in nodes.declarations() {
            space.declare(node, ty);
        }
        Self { space, nodes, cycle }
    }

    pub fn space(&self) -> &Arc<NodeSpace> {
        &self.space
    }

    pub fn store(&self) -> &NodeStore {
        self.space.variables()
    }

    /// In-process connector onto the simulated variables.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.store().clone())
    }

    /// Run the controller scan loop until `shutdown` turns `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut scan = tokio::time::interval(SCAN_INTERVAL);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut busy_until: Option<Instant> = None;
        info!(cycle = ?self.cycle, "simulated robot cell running");

        loop {
            tokio::select! {
                _ = scan.tick() => {
                    if let Err(e) = self.scan(&mut busy_until) {
                        warn!(error = %e, "simulated cell scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("simulated robot cell stopped");
    }

    fn scan(&self, busy_until: &mut Option<Instant>) -> Result<(), BridgeError> {
        let store = self.store();
        let n = &self.nodes;
        let now = Instant::now();

        if store.read(&n.start)?.as_bool(&n.start)? {
            store.write(&n.start, Variant::Boolean(false))?;
            if busy_until.is_none() {
                let (pick_id, pick_dir) = (store.read(&n.pick_id)?, store.read(&n.pick_dir)?);
                let (place_id, place_dir) = (store.read(&n.place_id)?, store.read(&n.place_dir)?);
                info!(
                    pick_id = %pick_id,
                    pick_dir = %pick_dir,
                    place_id = %place_id,
                    place_dir = %place_dir,
                    "simulated pick-and-place started"
                );
                store.write(&n.is_busy, Variant::Boolean(true))?;
                *busy_until = Some(now + self.cycle);
            } else {
                warn!("start ignored: simulated cell already busy");
            }
        }

        if busy_until.is_some_and(|until| now >= until) {
            store.write(&n.is_busy, Variant::Boolean(false))?;
            *busy_until = None;
            debug!("simulated pick-and-place finished");
        }

        let service = store.read(&n.service)?.as_i32(&n.service)?;
        store.write(&n.is_under_service, Variant::Boolean(service != 0))?;
        Ok(())
    }
}
