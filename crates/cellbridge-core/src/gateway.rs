//! [`MethodGateway`] – the two operations external orchestration can invoke.
//!
//! * `pick_and_place` only enqueues.  `false` means "queue saturated, retry
//!   later" and is part of the normal contract, not an error.
//! * `service` is forwarded straight to the robot through a
//!   [`ServiceCommand`].  The shipped [`FireAndForgetService`] reports `true`
//!   as soon as the write went out; nothing confirms that the robot actually
//!   reached the requested service position.

use std::sync::Arc;

use async_trait::async_trait;
use cellbridge_link::RobotLink;
use cellbridge_types::{BridgeError, NodeId, PickPlaceJob, Variant, VariantType};
use tracing::{debug, info};

use crate::queue::CommandQueue;

/// How a service request reaches the robot.
///
/// Kept behind a trait so a confirming implementation (one that waits for the
/// robot to report the requested position) can replace the default without
/// touching the gateway.
#[async_trait]
pub trait ServiceCommand: Send + Sync {
    async fn command(&self, service_id: i32) -> Result<bool, BridgeError>;
}

/// Writes the service id to the robot and reports success immediately.
pub struct FireAndForgetService {
    link: Arc<RobotLink>,
    node: NodeId,
}

impl FireAndForgetService {
    pub fn new(link: Arc<RobotLink>, node: NodeId) -> Self {
        Self { link, node }
    }
}

#[async_trait]
impl ServiceCommand for FireAndForgetService {
    async fn command(&self, service_id: i32) -> Result<bool, BridgeError> {
        self.link
            .write_typed(&self.node, Variant::Int32(service_id), VariantType::Int32)
            .await?;
        Ok(true)
    }
}

pub struct MethodGateway {
    queue: Arc<CommandQueue>,
    service: Arc<dyn ServiceCommand>,
}

impl MethodGateway {
    pub fn new(queue: Arc<CommandQueue>, service: Arc<dyn ServiceCommand>) -> Self {
        Self { queue, service }
    }

    /// Queue a transport job.  Returns the result of the enqueue.
    pub fn submit_pick_place(&self, pick_id: i32, pick_dir: i32, place_id: i32, place_dir: i32) -> bool {
        let job = PickPlaceJob::new(pick_id, pick_dir, place_id, place_dir);
        let job_id = job.id;
        let accepted = self.queue.enqueue(job);
        if accepted {
            info!(
                job = %job_id,
                pick_id, pick_dir, place_id, place_dir,
                depth = self.queue.size(),
                "pick-and-place queued"
            );
        } else {
            info!(pick_id, pick_dir, place_id, place_dir, "pick-and-place rejected: queue full");
        }
        accepted
    }

    /// Command the robot into service position `service_id`.
    ///
    /// # Errors
    ///
    /// Whatever the robot link reports; the invoking caller sees it as a
    /// failed call.  `Ok(true)` is not proof that the robot complied.
    pub async fn submit_service(&self, service_id: i32) -> Result<bool, BridgeError> {
        debug!(service_id, "service requested");
        let result = self.service.command(service_id).await?;
        info!(service_id, "service command sent");
        Ok(result)
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_link::{LinkOp, MemoryConnector, NodeStore};

    fn setup() -> (Arc<MemoryConnector>, MethodGateway) {
        let store = NodeStore::new();
        store.declare("ns=2;s=service".into(), VariantType::Int32);
        let connector = Arc::new(MemoryConnector::new(store));
        let link = Arc::new(RobotLink::per_call(connector.clone()));
        let service = Arc::new(FireAndForgetService::new(link, "ns=2;s=service".into()));
        let gateway = MethodGateway::new(Arc::new(CommandQueue::default()), service);
        (connector, gateway)
    }

    #[test]
    fn pick_place_reports_saturation() {
        let (_, gateway) = setup();
        let results: Vec<bool> = (0..4).map(|i| gateway.submit_pick_place(i, 0, i + 10, 1)).collect();
        assert_eq!(results, [true, true, true, false]);
        assert_eq!(gateway.queue().size(), 3);
    }

    #[test]
    fn pick_place_builds_job_from_arguments() {
        let (_, gateway) = setup();
        assert!(gateway.submit_pick_place(1, 0, 2, 1));
        let job = gateway.queue().dequeue().unwrap();
        assert_eq!((job.pick.module_id, job.pick.direction), (1, 0));
        assert_eq!((job.place.module_id, job.place.direction), (2, 1));
    }

    #[tokio::test]
    async fn service_writes_exactly_once_and_returns_true() {
        let (connector, gateway) = setup();
        assert!(gateway.submit_service(4).await.unwrap());

        let writes: Vec<LinkOp> = connector
            .journal()
            .into_iter()
            .filter(|op| matches!(op, LinkOp::Write(..)))
            .collect();
        assert_eq!(writes, vec![LinkOp::Write("ns=2;s=service".into(), Variant::Int32(4))]);
        assert_eq!(connector.store().read(&"ns=2;s=service".into()).unwrap(), Variant::Int32(4));
    }

    #[tokio::test]
    async fn service_surfaces_connection_failure() {
        let (connector, gateway) = setup();
        connector.set_reachable(false);
        let err = gateway.submit_service(1).await.unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn service_does_not_touch_queue() {
        let (_, gateway) = setup();
        gateway.submit_pick_place(1, 0, 2, 1);
        gateway.submit_service(2).await.unwrap();
        assert_eq!(gateway.queue().size(), 1);
    }
}
