//! [`BridgeServer`] – hosts the digital twin and drives the state mirror.
//!
//! On construction the server provisions the mirrored twin variables
//! (read-only for remote clients), creates the one [`CommandQueue`] and
//! binds the two public methods to a [`MethodGateway`].  [`BridgeServer::run`]
//! serves the twin and runs the [`StateMirror`] as its only background
//! activity until shutdown.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cellbridge_core::{
    CommandQueue, DEFAULT_CAPACITY, DEFAULT_PERIOD, FireAndForgetService, MethodGateway, ServiceCommand, StateMirror,
};
use cellbridge_link::RobotLink;
use cellbridge_types::{BridgeError, MethodNodes, NodeId, RobotNodes, TwinNodes, Variant, VariantType};
use tokio::sync::watch;
use tracing::info;

use crate::endpoint::NodeSpaceEndpoint;
use crate::node_space::{MethodHandler, MethodSchema, NodeSpace};

/// Everything [`BridgeServer`] needs besides the robot link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub server_name: String,
    pub listen_addr: SocketAddr,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub robot_nodes: RobotNodes,
    pub twin_nodes: TwinNodes,
    pub method_nodes: MethodNodes,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_name: "Digital Factory Transfer".to_string(),
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4840)),
            poll_interval: DEFAULT_PERIOD,
            queue_capacity: DEFAULT_CAPACITY,
            robot_nodes: RobotNodes::default(),
            twin_nodes: TwinNodes::default(),
            method_nodes: MethodNodes::default(),
        }
    }
}

/// Signature of the public `pick_and_place` method.
pub fn pick_and_place_schema() -> MethodSchema {
    MethodSchema::new("pick_and_place", "Queue a transport job for the robot cell")
        .input("pick_id", VariantType::Int32, "ID of the module for picking")
        .input("pick_dir", VariantType::Int32, "Direction for picking")
        .input("place_id", VariantType::Int32, "ID of the module for placing")
        .input("place_dir", VariantType::Int32, "Direction for placing")
        .output("result_pap", VariantType::Boolean, "false if the queue is full")
}

/// Signature of the public `service` method.
pub fn service_schema() -> MethodSchema {
    MethodSchema::new("service", "Move the robot into a maintenance position")
        .input("service_id", VariantType::Int32, "0 = none, 1-6 = maintenance positions")
        .output("result_s", VariantType::Boolean, "true once the command was sent")
}

struct PickAndPlaceHandler {
    gateway: Arc<MethodGateway>,
    method: NodeId,
}

#[async_trait]
impl MethodHandler for PickAndPlaceHandler {
    async fn invoke(&self, args: Vec<Variant>) -> Result<Vec<Variant>, BridgeError> {
        let [pick_id, pick_dir, place_id, place_dir] = args.as_slice() else {
            return Err(BridgeError::InvocationFault("pick_and_place expects 4 arguments".into()));
        };
        let accepted = self.gateway.submit_pick_place(
            pick_id.as_i32(&self.method)?,
            pick_dir.as_i32(&self.method)?,
            place_id.as_i32(&self.method)?,
            place_dir.as_i32(&self.method)?,
        );
        Ok(vec![Variant::Boolean(accepted)])
    }
}

struct ServiceHandler {
    gateway: Arc<MethodGateway>,
    method: NodeId,
}

#[async_trait]
impl MethodHandler for ServiceHandler {
    async fn invoke(&self, args: Vec<Variant>) -> Result<Vec<Variant>, BridgeError> {
        let [service_id] = args.as_slice() else {
            return Err(BridgeError::InvocationFault("service expects 1 argument".into()));
        };
        let sent = self.gateway.submit_service(service_id.as_i32(&self.method)?).await?;
        Ok(vec![Variant::Boolean(sent)])
    }
}

pub struct BridgeServer {
    config: BridgeConfig,
    link: Arc<RobotLink>,
    space: Arc<NodeSpace>,
    gateway: Arc<MethodGateway>,
}

impl BridgeServer {
    /// Build the server with the fire-and-forget service command.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Config`] for a zero queue capacity or poll interval, or
    /// a protocol fault if the method and twin node ids collide.
    pub fn new(config: BridgeConfig, link: Arc<RobotLink>) -> Result<Self, BridgeError> {
        let service = Arc::new(FireAndForgetService::new(
            Arc::clone(&link),
            config.robot_nodes.service.clone(),
        ));
        Self::with_service_command(config, link, service)
    }

    /// Build the server with a custom [`ServiceCommand`].
    pub fn with_service_command(
        config: BridgeConfig,
        link: Arc<RobotLink>,
        service: Arc<dyn ServiceCommand>,
    ) -> Result<Self, BridgeError> {
        if config.queue_capacity == 0 {
            return Err(BridgeError::Config("queue capacity must be at least 1".into()));
        }
        if config.poll_interval.is_zero() {
            return Err(BridgeError::Config("poll interval must be positive".into()));
        }

        let space = Arc::new(NodeSpace::new(config.server_name.clone()));
        for (node, ty) in config.twin_nodes.declarations() {
            space.declare_read_only(node, ty);
        }

        let queue = Arc::new(CommandQueue::new(config.queue_capacity));
        let gateway = Arc::new(MethodGateway::new(queue, service));

        let methods = &config.method_nodes;
        space.register_method(
            methods.pick_and_place.clone(),
            pick_and_place_schema(),
            Arc::new(PickAndPlaceHandler {
                gateway: Arc::clone(&gateway),
                method: methods.pick_and_place.clone(),
            }),
        )?;
        space.register_method(
            methods.service.clone(),
            service_schema(),
            Arc::new(ServiceHandler {
                gateway: Arc::clone(&gateway),
                method: methods.service.clone(),
            }),
        )?;

        Ok(Self {
            config,
            link,
            space,
            gateway,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn space(&self) -> &Arc<NodeSpace> {
        &self.space
    }

    pub fn gateway(&self) -> &Arc<MethodGateway> {
        &self.gateway
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        self.gateway.queue()
    }

    /// A mirror over this server's queue and twin variables.
    pub fn state_mirror(&self) -> StateMirror {
        StateMirror::new(
            Arc::clone(&self.link),
            Arc::clone(self.queue()),
            self.space.variables().clone(),
            self.config.robot_nodes.clone(),
            self.config.twin_nodes.clone(),
            self.config.poll_interval,
        )
    }

    /// Bind the configured address and [`serve`](Self::serve).
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), BridgeError> {
        let endpoint = NodeSpaceEndpoint::bind(self.config.listen_addr).await?;
        self.serve(endpoint, shutdown).await;
        Ok(())
    }

    /// Serve the twin on `endpoint` and mirror robot state until `shutdown`.
    pub async fn serve(self, endpoint: NodeSpaceEndpoint, shutdown: watch::Receiver<bool>) {
        info!(
            server = %self.config.server_name,
            robot = %self.link.endpoint(),
            link_mode = ?self.link.mode(),
            capacity = self.config.queue_capacity,
            "bridge server starting"
        );
        let serving = tokio::spawn(endpoint.run(Arc::clone(&self.space), shutdown.clone()));
        self.state_mirror().run(shutdown).await;
        let _ = serving.await;
        info!(server = %self.config.server_name, "bridge server stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_core::DispatchState;
    use cellbridge_link::{Connector, LinkOp, MemoryConnector, NodeStore, WsConnector};
    use cellbridge_types::wire::{FaultKind, NodeInfo, Request, Response};

    fn robot() -> Arc<MemoryConnector> {
        let store = NodeStore::new();
        for (node, ty) in RobotNodes::default().declarations() {
            store.declare(node, ty);
        }
        Arc::new(MemoryConnector::new(store))
    }

    fn server(robot: &Arc<MemoryConnector>) -> BridgeServer {
        let config = BridgeConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            poll_interval: Duration::from_millis(10),
            ..BridgeConfig::default()
        };
        BridgeServer::new(config, Arc::new(RobotLink::per_call(robot.clone()))).unwrap()
    }

    fn pick_place(args: [i32; 4]) -> Request {
        Request::Call {
            method: MethodNodes::default().pick_and_place,
            args: args.into_iter().map(Variant::Int32).collect(),
        }
    }

    #[tokio::test]
    async fn fourth_pick_and_place_call_is_rejected() {
        let server = server(&robot());
        let mut results = Vec::new();
        for i in 0..4 {
            results.push(server.space().handle(pick_place([i, 0, i + 10, 1])).await);
        }
        let accepted: Vec<Response> = [true, true, true, false]
            .into_iter()
            .map(|b| Response::Outputs {
                outputs: vec![Variant::Boolean(b)],
            })
            .collect();
        assert_eq!(results, accepted);
        assert_eq!(server.queue().size(), 3);
    }

    #[tokio::test]
    async fn service_call_writes_robot_service_node() {
        let robot = robot();
        let server = server(&robot);
        let response = server
            .space()
            .handle(Request::Call {
                method: MethodNodes::default().service,
                args: vec![Variant::Int32(3)],
            })
            .await;
        assert_eq!(
            response,
            Response::Outputs {
                outputs: vec![Variant::Boolean(true)]
            }
        );
        assert_eq!(
            robot.store().read(&RobotNodes::default().service).unwrap(),
            Variant::Int32(3)
        );
    }

    #[tokio::test]
    async fn service_call_to_unreachable_robot_is_a_fault() {
        let robot = robot();
        robot.set_reachable(false);
        let server = server(&robot);
        let response = server
            .space()
            .handle(Request::Call {
                method: MethodNodes::default().service,
                args: vec![Variant::Int32(3)],
            })
            .await;
        assert!(matches!(response, Response::Fault { kind: FaultKind::Connection, .. }));
    }

    #[tokio::test]
    async fn wrong_argument_type_is_invocation_fault() {
        let server = server(&robot());
        let response = server
            .space()
            .handle(Request::Call {
                method: MethodNodes::default().pick_and_place,
                args: vec![Variant::Int32(1), Variant::Boolean(true), Variant::Int32(2), Variant::Int32(1)],
            })
            .await;
        assert!(matches!(response, Response::Fault { kind: FaultKind::Invocation, .. }));
        assert!(server.queue().is_empty());
    }

    #[test]
    fn twin_is_provisioned_with_methods_and_read_only_variables() {
        let server = server(&robot());
        let nodes = server.space().browse();
        let variables = nodes.iter().filter(|n| matches!(n, NodeInfo::Variable { .. })).count();
        assert_eq!(variables, 8);
        let schema = server.space().schema(&MethodNodes::default().service).unwrap();
        assert_eq!(schema.outputs[0].name, "result_s");
        assert_eq!(schema.inputs[0].description, "0 = none, 1-6 = maintenance positions");
        assert!(
            server
                .space()
                .remote_write(&TwinNodes::default().busy, Variant::Boolean(true))
                .is_err()
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = BridgeConfig {
            queue_capacity: 0,
            ..BridgeConfig::default()
        };
        let result = BridgeServer::new(config, Arc::new(RobotLink::per_call(robot())));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[tokio::test]
    async fn single_call_scenario_dispatches_in_order() {
        let robot = robot();
        let server = server(&robot);
        let response = server.space().handle(pick_place([1, 0, 2, 1])).await;
        assert_eq!(
            response,
            Response::Outputs {
                outputs: vec![Variant::Boolean(true)]
            }
        );

        let mut mirror = server.state_mirror();
        let report = mirror.tick().await.unwrap();
        assert!(report.dispatched.is_some());
        assert_eq!(
            mirror.settle_dispatch().await.map(|r| r.state.clone()),
            Some(DispatchState::Completed)
        );

        let nodes = RobotNodes::default();
        let writes: Vec<LinkOp> = robot
            .journal()
            .into_iter()
            .filter(|op| matches!(op, LinkOp::Write(..)))
            .collect();
        assert_eq!(
            writes,
            vec![
                LinkOp::Write(nodes.pick_id.clone(), Variant::Int32(1)),
                LinkOp::Write(nodes.pick_dir.clone(), Variant::Int32(0)),
                LinkOp::Write(nodes.place_id.clone(), Variant::Int32(2)),
                LinkOp::Write(nodes.place_dir.clone(), Variant::Int32(1)),
                LinkOp::Write(nodes.start.clone(), Variant::Boolean(true)),
            ]
        );
    }

    #[tokio::test]
    async fn served_twin_accepts_calls_and_mirrors_state() {
        let robot = robot();
        robot
            .store()
            .write(&RobotNodes::default().service, Variant::Int32(2))
            .unwrap();
        let server = server(&robot);
        let endpoint = NodeSpaceEndpoint::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = endpoint.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(endpoint, rx));

        let client = WsConnector::new(format!("ws://{addr}"));
        let mut session = client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            session.read(&TwinNodes::default().service_position).await.unwrap(),
            Variant::Int32(2)
        );
        session.close().await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
