//! `cellbridge-server` – the hosted digital twin.
//!
//! # Modules
//!
//! - [`node_space`] – [`NodeSpace`]: typed variables plus registered methods
//!   with argument schemas, answering node protocol requests.
//! - [`endpoint`] – [`NodeSpaceEndpoint`]: serves a node space to WebSocket
//!   clients, one task per connection.
//! - [`bridge`] – [`BridgeServer`]: provisions the twin, binds
//!   `pick_and_place` / `service` to the method gateway and drives the state
//!   mirror.
//! - [`sim`] – [`SimulatedCell`]: an in-process robot controller for running
//!   without hardware.

pub mod bridge;
pub mod endpoint;
pub mod node_space;
pub mod sim;

pub use bridge::{BridgeConfig, BridgeServer};
pub use endpoint::NodeSpaceEndpoint;
pub use node_space::{MethodHandler, MethodSchema, NodeSpace};
pub use sim::SimulatedCell;
