//! `cellbridge-link` – node transport and the robot accessor.
//!
//! The gateway never talks to a concrete protocol stack directly.  It holds a
//! [`Connector`] that hands out [`NodeSession`]s, and everything above that
//! line only sees `read`/`write` on opaque [`NodeId`][cellbridge_types::NodeId]s.
//!
//! # Modules
//!
//! - [`transport`] – the [`Connector`] / [`NodeSession`] capability traits.
//! - [`store`] – [`NodeStore`], a typed in-memory node table.  Backs both the
//!   hosted digital twin and the in-memory robot used by tests and the
//!   simulator.
//! - [`memory`] – [`MemoryConnector`], a [`Connector`] over a [`NodeStore`]
//!   with a traffic journal.
//! - [`ws`] – [`WsConnector`], the JSON node protocol over a WebSocket.
//! - [`link`] – [`RobotLink`], per-call or long-lived session access to the
//!   robot's control server.

pub mod link;
pub mod memory;
pub mod store;
pub mod transport;
pub mod ws;

pub use link::{Backoff, LinkMode, RobotLink};
pub use memory::{LinkOp, MemoryConnector};
pub use store::NodeStore;
pub use transport::{Connector, NodeSession};
pub use ws::WsConnector;
