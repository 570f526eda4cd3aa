//! `cellbridge-core` – queueing, dispatch and state mirroring.
//!
//! This is the only place where ordering, capacity and consistency decisions
//! are made.  Everything around it forwards calls mechanically.
//!
//! # Modules
//!
//! - [`queue`] – [`CommandQueue`]: bounded FIFO of pick-and-place jobs,
//!   shared between the invocation handlers (producers) and the mirror loop
//!   (sole consumer).
//! - [`gateway`] – [`MethodGateway`]: the two externally invokable
//!   operations, translated into queue and robot actions.
//! - [`dispatch`] – the per-job dispatch state machine and the write
//!   sequence that hands one job to the robot.
//! - [`mirror`] – [`StateMirror`]: the periodic poll → gate → dispatch →
//!   mirror loop.

pub mod dispatch;
pub mod gateway;
pub mod mirror;
pub mod queue;

pub use dispatch::{DispatchRecord, DispatchState, dispatch_job};
pub use gateway::{FireAndForgetService, MethodGateway, ServiceCommand};
pub use mirror::{DEFAULT_PERIOD, StateMirror, TickReport};
pub use queue::{CommandQueue, DEFAULT_CAPACITY};
