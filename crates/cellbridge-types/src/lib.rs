//! `cellbridge-types` – shared vocabulary of the gateway.
//!
//! Every other crate speaks in these types: node addresses, the two value
//! types the robot contract uses, pick-and-place jobs, robot state snapshots
//! and the single [`BridgeError`] taxonomy.
//!
//! # Modules
//!
//! - [`nodes`] – default node maps for the robot endpoint, the mirrored
//!   digital-twin variables and the two invokable methods.
//! - [`wire`] – JSON frames of the node protocol spoken over WebSockets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod nodes;
pub mod wire;

pub use nodes::{MethodNodes, RobotNodes, TwinNodes};

/// Opaque address of a variable or method inside a node space.
///
/// The gateway never interprets the structure of the address
/// (`ns=2;s=isBusy`, `ns=3;i=1604`, …); it is only used as a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for NodeId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Declared data type of a node or method argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantType {
    Boolean,
    Int32,
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantType::Boolean => f.write_str("Boolean"),
            VariantType::Int32 => f.write_str("Int32"),
        }
    }
}

/// A typed value read from or written to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Variant {
    Boolean(bool),
    Int32(i32),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::Int32(_) => VariantType::Int32,
        }
    }

    /// The zero value of `ty`, used to initialise freshly declared nodes.
    pub fn default_for(ty: VariantType) -> Self {
        match ty {
            VariantType::Boolean => Variant::Boolean(false),
            VariantType::Int32 => Variant::Int32(0),
        }
    }

    /// Interpret the value read from `node` as a boolean.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ProtocolFault`] when the value is not a
    /// [`Variant::Boolean`].
    pub fn as_bool(&self, node: &NodeId) -> Result<bool, BridgeError> {
        match self {
            Variant::Boolean(v) => Ok(*v),
            other => Err(BridgeError::type_mismatch(node, VariantType::Boolean, other.variant_type())),
        }
    }

    /// Interpret the value read from `node` as a 32-bit integer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ProtocolFault`] when the value is not a
    /// [`Variant::Int32`].
    pub fn as_i32(&self, node: &NodeId) -> Result<i32, BridgeError> {
        match self {
            Variant::Int32(v) => Ok(*v),
            other => Err(BridgeError::type_mismatch(node, VariantType::Int32, other.variant_type())),
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Boolean(v) => write!(f, "{v}"),
            Variant::Int32(v) => write!(f, "{v}"),
        }
    }
}

/// A module slot on the cell: which module and which side of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub module_id: i32,
    pub direction: i32,
}

/// A transport command: take the part at `pick` and put it down at `place`.
///
/// Created once by the method gateway, consumed exactly once by the state
/// mirror, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickPlaceJob {
    pub id: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub pick: Position,
    pub place: Position,
}

impl PickPlaceJob {
    pub fn new(pick_module_id: i32, pick_direction: i32, place_module_id: i32, place_direction: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            submitted_at: Utc::now(),
            pick: Position {
                module_id: pick_module_id,
                direction: pick_direction,
            },
            place: Position {
                module_id: place_module_id,
                direction: place_direction,
            },
        }
    }
}

/// One poll of the robot's state variables.
///
/// Recomputed every tick and written to the twin unconditionally.  The
/// fields are read one by one, so a snapshot may mix values from before and
/// after a state change on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RobotStateSnapshot {
    pub busy: bool,
    pub under_service: bool,
    pub service_position: i32,
    pub pick_dir: i32,
    pub place_dir: i32,
    pub pick_id: i32,
    pub place_id: i32,
}

/// Error taxonomy shared by the link, the core loop and the hosted server.
///
/// A full queue is deliberately absent: it is a business outcome reported as
/// `false`, not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Connection failure to {endpoint}: {details}")]
    ConnectionFailure { endpoint: String, details: String },

    #[error("Protocol fault on {node}: {details}")]
    ProtocolFault { node: String, details: String },

    #[error("Invocation fault: {0}")]
    InvocationFault(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    pub fn connection(endpoint: impl Into<String>, details: impl fmt::Display) -> Self {
        BridgeError::ConnectionFailure {
            endpoint: endpoint.into(),
            details: details.to_string(),
        }
    }

    pub fn protocol(node: &NodeId, details: impl fmt::Display) -> Self {
        BridgeError::ProtocolFault {
            node: node.to_string(),
            details: details.to_string(),
        }
    }

    pub fn unknown_node(node: &NodeId) -> Self {
        Self::protocol(node, "unknown node")
    }

    pub fn type_mismatch(node: &NodeId, expected: VariantType, found: VariantType) -> Self {
        Self::protocol(node, format!("type mismatch: expected {expected}, found {found}"))
    }

    /// `true` for failures that say nothing about the request itself and may
    /// succeed on a fresh connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, BridgeError::ConnectionFailure { .. })
    }
}
