//! JSON node protocol.
//!
//! One [`Request`] per WebSocket text frame, answered by exactly one
//! [`Response`] frame on the same connection.  The same protocol is served by
//! the hosted digital twin and spoken to the robot endpoint.
//!
//! ```json
//! {"op":"read","node":"ns=2;s=isBusy"}
//! {"status":"value","value":{"type":"Boolean","value":false}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{BridgeError, NodeId, Variant, VariantType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Read { node: NodeId },
    ReadBatch { nodes: Vec<NodeId> },
    Write { node: NodeId, value: Variant },
    Call { method: NodeId, args: Vec<Variant> },
    Browse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Value { value: Variant },
    Values { values: Vec<Variant> },
    Ack,
    Outputs { outputs: Vec<Variant> },
    Nodes { nodes: Vec<NodeInfo> },
    Fault { kind: FaultKind, message: String },
}

impl Response {
    pub fn fault(err: &BridgeError) -> Self {
        let kind = match err {
            BridgeError::ConnectionFailure { .. } => FaultKind::Connection,
            BridgeError::ProtocolFault { .. } => FaultKind::Protocol,
            BridgeError::InvocationFault(_) => FaultKind::Invocation,
            BridgeError::Config(_) | BridgeError::Serialization(_) => FaultKind::Internal,
        };
        Response::Fault {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Connection,
    Protocol,
    Invocation,
    Internal,
}

/// A named, typed method argument or result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub data_type: VariantType,
    pub description: String,
}

impl Argument {
    pub fn new(name: impl Into<String>, data_type: VariantType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            description: description.into(),
        }
    }
}

/// Entry returned by a browse request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeInfo {
    Variable {
        node: NodeId,
        data_type: VariantType,
    },
    Method {
        node: NodeId,
        name: String,
        inputs: Vec<Argument>,
        outputs: Vec<Argument>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_op_tag() {
        let req: Request = serde_json::from_str(r#"{"op":"read","node":"ns=2;s=isBusy"}"#).unwrap();
        assert_eq!(
            req,
            Request::Read {
                node: NodeId::from("ns=2;s=isBusy")
            }
        );

        let json = serde_json::to_string(&Request::Browse).unwrap();
        assert_eq!(json, r#"{"op":"browse"}"#);
    }

    #[test]
    fn call_frame_carries_typed_args() {
        let raw = r#"{"op":"call","method":"ns=3;i=1595","args":[{"type":"Int32","value":2}]}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        match req {
            Request::Call { method, args } => {
                assert_eq!(method.as_str(), "ns=3;i=1595");
                assert_eq!(args, vec![Variant::Int32(2)]);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn fault_kind_follows_error_variant() {
        let err = BridgeError::InvocationFault("expected 4 arguments".into());
        match Response::fault(&err) {
            Response::Fault { kind, message } => {
                assert_eq!(kind, FaultKind::Invocation);
                assert!(message.contains("expected 4 arguments"));
            }
            other => panic!("expected fault, got {other:?}"),
        }
    }
}
