//! Node maps for both sides of the bridge.
//!
//! The defaults are the addresses used by the reference UR5e cell and its
//! asset model.  All three maps deserialize with per-field defaults so a
//! config file only has to name the nodes that differ.
//!
//! | Map | Side | Contents |
//! |---|---|---|
//! | [`RobotNodes`] | robot control server | `start`, `isBusy`, `service`, `isUnderService`, pick/place id + dir |
//! | [`TwinNodes`] | hosted digital twin | mirrored state + queue depth |
//! | [`MethodNodes`] | hosted digital twin | `pick_and_place`, `service` |

use serde::{Deserialize, Serialize};

use crate::{NodeId, VariantType};

/// Addresses of the variables on the robot's control server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotNodes {
    pub start: NodeId,
    pub is_busy: NodeId,
    pub service: NodeId,
    pub is_under_service: NodeId,
    pub pick_id: NodeId,
    pub pick_dir: NodeId,
    pub place_id: NodeId,
    pub place_dir: NodeId,
}

impl Default for RobotNodes {
    fn default() -> Self {
        Self {
            start: "ns=2;s=start".into(),
            is_busy: "ns=2;s=isBusy".into(),
            service: "ns=2;s=service".into(),
            is_under_service: "ns=2;s=isUnderService".into(),
            pick_id: "ns=2;s=pick_id".into(),
            pick_dir: "ns=2;s=pick_dir".into(),
            place_id: "ns=2;s=place_id".into(),
            place_dir: "ns=2;s=place_dir".into(),
        }
    }
}

impl RobotNodes {
    /// The seven state variables in poll order: busy, under service, service
    /// position, pick dir, place dir, pick id, place id.
    pub fn state_nodes(&self) -> [NodeId; 7] {
        [
            self.is_busy.clone(),
            self.is_under_service.clone(),
            self.service.clone(),
            self.pick_dir.clone(),
            self.place_dir.clone(),
            self.pick_id.clone(),
            self.place_id.clone(),
        ]
    }

    /// Every robot variable with its declared type.
    pub fn declarations(&self) -> [(NodeId, VariantType); 8] {
        [
            (self.start.clone(), VariantType::Boolean),
            (self.is_busy.clone(), VariantType::Boolean),
            (self.service.clone(), VariantType::Int32),
            (self.is_under_service.clone(), VariantType::Boolean),
            (self.pick_id.clone(), VariantType::Int32),
            (self.pick_dir.clone(), VariantType::Int32),
            (self.place_id.clone(), VariantType::Int32),
            (self.place_dir.clone(), VariantType::Int32),
        ]
    }
}

/// Addresses of the mirrored variables in the hosted digital-twin model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TwinNodes {
    pub busy: NodeId,
    pub under_service: NodeId,
    pub service_position: NodeId,
    pub queue_depth: NodeId,
    pub pick_dir: NodeId,
    pub place_dir: NodeId,
    pub pick_id: NodeId,
    pub place_id: NodeId,
}

impl Default for TwinNodes {
    fn default() -> Self {
        Self {
            busy: "ns=3;i=1604".into(),
            under_service: "ns=3;i=1611".into(),
            service_position: "ns=3;i=1618".into(),
            queue_depth: "ns=3;i=1625".into(),
            pick_dir: "ns=3;i=1632".into(),
            place_dir: "ns=3;i=1639".into(),
            pick_id: "ns=3;i=1646".into(),
            place_id: "ns=3;i=1653".into(),
        }
    }
}

impl TwinNodes {
    /// Every mirrored variable with its declared type.
    pub fn declarations(&self) -> [(NodeId, VariantType); 8] {
        [
            (self.busy.clone(), VariantType::Boolean),
            (self.under_service.clone(), VariantType::Boolean),
            (self.service_position.clone(), VariantType::Int32),
            (self.queue_depth.clone(), VariantType::Int32),
            (self.pick_dir.clone(), VariantType::Int32),
            (self.place_dir.clone(), VariantType::Int32),
            (self.pick_id.clone(), VariantType::Int32),
            (self.place_id.clone(), VariantType::Int32),
        ]
    }
}

/// Addresses the two invokable operations are bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodNodes {
    pub pick_and_place: NodeId,
    pub service: NodeId,
}

impl Default for MethodNodes {
    fn default() -> Self {
        Self {
            pick_and_place: "ns=3;i=1571".into(),
            service: "ns=3;i=1595".into(),
        }
    }
}
