//! [`NodeStore`] – typed in-memory node table.
//!
//! Each node is declared once with a type.  Later writes must carry a value
//! of that type; reads and writes of undeclared nodes are protocol faults,
//! matching what a real node server answers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cellbridge_types::{BridgeError, NodeId, Variant, VariantType};

/// Shared node table.  Clone it cheaply – all clones see the same nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Arc<Mutex<BTreeMap<NodeId, Variant>>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `node` with type `ty`, initialised to the type's zero value.
    ///
    /// Re-declaring a node resets it.
    pub fn declare(&self, node: NodeId, ty: VariantType) {
        self.declare_with(node, Variant::default_for(ty));
    }

    /// Declare `node` with an explicit initial value; the value's type becomes
    /// the node's declared type.
    pub fn declare_with(&self, node: NodeId, initial: Variant) {
        self.lock().insert(node, initial);
    }

    pub fn read(&self, node: &NodeId) -> Result<Variant, BridgeError> {
        self.lock()
            .get(node)
            .copied()
            .ok_or_else(|| BridgeError::unknown_node(node))
    }

    /// Overwrite the value of `node`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ProtocolFault`] if the node is undeclared or `value`
    /// does not match its declared type.
    pub fn write(&self, node: &NodeId, value: Variant) -> Result<(), BridgeError> {
        let mut nodes = self.lock();
        let slot = nodes.get_mut(node).ok_or_else(|| BridgeError::unknown_node(node))?;
        if slot.variant_type() != value.variant_type() {
            return Err(BridgeError::type_mismatch(node, slot.variant_type(), value.variant_type()));
        }
        *slot = value;
        Ok(())
    }

    pub fn declared_type(&self, node: &NodeId) -> Option<VariantType> {
        self.lock().get(node).map(Variant::variant_type)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.lock().contains_key(node)
    }

    /// All nodes and their current values, ordered by address.
    pub fn entries(&self) -> Vec<(NodeId, Variant)> {
        self.lock().iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<NodeId, Variant>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
