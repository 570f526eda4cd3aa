//! [`NodeSpace`] – a hosted address space of typed variables and methods.
//!
//! Variables live in a shared [`NodeStore`]; methods are bound to a
//! [`MethodSchema`] and an async [`MethodHandler`].  Incoming calls are
//! checked against the schema before the handler runs, so handlers can rely
//! on argument count and types.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use cellbridge_link::NodeStore;
use cellbridge_types::wire::{Argument, NodeInfo, Request, Response};
use cellbridge_types::{BridgeError, NodeId, Variant, VariantType};
use tracing::debug;

/// Name, description and typed signature of an invokable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSchema {
    pub name: String,
    pub description: String,
    pub inputs: Vec<Argument>,
    pub outputs: Vec<Argument>,
}

impl MethodSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, name: &str, data_type: VariantType, description: &str) -> Self {
        self.inputs.push(Argument::new(name, data_type, description));
        self
    }

    pub fn output(mut self, name: &str, data_type: VariantType, description: &str) -> Self {
        self.outputs.push(Argument::new(name, data_type, description));
        self
    }

    /// Check `args` against the declared inputs.
    pub fn validate(&self, args: &[Variant]) -> Result<(), BridgeError> {
        if args.len() != self.inputs.len() {
            return Err(BridgeError::InvocationFault(format!(
                "{} expects {} arguments, got {}",
                self.name,
                self.inputs.len(),
                args.len()
            )));
        }
        for (arg, declared) in args.iter().zip(&self.inputs) {
            if arg.variant_type() != declared.data_type {
                return Err(BridgeError::InvocationFault(format!(
                    "{}: argument {} must be {}, got {}",
                    self.name,
                    declared.name,
                    declared.data_type,
                    arg.variant_type()
                )));
            }
        }
        Ok(())
    }
}

/// Body of a registered method.  Arguments have already been validated.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn invoke(&self, args: Vec<Variant>) -> Result<Vec<Variant>, BridgeError>;
}

struct MethodEntry {
    schema: MethodSchema,
    handler: Arc<dyn MethodHandler>,
}

pub struct NodeSpace {
    name: String,
    variables: NodeStore,
    read_only: RwLock<BTreeSet<NodeId>>,
    methods: RwLock<BTreeMap<NodeId, MethodEntry>>,
}

impl NodeSpace {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_store(name, NodeStore::new())
    }

    /// Serve an existing store, e.g. one a [`StateMirror`] already writes to.
    ///
    /// [`StateMirror`]: cellbridge_core::StateMirror
    pub fn with_store(name: impl Into<String>, variables: NodeStore) -> Self {
        Self {
            name: name.into(),
            variables,
            read_only: RwLock::default(),
            methods: RwLock::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &NodeStore {
        &self.variables
    }

    /// Declare a variable remote clients may read and write.
    pub fn declare(&self, node: NodeId, ty: VariantType) {
        self.variables.declare(node, ty);
    }

    /// Declare a variable remote clients may only read.  Local code still
    /// writes it through [`variables`](Self::variables).
    pub fn declare_read_only(&self, node: NodeId, ty: VariantType) {
        self.read_only
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.clone());
        self.variables.declare(node, ty);
    }

    /// Bind `handler` to `node`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ProtocolFault`] when `node` is already a variable or a
    /// method.
    pub fn register_method(
        &self,
        node: NodeId,
        schema: MethodSchema,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<(), BridgeError> {
        if self.variables.contains(&node) {
            return Err(BridgeError::protocol(&node, "node already declared as a variable"));
        }
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        if methods.contains_key(&node) {
            return Err(BridgeError::protocol(&node, "method already registered"));
        }
        debug!(space = %self.name, method = %schema.name, node = %node, "method registered");
        methods.insert(node, MethodEntry { schema, handler });
        Ok(())
    }

    pub fn schema(&self, method: &NodeId) -> Option<MethodSchema> {
        self.methods
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .map(|entry| entry.schema.clone())
    }

    /// Invoke `method` with `args`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvocationFault`] for an unknown method or arguments
    /// that do not match its schema; otherwise whatever the handler returns.
    pub async fn call(&self, method: &NodeId, args: Vec<Variant>) -> Result<Vec<Variant>, BridgeError> {
        let handler = {
            let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
            let entry = methods
                .get(method)
                .ok_or_else(|| BridgeError::InvocationFault(format!("unknown method {method}")))?;
            entry.schema.validate(&args)?;
            Arc::clone(&entry.handler)
        };
        handler.invoke(args).await
    }

    /// Write coming from a remote client.
    pub fn remote_write(&self, node: &NodeId, value: Variant) -> Result<(), BridgeError> {
        if self
            .read_only
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node)
        {
            return Err(BridgeError::protocol(node, "node is read-only"));
        }
        self.variables.write(node, value)
    }

    /// Every variable and method, variables first, each group by address.
    pub fn browse(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .variables
            .entries()
            .into_iter()
            .map(|(node, value)| NodeInfo::Variable {
                node,
                data_type: value.variant_type(),
            })
            .collect();
        let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
        nodes.extend(methods.iter().map(|(node, entry)| NodeInfo::Method {
            node: node.clone(),
            name: entry.schema.name.clone(),
            inputs: entry.schema.inputs.clone(),
            outputs: entry.schema.outputs.clone(),
        }));
        nodes
    }

    /// Answer one protocol request.
    pub async fn handle(&self, request: Request) -> Response {
        let result = match request {
            Request::Read { node } => self.variables.read(&node).map(|value| Response::Value { value }),
            Request::ReadBatch { nodes } => nodes
                .iter()
                .map(|node| self.variables.read(node))
                .collect::<Result<Vec<_>, _>>()
                .map(|values| Response::Values { values }),
            Request::Write { node, value } => self.remote_write(&node, value).map(|()| Response::Ack),
            Request::Call { method, args } => self
                .call(&method, args)
                .await
                .map(|outputs| Response::Outputs { outputs }),
            Request::Browse => Ok(Response::Nodes { nodes: self.browse() }),
        };
        result.unwrap_or_else(|e| Response::fault(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellbridge_types::wire::FaultKind;

    struct Sum;

    #[async_trait]
    impl MethodHandler for Sum {
        async fn invoke(&self, args: Vec<Variant>) -> Result<Vec<Variant>, BridgeError> {
            let total = args
                .iter()
                .map(|a| match a {
                    Variant::Int32(v) => *v,
                    Variant::Boolean(_) => 0,
                })
                .sum();
            Ok(vec![Variant::Int32(total)])
        }
    }

    fn space() -> NodeSpace {
        let space = NodeSpace::new("test");
        space.declare("ns=1;s=rw".into(), VariantType::Int32);
        space.declare_read_only("ns=1;s=ro".into(), VariantType::Boolean);
        let schema = MethodSchema::new("sum", "adds two numbers")
            .input("a", VariantType::Int32, "")
            .input("b", VariantType::Int32, "")
            .output("total", VariantType::Int32, "");
        space
            .register_method("ns=1;i=1".into(), schema, Arc::new(Sum))
            .unwrap();
        space
    }

    #[tokio::test]
    async fn call_runs_handler_with_valid_arguments() {
        let outputs = space()
            .call(&"ns=1;i=1".into(), vec![Variant::Int32(2), Variant::Int32(3)])
            .await
            .unwrap();
        assert_eq!(outputs, vec![Variant::Int32(5)]);
    }

    #[tokio::test]
    async fn call_rejects_wrong_arity_and_types() {
        let space = space();
        let method = NodeId::from("ns=1;i=1");

        let err = space.call(&method, vec![Variant::Int32(2)]).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvocationFault(msg) if msg.contains("expects 2")));

        let err = space
            .call(&method, vec![Variant::Int32(2), Variant::Boolean(true)])
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvocationFault(msg) if msg.contains("argument b")));

        let err = space.call(&"ns=1;i=99".into(), vec![]).await.unwrap_err();
        assert!(matches!(err, BridgeError::InvocationFault(_)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let space = space();
        let schema = MethodSchema::new("again", "");
        assert!(space.register_method("ns=1;i=1".into(), schema.clone(), Arc::new(Sum)).is_err());
        assert!(space.register_method("ns=1;s=rw".into(), schema, Arc::new(Sum)).is_err());
    }

    #[tokio::test]
    async fn remote_write_respects_read_only() {
        let space = space();
        let response = space
            .handle(Request::Write {
                node: "ns=1;s=ro".into(),
                value: Variant::Boolean(true),
            })
            .await;
        assert!(matches!(response, Response::Fault { kind: FaultKind::Protocol, .. }));

        // Local writes still go through.
        space.variables().write(&"ns=1;s=ro".into(), Variant::Boolean(true)).unwrap();
        let response = space.handle(Request::Read { node: "ns=1;s=ro".into() }).await;
        assert_eq!(response, Response::Value { value: Variant::Boolean(true) });
    }

    #[tokio::test]
    async fn handle_maps_requests_to_responses() {
        let space = space();
        assert_eq!(
            space
                .handle(Request::Write {
                    node: "ns=1;s=rw".into(),
                    value: Variant::Int32(8),
                })
                .await,
            Response::Ack
        );
        assert_eq!(
            space
                .handle(Request::ReadBatch {
                    nodes: vec!["ns=1;s=rw".into(), "ns=1;s=ro".into()],
                })
                .await,
            Response::Values {
                values: vec![Variant::Int32(8), Variant::Boolean(false)]
            }
        );
        assert!(matches!(
            space.handle(Request::Read { node: "ns=1;s=nope".into() }).await,
            Response::Fault { kind: FaultKind::Protocol, .. }
        ));
        assert!(matches!(
            space
                .handle(Request::Call {
                    method: "ns=1;i=1".into(),
                    args: vec![],
                })
                .await,
            Response::Fault { kind: FaultKind::Invocation, .. }
        ));
    }

    #[test]
    fn browse_lists_variables_then_methods() {
        let nodes = space().browse();
        assert_eq!(nodes.len(), 3);
        assert!(matches!(&nodes[0], NodeInfo::Variable { node, .. } if node.as_str() == "ns=1;s=ro"));
        assert!(matches!(&nodes[2], NodeInfo::Method { name, inputs, .. } if name == "sum" && inputs.len() == 2));
    }
}
