//! Node type registry
//!
//! The canvas creates nodes by type key through an injected
//! [`NodeFactory`]. `NodeRegistry` is the standard factory: it maps type
//! keys to descriptors and constructors.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = NodeRegistry::new();
//! registry.register_logic::<MathNode>();
//! registry.merge(plugin_registry);
//!
//! let canvas = Canvas::new().with_factory(Arc::new(registry));
//! let node = canvas.create_node("math", (0.0, 0.0))?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::NodeDescriptor;
use crate::node::NodeLogic;
use crate::types::NodeCategory;

/// Creates node logic for a type key
pub trait NodeFactory: Send + Sync {
    /// `None` when the type key is unknown
    fn create(&self, node_type: &str) -> Option<Arc<dyn NodeLogic>>;
}

type Constructor = Arc<dyn Fn() -> Arc<dyn NodeLogic> + Send + Sync>;

/// A registration entry combining metadata with its constructor
struct RegistryEntry {
    descriptor: NodeDescriptor,
    constructor: Constructor,
}

/// Registry of node types
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node type with an explicit constructor
    ///
    /// Replaces an existing registration with the same type key.
    pub fn register<F>(&mut self, descriptor: NodeDescriptor, constructor: F)
    where
        F: Fn() -> Arc<dyn NodeLogic> + Send + Sync + 'static,
    {
        if self.entries.contains_key(&descriptor.node_type) {
            log::debug!("Replacing node type '{}'", descriptor.node_type);
        }
        self.entries.insert(
            descriptor.node_type.clone(),
            RegistryEntry {
                descriptor,
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Register a node type constructed with `Default`
    pub fn register_logic<T>(&mut self)
    where
        T: NodeLogic + Default + 'static,
    {
        let descriptor = T::default().descriptor();
        self.register(descriptor, || Arc::new(T::default()) as Arc<dyn NodeLogic>);
    }

    pub fn get_descriptor(&self, node_type: &str) -> Option<&NodeDescriptor> {
        self.entries.get(node_type).map(|e| &e.descriptor)
    }

    /// All descriptors, sorted by type key
    pub fn all_descriptors(&self) -> Vec<&NodeDescriptor> {
        let mut descriptors: Vec<_> = self.entries.values().map(|e| &e.descriptor).collect();
        descriptors.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        descriptors
    }

    /// Descriptors grouped by category
    pub fn descriptors_by_category(&self) -> HashMap<NodeCategory, Vec<&NodeDescriptor>> {
        let mut by_category: HashMap<NodeCategory, Vec<&NodeDescriptor>> = HashMap::new();
        for descriptor in self.all_descriptors() {
            by_category
                .entry(descriptor.category)
                .or_default()
                .push(descriptor);
        }
        by_category
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.entries.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absorb another registry; its entries win on conflicts
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for NodeRegistry {
    fn create(&self, node_type: &str) -> Option<Arc<dyn NodeLogic>> {
        self.entries.get(node_type).map(|e| (e.constructor)())
    }
}
