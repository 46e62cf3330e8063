//! Node Graph - typed dataflow graph engine
//!
//! This crate provides the substrate beneath a visual node editor:
//!
//! - Typed ports with read-time coercion of upstream values
//! - A canvas owning nodes, connections and groups
//! - Level-based parallel execution with aggregated failure reporting
//! - Dynamic nodes that re-derive their ports from run-time type choices
//!
//! # Architecture
//!
//! - `Canvas`: sole authority for structural mutation; validates connections
//! - `Scheduler`: levels nodes by data dependency and runs each level concurrently
//! - `ShapeBuilder`: reconciles a node's requested ports against its previous shape
//! - `EventSink`: change and progress notifications, independent of any UI
//!
//! # Example
//!
//! ```ignore
//! use node_graph::{Canvas, NodeRegistry};
//!
//! let mut registry = NodeRegistry::new();
//! graph_nodes::register_builtins(&mut registry);
//!
//! let canvas = Canvas::new().with_factory(Arc::new(registry));
//! let a = canvas.create_node("constant", (0.0, 0.0))?;
//! let show = canvas.create_node("display", (200.0, 0.0))?;
//! canvas.connect_by_name(a.id(), "Value", show.id(), "Value")?;
//!
//! let report = canvas.run().await?;
//! ```

pub mod builder;
pub mod canvas;
pub mod coercion;
pub mod config;
pub mod connection;
pub mod context;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod events;
pub mod groups;
pub mod node;
pub mod port;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod value;

// Re-export key types
pub use builder::ShapeBuilder;
pub use canvas::{Canvas, CanvasSnapshot};
pub use coercion::{Converter, Converters};
pub use config::{CanvasConfig, EngineConfig, SchedulerConfig};
pub use connection::{Connection, ConnectionDocument};
pub use context::{ExecutionContext, ProcessContext};
pub use descriptor::NodeDescriptor;
pub use document::{CanvasDocument, NodeDocument, PortDocument};
pub use error::{ConnectionError, ExecutionError, GraphError, NodeError, NodeFailure, Result};
pub use events::{
    ChannelEventSink, EventError, EventSink, GraphEvent, NullEventSink, VecEventSink,
};
pub use groups::NodeGroup;
pub use node::{Node, NodeLogic, NodeMeta, PortSet};
pub use port::{Port, PortId, PortKind, PortOrigin, PropertyOptions, WriteToken};
pub use registry::{NodeFactory, NodeRegistry};
pub use scheduler::{ExecutionPlan, ExecutionReport, Scheduler};
pub use types::{NodeCategory, NodeId, NodeState, Position};
pub use value::{DataType, FromValue, Value};

// Node implementations need the async_trait attribute
pub use async_trait::async_trait;
