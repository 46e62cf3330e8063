//! Level-based execution of a node snapshot
//!
//! `ExecutionPlan::build` walks upstream data dependencies from every
//! output node and assigns each reached node a level:
//!
//! ```text
//! level(n) = 0                              if n has no dependencies
//!          = 1 + max(level(d) for d in deps) otherwise
//! ```
//!
//! The `Scheduler` then runs levels in ascending order. All nodes of a
//! level run as spawned tasks and the next level starts only after every
//! one of them has finished.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::canvas::CanvasSnapshot;
use crate::config::SchedulerConfig;
use crate::context::{ExecutionContext, ProcessContext};
use crate::error::{ExecutionError, GraphError, NodeError, NodeFailure, Result};
use crate::events::{emit, EventSink, GraphEvent};
use crate::node::Node;
use crate::types::{NodeId, NodeState};

/// Nodes partitioned into dependency levels
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    levels: Vec<Vec<Arc<Node>>>,
}

/// Traversal state for leveling
struct Leveler<'a> {
    by_id: HashMap<&'a str, &'a Arc<Node>>,
    deps: HashMap<NodeId, Vec<NodeId>>,
    levels: HashMap<NodeId, usize>,
    in_process: HashSet<NodeId>,
}

impl<'a> Leveler<'a> {
    fn visit(&mut self, node: &'a Arc<Node>) -> Result<usize> {
        if let Some(level) = self.levels.get(node.id()) {
            return Ok(*level);
        }
        if !self.in_process.insert(node.id().clone()) {
            return Err(GraphError::Cycle {
                node_id: node.id().clone(),
                node_name: node.name(),
            });
        }

        let mut level = 0;
        let deps = self.deps.get(node.id()).cloned().unwrap_or_default();
        for dep_id in deps {
            let Some(dep) = self.by_id.get(dep_id.as_str()).copied() else {
                log::warn!(
                    "Node '{}' depends on '{}', which is not part of this run",
                    node.id(),
                    dep_id
                );
                continue;
            };
            level = level.max(self.visit(dep)? + 1);
        }

        self.in_process.remove(node.id());
        self.levels.insert(node.id().clone(), level);
        Ok(level)
    }
}

impl ExecutionPlan {
    /// Level every node reachable upstream from an output node
    ///
    /// Dependencies are read from the nodes' live port connections.
    /// Fails with `NoOutputNodes` when nothing is flagged as output and
    /// with `Cycle` when a dependency loop is reachable.
    pub fn build(nodes: &[Arc<Node>]) -> Result<Self> {
        let deps = nodes
            .iter()
            .map(|n| (n.id().clone(), n.dependencies()))
            .collect();
        Self::level(nodes, deps)
    }

    /// Level a canvas snapshot using only the connections it captured
    pub fn from_snapshot(snapshot: &CanvasSnapshot) -> Result<Self> {
        let mut deps: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for connection in &snapshot.connections {
            if connection.is_flow() {
                continue;
            }
            let sources = deps.entry(connection.target_node().to_string()).or_default();
            if !sources.iter().any(|s| s == connection.source_node()) {
                sources.push(connection.source_node().to_string());
            }
        }
        Self::level(&snapshot.nodes, deps)
    }

    fn level(nodes: &[Arc<Node>], deps: HashMap<NodeId, Vec<NodeId>>) -> Result<Self> {
        let roots: Vec<&Arc<Node>> = nodes.iter().filter(|n| n.is_output()).collect();
        if roots.is_empty() {
            return Err(GraphError::NoOutputNodes);
        }

        let mut leveler = Leveler {
            by_id: nodes.iter().map(|n| (n.id().as_str(), n)).collect(),
            deps,
            levels: HashMap::new(),
            in_process: HashSet::new(),
        };
        for root in roots {
            leveler.visit(root)?;
        }

        // Keep snapshot order inside each level
        let mut grouped: BTreeMap<usize, Vec<Arc<Node>>> = BTreeMap::new();
        for node in nodes {
            if let Some(level) = leveler.levels.get(node.id()) {
                grouped.entry(*level).or_default().push(node.clone());
            }
        }

        Ok(Self {
            levels: grouped.into_values().collect(),
        })
    }

    pub fn levels(&self) -> &[Vec<Arc<Node>>] {
        &self.levels
    }

    /// Node ids per level
    pub fn level_ids(&self) -> Vec<Vec<NodeId>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|n| n.id().clone()).collect())
            .collect()
    }

    /// Level index of a node, if it is part of the plan
    pub fn level_of(&self, node_id: &str) -> Option<usize> {
        self.levels
            .iter()
            .position(|level| level.iter().any(|n| n.id() == node_id))
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: String,
    pub levels: Vec<Vec<NodeId>>,
    pub states: HashMap<NodeId, NodeState>,
    pub duration_ms: u64,
}

/// Runs execution plans level by level
pub struct Scheduler {
    config: SchedulerConfig,
    events: Arc<dyn EventSink>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, events: Arc<dyn EventSink>) -> Self {
        Self { config, events }
    }

    /// Plan and execute a snapshot of nodes
    ///
    /// Planning errors are returned before any node runs.
    pub async fn run(
        &self,
        nodes: &[Arc<Node>],
        execution: Arc<ExecutionContext>,
    ) -> Result<ExecutionReport> {
        let plan = ExecutionPlan::build(nodes)?;
        self.execute(&plan, execution).await
    }

    /// Execute an already built plan
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        execution: Arc<ExecutionContext>,
    ) -> Result<ExecutionReport> {
        let started = Instant::now();
        let execution_id = execution.execution_id.clone();

        log::info!(
            "Starting execution {} ({} nodes in {} levels)",
            execution_id,
            plan.node_count(),
            plan.len()
        );
        emit(
            self.events.as_ref(),
            GraphEvent::ExecutionStarted {
                execution_id: execution_id.clone(),
                level_count: plan.len(),
            },
        );
        for node in plan.levels().iter().flatten() {
            execution.states().set(node.id(), NodeState::NotStarted);
        }

        let semaphore = self
            .config
            .max_parallelism
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        for (index, level) in plan.levels().iter().enumerate() {
            if execution.is_aborted() {
                log::info!("Execution {} cancelled before level {}", execution_id, index);
                emit(
                    self.events.as_ref(),
                    GraphEvent::ExecutionCancelled {
                        execution_id: execution_id.clone(),
                    },
                );
                return Err(GraphError::Cancelled);
            }

            log::debug!("Execution {}: level {} ({} nodes)", execution_id, index, level.len());
            emit(
                self.events.as_ref(),
                GraphEvent::LevelStarted {
                    execution_id: execution_id.clone(),
                    level: index,
                    node_ids: level.iter().map(|n| n.id().clone()).collect(),
                },
            );

            let failures = self.run_level(level, &execution, semaphore.as_ref()).await;
            if !failures.is_empty() {
                let error = ExecutionError::new(failures);
                log::warn!("Execution {} failed: {}", execution_id, error);
                emit(
                    self.events.as_ref(),
                    GraphEvent::ExecutionFailed {
                        execution_id: execution_id.clone(),
                        error: error.to_string(),
                    },
                );
                return Err(error.into());
            }
        }

        emit(
            self.events.as_ref(),
            GraphEvent::ExecutionCompleted {
                execution_id: execution_id.clone(),
            },
        );
        let duration_ms = started.elapsed().as_millis() as u64;
        log::info!("Execution {} completed in {}ms", execution_id, duration_ms);

        Ok(ExecutionReport {
            execution_id,
            levels: plan.level_ids(),
            states: execution.states().snapshot(),
            duration_ms,
        })
    }

    /// Run every node of a level concurrently and collect the failures
    async fn run_level(
        &self,
        level: &[Arc<Node>],
        execution: &Arc<ExecutionContext>,
        semaphore: Option<&Arc<Semaphore>>,
    ) -> Vec<NodeFailure> {
        let handles: Vec<_> = level
            .iter()
            .map(|node| {
                let node = node.clone();
                let execution = execution.clone();
                let events = self.events.clone();
                let semaphore = semaphore.cloned();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    run_node(&node, &execution, events.as_ref()).await
                })
            })
            .collect();

        let results = join_all(handles).await;

        let mut failures = Vec::new();
        for (node, result) in level.iter().zip(results) {
            let source = match result {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(join_error) => {
                    let error = NodeError::failed(format!("task aborted: {}", join_error));
                    mark_failed(node, execution, self.events.as_ref(), &error);
                    error
                }
            };
            failures.push(NodeFailure {
                node_id: node.id().clone(),
                node_name: node.name(),
                source,
            });
        }
        failures
    }
}

async fn run_node(
    node: &Node,
    execution: &ExecutionContext,
    events: &dyn EventSink,
) -> std::result::Result<(), NodeError> {
    execution.states().set(node.id(), NodeState::Running);
    emit(
        events,
        GraphEvent::NodeStarted {
            execution_id: execution.execution_id.clone(),
            node_id: node.id().clone(),
        },
    );

    let ctx = ProcessContext::new(node, execution);
    let result = node.logic().process(&ctx).await;

    match &result {
        Ok(()) => {
            execution.states().set(node.id(), NodeState::Completed);
            emit(
                events,
                GraphEvent::NodeCompleted {
                    execution_id: execution.execution_id.clone(),
                    node_id: node.id().clone(),
                },
            );
        }
        Err(error) => mark_failed(node, execution, events, error),
    }
    result
}

fn mark_failed(node: &Node, execution: &ExecutionContext, events: &dyn EventSink, error: &NodeError) {
    log::warn!("Node '{}' ({}) failed: {}", node.name(), node.id(), error);
    execution.states().set(node.id(), NodeState::Failed);
    emit(
        events,
        GraphEvent::NodeFailed {
            execution_id: execution.execution_id.clone(),
            node_id: node.id().clone(),
            error: error.to_string(),
        },
    );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::builder::ShapeBuilder;
    use crate::connection::LinkTable;
    use crate::descriptor::NodeDescriptor;
    use crate::events::{NullEventSink, VecEventSink};
    use crate::node::NodeLogic;
    use crate::types::NodeCategory;
    use crate::value::{DataType, Value};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records its name into a shared log, then publishes "Out" = 1 + sum of "In"
    pub(crate) struct Step {
        pub(crate) label: &'static str,
        pub(crate) output: bool,
        pub(crate) fail: bool,
        pub(crate) delay_ms: u64,
        pub(crate) log: Arc<Mutex<Vec<&'static str>>>,
        pub(crate) running: Arc<AtomicUsize>,
        pub(crate) peak: Arc<AtomicUsize>,
    }

    impl Step {
        pub(crate) fn new(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                label,
                output: false,
                fail: false,
                delay_ms: 0,
                log: log.clone(),
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn output(mut self) -> Self {
            self.output = true;
            self
        }

        pub(crate) fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl NodeLogic for Step {
        fn descriptor(&self) -> NodeDescriptor {
            let descriptor = NodeDescriptor::new("step", self.label, NodeCategory::Processing);
            if self.output {
                descriptor.output()
            } else {
                descriptor
            }
        }

        fn declare(&self, ports: &mut ShapeBuilder<'_>) {
            ports.input("In", DataType::Int);
            ports.input("In 2", DataType::Int);
            ports.output("Out", DataType::Int);
            ports.flow_input("Exec");
            ports.flow_output("Then");
        }

        async fn process(&self, ctx: &ProcessContext<'_>) -> std::result::Result<(), NodeError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            self.log.lock().push(self.label);
            if self.fail {
                return Err(NodeError::failed(format!("{} exploded", self.label)));
            }
            let a: i64 = ctx.input_as("In")?;
            let b: i64 = ctx.input_as("In 2")?;
            ctx.set_output("Out", a + b + 1)
        }
    }

    pub(crate) fn graph() -> (Arc<LinkTable>, Vec<Arc<Node>>) {
        (Arc::new(LinkTable::new(Arc::new(NullEventSink))), Vec::new())
    }

    pub(crate) fn add(links: &Arc<LinkTable>, nodes: &mut Vec<Arc<Node>>, logic: Step) -> Arc<Node> {
        let node = Node::create(logic.label.to_string(), Arc::new(logic), (0.0, 0.0), links.clone());
        node.reconfigure();
        nodes.push(node.clone());
        node
    }

    pub(crate) fn wire(links: &LinkTable, from: &Node, to: &Node, input: &str) {
        links.attach(from.output("Out").unwrap(), to.input(input).unwrap());
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default(), Arc::new(NullEventSink))
    }

    #[test]
    fn test_chain_levels() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let c = add(&links, &mut nodes, Step::new("c", &log).output());
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log));
        wire(&links, &a, &b, "In");
        wire(&links, &b, &c, "In");

        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(
            plan.level_ids(),
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(plan.level_of("c"), Some(2));
    }

    #[test]
    fn test_levels_strictly_increase_along_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log));
        let c = add(&links, &mut nodes, Step::new("c", &log));
        let d = add(&links, &mut nodes, Step::new("d", &log).output());
        // Diamond plus a shortcut: a feeds b, c and d
        wire(&links, &a, &b, "In");
        wire(&links, &a, &c, "In");
        wire(&links, &b, &d, "In");
        wire(&links, &c, &d, "In 2");
        wire(&links, &a, &c, "In 2");

        let plan = ExecutionPlan::build(&nodes).unwrap();
        for node in &nodes {
            for dep in node.dependencies() {
                assert!(plan.level_of(&dep).unwrap() < plan.level_of(node.id()).unwrap());
            }
        }
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.level_ids()[1], vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_unreachable_nodes_not_planned() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        add(&links, &mut nodes, Step::new("root", &log).output());
        add(&links, &mut nodes, Step::new("stray", &log));

        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(plan.node_count(), 1);
        assert!(plan.level_of("stray").is_none());
    }

    #[test]
    fn test_no_output_nodes() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        add(&links, &mut nodes, Step::new("a", &log));
        assert!(matches!(
            ExecutionPlan::build(&nodes),
            Err(GraphError::NoOutputNodes)
        ));
    }

    #[tokio::test]
    async fn test_cycle_detected_before_execution() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log));
        let out = add(&links, &mut nodes, Step::new("out", &log).output());
        wire(&links, &a, &b, "In");
        wire(&links, &b, &a, "In");
        wire(&links, &b, &out, "In");

        let err = scheduler()
            .run(&nodes, Arc::new(ExecutionContext::new()))
            .await
            .unwrap_err();
        match err {
            GraphError::Cycle { node_id, .. } => assert!(node_id == "a" || node_id == "b"),
            other => panic!("expected cycle, got {:?}", other),
        }
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log).output());
        wire(&links, &a, &a, "In");

        match ExecutionPlan::build(&nodes) {
            Err(GraphError::Cycle { node_id, node_name }) => {
                assert_eq!(node_id, "a");
                assert_eq!(node_name, "a");
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_flow_edges_do_not_create_dependencies() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log).output());
        links.attach(a.flow_outputs()[0].clone(), b.flow_inputs()[0].clone());
        links.attach(b.flow_outputs()[0].clone(), a.flow_inputs()[0].clone());

        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(plan.level_ids(), vec![vec!["b".to_string()]]);
    }

    #[tokio::test]
    async fn test_run_publishes_outputs_in_level_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log));
        let c = add(&links, &mut nodes, Step::new("c", &log).output());
        wire(&links, &a, &b, "In");
        wire(&links, &b, &c, "In");

        let events = Arc::new(VecEventSink::new());
        let execution = Arc::new(ExecutionContext::new());
        let report = Scheduler::new(SchedulerConfig::default(), events.clone())
            .run(&nodes, execution.clone())
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(c.output("Out").unwrap().value(), Some(Value::Int(3)));
        assert_eq!(report.states.get("b"), Some(&NodeState::Completed));
        assert_eq!(report.levels.len(), 3);
        assert!(matches!(
            events.events().last(),
            Some(GraphEvent::ExecutionCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn test_level_failures_aggregate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let p = add(&links, &mut nodes, Step::new("p", &log).failing());
        let q = add(&links, &mut nodes, Step::new("q", &log));
        let r = add(&links, &mut nodes, Step::new("r", &log).failing());
        let z = add(&links, &mut nodes, Step::new("z", &log).output());
        let z2 = add(&links, &mut nodes, Step::new("z2", &log).output());
        wire(&links, &p, &z, "In");
        wire(&links, &q, &z, "In 2");
        wire(&links, &r, &z2, "In");

        let execution = Arc::new(ExecutionContext::new());
        let err = scheduler().run(&nodes, execution.clone()).await.unwrap_err();

        let GraphError::Execution(error) = err else {
            panic!("expected execution error");
        };
        assert_eq!(error.failed_nodes(), vec!["p", "r"]);
        assert!(error.to_string().contains("p, r"));
        assert_eq!(q.output("Out").unwrap().value(), Some(Value::Int(1)));
        assert_eq!(execution.state("q"), NodeState::Completed);
        assert_eq!(execution.state("p"), NodeState::Failed);
        assert_eq!(execution.state("z"), NodeState::NotStarted);
        assert!(!log.lock().contains(&"z"));
    }

    #[tokio::test]
    async fn test_cancel_before_level() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (links, mut nodes) = graph();
        let a = add(&links, &mut nodes, Step::new("a", &log));
        let b = add(&links, &mut nodes, Step::new("b", &log).output());
        wire(&links, &a, &b, "In");

        let events = Arc::new(VecEventSink::new());
        let execution = Arc::new(ExecutionContext::new());
        execution.abort();
        let err = Scheduler::new(SchedulerConfig::default(), events.clone())
            .run(&nodes, execution)
            .await
            .unwrap_err();

        assert!(matches!(err, GraphError::Cancelled));
        assert!(log.lock().is_empty());
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, GraphEvent::ExecutionCancelled { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_max_parallelism_bounds_level() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (links, mut nodes) = graph();
        for label in ["w1", "w2", "w3", "w4"] {
            let mut step = Step::new(label, &log).output();
            step.delay_ms = 20;
            step.running = running.clone();
            step.peak = peak.clone();
            add(&links, &mut nodes, step);
        }

        let config = SchedulerConfig {
            max_parallelism: Some(1),
        };
        Scheduler::new(config, Arc::new(NullEventSink))
            .run(&nodes, Arc::new(ExecutionContext::new()))
            .await
            .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(log.lock().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_level_runs_concurrently() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (links, mut nodes) = graph();
        for label in ["x", "y"] {
            let mut step = Step::new(label, &log).output();
            step.delay_ms = 50;
            step.running = running.clone();
            step.peak = peak.clone();
            add(&links, &mut nodes, step);
        }

        scheduler()
            .run(&nodes, Arc::new(ExecutionContext::new()))
            .await
            .unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
