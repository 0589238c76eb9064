//! L1 planning layer: decomposes an intent into a task graph.
//!
//! Decomposition is template-driven by intent type. The layer also owns
//! the graph analyses the executor relies on — cycle enumeration,
//! topological ordering with priority tie-breaks, token-weighted critical
//! path — and replanning after a task failure.

use petgraph::graph::NodeIndex;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::core::graph::TaskGraph;
use crate::core::intent::{Intent, IntentType};
use crate::core::task::{TaskNode, TaskStatus};

/// Number of subtasks a failed task is split into during replanning.
const SPLIT_PARTS: u32 = 2;

/// Error fragments that make a failed task eligible for splitting.
const SPLITTABLE_ERRORS: &[&str] = &["token limit", "timeout"];

/// Tuning knobs for the planning layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerConfig {
    /// Hard cap on nodes per graph; exceeding it fails validation.
    pub max_tasks_per_graph: usize,
    /// Replans allowed before the layer refuses further changes.
    pub max_replan_attempts: u32,
    /// Whether decomposition validates the graph at all.
    pub validation_enabled: bool,
    /// Whether isolated nodes are collected into parallel groups.
    pub parallel_group_detection: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_graph: 20,
            max_replan_attempts: 2,
            validation_enabled: true,
            parallel_group_detection: true,
        }
    }
}

/// Outcome of decomposing an intent (or of a replan).
#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionResult {
    /// The planned graph; empty when validation rejected it.
    pub graph: TaskGraph,
    /// Whether the graph passed validation.
    pub architecture_validated: bool,
    /// Validation failures, if any.
    pub validation_errors: Vec<String>,
    /// Replans applied to reach this result.
    pub replan_count: u32,
}

/// L2 scheduling hint: one template step of a decomposition.
struct TemplateStep {
    name: &'static str,
    agent: &'static str,
    tokens: u32,
}

const fn step(name: &'static str, agent: &'static str, tokens: u32) -> TemplateStep {
    TemplateStep { name, agent, tokens }
}

const CREATE_TEMPLATE: &[TemplateStep] = &[
    step("spec", "sun", 1000),
    step("design", "venus", 1500),
    step("implement", "mercury", 2000),
    step("test", "mars", 1200),
];

const FIX_TEMPLATE: &[TemplateStep] = &[
    step("analyze", "sun", 800),
    step("fix", "mercury", 1500),
    step("test", "mars", 1000),
];

const REVIEW_TEMPLATE: &[TemplateStep] = &[step("review", "saturn", 1500)];

const FALLBACK_TEMPLATE: &[TemplateStep] = &[step("execute", "mercury", 1000)];

/// L1: intent decomposition, graph analysis, and replanning.
pub struct PlanningLayer {
    config: PlannerConfig,
}

impl PlanningLayer {
    /// Create a planning layer with the given tuning knobs.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Create a planning layer with default knobs.
    pub fn with_defaults() -> Self {
        Self::new(PlannerConfig::default())
    }

    /// The layer's configuration.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Decompose an intent into a dependency graph.
    ///
    /// Template dispatch by intent type; steps are chained in ascending
    /// priority order so each depends on the previous. With validation
    /// enabled, graphs over the task cap are rejected and replaced by an
    /// empty graph.
    pub fn decompose(&self, intent: &Intent) -> DecompositionResult {
        let template = match intent.parsed_type {
            IntentType::Create => CREATE_TEMPLATE,
            IntentType::Fix => FIX_TEMPLATE,
            IntentType::Review => REVIEW_TEMPLATE,
            _ => FALLBACK_TEMPLATE,
        };

        let mut graph = TaskGraph::new();
        for (i, step) in template.iter().enumerate() {
            let mut node = TaskNode::new(
                step.name,
                step.agent,
                &format!("{}: {}", step.name, intent.raw_input),
            )
            .with_tokens(step.tokens)
            .with_priority(i as u32 + 1);
            node.metadata.intent_id = Some(intent.id);
            // Template graphs never collide on ids.
            let _ = graph.add_node(node);
        }
        for pair in template.windows(2) {
            let _ = graph.add_edge(pair[0].name, pair[1].name);
        }

        if self.config.validation_enabled {
            if graph.len() > self.config.max_tasks_per_graph {
                warn!(
                    tasks = graph.len(),
                    cap = self.config.max_tasks_per_graph,
                    "decomposition rejected"
                );
                return DecompositionResult {
                    graph: TaskGraph::new(),
                    architecture_validated: false,
                    validation_errors: vec![format!(
                        "Too many tasks: {} exceeds limit of {}",
                        graph.len(),
                        self.config.max_tasks_per_graph
                    )],
                    replan_count: 0,
                };
            }
            let cycles = self.detect_circular_dependencies(&graph);
            if !cycles.is_empty() {
                return DecompositionResult {
                    graph,
                    architecture_validated: false,
                    validation_errors: vec![format!(
                        "Circular dependencies detected: {} cycle(s)",
                        cycles.len()
                    )],
                    replan_count: 0,
                };
            }
        }

        self.finish_graph(&mut graph);
        debug!(
            intent = %intent.id.short(),
            tasks = graph.len(),
            tokens = graph.estimated_total_tokens,
            "decomposed intent"
        );

        DecompositionResult {
            graph,
            architecture_validated: true,
            validation_errors: Vec::new(),
            replan_count: 0,
        }
    }

    /// Recompute derived graph fields: totals, critical path, groups.
    fn finish_graph(&self, graph: &mut TaskGraph) {
        graph.recompute_totals();
        graph.critical_path = self.critical_path(graph);
        graph.parallel_groups = self.parallel_groups(graph);
    }

    /// Enumerate every distinct cycle in the graph as an ordered list of
    /// node ids. Empty and singleton graphs (without self-loops) yield
    /// no cycles.
    pub fn detect_circular_dependencies(&self, graph: &TaskGraph) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let index = graph.index();
        let mut colors: HashMap<NodeIndex, Color> =
            index.node_indices().map(|i| (i, Color::White)).collect();
        let mut cycles = Vec::new();
        let mut seen = HashSet::new();

        fn visit(
            graph: &TaskGraph,
            index: &crate::core::graph::GraphIndex,
            node: NodeIndex,
            colors: &mut HashMap<NodeIndex, Color>,
            stack: &mut Vec<NodeIndex>,
            cycles: &mut Vec<Vec<String>>,
            seen: &mut HashSet<String>,
        ) {
            colors.insert(node, Color::Gray);
            stack.push(node);
            for next in index.dependents(node) {
                match colors[&next] {
                    Color::Gray => {
                        // Back edge: the cycle is the stack from `next` on.
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        let cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|n| graph.nodes[index.position(*n)].id.clone())
                            .collect();
                        let key = normalize_cycle(&cycle);
                        if seen.insert(key) {
                            cycles.push(cycle);
                        }
                    }
                    Color::White => {
                        visit(graph, index, next, colors, stack, cycles, seen);
                    }
                    Color::Black => {}
                }
            }
            stack.pop();
            colors.insert(node, Color::Black);
        }

        let nodes: Vec<NodeIndex> = index.node_indices().collect();
        for node in nodes {
            if colors[&node] == Color::White {
                let mut stack = Vec::new();
                visit(
                    graph, &index, node, &mut colors, &mut stack, &mut cycles, &mut seen,
                );
            }
        }
        cycles
    }

    /// Tasks that are pending and whose dependencies are all completed.
    pub fn get_ready_tasks<'a>(&self, graph: &'a TaskGraph) -> Vec<&'a TaskNode> {
        graph
            .nodes
            .iter()
            .filter(|node| node.status == TaskStatus::Pending)
            .filter(|node| {
                node.dependencies.iter().all(|dep| {
                    graph
                        .node(dep)
                        .map(|d| d.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
            })
            .collect()
    }

    /// Topological execution order, ids only.
    ///
    /// Kahn's algorithm over in-degrees; among simultaneously available
    /// nodes the one with the lowest priority value goes first.
    pub fn get_execution_order(&self, graph: &TaskGraph) -> Vec<String> {
        let index = graph.index();
        let mut in_degree: HashMap<NodeIndex, usize> = index
            .node_indices()
            .map(|i| (i, index.in_degree(i)))
            .collect();

        // Min-heap on (priority, node store position) via Reverse.
        let mut available: BinaryHeap<std::cmp::Reverse<(u32, usize)>> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| {
                let pos = index.position(*i);
                std::cmp::Reverse((graph.nodes[pos].priority, pos))
            })
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(std::cmp::Reverse((_, pos))) = available.pop() {
            let id = graph.nodes[pos].id.clone();
            let idx = match index.node_index(&id) {
                Some(idx) => idx,
                None => continue,
            };
            order.push(id);
            for next in index.dependents(idx) {
                let d = in_degree.entry(next).or_insert(0);
                *d = d.saturating_sub(1);
                if *d == 0 {
                    let next_pos = index.position(next);
                    available.push(std::cmp::Reverse((graph.nodes[next_pos].priority, next_pos)));
                }
            }
        }
        order
    }

    /// Longest token-weighted path through the graph.
    ///
    /// Dynamic programming over the topological order with distances
    /// keyed by cumulative estimated tokens; ties prefer the predecessor
    /// with the larger upstream distance. Returns an ordered list of
    /// node ids; empty for cyclic or empty graphs.
    pub fn critical_path(&self, graph: &TaskGraph) -> Vec<String> {
        let order = self.get_execution_order(graph);
        if order.len() != graph.len() {
            // Cycle: no full topological order exists.
            return Vec::new();
        }

        let mut dist: HashMap<&str, u64> = HashMap::new();
        let mut pred: HashMap<&str, &str> = HashMap::new();

        for id in &order {
            let node = match graph.node(id) {
                Some(n) => n,
                None => continue,
            };
            // Heaviest upstream distance wins; the first dependency wins
            // ties.
            let mut best: Option<(u64, &str)> = None;
            for dep in &node.dependencies {
                if let Some(dep_node) = graph.node(dep) {
                    let d = *dist.get(dep_node.id.as_str()).unwrap_or(&0);
                    if best.map_or(true, |(b, _)| d > b) {
                        best = Some((d, dep_node.id.as_str()));
                    }
                }
            }
            let upstream = best.map(|(d, _)| d).unwrap_or(0);
            dist.insert(&node.id, upstream + node.estimated_tokens as u64);
            if let Some((_, p)) = best {
                pred.insert(&node.id, p);
            }
        }

        // End of the critical path: the largest cumulative distance,
        // first in topological order on ties.
        let mut end: Option<&str> = None;
        let mut end_dist = 0u64;
        for id in &order {
            let d = *dist.get(id.as_str()).unwrap_or(&0);
            if d > end_dist {
                end_dist = d;
                end = Some(id.as_str());
            }
        }

        let mut path = Vec::new();
        let mut cursor = end;
        while let Some(id) = cursor {
            path.push(id.to_string());
            cursor = pred.get(id).copied();
        }
        path.reverse();
        path
    }

    /// Collect isolated nodes (no incoming or outgoing edges) into a
    /// single parallel group when at least two exist.
    ///
    /// Returns nothing when the feature is disabled in config.
    pub fn parallel_groups(&self, graph: &TaskGraph) -> Vec<Vec<String>> {
        if !self.config.parallel_group_detection {
            return Vec::new();
        }
        let index = graph.index();
        let isolated: Vec<String> = index
            .node_indices()
            .filter(|i| index.in_degree(*i) == 0 && index.out_degree(*i) == 0)
            .map(|i| graph.nodes[index.position(i)].id.clone())
            .collect();
        if isolated.len() >= 2 {
            vec![isolated]
        } else {
            Vec::new()
        }
    }

    /// Replan a graph after a task failure.
    ///
    /// Marks the failed node, and — when the error text indicates a
    /// token-limit or timeout failure and the task has not been split
    /// before — splits it into smaller parts wired into the failed
    /// task's place. Once the replan budget is exhausted the graph is
    /// returned unchanged with a validation error.
    pub fn replan(
        &self,
        previous: &DecompositionResult,
        failed_task_id: &str,
        error: &str,
    ) -> DecompositionResult {
        if previous.replan_count >= self.config.max_replan_attempts {
            let mut errors = previous.validation_errors.clone();
            errors.push(format!(
                "Max replan attempts ({}) reached",
                self.config.max_replan_attempts
            ));
            return DecompositionResult {
                graph: previous.graph.clone(),
                architecture_validated: false,
                validation_errors: errors,
                replan_count: previous.replan_count,
            };
        }

        let mut graph = match previous.graph.with_status(failed_task_id, TaskStatus::Failed) {
            Ok(g) => g,
            Err(e) => {
                let mut errors = previous.validation_errors.clone();
                errors.push(e.to_string());
                return DecompositionResult {
                    graph: previous.graph.clone(),
                    architecture_validated: false,
                    validation_errors: errors,
                    replan_count: previous.replan_count,
                };
            }
        };

        let lower = error.to_lowercase();
        let splittable = SPLITTABLE_ERRORS.iter().any(|frag| lower.contains(frag));
        if splittable && !self.already_split(&graph, failed_task_id) {
            self.split_task(&mut graph, failed_task_id);
        }

        self.finish_graph(&mut graph);
        debug!(
            failed = failed_task_id,
            replan = previous.replan_count + 1,
            "replanned graph"
        );

        DecompositionResult {
            graph,
            architecture_validated: previous.architecture_validated,
            validation_errors: previous.validation_errors.clone(),
            replan_count: previous.replan_count + 1,
        }
    }

    /// Whether a task has already been split, or is itself a split part.
    fn already_split(&self, graph: &TaskGraph, task_id: &str) -> bool {
        if graph
            .node(task_id)
            .and_then(|n| n.metadata.split_from.as_ref())
            .is_some()
        {
            return true;
        }
        graph
            .nodes
            .iter()
            .any(|n| n.metadata.split_from.as_deref() == Some(task_id))
    }

    /// Split a failed task into `SPLIT_PARTS` subtasks taking over its
    /// position in the dependency structure.
    fn split_task(&self, graph: &mut TaskGraph, task_id: &str) {
        let original = match graph.node(task_id) {
            Some(n) => n.clone(),
            None => return,
        };

        let part_ids: Vec<String> = (1..=SPLIT_PARTS)
            .map(|k| format!("{}-part-{}", task_id, k))
            .collect();

        for (k, part_id) in part_ids.iter().enumerate() {
            let mut part = TaskNode::new(
                part_id,
                &original.agent,
                &format!("{} (part {} of {})", original.description, k + 1, SPLIT_PARTS),
            )
            .with_tokens(original.estimated_tokens / SPLIT_PARTS)
            .with_priority(original.priority);
            part.dependencies = original.dependencies.clone();
            part.metadata = original.metadata.clone();
            part.metadata.split_from = Some(task_id.to_string());
            part.metadata.part_index = Some(k as u32 + 1);
            // Ids are derived from a node already unique in this graph.
            let _ = graph.add_node(part);
        }

        // Parts inherit the original's incoming edges.
        let incoming: Vec<String> = original.dependencies.clone();
        for dep in &incoming {
            for part_id in &part_ids {
                let _ = graph.add_edge(dep, part_id);
            }
        }

        // Dependents of the failed task now wait on every part instead.
        let dependents: Vec<String> = graph
            .nodes
            .iter()
            .filter(|n| n.dependencies.iter().any(|d| d == task_id))
            .filter(|n| !part_ids.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();
        graph
            .edges
            .retain(|e| !(e.from == task_id && dependents.contains(&e.to)));
        for dependent in &dependents {
            if let Some(node) = graph.nodes.iter_mut().find(|n| n.id == *dependent) {
                node.dependencies.retain(|d| d != task_id);
            }
            for part_id in &part_ids {
                let _ = graph.add_edge(part_id, dependent);
            }
        }
    }
}

/// Canonical form of a cycle for dedup: rotated to start at the
/// lexicographically smallest id.
fn normalize_cycle(cycle: &[String]) -> String {
    if cycle.is_empty() {
        return String::new();
    }
    let min_pos = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated: Vec<&str> = Vec::with_capacity(cycle.len());
    for i in 0..cycle.len() {
        rotated.push(&cycle[(min_pos + i) % cycle.len()]);
    }
    rotated.join("->")
}
