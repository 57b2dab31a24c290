use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use stackcore::{Graph, Node, NodeKind, StageDescriptor, ValidationError};
use std::collections::{HashMap, HashSet};

/// Kinds a pipeline cannot run without.
const REQUIRED: [NodeKind; 3] = [NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output];

/// Resolved, ordered pipeline for one graph snapshot.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    graph: Graph,
    stages: Vec<StageDescriptor>,
    excluded: Vec<String>,
}

impl ExecutionPlan {
    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<NodeKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    /// Nodes present in the graph but left out of the pipeline.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node(&self, stage: &StageDescriptor) -> Option<&Node> {
        self.graph.node(&stage.node_id)
    }
}

/// Derive the unique execution order of `graph`.
///
/// Generation connectivity is mandatory; a knowledge base that is not on the
/// path from the query to the LLM engine is dropped rather than rejected.
pub fn resolve(graph: &Graph) -> Result<ExecutionPlan, ValidationError> {
    for kind in REQUIRED {
        if graph.count_kind(kind) == 0 {
            return Err(ValidationError::MissingComponent { kind });
        }
    }
    for kind in NodeKind::ALL {
        if graph.count_kind(kind) > 1 {
            return Err(ValidationError::DuplicateComponent { kind });
        }
    }

    let query = single(graph, NodeKind::UserQuery)?;
    let llm = single(graph, NodeKind::LlmEngine)?;
    let output = single(graph, NodeKind::Output)?;
    let knowledge = graph.nodes_of_kind(NodeKind::KnowledgeBase).next();

    if graph.edges_to(&llm.id).is_empty() {
        return Err(ValidationError::MissingEdge("input to LLMEngine"));
    }
    if !graph.edges_from(&llm.id).iter().any(|e| e.target == output.id) {
        return Err(ValidationError::MissingEdge("LLMEngine to Output"));
    }

    let (dag, index) = build_graph(graph);
    let ix = |node: &Node| index[node.id.as_str()];

    let mut active: HashSet<NodeIndex> = [ix(query), ix(llm), ix(output)].into();
    let mut excluded = Vec::new();
    if let Some(kb) = knowledge {
        let on_path = has_path_connecting(&dag, ix(query), ix(kb), None)
            && has_path_connecting(&dag, ix(kb), ix(llm), None);
        if on_path {
            active.insert(ix(kb));
        } else {
            tracing::warn!(
                node_id = %kb.id,
                "Knowledge base is not connected between User Query and LLM Engine; skipping it"
            );
            excluded.push(kb.id.clone());
        }
    }

    let linked = |node: NodeIndex, dir: Direction| -> Vec<NodeIndex> {
        dag.neighbors_directed(node, dir)
            .filter(|n| active.contains(n))
            .collect()
    };
    let describe = |node: NodeIndex| {
        let id = dag[node];
        let kind = graph.node(id).map(|n| n.kind().to_string()).unwrap_or_default();
        format!("{kind} '{id}'")
    };

    let mut order = vec![ix(query)];
    let mut visited = HashSet::from([ix(query)]);
    let mut current = ix(query);
    loop {
        if linked(current, Direction::Incoming).len() > 1 {
            return Err(ValidationError::AmbiguousTopology(format!(
                "{} has more than one input",
                describe(current)
            )));
        }
        let next = linked(current, Direction::Outgoing);
        match next.as_slice() {
            [] => break,
            [n] => {
                if !visited.insert(*n) {
                    return Err(ValidationError::AmbiguousTopology(format!(
                        "cycle through {}",
                        describe(*n)
                    )));
                }
                order.push(*n);
                current = *n;
            }
            _ => {
                return Err(ValidationError::AmbiguousTopology(format!(
                    "{} has more than one output",
                    describe(current)
                )))
            }
        }
    }

    if !visited.contains(&ix(llm)) {
        return Err(ValidationError::MissingEdge("path from UserQuery to LLMEngine"));
    }

    let stages = order
        .into_iter()
        .filter_map(|n| graph.node(dag[n]))
        .map(|node| StageDescriptor::new(node.id.clone(), node.kind()))
        .collect();

    Ok(ExecutionPlan {
        graph: graph.clone(),
        stages,
        excluded,
    })
}

fn single(graph: &Graph, kind: NodeKind) -> Result<&Node, ValidationError> {
    graph
        .nodes_of_kind(kind)
        .next()
        .ok_or(ValidationError::MissingComponent { kind })
}

/// Build a deduplicated dependency graph from the snapshot
fn build_graph(graph: &Graph) -> (DiGraph<&str, ()>, HashMap<&str, NodeIndex>) {
    let mut dag = DiGraph::new();
    let mut index = HashMap::new();

    for node in graph.nodes() {
        let idx = dag.add_node(node.id.as_str());
        index.insert(node.id.as_str(), idx);
    }

    // Snapshot construction already rejected dangling edges.
    for (source, target) in graph.distinct_edges() {
        if let (Some(&from), Some(&to)) = (index.get(source), index.get(target)) {
            dag.update_edge(from, to, ());
        }
    }

    (dag, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackcore::{GraphSpec, LlmEngineConfig};

    fn spec(nodes: &[(&str, NodeKind)], edges: &[(&str, &str)]) -> GraphSpec {
        let mut spec = GraphSpec::new();
        for (id, kind) in nodes {
            let node = match kind {
                NodeKind::UserQuery => Node::user_query(*id),
                NodeKind::KnowledgeBase => Node::knowledge_base(*id, "docs"),
                NodeKind::LlmEngine => Node::llm_engine(*id, LlmEngineConfig::default()),
                NodeKind::Output => Node::output(*id),
            };
            spec.add_node(node);
        }
        for (source, target) in edges {
            spec.connect(*source, *target);
        }
        spec
    }

    fn resolve_spec(spec: GraphSpec) -> Result<ExecutionPlan, ValidationError> {
        resolve(&Graph::try_from(spec).unwrap())
    }

    const Q: (&str, NodeKind) = ("q", NodeKind::UserQuery);
    const KB: (&str, NodeKind) = ("kb", NodeKind::KnowledgeBase);
    const LLM: (&str, NodeKind) = ("llm", NodeKind::LlmEngine);
    const OUT: (&str, NodeKind) = ("out", NodeKind::Output);

    #[test]
    fn test_minimal_pipeline() {
        let plan = resolve_spec(spec(&[Q, LLM, OUT], &[("q", "llm"), ("llm", "out")])).unwrap();
        assert_eq!(
            plan.kinds(),
            vec![NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]
        );
        assert!(plan.excluded().is_empty());
    }

    #[test]
    fn test_pipeline_with_knowledge_base() {
        let plan = resolve_spec(spec(
            &[OUT, LLM, KB, Q],
            &[("kb", "llm"), ("q", "kb"), ("llm", "out")],
        ))
        .unwrap();
        assert_eq!(
            plan.kinds(),
            vec![
                NodeKind::UserQuery,
                NodeKind::KnowledgeBase,
                NodeKind::LlmEngine,
                NodeKind::Output
            ]
        );
        assert_eq!(plan.stages()[1].node_id, "kb");
    }

    #[test]
    fn test_missing_components_are_named() {
        let cases = [
            (spec(&[LLM, OUT], &[("llm", "out")]), NodeKind::UserQuery),
            (spec(&[Q, OUT], &[("q", "out")]), NodeKind::LlmEngine),
            (spec(&[Q, LLM], &[("q", "llm")]), NodeKind::Output),
        ];
        for (graph, kind) in cases {
            assert_eq!(
                resolve_spec(graph).unwrap_err(),
                ValidationError::MissingComponent { kind }
            );
        }
    }

    #[test]
    fn test_missing_takes_precedence_over_duplicate() {
        let graph = spec(&[Q, LLM, ("llm2", NodeKind::LlmEngine)], &[("q", "llm")]);
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::MissingComponent {
                kind: NodeKind::Output
            }
        );
    }

    #[test]
    fn test_duplicate_llm_engine() {
        let graph = spec(
            &[Q, LLM, ("llm2", NodeKind::LlmEngine), OUT],
            &[("q", "llm"), ("llm", "out")],
        );
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::DuplicateComponent {
                kind: NodeKind::LlmEngine
            }
        );
    }

    #[test]
    fn test_duplicate_knowledge_base() {
        let graph = spec(
            &[Q, KB, ("kb2", NodeKind::KnowledgeBase), LLM, OUT],
            &[("q", "kb"), ("kb", "llm"), ("llm", "out")],
        );
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::DuplicateComponent {
                kind: NodeKind::KnowledgeBase
            }
        );
    }

    #[test]
    fn test_no_edge_into_llm() {
        let graph = spec(&[Q, LLM, OUT], &[("llm", "out")]);
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::MissingEdge("input to LLMEngine")
        );
    }

    #[test]
    fn test_no_edge_from_llm_to_output() {
        let graph = spec(&[Q, LLM, OUT], &[("q", "llm")]);
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::MissingEdge("LLMEngine to Output")
        );
    }

    #[test]
    fn test_disconnected_knowledge_base_is_dropped() {
        let plan = resolve_spec(spec(
            &[Q, KB, LLM, OUT],
            &[("q", "llm"), ("llm", "out")],
        ))
        .unwrap();
        assert_eq!(
            plan.kinds(),
            vec![NodeKind::UserQuery, NodeKind::LlmEngine, NodeKind::Output]
        );
        assert_eq!(plan.excluded(), ["kb".to_string()]);
    }

    #[test]
    fn test_knowledge_base_feeding_llm_without_query_is_dropped() {
        // kb -> llm exists, but kb is not reachable from the query.
        let plan = resolve_spec(spec(
            &[Q, KB, LLM, OUT],
            &[("q", "llm"), ("kb", "llm"), ("llm", "out")],
        ))
        .unwrap();
        assert_eq!(plan.stages().len(), 3);
        assert_eq!(plan.excluded(), ["kb".to_string()]);
    }

    #[test]
    fn test_llm_only_fed_by_dropped_knowledge_base() {
        let graph = spec(&[Q, KB, LLM, OUT], &[("kb", "llm"), ("llm", "out")]);
        assert_eq!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::MissingEdge("path from UserQuery to LLMEngine")
        );
    }

    #[test]
    fn test_branching_out_is_ambiguous() {
        let graph = spec(
            &[Q, KB, LLM, OUT],
            &[("q", "kb"), ("q", "llm"), ("kb", "llm"), ("llm", "out")],
        );
        assert!(matches!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::AmbiguousTopology(_)
        ));
    }

    #[test]
    fn test_branching_in_is_ambiguous() {
        let graph = spec(&[Q, LLM, OUT], &[("q", "llm"), ("q", "out"), ("llm", "out")]);
        assert!(matches!(
            resolve_spec(graph).unwrap_err(),
            ValidationError::AmbiguousTopology(_)
        ));
    }

    #[test]
    fn test_cycle_is_ambiguous() {
        let graph = spec(
            &[Q, LLM, OUT],
            &[("q", "llm"), ("llm", "out"), ("out", "q")],
        );
        let err = resolve_spec(graph).unwrap_err();
        assert!(
            matches!(&err, ValidationError::AmbiguousTopology(msg) if msg.contains("cycle")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_duplicate_edges_are_tolerated() {
        let plan = resolve_spec(spec(
            &[Q, LLM, OUT],
            &[("q", "llm"), ("q", "llm"), ("llm", "out"), ("llm", "out")],
        ))
        .unwrap();
        assert_eq!(plan.stages().len(), 3);
    }
}
