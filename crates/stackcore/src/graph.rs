use crate::{GraphError, Node, NodeId, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Connection between nodes: output of `source` feeds input of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: NodeId,
    pub target: NodeId,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Raw node/edge collections as submitted by the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) {
        self.edges.push(Edge::new(source, target));
    }
}

/// Immutable snapshot of a stack's graph.
///
/// Cloning is cheap and every clone observes the same nodes and edges; there
/// are no mutation methods, so an in-flight run never sees editor changes.
#[derive(Debug, Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

#[derive(Debug)]
struct GraphInner {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<NodeId, usize>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    incoming: HashMap<NodeId, Vec<usize>>,
}

impl Graph {
    /// Build a snapshot, rejecting duplicate node ids and edges that reference unknown nodes.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateNodeId(node.id.clone()));
            }
        }

        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            for end in [&edge.source, &edge.target] {
                if !index.contains_key(end) {
                    return Err(GraphError::DanglingEdge {
                        source_id: edge.source.clone(),
                        target_id: edge.target.clone(),
                        missing: end.clone(),
                    });
                }
            }
            outgoing.entry(edge.source.clone()).or_default().push(i);
            incoming.entry(edge.target.clone()).or_default().push(i);
        }

        tracing::trace!(nodes = nodes.len(), edges = edges.len(), "Graph snapshot built");

        Ok(Self {
            inner: Arc::new(GraphInner {
                nodes,
                edges,
                index,
                outgoing,
                incoming,
            }),
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.inner.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.inner.edges
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.inner.index.get(id).map(|&i| &self.inner.nodes[i])
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> impl Iterator<Item = &Node> + '_ {
        self.inner.nodes.iter().filter(move |n| n.kind() == kind)
    }

    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes_of_kind(kind).count()
    }

    pub fn edges_from(&self, id: &str) -> Vec<&Edge> {
        self.edge_refs(self.inner.outgoing.get(id))
    }

    pub fn edges_to(&self, id: &str) -> Vec<&Edge> {
        self.edge_refs(self.inner.incoming.get(id))
    }

    /// Distinct `(source, target)` pairs, in first-seen order.
    pub fn distinct_edges(&self) -> Vec<(&str, &str)> {
        let mut seen = HashSet::new();
        self.inner
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .filter(|pair| seen.insert(*pair))
            .collect()
    }

    fn edge_refs(&self, indices: Option<&Vec<usize>>) -> Vec<&Edge> {
        indices
            .map(|ix| ix.iter().map(|&i| &self.inner.edges[i]).collect())
            .unwrap_or_default()
    }
}

impl TryFrom<GraphSpec> for Graph {
    type Error = GraphError;

    fn try_from(spec: GraphSpec) -> Result<Self, Self::Error> {
        Graph::new(spec.nodes, spec.edges)
    }
}

impl From<&Graph> for GraphSpec {
    fn from(graph: &Graph) -> Self {
        GraphSpec {
            nodes: graph.nodes().to_vec(),
            edges: graph.edges().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmEngineConfig;

    fn linear() -> GraphSpec {
        let mut spec = GraphSpec::new();
        spec.add_node(Node::user_query("q"));
        spec.add_node(Node::llm_engine("llm", LlmEngineConfig::default()));
        spec.add_node(Node::output("out"));
        spec.connect("q", "llm");
        spec.connect("llm", "out");
        spec
    }

    #[test]
    fn test_queries() {
        let graph = Graph::try_from(linear()).unwrap();

        assert_eq!(graph.count_kind(NodeKind::LlmEngine), 1);
        assert_eq!(graph.count_kind(NodeKind::KnowledgeBase), 0);
        assert_eq!(graph.node("llm").map(|n| n.kind()), Some(NodeKind::LlmEngine));
        assert!(graph.node("missing").is_none());
        assert_eq!(graph.edges_from("q").len(), 1);
        assert_eq!(graph.edges_to("out")[0].source, "llm");
        assert!(graph.edges_from("out").is_empty());
    }

    #[test]
    fn test_dangling_edge_is_malformed() {
        let mut spec = linear();
        spec.connect("llm", "ghost");

        let err = Graph::try_from(spec).unwrap_err();
        assert_eq!(
            err,
            GraphError::DanglingEdge {
                source_id: "llm".into(),
                target_id: "ghost".into(),
                missing: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_duplicate_node_id_is_malformed() {
        let mut spec = linear();
        spec.add_node(Node::output("q"));

        assert_eq!(
            Graph::try_from(spec).unwrap_err(),
            GraphError::DuplicateNodeId("q".into())
        );
    }

    #[test]
    fn test_distinct_edges_drops_duplicates() {
        let mut spec = linear();
        spec.connect("q", "llm");

        let graph = Graph::try_from(spec).unwrap();
        assert_eq!(graph.edges().len(), 3);
        assert_eq!(graph.distinct_edges(), vec![("q", "llm"), ("llm", "out")]);
    }

    #[test]
    fn test_clones_share_snapshot() {
        let graph = Graph::try_from(linear()).unwrap();
        let copy = graph.clone();
        assert!(std::ptr::eq(graph.nodes(), copy.nodes()));
    }
}
