// Graphs as the visual editor submits them.

use stackcore::{Graph, GraphError, GraphSpec, NodeConfig, NodeKind, OutputFormat};

const PAYLOAD: &str = r#"{
    "nodes": [
        { "id": "userQuery-1", "type": "userQuery", "position": { "x": 0, "y": 0 },
          "data": { "label": "User Query" } },
        { "id": "knowledgeBase-2", "type": "knowledgeBase", "position": { "x": 200, "y": 0 },
          "data": { "label": "Docs", "embeddingModel": "openai", "topK": 3,
                    "collectionName": "docs", "apiKey": "sk-kb" } },
        { "id": "llmEngine-3", "type": "llmEngine", "position": { "x": 400, "y": 0 },
          "data": { "label": "LLM", "model": "google/gemini-pro", "temperature": 0.2,
                    "maxTokens": 256, "prompt": "{{context}}\n{{query}}",
                    "enableWebSearch": true } },
        { "id": "output-4", "type": "output", "position": { "x": 600, "y": 0 },
          "data": { "label": "Output", "outputType": "text" } }
    ],
    "edges": [
        { "id": "e1", "source": "userQuery-1", "target": "knowledgeBase-2" },
        { "id": "e2", "source": "knowledgeBase-2", "target": "llmEngine-3" },
        { "id": "e3", "source": "llmEngine-3", "target": "output-4" }
    ]
}"#;

#[test]
fn test_editor_payload_builds_snapshot() {
    let spec: GraphSpec = serde_json::from_str(PAYLOAD).expect("payload should parse");
    let graph = Graph::try_from(spec).expect("payload should form a graph");

    for kind in NodeKind::ALL {
        assert_eq!(graph.count_kind(kind), 1, "one {} node expected", kind);
    }
    assert_eq!(graph.edges_from("knowledgeBase-2").len(), 1);
    assert_eq!(graph.edges_to("llmEngine-3").len(), 1);

    let Some(NodeConfig::LlmEngine(llm)) = graph.node("llmEngine-3").map(|n| &n.config) else {
        panic!("llm node missing");
    };
    assert_eq!(llm.model, "google/gemini-pro");
    assert_eq!(llm.max_tokens.get(), 256);
    assert!(llm.enable_web_search);

    let Some(NodeConfig::Output(out)) = graph.node("output-4").map(|n| &n.config) else {
        panic!("output node missing");
    };
    assert_eq!(out.output_type, OutputFormat::Text);
}

#[test]
fn test_dangling_edge_rejected_at_construction() {
    let mut spec: GraphSpec = serde_json::from_str(PAYLOAD).unwrap();
    spec.connect("output-4", "ghost");

    let err = Graph::try_from(spec).unwrap_err();
    assert!(matches!(err, GraphError::DanglingEdge { .. }));
}

#[test]
fn test_snapshot_round_trips_to_spec() {
    let spec: GraphSpec = serde_json::from_str(PAYLOAD).unwrap();
    let graph = Graph::try_from(spec.clone()).unwrap();
    assert_eq!(GraphSpec::from(&graph), spec);
}
