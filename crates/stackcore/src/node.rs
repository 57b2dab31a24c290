use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

pub type NodeId = String;

pub const DEFAULT_MODEL: &str = "anthropic/claude-3.5-sonnet";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_CHUNK_SIZE: u32 = 1000;
pub const DEFAULT_TOP_K: u32 = 5;

/// The four component kinds a stack can be assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    UserQuery,
    KnowledgeBase,
    LlmEngine,
    Output,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::UserQuery,
        NodeKind::KnowledgeBase,
        NodeKind::LlmEngine,
        NodeKind::Output,
    ];

    /// Wire tag used by the editor (`"userQuery"`, `"llmEngine"`, ...).
    pub fn as_tag(&self) -> &'static str {
        match self {
            NodeKind::UserQuery => "userQuery",
            NodeKind::KnowledgeBase => "knowledgeBase",
            NodeKind::LlmEngine => "llmEngine",
            NodeKind::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::UserQuery => "User Query",
            NodeKind::KnowledgeBase => "Knowledge Base",
            NodeKind::LlmEngine => "LLM Engine",
            NodeKind::Output => "Output",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Local,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
}

/// Rendering hint for the caller. The executor never looks at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Chat,
    Text,
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQueryConfig {
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub embedding_model: EmbeddingProvider,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: NonZeroU32,
    #[serde(default = "default_top_k")]
    pub top_k: NonZeroU32,
    /// Collection in the external document store holding this node's passages.
    #[serde(default, alias = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            embedding_model: EmbeddingProvider::default(),
            chunk_size: default_chunk_size(),
            top_k: default_top_k(),
            collection_name: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmEngineConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: NonZeroU32,
    /// Prompt template; may contain `{{context}}` and `{{query}}`.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serp_api_key: Option<String>,
}

impl Default for LlmEngineConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            model: default_model(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: default_max_tokens(),
            prompt: String::new(),
            enable_web_search: false,
            api_key: None,
            serp_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub output_type: OutputFormat,
}

fn default_chunk_size() -> NonZeroU32 {
    NonZeroU32::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU32::MIN)
}

fn default_top_k() -> NonZeroU32 {
    NonZeroU32::new(DEFAULT_TOP_K).unwrap_or(NonZeroU32::MIN)
}

fn default_max_tokens() -> NonZeroU32 {
    NonZeroU32::new(DEFAULT_MAX_TOKENS).unwrap_or(NonZeroU32::MIN)
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

/// Kind-specific node configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    UserQuery(UserQueryConfig),
    KnowledgeBase(KnowledgeBaseConfig),
    LlmEngine(LlmEngineConfig),
    Output(OutputConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::UserQuery(_) => NodeKind::UserQuery,
            NodeConfig::KnowledgeBase(_) => NodeKind::KnowledgeBase,
            NodeConfig::LlmEngine(_) => NodeKind::LlmEngine,
            NodeConfig::Output(_) => NodeKind::Output,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            NodeConfig::UserQuery(c) => &c.label,
            NodeConfig::KnowledgeBase(c) => &c.label,
            NodeConfig::LlmEngine(c) => &c.label,
            NodeConfig::Output(c) => &c.label,
        }
    }
}

/// Node position in the visual editor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// A typed pipeline node.
///
/// On the wire a node is the editor's `{id, type, position, data}` record;
/// the `type` tag selects which config record `data` is parsed into, and an
/// unknown tag is a deserialization error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: NodeId,
    pub config: NodeConfig,
    pub position: Option<Position>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
            position: None,
        }
    }

    pub fn user_query(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeConfig::UserQuery(UserQueryConfig::default()))
    }

    pub fn knowledge_base(id: impl Into<NodeId>, collection: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeConfig::KnowledgeBase(KnowledgeBaseConfig {
                collection_name: Some(collection.into()),
                ..KnowledgeBaseConfig::default()
            }),
        )
    }

    pub fn llm_engine(id: impl Into<NodeId>, config: LlmEngineConfig) -> Self {
        Self::new(id, NodeConfig::LlmEngine(config))
    }

    pub fn output(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeConfig::Output(OutputConfig::default()))
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<RawNode> for Node {
    type Error = serde_json::Error;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let data = match raw.data {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            data => data,
        };
        let config = match raw.kind {
            NodeKind::UserQuery => NodeConfig::UserQuery(serde_json::from_value(data)?),
            NodeKind::KnowledgeBase => NodeConfig::KnowledgeBase(serde_json::from_value(data)?),
            NodeKind::LlmEngine => NodeConfig::LlmEngine(serde_json::from_value(data)?),
            NodeKind::Output => NodeConfig::Output(serde_json::from_value(data)?),
        };
        Ok(Node {
            id: raw.id,
            config,
            position: raw.position,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let kind = node.kind();
        let data = match &node.config {
            NodeConfig::UserQuery(c) => serde_json::to_value(c),
            NodeConfig::KnowledgeBase(c) => serde_json::to_value(c),
            NodeConfig::LlmEngine(c) => serde_json::to_value(c),
            NodeConfig::Output(c) => serde_json::to_value(c),
        }
        .unwrap_or(serde_json::Value::Null);
        RawNode {
            id: node.id,
            kind,
            position: node.position,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_editor_node_parses_into_typed_config() {
        let node: Node = serde_json::from_value(json!({
            "id": "llm-1",
            "type": "llmEngine",
            "position": { "x": 10.0, "y": 20.0 },
            "data": {
                "label": "LLM (OpenAI)",
                "type": "llmEngine",
                "model": "google/gemini-pro",
                "temperature": 0.2,
                "prompt": "Answer {{query}} using {{context}}",
                "enableWebSearch": true,
                "serpApiKey": "serp"
            }
        }))
        .unwrap();

        assert_eq!(node.kind(), NodeKind::LlmEngine);
        let NodeConfig::LlmEngine(config) = &node.config else {
            panic!("expected llm config");
        };
        assert_eq!(config.model, "google/gemini-pro");
        assert_eq!(config.max_tokens.get(), DEFAULT_MAX_TOKENS);
        assert!(config.enable_web_search);
        assert_eq!(config.serp_api_key.as_deref(), Some("serp"));
        assert_eq!(node.position, Some(Position { x: 10.0, y: 20.0 }));
    }

    #[test]
    fn test_knowledge_base_defaults() {
        let node: Node = serde_json::from_value(json!({
            "id": "kb",
            "type": "knowledgeBase",
            "data": { "label": "Docs" }
        }))
        .unwrap();

        let NodeConfig::KnowledgeBase(config) = node.config else {
            panic!("expected knowledge base config");
        };
        assert_eq!(config.chunk_size.get(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.top_k.get(), DEFAULT_TOP_K);
        assert_eq!(config.embedding_model, EmbeddingProvider::Local);
        assert_eq!(config.collection_name, None);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result: Result<Node, _> = serde_json::from_value(json!({
            "id": "x",
            "type": "imageGenerator",
            "data": {}
        }));
        assert!(result.is_err(), "unknown node kinds must not be ignored");
    }

    #[test]
    fn test_zero_top_k_is_rejected() {
        let result: Result<Node, _> = serde_json::from_value(json!({
            "id": "kb",
            "type": "knowledgeBase",
            "data": { "topK": 0 }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_uses_editor_shape() {
        let node = Node::output("out").with_position(1.0, 2.0);
        let value = serde_json::to_value(&node).unwrap();

        assert_eq!(value["type"], "output");
        assert_eq!(value["data"]["outputType"], "chat");

        let back: Node = serde_json::from_value(value).unwrap();
        assert_eq!(back, node);
    }
}
