use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackcore::{Edge, GraphSpec, Node, StoreError};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const UNTITLED_STACK: &str = "Untitled Stack";

/// A saved workflow plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackRecord {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StackRecord {
    pub fn graph(&self) -> GraphSpec {
        GraphSpec {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
        }
    }
}

/// Body of a create request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub nodes: Option<Vec<Node>>,
    pub edges: Option<Vec<Edge>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub stack_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Persistence for saved stacks and their chat history.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn list(&self) -> Result<Vec<StackRecord>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<StackRecord, StoreError>;

    async fn create(&self, draft: StackDraft) -> Result<StackRecord, StoreError>;

    async fn update(&self, id: Uuid, update: StackUpdate) -> Result<StackRecord, StoreError>;

    /// Removes the stack together with its history.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn append_message(
        &self,
        stack_id: Uuid,
        role: Role,
        content: String,
    ) -> Result<ChatMessage, StoreError>;

    /// Most recent `limit` messages, oldest first.
    async fn history(&self, stack_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    async fn clear_history(&self, stack_id: Uuid) -> Result<usize, StoreError>;
}

#[derive(Default)]
struct Tables {
    stacks: HashMap<Uuid, StackRecord>,
    messages: HashMap<Uuid, Vec<ChatMessage>>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: Uuid) -> StoreError {
    StoreError::NotFound(id.to_string())
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn list(&self) -> Result<Vec<StackRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut stacks: Vec<_> = tables.stacks.values().cloned().collect();
        stacks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(stacks)
    }

    async fn get(&self, id: Uuid) -> Result<StackRecord, StoreError> {
        let tables = self.tables.read().await;
        tables.stacks.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn create(&self, draft: StackDraft) -> Result<StackRecord, StoreError> {
        let now = Utc::now();
        let record = StackRecord {
            id: Uuid::new_v4(),
            name: draft
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNTITLED_STACK.to_string()),
            description: draft.description,
            nodes: draft.nodes,
            edges: draft.edges,
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.write().await;
        tables.stacks.insert(record.id, record.clone());
        tracing::debug!(stack_id = %record.id, name = %record.name, "Stack created");
        Ok(record)
    }

    async fn update(&self, id: Uuid, update: StackUpdate) -> Result<StackRecord, StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables.stacks.get_mut(&id).ok_or_else(|| not_found(id))?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(description) = update.description {
            record.description = Some(description);
        }
        if let Some(nodes) = update.nodes {
            record.nodes = nodes;
        }
        if let Some(edges) = update.edges {
            record.edges = edges;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.stacks.remove(&id).ok_or_else(|| not_found(id))?;
        tables.messages.remove(&id);
        tracing::debug!(stack_id = %id, "Stack deleted");
        Ok(())
    }

    async fn append_message(
        &self,
        stack_id: Uuid,
        role: Role,
        content: String,
    ) -> Result<ChatMessage, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.stacks.contains_key(&stack_id) {
            return Err(not_found(stack_id));
        }

        let message = ChatMessage {
            id: Uuid::new_v4(),
            stack_id,
            role,
            content,
            created_at: Utc::now(),
        };
        tables
            .messages
            .entry(stack_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn history(&self, stack_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let tables = self.tables.read().await;
        if !tables.stacks.contains_key(&stack_id) {
            return Err(not_found(stack_id));
        }

        let messages = tables.messages.get(&stack_id).map(Vec::as_slice).unwrap_or(&[]);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }

    async fn clear_history(&self, stack_id: Uuid) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.stacks.contains_key(&stack_id) {
            return Err(not_found(stack_id));
        }
        Ok(tables.messages.remove(&stack_id).map(|m| m.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_defaults_name() {
        let store = MemoryStore::new();
        let record = store.create(StackDraft::default()).await.unwrap();
        assert_eq!(record.name, UNTITLED_STACK);
        assert_eq!(store.get(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_update_keeps_absent_fields() {
        let store = MemoryStore::new();
        let record = store
            .create(StackDraft {
                name: Some("Support bot".into()),
                nodes: vec![Node::user_query("q")],
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = store
            .update(
                record.id,
                StackUpdate {
                    description: Some("answers tickets".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Support bot");
        assert_eq!(updated.nodes.len(), 1);
        assert_eq!(updated.description.as_deref(), Some("answers tickets"));
        assert!(updated.updated_at >= record.updated_at);
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_ordered() {
        let store = MemoryStore::new();
        let id = store.create(StackDraft::default()).await.unwrap().id;
        for i in 0..5 {
            store
                .append_message(id, Role::User, format!("m{i}"))
                .await
                .unwrap();
        }

        let recent = store.history(id, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);

        assert_eq!(store.clear_history(id).await.unwrap(), 5);
        assert!(store.history(id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_history() {
        let store = MemoryStore::new();
        let id = store.create(StackDraft::default()).await.unwrap().id;
        store
            .append_message(id, Role::Assistant, "hello".into())
            .await
            .unwrap();

        store.delete(id).await.unwrap();
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.append_message(id, Role::User, "again".into()).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
