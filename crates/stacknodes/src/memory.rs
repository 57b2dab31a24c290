use async_trait::async_trait;
use stackcore::{CollaboratorError, Retriever, StackError};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// In-process passage store ranked by query term overlap.
///
/// Stands in for a vector database when passages are small and
/// pre-chunked, e.g. local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryRetriever {
    collections: HashMap<String, Vec<String>>,
}

impl MemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        passages: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.collections
            .insert(name.into(), passages.into_iter().map(Into::into).collect());
        self
    }

    /// Load `{"collection": ["passage", ...], ...}` from disk.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, StackError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let collections: HashMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.as_ref().display(),
            collections = collections.len(),
            "Loaded passages"
        );
        Ok(Self { collections })
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Retriever for MemoryRetriever {
    async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<String>, CollaboratorError> {
        let passages = self
            .collections
            .get(collection)
            .ok_or_else(|| CollaboratorError::UnknownCollection(collection.to_string()))?;

        let wanted = terms(text);
        let mut scored: Vec<(usize, &String)> = passages
            .iter()
            .map(|p| (terms(p).intersection(&wanted).count(), p))
            .filter(|(score, _)| *score > 0)
            .collect();

        // stable: ties keep insertion order
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, p)| p.clone())
            .collect())
    }
}
