use async_trait::async_trait;
use serde::Deserialize;
use stackcore::{CollaboratorError, Searcher};

pub const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search";
const NO_RESULTS: &str = "No web search results found.";

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    /// Used when the stage supplies no key.
    pub api_key: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: SERPAPI_ENDPOINT.to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<SearchResult>,
}

/// Render results as a numbered block suitable for a prompt's context.
pub fn format_findings(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_RESULTS.to_string();
    }

    let mut lines = vec!["Web Search Results:\n".to_string()];
    for (i, result) in results.iter().enumerate() {
        lines.push(format!("{}. {}", i + 1, result.title));
        lines.push(format!("   URL: {}", result.link));
        lines.push(format!("   {}\n", result.snippet));
    }
    lines.join("\n")
}

/// Google results through SerpAPI.
pub struct SerpApiSearcher {
    http: reqwest::Client,
    config: SearchConfig,
}

impl SerpApiSearcher {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Searcher for SerpApiSearcher {
    async fn search(
        &self,
        query: &str,
        credential: Option<&str>,
        num_results: usize,
    ) -> Result<String, CollaboratorError> {
        let api_key = credential
            .or(self.config.api_key.as_deref())
            .filter(|key| !key.is_empty())
            .ok_or(CollaboratorError::MissingCredential("web search"))?;

        let num = num_results.to_string();
        let response = self
            .http
            .get(&self.config.endpoint)
            .query(&[
                ("q", query),
                ("api_key", api_key),
                ("engine", "google"),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CollaboratorError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Response(e.to_string()))?;

        let mut results = body.organic_results;
        results.truncate(num_results);
        tracing::debug!(results = results.len(), "Web search finished");
        Ok(format_findings(&results))
    }
}
