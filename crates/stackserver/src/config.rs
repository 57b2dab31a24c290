use clap::Parser;
use stacknodes::{GeneratorConfig, SearchConfig, OPENROUTER_BASE_URL, SERPAPI_ENDPOINT};
use stackruntime::RuntimeConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Server settings, read from flags or the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "stackserver", about = "Stack engine HTTP server", long_about = None)]
pub struct Settings {
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:3000")]
    pub bind_address: String,

    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: Option<String>,

    #[arg(long, env = "OPENROUTER_BASE_URL", default_value = OPENROUTER_BASE_URL)]
    pub openrouter_base_url: String,

    #[arg(long, env = "MAX_TOKENS_CAP", default_value_t = stackcore::DEFAULT_MAX_TOKENS)]
    pub max_tokens_cap: u32,

    #[arg(long, env = "SERPAPI_KEY", hide_env_values = true)]
    pub serpapi_key: Option<String>,

    #[arg(long, env = "SERPAPI_ENDPOINT", default_value = SERPAPI_ENDPOINT)]
    pub serpapi_endpoint: String,

    /// Comma separated or a JSON list. Empty allows any origin.
    #[arg(long, env = "CORS_ORIGINS", default_value = "")]
    pub cors_origins: String,

    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    pub run_timeout_secs: Option<u64>,

    #[arg(long, env = "SEARCH_RESULTS", default_value_t = 5)]
    pub search_results: usize,

    /// JSON map of collection name to passages for the in-memory retriever.
    #[arg(long, env = "PASSAGES_FILE")]
    pub passages_file: Option<PathBuf>,
}

impl Settings {
    pub fn cors_origins(&self) -> Vec<String> {
        let raw = self.cors_origins.trim();
        if raw.starts_with('[') && raw.ends_with(']') {
            if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
                return list;
            }
        }
        raw.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
            search_results: self.search_results,
            ..RuntimeConfig::default()
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            base_url: self.openrouter_base_url.clone(),
            api_key: self.openrouter_api_key.clone(),
            max_tokens_cap: self.max_tokens_cap,
            ..GeneratorConfig::default()
        }
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            endpoint: self.serpapi_endpoint.clone(),
            api_key: self.serpapi_key.clone(),
        }
    }
}
