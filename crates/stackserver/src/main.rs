mod config;

use actix_cors::Cors;
use actix_web::{delete, get, post, put, web, App, HttpResponse, HttpServer, Responder};
use clap::Parser;
use config::Settings;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use stackcore::{Edge, GraphSpec, Node, StoreError};
use stacknodes::{Collaborators, MemoryRetriever, OpenRouterGenerator, SerpApiSearcher};
use stackruntime::{StackDraft, StackRuntime, StackUpdate, StageRegistry};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state shared across handlers
struct AppState {
    runtime: Arc<StackRuntime>,
}

/// Graph submitted by the editor for validation
#[derive(Debug, Deserialize)]
struct BuildRequest {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// Chat request. Without `nodes` the saved graph of `stackId` is run.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    query: String,
    #[serde(default, alias = "stack_id")]
    stack_id: Option<String>,
    #[serde(default)]
    nodes: Option<Vec<Node>>,
    #[serde(default)]
    edges: Vec<Edge>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(err: StoreError) -> HttpResponse {
    let body = ErrorResponse {
        error: err.to_string(),
    };
    match err {
        StoreError::NotFound(_) => HttpResponse::NotFound().json(body),
        StoreError::InvalidId(_) => HttpResponse::BadRequest().json(body),
    }
}

fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::InvalidId(raw.to_string()))
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stackengine"
    }))
}

#[get("/api/stacks")]
async fn list_stacks(data: web::Data<AppState>) -> HttpResponse {
    match data.runtime.store().list().await {
        Ok(stacks) => HttpResponse::Ok().json(stacks),
        Err(e) => error_response(e),
    }
}

#[post("/api/stacks")]
async fn create_stack(data: web::Data<AppState>, draft: web::Json<StackDraft>) -> HttpResponse {
    match data.runtime.store().create(draft.into_inner()).await {
        Ok(stack) => {
            info!(stack_id = %stack.id, name = %stack.name, "Created stack");
            HttpResponse::Created().json(stack)
        }
        Err(e) => error_response(e),
    }
}

#[get("/api/stacks/{id}")]
async fn get_stack(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let result = match parse_id(&path) {
        Ok(id) => data.runtime.store().get(id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(stack) => HttpResponse::Ok().json(stack),
        Err(e) => error_response(e),
    }
}

#[put("/api/stacks/{id}")]
async fn update_stack(
    data: web::Data<AppState>,
    path: web::Path<String>,
    update: web::Json<StackUpdate>,
) -> HttpResponse {
    let result = match parse_id(&path) {
        Ok(id) => data.runtime.store().update(id, update.into_inner()).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(stack) => HttpResponse::Ok().json(stack),
        Err(e) => error_response(e),
    }
}

#[delete("/api/stacks/{id}")]
async fn delete_stack(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let result = match parse_id(&path) {
        Ok(id) => data.runtime.store().delete(id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            info!(stack_id = %path, "Deleted stack");
            HttpResponse::Ok().json(serde_json::json!({
                "message": "Stack deleted successfully"
            }))
        }
        Err(e) => error_response(e),
    }
}

/// Validate a graph without running it
#[post("/api/execute/build")]
async fn build_stack(data: web::Data<AppState>, req: web::Json<BuildRequest>) -> HttpResponse {
    let req = req.into_inner();
    let report = data.runtime.validate(GraphSpec {
        nodes: req.nodes,
        edges: req.edges,
    });
    HttpResponse::Ok().json(report)
}

/// Run a graph and stream newline-delimited JSON events
#[post("/api/execute/chat")]
async fn chat(data: web::Data<AppState>, req: web::Json<ChatRequest>) -> HttpResponse {
    let req = req.into_inner();
    if req.query.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Query must not be empty".to_string(),
        });
    }

    // history is only kept for well-formed ids
    let stack_id = req.stack_id.as_deref().and_then(|raw| parse_id(raw).ok());

    let spec = match req.nodes {
        Some(nodes) => GraphSpec {
            nodes,
            edges: req.edges,
        },
        None => {
            let saved = match stack_id {
                Some(id) => data.runtime.store().get(id).await,
                None => Err(StoreError::InvalidId(req.stack_id.unwrap_or_default())),
            };
            match saved {
                Ok(stack) => stack.graph(),
                Err(e) => return error_response(e),
            }
        }
    };

    info!(stack_id = ?stack_id, nodes = spec.nodes.len(), "Starting chat run");

    let body = data.runtime.chat(stack_id, spec, req.query).map(|event| {
        serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            web::Bytes::from(line)
        })
    });

    HttpResponse::Ok()
        .content_type("application/x-ndjson")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body)
}

#[get("/api/execute/history/{id}")]
async fn get_history(
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(data.runtime.config().history_limit);
    let result = match parse_id(&path) {
        Ok(id) => data.runtime.store().history(id, limit).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => error_response(e),
    }
}

#[delete("/api/execute/history/{id}")]
async fn clear_history(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let result = match parse_id(&path) {
        Ok(id) => data.runtime.store().clear_history(id).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(removed) => HttpResponse::Ok().json(serde_json::json!({
            "message": "Chat history cleared",
            "removed": removed
        })),
        Err(e) => error_response(e),
    }
}

/// List available stage kinds
#[get("/api/stages")]
async fn list_stages(data: web::Data<AppState>) -> HttpResponse {
    let registry = data.runtime.executor().registry();
    let stages: Vec<_> = registry
        .kinds()
        .into_iter()
        .map(|kind| {
            let metadata = registry.metadata(kind).unwrap_or_default();
            serde_json::json!({
                "type": kind.as_tag(),
                "name": kind.to_string(),
                "description": metadata.description,
                "category": metadata.category,
            })
        })
        .collect();

    HttpResponse::Ok().json(stages)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::parse();

    info!("🚀 Starting Stack Engine Server");

    let retriever = match &settings.passages_file {
        Some(path) => MemoryRetriever::from_file(path).await?,
        None => MemoryRetriever::new(),
    };
    if settings.openrouter_api_key.is_none() {
        warn!("OPENROUTER_API_KEY is not set; runs need a per-node apiKey");
    }

    let runtime_config = settings.runtime_config();
    let mut registry = StageRegistry::new();
    stacknodes::register_all(
        &mut registry,
        Collaborators {
            retriever: Arc::new(retriever),
            generator: Arc::new(OpenRouterGenerator::new(settings.generator_config())),
            searcher: Arc::new(SerpApiSearcher::new(settings.search_config())),
            search_results: runtime_config.search_results,
        },
    );

    let runtime = StackRuntime::new(registry, runtime_config);
    info!("✅ Runtime initialized with standard stages");

    let app_state = web::Data::new(AppState {
        runtime: Arc::new(runtime),
    });
    let origins = settings.cors_origins();

    info!("🌐 Server starting on http://{}", settings.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        let cors = if origins.is_empty() {
            cors.allow_any_origin()
        } else {
            origins
                .iter()
                .fold(cors, |cors, origin| cors.allowed_origin(origin))
        };

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_stacks)
            .service(create_stack)
            .service(get_stack)
            .service(update_stack)
            .service(delete_stack)
            .service(build_stack)
            .service(chat)
            .service(get_history)
            .service(clear_history)
            .service(list_stages)
    })
    .bind(&settings.bind_address)?
    .run()
    .await?;

    Ok(())
}
