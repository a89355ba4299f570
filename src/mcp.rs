use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error,
    model::{RetrievedChunk, Source},
    retriever::{QueryOptions, Retriever},
};

const SUMMARY_PREVIEW_CHARS: usize = 160;

#[derive(Clone)]
pub struct DocgraphMcpServer {
    retriever: Arc<Retriever>,
    tool_router: ToolRouter<Self>,
}

impl DocgraphMcpServer {
    fn new(retriever: Arc<Retriever>) -> Self {
        Self {
            retriever,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocgraphMcpServer {
    /// Hybrid retrieval with graph context.
    #[tool(
        name = "docgraph_retrieve",
        description = "Retrieve document chunks relevant to a query. Combines vector similarity, full-text matching and entity-graph expansion; graph context follows the direct hits."
    )]
    pub async fn docgraph_retrieve(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();
        let options = QueryOptions {
            top_k: params.limit,
            alpha: params.alpha,
            expand_hops: params.hops,
            candidate_k: None,
        };

        // Providers use blocking HTTP clients, which must stay off the
        // async workers.
        let retriever = self.retriever.clone();
        let results = tokio::task::spawn_blocking(move || {
            retriever.retrieve_with(&params.query, &options)
        })
        .await
        .map_err(|e| mcp_error("retrieval task failed", e))?
        .map_err(|e| mcp_error("retrieval failed", e))?;

        let summary = format_summary(&results, &query);
        let structured = serde_json::to_value(RetrieveResponse {
            query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocgraphMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docgraph", env!("CARGO_PKG_VERSION"))
                    .with_title("docgraph MCP"),
            )
            .with_instructions(
                "Use docgraph_retrieve to gather grounding context for a question. Results marked graph_context are related material reached through shared entities.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    /// Query text.
    pub query: String,
    /// Maximum number of chunks, direct hits plus context (default: 12).
    pub limit: Option<usize>,
    /// Weight of the vector signal in [0, 1] (default: 0.6).
    pub alpha: Option<f32>,
    /// Graph expansion depth; 0 disables expansion (default: 2).
    pub hops: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    query: String,
    result_count: usize,
    results: Vec<RetrievedChunk>,
}

fn format_summary(results: &[RetrievedChunk], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for r in results {
        let label = match (r.source, r.score) {
            (Source::GraphContext { hops }, _) => format!("context+{hops}"),
            (Source::Direct, Some(score)) => format!("{score:.3}"),
            (Source::Direct, None) => "direct".to_string(),
        };
        lines.push(format!("{} {label} {}", r.id, preview(&r.text)));
    }

    lines.join("\n")
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(SUMMARY_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(retriever: Retriever) -> error::Result<()> {
    let retriever = Arc::new(retriever);
    let server = DocgraphMcpServer::new(retriever.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let served = runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    });

    // The last handle to the providers is released here, outside the
    // runtime.
    drop(runtime);
    drop(retriever);
    served
}
