use std::{path::PathBuf, sync::Arc};

use docgraph::{
    ConfigDb,
    DataDir,
    EmbeddedGraphStore,
    builder::GraphBuilder,
    config::ChunkingConfig,
    embedding::{DEFAULT_HASH_DIMENSION, HashEmbedder},
    indexes::{IndexManager, IndexNames},
    ingestion::{Ingestor, LoadedDocument},
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

/// Ingest one document into a fresh data directory. Returns its chunk id.
fn setup_fixture(root: &std::path::Path) -> Result<String, Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(root))?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    config_db.set_setting("vector_dimension", &DEFAULT_HASH_DIMENSION.to_string())?;

    let store = Arc::new(EmbeddedGraphStore::open(
        &data_dir.graph_db(),
        &data_dir.tantivy_dir()?,
    )?);
    IndexManager::new(store.clone(), IndexNames::default())
        .ensure_indexes(Some(DEFAULT_HASH_DIMENSION))?;

    let doc = LoadedDocument::from_text(
        "hello.md",
        "Hello world from the harbor office",
        &ChunkingConfig::default(),
    );
    let builder = GraphBuilder::new(
        store,
        Arc::new(HashEmbedder::new(DEFAULT_HASH_DIMENSION)),
    );
    let report = Ingestor::new(builder).ingest(std::slice::from_ref(&doc))?;
    config_db.batch_set_documents(&report.records)?;

    Ok(doc.chunks[0].id.clone())
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let chunk_id = setup_fixture(tempdir.path())?;

    let bin = docgraph_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp").env("DOCGRAPH_DATA_DIR", tempdir.path());
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "harbor",
        "limit": 5,
        "hops": 0
    });

    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("docgraph_retrieve")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert_eq!(results.len(), 1);
    assert_eq!(
        results[0].get("id").and_then(|v| v.as_str()),
        Some(chunk_id.as_str())
    );
    assert_eq!(
        structured.get("resultCount").and_then(|v| v.as_u64()),
        Some(1)
    );

    client.cancel().await?;
    Ok(())
}

fn docgraph_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_docgraph") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("docgraph");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
