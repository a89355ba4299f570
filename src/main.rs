use std::sync::Arc;

use clap::Parser;
use docgraph::{
    ConfigDb,
    DataDir,
    EmbeddedGraphStore,
    Error,
    GraphStore,
    Result,
    RetryingStore,
    builder::GraphBuilder,
    config::{self, ChunkingConfig, ProviderConfig, RetrievalConfig, keys},
    embedding::{self, Embedder},
    extraction::EntityExtractor,
    indexes::{IndexManager, IndexStatus},
    ingestion::{self, Ingestor},
    llm,
    mcp,
    model::{ExtractionPayload, Source},
    retriever::{QueryOptions, Retriever},
    retry::RetryPolicy,
    walker,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command, ConfigAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCGRAPH_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match cli.command {
        Command::Init(args) => cmd_init(&config_db, &data_dir, &args)?,
        Command::Ingest(args) => cmd_ingest(&config_db, &data_dir, &args)?,
        Command::LoadExtraction(args) => {
            cmd_load_extraction(&config_db, &data_dir, &args)?
        }
        Command::Query(args) => cmd_query(&config_db, &data_dir, &args)?,
        Command::Status(args) => cmd_status(&config_db, &data_dir, args.json)?,
        Command::Config { action } => cmd_config(&config_db, action)?,
        Command::Mcp => {
            let retriever = open_retriever(&config_db, &data_dir)?;
            mcp::run_mcp(retriever)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_store(config_db: &ConfigDb, data_dir: &DataDir) -> Result<Arc<dyn GraphStore>> {
    let store = EmbeddedGraphStore::open(&data_dir.graph_db(), &data_dir.tantivy_dir()?)?;
    let policy = RetryPolicy::from_settings(config_db)?;
    let store: Arc<dyn GraphStore> = Arc::new(RetryingStore::new(store, policy));
    Ok(store)
}

fn open_embedder(config_db: &ConfigDb) -> Result<Arc<dyn Embedder>> {
    embedding::embedder_from_config(&ProviderConfig::from_settings(config_db)?)
}

fn open_retriever(config_db: &ConfigDb, data_dir: &DataDir) -> Result<Retriever> {
    Ok(Retriever::new(
        open_store(config_db, data_dir)?,
        open_embedder(config_db)?,
        RetrievalConfig::from_settings(config_db)?,
    ))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::InitArgs,
) -> Result<()> {
    let store = open_store(config_db, data_dir)?;
    let embedder = open_embedder(config_db)?;
    let retrieval = RetrievalConfig::from_settings(config_db)?;

    let dimension = match args.dimension {
        Some(dim) => Some(dim),
        None => match config::vector_dimension(config_db)? {
            Some(dim) => Some(dim),
            None => embedder.dimension(),
        },
    };

    let report = IndexManager::new(store, retrieval.index_names.clone())
        .ensure_indexes(dimension)?;
    if let Some(dim) = dimension
        && report.vector == IndexStatus::Supported
    {
        config_db.set_setting(keys::VECTOR_DIMENSION, &dim.to_string())?;
    }

    if args.json {
        return print_json(&report);
    }
    println!(
        "Full-text index {}: {}",
        retrieval.index_names.fulltext,
        describe(&report.fulltext)
    );
    println!(
        "Vector index {}: {}",
        retrieval.index_names.vector,
        describe(&report.vector)
    );
    Ok(())
}

fn describe(status: &IndexStatus) -> String {
    match status {
        IndexStatus::Supported => "ready".to_string(),
        IndexStatus::Unsupported(reason) => format!("unsupported ({reason})"),
        IndexStatus::Failed(reason) => format!("failed ({reason})"),
        IndexStatus::Skipped => "skipped (no dimension)".to_string(),
    }
}

fn cmd_ingest(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::IngestArgs,
) -> Result<()> {
    if !args.path.is_dir() {
        return Err(Error::Config(format!(
            "path is not a directory: {}",
            args.path.display()
        )));
    }

    let glob = args.glob.as_deref().map(walker::compile_glob).transpose()?;
    let files = walker::discover_files(&args.path, glob.as_ref())?;
    let chunking = ChunkingConfig::from_settings(config_db)?;
    let documents = ingestion::load_documents(&files, &chunking);
    info!(files = files.len(), documents = documents.len(), "loaded documents");

    let store = open_store(config_db, data_dir)?;
    let builder = GraphBuilder::new(store, open_embedder(config_db)?);
    let mut ingestor = Ingestor::new(builder);
    if args.extract {
        let providers = ProviderConfig::from_settings(config_db)?;
        let model = llm::chat_model_from_config(&providers)?;
        ingestor = ingestor.with_extractor(EntityExtractor::new(model));
    }

    let report = ingestor.ingest(&documents)?;
    config_db.batch_set_documents(&report.records)?;

    if args.json {
        return print_json(&report);
    }
    println!(
        "Ingested {} documents ({} chunks)",
        report.documents, report.chunks
    );
    if let Some(extraction) = &report.extraction {
        println!(
            "Extracted {} entities, {} relations ({} skipped), {} mentions",
            extraction.entities,
            extraction.relations,
            extraction.relations_skipped,
            extraction.mentions
        );
        if report.extraction_failures > 0 {
            println!("Extraction failed for {} chunks", report.extraction_failures);
        }
    }
    Ok(())
}

fn cmd_load_extraction(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::LoadExtractionArgs,
) -> Result<()> {
    let raw = std::fs::read_to_string(&args.file)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let parsed = ExtractionPayload::from_value_lenient(&value);

    let store = open_store(config_db, data_dir)?;
    let builder = GraphBuilder::new(store, open_embedder(config_db)?);
    let report = builder
        .upsert_entities_and_relations(&args.chunk, &parsed.payload)?
        .with_malformed(&parsed);
    print_json(&report)
}

fn cmd_query(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::QueryArgs,
) -> Result<()> {
    let retriever = open_retriever(config_db, data_dir)?;
    let options = QueryOptions {
        top_k: args.count,
        alpha: args.alpha,
        expand_hops: args.hops,
        candidate_k: None,
    };
    let results = retriever.retrieve_with(&args.query, &options)?;

    if args.json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        let label = match (r.source, r.score) {
            (Source::GraphContext { hops }, _) => format!("context, {hops} hop(s)"),
            (Source::Direct, Some(score)) => format!("{score:.3}"),
            (Source::Direct, None) => "direct".to_string(),
        };
        println!("{:>3}. {} [{label}]", i + 1, r.id);
        println!("     {}", first_line(&r.text));
    }
    Ok(())
}

fn first_line(text: &str) -> String {
    const MAX: usize = 120;
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

fn cmd_status(config_db: &ConfigDb, data_dir: &DataDir, json: bool) -> Result<()> {
    let store = open_store(config_db, data_dir)?;
    let stats = store.stats()?;
    let documents = config_db.list_documents()?.len();
    let retrieval = RetrievalConfig::from_settings(config_db)?;
    let providers = ProviderConfig::from_settings(config_db)?;
    let dimension = config::vector_dimension(config_db)?;

    if json {
        return print_json(&serde_json::json!({
            "data_dir": data_dir.root(),
            "data_dir_source": data_dir.source(),
            "documents": documents,
            "graph": stats,
            "vector_dimension": dimension,
            "embedding_provider": providers.embedding_provider.to_string(),
            "llm_provider": providers.llm_provider.to_string(),
            "top_k": retrieval.top_k,
            "alpha": retrieval.alpha,
            "expand_hops": retrieval.expand_hops,
        }));
    }

    println!(
        "Data directory: {} (from {})",
        data_dir.root().display(),
        data_dir.source()
    );
    println!("Documents: {documents}");
    println!(
        "Chunks: {} ({} embedded)",
        stats.chunks, stats.embedded_chunks
    );
    println!("Entities: {}", stats.entities);
    println!("Relations: {}", stats.relations);
    println!("Mentions: {}", stats.mentions);
    match dimension {
        Some(dim) => println!("Vector index: {} ({dim}d)", retrieval.index_names.vector),
        None => println!("Vector index: not provisioned (run `docgraph init`)"),
    }
    println!("Embedding provider: {}", providers.embedding_provider);
    println!("LLM provider: {}", providers.llm_provider);
    println!(
        "Defaults: top_k={} alpha={} expand_hops={}",
        retrieval.top_k, retrieval.alpha, retrieval.expand_hops
    );
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config::validate_setting(&key, &value)?;
            config_db.set_setting(&key, value.trim())?;
            println!("{key} = {}", value.trim());
        }
        ConfigAction::Get { key } => {
            let value = config_db.get_setting(&key)?.ok_or(Error::NotFound {
                kind: "setting",
                name: key,
            })?;
            println!("{value}");
        }
        ConfigAction::List { json } => {
            let settings = config_db.list_settings()?;
            if json {
                let map: serde_json::Map<String, serde_json::Value> = settings
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                return print_json(&map);
            }
            if settings.is_empty() {
                println!("No settings (all defaults).");
            }
            for (key, value) in settings {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Unset { key } => {
            if config_db.remove_setting(&key)? {
                println!("Removed {key}");
            } else {
                eprintln!("{key} was not set");
            }
        }
    }
    Ok(())
}
