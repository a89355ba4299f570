use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docgraph",
    about = "Hybrid vector, full-text and graph retrieval over your documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the vector and full-text indexes
    Init(InitArgs),
    /// Chunk, embed and store the documents under a directory
    Ingest(IngestArgs),
    /// Store entities and relations for a chunk from a JSON payload
    LoadExtraction(LoadExtractionArgs),
    /// Retrieve the chunks most relevant to a query
    Query(QueryArgs),
    /// Show graph counts, index status and settings
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Init --

#[derive(Debug, Parser)]
pub struct InitArgs {
    /// Vector index dimension (defaults to the embedder's)
    #[arg(long)]
    pub dimension: Option<usize>,

    /// Output the index report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Directory to walk for .md and .txt files
    pub path: PathBuf,

    /// Only ingest files whose relative path matches this glob
    #[arg(long)]
    pub glob: Option<String>,

    /// Run entity and relation extraction on every chunk
    #[arg(long)]
    pub extract: bool,

    /// Output the ingest report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Load extraction --

#[derive(Debug, Parser)]
pub struct LoadExtractionArgs {
    /// JSON file with `entities` and `relations`
    pub file: PathBuf,

    /// Chunk that mentions the payload's entities
    #[arg(long)]
    pub chunk: String,
}

// -- Query --

#[derive(Debug, Parser)]
pub struct QueryArgs {
    /// The query text
    pub query: String,

    /// Maximum number of results (direct hits plus graph context)
    #[arg(short = 'n', long)]
    pub count: Option<usize>,

    /// Weight of the vector signal in fusion, in [0, 1]
    #[arg(long)]
    pub alpha: Option<f32>,

    /// Graph expansion depth (0 disables expansion)
    #[arg(long)]
    pub hops: Option<usize>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Persist a setting
    Set { key: String, value: String },
    /// Print a setting
    Get { key: String },
    /// List all persisted settings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a setting (revert to default)
    Unset { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docgraph",
            &mut std::io::stdout(),
        );
    }
}
