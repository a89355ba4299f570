//! Typed configuration read from the persisted settings table.
//!
//! Every value has a default, so an empty settings table is a valid
//! configuration. Values that are present but do not parse are errors.

use std::{fmt, str::FromStr, time::Duration};

use crate::{
    chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_WORDS},
    config_db::ConfigDb,
    error::{Error, Result},
    expand::DEFAULT_EXPAND_HOPS,
    fusion::DEFAULT_ALPHA,
    indexes::IndexNames,
    retry::RetryPolicy,
};

/// Setting keys.
pub mod keys {
    pub const TOP_K: &str = "top_k";
    pub const ALPHA: &str = "alpha";
    pub const EXPAND_HOPS: &str = "expand_hops";
    pub const CANDIDATE_K: &str = "candidate_k";
    pub const VECTOR_INDEX: &str = "vector_index";
    pub const FULLTEXT_INDEX: &str = "fulltext_index";
    pub const EMBEDDING_PROVIDER: &str = "embedding_provider";
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    pub const EMBEDDING_BASE_URL: &str = "embedding_base_url";
    pub const EMBEDDING_DIMENSION: &str = "embedding_dimension";
    pub const LLM_PROVIDER: &str = "llm_provider";
    pub const LLM_MODEL: &str = "llm_model";
    pub const LLM_BASE_URL: &str = "llm_base_url";
    pub const VECTOR_DIMENSION: &str = "vector_dimension";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const RETRY_BACKOFF_MS: &str = "retry_backoff_ms";
    pub const CHUNK_WORDS: &str = "chunk_words";
    pub const CHUNK_OVERLAP: &str = "chunk_overlap";

    pub const ALL: &[&str] = &[
        TOP_K,
        ALPHA,
        EXPAND_HOPS,
        CANDIDATE_K,
        VECTOR_INDEX,
        FULLTEXT_INDEX,
        EMBEDDING_PROVIDER,
        EMBEDDING_MODEL,
        EMBEDDING_BASE_URL,
        EMBEDDING_DIMENSION,
        LLM_PROVIDER,
        LLM_MODEL,
        LLM_BASE_URL,
        VECTOR_DIMENSION,
        MAX_RETRIES,
        RETRY_BACKOFF_MS,
        CHUNK_WORDS,
        CHUNK_OVERLAP,
    ];
}

pub const DEFAULT_TOP_K: usize = 12;
pub const DEFAULT_CANDIDATE_K: usize = 12;

fn parse_setting<T: FromStr>(db: &ConfigDb, key: &str) -> Result<Option<T>> {
    match db.get_setting(key)? {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            Error::Config(format!("invalid value for {key}: {raw:?}"))
        }),
    }
}

fn string_setting(db: &ConfigDb, key: &str) -> Result<Option<String>> {
    Ok(db
        .get_setting(key)?
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty()))
}

/// Check a value before it is persisted with `config set`.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    let bad = || Error::Config(format!("invalid value for {key}: {value:?}"));
    match key {
        keys::TOP_K
        | keys::EXPAND_HOPS
        | keys::CANDIDATE_K
        | keys::EMBEDDING_DIMENSION
        | keys::VECTOR_DIMENSION
        | keys::CHUNK_WORDS
        | keys::CHUNK_OVERLAP => value.parse::<usize>().map(|_| ()).map_err(|_| bad()),
        keys::MAX_RETRIES => value.parse::<u32>().map(|_| ()).map_err(|_| bad()),
        keys::RETRY_BACKOFF_MS => value.parse::<u64>().map(|_| ()).map_err(|_| bad()),
        keys::ALPHA => match value.parse::<f32>() {
            Ok(a) if (0.0..=1.0).contains(&a) => Ok(()),
            _ => Err(bad()),
        },
        keys::EMBEDDING_PROVIDER => value.parse::<EmbeddingProvider>().map(|_| ()),
        keys::LLM_PROVIDER => value.parse::<LlmProvider>().map(|_| ()),
        k if keys::ALL.contains(&k) => Ok(()),
        _ => Err(Error::Config(format!(
            "unknown setting {key:?} (known: {})",
            keys::ALL.join(", ")
        ))),
    }
}

/// Query defaults and index names.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub alpha: f32,
    pub expand_hops: usize,
    /// Hits requested from each signal before fusion.
    pub candidate_k: usize,
    pub index_names: IndexNames,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            alpha: DEFAULT_ALPHA,
            expand_hops: DEFAULT_EXPAND_HOPS,
            candidate_k: DEFAULT_CANDIDATE_K,
            index_names: IndexNames::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn from_settings(db: &ConfigDb) -> Result<Self> {
        let defaults = Self::default();
        let alpha = parse_setting(db, keys::ALPHA)?.unwrap_or(defaults.alpha);
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::Config(format!("alpha must be in [0, 1], got {alpha}")));
        }

        Ok(Self {
            top_k: parse_setting(db, keys::TOP_K)?.unwrap_or(defaults.top_k),
            alpha,
            expand_hops: parse_setting(db, keys::EXPAND_HOPS)?
                .unwrap_or(defaults.expand_hops),
            candidate_k: parse_setting(db, keys::CANDIDATE_K)?
                .unwrap_or(defaults.candidate_k),
            index_names: IndexNames {
                vector: string_setting(db, keys::VECTOR_INDEX)?
                    .unwrap_or(defaults.index_names.vector),
                fulltext: string_setting(db, keys::FULLTEXT_INDEX)?
                    .unwrap_or(defaults.index_names.fulltext),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Words per chunk.
    pub words: usize,
    /// Words shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            words: DEFAULT_CHUNK_WORDS,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn from_settings(db: &ConfigDb) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            words: parse_setting(db, keys::CHUNK_WORDS)?.unwrap_or(defaults.words),
            overlap: parse_setting(db, keys::CHUNK_OVERLAP)?
                .unwrap_or(defaults.overlap),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.words == 0 || self.overlap >= self.words {
            return Err(Error::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.words
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    Ollama,
    OpenAi,
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!(
                "unknown embedding provider {other:?} (expected hash, ollama or openai)"
            ))),
        }
    }
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hash => "hash",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LlmProvider {
    #[default]
    Ollama,
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!(
                "unknown llm provider {other:?} (expected ollama or openai)"
            ))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        })
    }
}

/// Which embedding and chat providers to use, and where they live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: Option<String>,
    pub embedding_base_url: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub llm_provider: LlmProvider,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
}

impl ProviderConfig {
    pub fn from_settings(db: &ConfigDb) -> Result<Self> {
        Ok(Self {
            embedding_provider: string_setting(db, keys::EMBEDDING_PROVIDER)?
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            embedding_model: string_setting(db, keys::EMBEDDING_MODEL)?,
            embedding_base_url: string_setting(db, keys::EMBEDDING_BASE_URL)?,
            embedding_dimension: parse_setting(db, keys::EMBEDDING_DIMENSION)?,
            llm_provider: string_setting(db, keys::LLM_PROVIDER)?
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            llm_model: string_setting(db, keys::LLM_MODEL)?,
            llm_base_url: string_setting(db, keys::LLM_BASE_URL)?,
        })
    }
}

impl RetryPolicy {
    pub fn from_settings(db: &ConfigDb) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: parse_setting(db, keys::MAX_RETRIES)?
                .unwrap_or(defaults.max_retries),
            backoff: parse_setting::<u64>(db, keys::RETRY_BACKOFF_MS)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff),
        })
    }
}

/// The dimension the vector index was provisioned for, if any.
pub fn vector_dimension(db: &ConfigDb) -> Result<Option<usize>> {
    parse_setting(db, keys::VECTOR_DIMENSION)
}
