//! Embedding providers.
//!
//! [`HashEmbedder`] works offline and is the default. The HTTP providers
//! talk to an Ollama server or an OpenAI-compatible endpoint.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{EmbeddingProvider, ProviderConfig},
    error::{Error, Result},
};

pub const DEFAULT_HASH_DIMENSION: usize = 256;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_OPENAI_EMBED_MODEL: &str = "text-embedding-3-small";

pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Converts text into fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Output dimension, when known without calling the provider.
    fn dimension(&self) -> Option<usize>;

    /// One vector per input text, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .pop()
            .ok_or_else(|| Error::Embedding(format!("{} returned no vector", self.name())))
    }
}

/// Build the embedder named by the configuration.
pub fn embedder_from_config(config: &ProviderConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding_provider {
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(
            config.embedding_dimension.unwrap_or(DEFAULT_HASH_DIMENSION),
        )),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            config
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_EMBED_MODEL.to_string()),
            config.embedding_base_url.clone(),
            config.embedding_dimension,
        )?),
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedder::new(
            config
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_EMBED_MODEL.to_string()),
            openai_api_key()?,
            config.embedding_base_url.clone(),
            config.embedding_dimension,
        )?),
    };
    Ok(embedder)
}

pub(crate) fn openai_api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| Error::Config("OPENAI_API_KEY is not set".into()))
}

pub(crate) fn http_client() -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

/// Fail with the response body when the status is not a success.
pub(crate) fn check_status(
    response: reqwest::blocking::Response,
    provider: &str,
) -> std::result::Result<reqwest::blocking::Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(format!("{provider} returned {status}: {body}"))
}

fn check_count(provider: &str, expected: usize, got: &[Vec<f32>]) -> Result<()> {
    if got.len() != expected {
        return Err(Error::Embedding(format!(
            "{provider} returned {} vectors for {expected} texts",
            got.len()
        )));
    }
    Ok(())
}

/// Deterministic feature-hashing embedder.
///
/// Terms are lowercased alphanumeric runs, hashed with FNV-1a into
/// `dimension` buckets, weighted by term frequency, and the vector is L2
/// normalized. Texts that share words land close together; no network or
/// model files are involved.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(term: &str, dimension: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dimension as u64) as usize
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let terms = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for term in terms {
            v[Self::bucket(&term, self.dimension)] += 1.0;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from an Ollama server (`POST {base}/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    dimension: Option<usize>,
}

impl OllamaEmbedder {
    pub fn new(
        model: String,
        base_url: Option<String>,
        dimension: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
            dimension,
        })
    }
}

impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.base_url);
        debug!(model = %self.model, count = texts.len(), "requesting ollama embeddings");

        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;
        let response = check_status(response, "ollama").map_err(Error::Embedding)?;
        let body: OllamaEmbedResponse = response.json()?;

        check_count("ollama", texts.len(), &body.embeddings)?;
        Ok(body.embeddings)
    }
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings from an OpenAI-compatible endpoint (`POST {base}/v1/embeddings`).
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(
        model: String,
        api_key: String,
        base_url: Option<String>,
        dimension: Option<usize>,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            dimension,
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v1/embeddings", self.base_url);
        debug!(model = %self.model, count = texts.len(), "requesting openai embeddings");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;
        let response = check_status(response, "openai").map_err(Error::Embedding)?;
        let mut body: OpenAiEmbedResponse = response.json()?;

        body.data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> =
            body.data.into_iter().map(|d| d.embedding).collect();
        check_count("openai", texts.len(), &embeddings)?;
        Ok(embeddings)
    }
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
