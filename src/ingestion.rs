use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    builder::{GraphBuilder, UpsertReport},
    chunking::chunk_words,
    config::ChunkingConfig,
    config_db::DocumentRecord,
    doc_id::DocumentId,
    error::Result,
    extraction::EntityExtractor,
    model::Chunk,
    walker::DiscoveredFile,
};

/// A source file read from disk and cut into chunks.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub doc_id: DocumentId,
    pub path: String,
    pub chunks: Vec<Chunk>,
}

impl LoadedDocument {
    pub fn from_text(path: &str, text: &str, chunking: &ChunkingConfig) -> Self {
        let doc_id = DocumentId::new(path);
        let chunks = chunk_words(text, chunking.words, chunking.overlap)
            .into_iter()
            .enumerate()
            .map(|(order, text)| {
                let order = order as u32;
                Chunk::new(doc_id.chunk_id(order), doc_id.to_string(), text, order)
            })
            .collect();
        Self {
            doc_id,
            path: path.to_string(),
            chunks,
        }
    }

    pub fn record(&self) -> (String, DocumentRecord) {
        (
            self.doc_id.to_string(),
            DocumentRecord {
                path: self.path.clone(),
                chunks: self.chunks.len() as u32,
            },
        )
    }
}

/// Read a discovered file as plain text.
///
/// Text files are decoded lossily. A PDF whose text cannot be extracted
/// reads as empty.
pub fn read_document_text(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if is_pdf {
        return Ok(pdf_text(path, &bytes));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn pdf_text(path: &Path, bytes: &[u8]) -> String {
    // pdf-extract panics on some malformed files instead of erroring.
    let extracted = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes));
    match extracted {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = ?e, "could not extract pdf text");
            String::new()
        }
        Err(_) => {
            warn!(path = %path.display(), "pdf parser aborted");
            String::new()
        }
    }
}

/// Read and chunk files in parallel. Unreadable files are logged and
/// skipped; files with no words produce no document.
pub fn load_documents(
    files: &[DiscoveredFile],
    chunking: &ChunkingConfig,
) -> Vec<LoadedDocument> {
    files
        .par_iter()
        .filter_map(|file| {
            let content = match read_document_text(&file.absolute_path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %file.absolute_path.display(), error = %e, "skipping unreadable file");
                    return None;
                }
            };
            let path = file.relative_path.to_string_lossy();
            let doc = LoadedDocument::from_text(&path, &content, chunking);
            (!doc.chunks.is_empty()).then_some(doc)
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Totals over every chunk, when extraction ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<UpsertReport>,
    /// Chunks whose extraction call failed.
    pub extraction_failures: usize,
    /// Ingest records for the settings database.
    #[serde(skip)]
    pub records: Vec<(String, DocumentRecord)>,
}

/// Turns documents into chunks in the graph, and optionally runs entity
/// extraction on every chunk.
pub struct Ingestor {
    builder: GraphBuilder,
    extractor: Option<EntityExtractor>,
}

impl Ingestor {
    pub fn new(builder: GraphBuilder) -> Self {
        Self {
            builder,
            extractor: None,
        }
    }

    pub fn with_extractor(mut self, extractor: EntityExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Upsert every document's chunks with one embedding call per
    /// document, then extract and upsert entities per chunk.
    ///
    /// Store and embedding failures abort the run. A failed extraction
    /// call only skips its chunk, unless the store became unreachable.
    pub fn ingest(&self, documents: &[LoadedDocument]) -> Result<IngestReport> {
        let mut report = IngestReport {
            extraction: self.extractor.as_ref().map(|_| UpsertReport::default()),
            ..IngestReport::default()
        };

        for doc in documents {
            report.chunks += self.builder.upsert_chunks(&doc.chunks)?;
            report.documents += 1;
            report.records.push(doc.record());
            debug!(path = %doc.path, chunks = doc.chunks.len(), "ingested document");

            let Some(extractor) = &self.extractor else {
                continue;
            };
            for chunk in &doc.chunks {
                let parsed = match extractor.extract(&chunk.text) {
                    Ok(parsed) => parsed,
                    Err(e) if e.is_connectivity() => return Err(e),
                    Err(e) => {
                        warn!(chunk = %chunk.id, error = %e, "extraction failed, skipping chunk");
                        report.extraction_failures += 1;
                        continue;
                    }
                };
                let upserted = self
                    .builder
                    .upsert_entities_and_relations(&chunk.id, &parsed.payload)?
                    .with_malformed(&parsed);
                if let Some(total) = report.extraction.as_mut() {
                    *total += upserted;
                }
            }
        }

        info!(
            documents = report.documents,
            chunks = report.chunks,
            extraction_failures = report.extraction_failures,
            "ingest complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        embedding::HashEmbedder,
        error::Error,
        llm::{ChatModel, Message},
        memory_store::MemoryGraphStore,
        store::GraphStore,
    };

    struct Scripted;

    impl ChatModel for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn chat(&self, messages: &[Message]) -> Result<String> {
            let text = &messages[1].content;
            if text.contains("broken") {
                return Err(Error::Llm("model crashed".into()));
            }
            Ok(r#"{"entities":[{"id":"acme","name":"Acme","type":"org"},
                               {"id":"bob","name":"Bob","type":"person"}],
                   "relations":[{"src":"bob","dst":"acme","type":"works_at"},
                                {"src":"bob","dst":"ghost","type":"knows"},
                                {"src":"bob","type":"likes"}]}"#
                .into())
        }
    }

    fn small() -> ChunkingConfig {
        ChunkingConfig {
            words: 4,
            overlap: 1,
        }
    }

    fn ingestor(store: &Arc<MemoryGraphStore>) -> Ingestor {
        Ingestor::new(GraphBuilder::new(
            store.clone(),
            Arc::new(HashEmbedder::new(16)),
        ))
    }

    #[test]
    fn from_text_assigns_ordered_chunk_ids() {
        let doc = LoadedDocument::from_text("a.md", "one two three four five six", &small());
        assert_eq!(doc.chunks.len(), 2);
        assert_eq!(doc.chunks[0].id, doc.doc_id.chunk_id(0));
        assert_eq!(doc.chunks[1].id, doc.doc_id.chunk_id(1));
        assert_eq!(doc.chunks[1].text, "four five six");
        assert!(doc.chunks.iter().all(|c| c.doc_id == doc.doc_id.to_string()));
        assert_eq!(doc.record().1.chunks, 2);
    }

    #[test]
    fn load_skips_empty_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("full.md"), "some words here").unwrap();
        std::fs::write(tmp.path().join("empty.md"), "   \n").unwrap();

        let files = crate::walker::discover_files(tmp.path(), None).unwrap();
        let docs = load_documents(&files, &ChunkingConfig::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "full.md");
    }

    #[test]
    fn unreadable_pdf_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = tmp.path().join("scan.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 this is not really a pdf").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "harbor notes").unwrap();

        assert_eq!(read_document_text(&pdf).unwrap(), "");

        let files = crate::walker::discover_files(tmp.path(), None).unwrap();
        assert_eq!(files.len(), 2);
        let docs = load_documents(&files, &ChunkingConfig::default());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "notes.md");
    }

    #[test]
    fn invalid_utf8_is_read_lossily() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("latin1.txt");
        std::fs::write(&path, b"caf\xe9 menu").unwrap();

        let text = read_document_text(&path).unwrap();
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" menu"));
    }

    #[test]
    fn ingest_is_idempotent() {
        let store = Arc::new(MemoryGraphStore::new());
        let docs = vec![LoadedDocument::from_text(
            "a.md",
            "alpha beta gamma delta epsilon",
            &small(),
        )];

        let first = ingestor(&store).ingest(&docs).unwrap();
        let stats = store.stats().unwrap();
        let second = ingestor(&store).ingest(&docs).unwrap();

        assert_eq!(first.chunks, 2);
        assert_eq!(second.chunks, 2);
        assert_eq!(store.stats().unwrap(), stats);
        assert_eq!(stats.embedded_chunks, 2);
        assert!(first.extraction.is_none());
    }

    #[test]
    fn extraction_links_chunks_and_counts_skips() {
        let store = Arc::new(MemoryGraphStore::new());
        let docs = vec![
            LoadedDocument::from_text("good.md", "Bob works at Acme", &small()),
            LoadedDocument::from_text("bad.md", "this is broken", &small()),
        ];

        let report = ingestor(&store)
            .with_extractor(EntityExtractor::new(Arc::new(Scripted)))
            .ingest(&docs)
            .unwrap();

        assert_eq!(report.documents, 2);
        assert_eq!(report.extraction_failures, 1);
        let totals = report.extraction.unwrap();
        assert_eq!(totals.entities, 2);
        assert_eq!(totals.relations, 1);
        // One missing endpoint plus one relation without a `dst`.
        assert_eq!(totals.relations_skipped, 2);
        assert_eq!(totals.mentions, 2);

        let chunk_id = docs[0].chunks[0].id.clone();
        let mentioned = store.mentioned_entities(&[chunk_id]).unwrap();
        assert_eq!(mentioned.len(), 2);
    }
}
