use std::path::Path;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{error::Result, model::ScoredHit};

/// Field names used in the schema.
pub mod fields {
    pub const CHUNK_ID: &str = "chunk_id";
    pub const TEXT: &str = "text";
}

/// Memory budget for a single indexing pass.
pub const WRITER_BUDGET: usize = 15_000_000;

/// BM25 index over chunk text, keyed by chunk id.
pub struct ChunkTextIndex {
    index: Index,
    reader: IndexReader,
    chunk_id: Field,
    text: Field,
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field(fields::CHUNK_ID, STRING | STORED);

    let text_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    builder.add_text_field(fields::TEXT, text_opts);

    builder.build()
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl ChunkTextIndex {
    /// Open or create an index at the given directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                build_schema(),
                tantivy::IndexSettings::default(),
            )?
        };

        Self::from_index(index)
    }

    /// Create an in-memory index.
    pub fn open_in_ram() -> Result<Self> {
        Self::from_index(Index::create_in_ram(build_schema()))
    }

    fn from_index(index: Index) -> Result<Self> {
        register_tokenizers(&index);
        let schema = index.schema();
        let chunk_id = schema.get_field(fields::CHUNK_ID)?;
        let text = schema.get_field(fields::TEXT)?;
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            chunk_id,
            text,
        })
    }

    pub fn writer(&self) -> Result<IndexWriter> {
        Ok(self.index.writer(WRITER_BUDGET)?)
    }

    /// Replace (or add) the indexed text for a chunk. Takes effect on the
    /// writer's next commit.
    pub fn upsert(
        &self,
        writer: &IndexWriter,
        chunk_id: &str,
        text: &str,
    ) -> Result<()> {
        writer.delete_term(Term::from_field_text(self.chunk_id, chunk_id));
        writer.add_document(doc!(
            self.chunk_id => chunk_id,
            self.text => text,
        ))?;
        Ok(())
    }

    /// Index every `(id, text)` pair and commit once.
    pub fn upsert_all<'a>(
        &self,
        chunks: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<usize> {
        let mut writer = self.writer()?;
        let mut count = 0;
        for (id, text) in chunks {
            self.upsert(&writer, id, text)?;
            count += 1;
        }
        writer.commit()?;
        Ok(count)
    }

    /// BM25 search over chunk text. Query syntax errors are tolerated; the
    /// parseable part of the query is used.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![self.text]);
        let (parsed, _errors) = parser.parse_query_lenient(query);
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(ScoredHit::new(
                extract_text(&doc, self.chunk_id),
                extract_text(&doc, self.text),
                score,
            ));
        }
        Ok(hits)
    }

    pub fn num_docs(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }
}

impl std::fmt::Debug for ChunkTextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkTextIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
