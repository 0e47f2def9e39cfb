//! Knowledge base manager.
//!
//! Owns the published retrieval state and is its only writer. A rebuild
//! reads every file in the knowledge-base directory, chunks and embeds the
//! text in one batch and builds a fresh [`FlatIndex`] off to the side. The
//! finished [`Snapshot`] is swapped in, then index and chunk store are
//! persisted together. Queries clone the current `Arc<Snapshot>` and never
//! observe a partial rebuild. Directory scanning and file I/O run on the
//! blocking pool.
//!
//! ```text
//!   Empty ──rebuild──▶ Loaded ◀──first query── Stale-on-disk
//!                        │                          ▲
//!                        └──────process restart─────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::ChunkSequence;
use crate::config::Config;
use crate::embedding::{embed_query, ensure_shape, Embedder};
use crate::index::{FlatIndex, IndexError};
use crate::loader::{load_document, LoadError};
use crate::models::{SearchHit, SourceDocument};
use crate::store::{self, ChunkStore, StoreError};

/// Characters of the first chunk shown by [`KnowledgeBase::info`].
const SAMPLE_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgeState {
    /// Nothing in memory and nothing on disk.
    Empty,
    /// A consistent snapshot is held in memory.
    Loaded,
    /// Persisted files exist but have not been loaded by this process.
    StaleOnDisk,
}

impl KnowledgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeState::Empty => "empty",
            KnowledgeState::Loaded => "loaded",
            KnowledgeState::StaleOnDisk => "stale-on-disk",
        }
    }
}

/// An index and the chunk store it points into, verified coherent.
#[derive(Debug)]
pub struct Snapshot {
    index: FlatIndex,
    store: ChunkStore,
}

impl Snapshot {
    pub fn new(index: FlatIndex, store: ChunkStore) -> Result<Self, StoreError> {
        store::check_coherent(&index, &store)?;
        Ok(Self { index, store })
    }

    pub fn len(&self) -> usize {
        self.store.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn model(&self) -> &str {
        &self.store.model
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.store.built_at
    }

    pub fn chunks(&self) -> &[crate::models::Chunk] {
        &self.store.chunks
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let neighbors = self.index.search(query, k)?;
        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                let chunk = self.store.chunks.get(n.position)?;
                (chunk.id == n.id).then(|| SearchHit {
                    chunk_id: chunk.id,
                    source: chunk.source.clone(),
                    distance: n.distance,
                    text: chunk.text.clone(),
                })
            })
            .collect())
    }
}

/// What happened to one file during a rebuild.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    /// Number of chunks contributed, or why the file was skipped.
    pub outcome: Result<usize, LoadError>,
}

#[derive(Debug)]
pub struct RebuildReport {
    pub files: Vec<FileReport>,
    pub chunks: usize,
    pub dims: usize,
    pub model: String,
    pub built_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl RebuildReport {
    pub fn indexed_files(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_ok()).count()
    }

    pub fn skipped_files(&self) -> usize {
        self.files.len() - self.indexed_files()
    }
}

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("knowledge base directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error("failed to list {path}: {source}")]
    ListDirectory {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("no files found in {0}")]
    NoFiles(PathBuf),
    #[error("no extractable text in any of {} file(s)", .files.len())]
    NoChunks { files: Vec<FileReport> },
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("built state is inconsistent: {0}")]
    Incoherent(#[source] StoreError),
    #[error("failed to persist knowledge base: {0}")]
    Persist(#[source] StoreError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Summary for `rrag info`.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub state: KnowledgeState,
    pub num_chunks: usize,
    pub dims: Option<usize>,
    pub model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
    pub sample_chunk: String,
}

pub struct KnowledgeBase {
    config: Config,
    embedder: Arc<dyn Embedder>,
    current: RwLock<Option<Arc<Snapshot>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            embedder,
            current: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> KnowledgeState {
        if self.snapshot().is_some() {
            KnowledgeState::Loaded
        } else if store::pair_exists(&self.config.store) {
            KnowledgeState::StaleOnDisk
        } else {
            KnowledgeState::Empty
        }
    }

    /// The currently published snapshot, if any. Does not touch disk.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Load and chunk every document in the knowledge-base directory.
    /// Per-file failures are recorded in the returned reports and never
    /// abort the batch. Runs on the calling thread.
    pub fn collect_chunks(&self) -> Result<(ChunkSequence, Vec<FileReport>), RebuildError> {
        collect_chunks(
            &self.config.knowledge_base.dir,
            self.config.chunking.max_words,
        )
    }

    /// Rebuild the whole knowledge base from the directory.
    ///
    /// Errors before the new snapshot is complete leave the published
    /// snapshot and the persisted files as they were. A
    /// [`RebuildError::Persist`] is returned after the new snapshot has been
    /// published: memory serves the new build while disk is stale.
    pub async fn rebuild(&self) -> Result<RebuildReport, RebuildError> {
        let _writer = self.rebuild_lock.lock().await;
        let started = Instant::now();

        let dir = self.config.knowledge_base.dir.clone();
        let max_words = self.config.chunking.max_words;
        let (sequence, files) =
            tokio::task::spawn_blocking(move || collect_chunks(&dir, max_words)).await??;
        if sequence.is_empty() {
            return Err(RebuildError::NoChunks { files });
        }

        let chunks = sequence.into_chunks();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let dims = self.embedder.dims();

        debug!(chunks = texts.len(), model = self.embedder.model_name(), "embedding chunks");
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(RebuildError::Embedding)?;
        ensure_shape(&vectors, texts.len(), dims).map_err(RebuildError::Embedding)?;

        let index = FlatIndex::build_with_ids(chunks.iter().map(|c| c.id).zip(vectors))?;
        let built_at = Utc::now();
        let snapshot = Snapshot::new(
            index,
            ChunkStore {
                model: self.embedder.model_name().to_string(),
                dims,
                built_at,
                chunks,
            },
        )
        .map_err(RebuildError::Incoherent)?;
        let snapshot = Arc::new(snapshot);
        self.publish(Arc::clone(&snapshot));

        let store_config = self.config.store.clone();
        let persisted = Arc::clone(&snapshot);
        tokio::task::spawn_blocking(move || {
            store::save_pair(&store_config, &persisted.index, &persisted.store)
        })
        .await?
        .map_err(|e| {
            warn!(error = %e, chunks = snapshot.len(), "serving new build from memory; disk copy is stale");
            RebuildError::Persist(e)
        })?;

        let report = RebuildReport {
            files,
            chunks: snapshot.len(),
            dims,
            model: snapshot.model().to_string(),
            built_at,
            elapsed: started.elapsed(),
        };

        info!(
            chunks = report.chunks,
            files = report.indexed_files(),
            skipped = report.skipped_files(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "knowledge base rebuilt"
        );
        Ok(report)
    }

    /// [`rebuild`](Self::rebuild) reduced to a success flag for the chat
    /// layer. Failures are logged.
    pub async fn build_embeddings(&self) -> bool {
        match self.rebuild().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "knowledge base rebuild failed");
                false
            }
        }
    }

    /// Load the persisted pair and publish it, unless a snapshot was
    /// published in the meantime, in which case that one is returned.
    pub fn load_from_disk(&self) -> Result<Arc<Snapshot>, StoreError> {
        let (index, store) = store::load_pair(&self.config.store)?;
        self.adopt(index, store)
    }

    fn adopt(&self, index: FlatIndex, store: ChunkStore) -> Result<Arc<Snapshot>, StoreError> {
        if store.model != self.embedder.model_name() || store.dims != self.embedder.dims() {
            return Err(StoreError::Incoherent(format!(
                "index was built with model '{}' ({} dims) but the current embedder is '{}' ({} dims)",
                store.model,
                store.dims,
                self.embedder.model_name(),
                self.embedder.dims()
            )));
        }
        let loaded = Arc::new(Snapshot::new(index, store)?);

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = current.as_ref() {
            return Ok(Arc::clone(existing));
        }
        *current = Some(Arc::clone(&loaded));
        info!(chunks = loaded.len(), "loaded knowledge base from disk");
        Ok(loaded)
    }

    fn ensure_loaded(&self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshot() {
            return Some(snapshot);
        }
        usable(self.load_from_disk())
    }

    async fn ensure_loaded_async(&self) -> Option<Arc<Snapshot>> {
        if let Some(snapshot) = self.snapshot() {
            return Some(snapshot);
        }
        let store_config = self.config.store.clone();
        match tokio::task::spawn_blocking(move || store::load_pair(&store_config)).await {
            Ok(loaded) => usable(loaded.and_then(|(index, store)| self.adopt(index, store))),
            Err(e) => {
                warn!(error = %e, "loading the knowledge base failed");
                None
            }
        }
    }

    /// Nearest chunks to `text`, nearest first, with distances.
    ///
    /// An empty knowledge base is not an error: it yields no hits.
    pub async fn search(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>, QueryError> {
        let Some(snapshot) = self.ensure_loaded_async().await else {
            return Ok(Vec::new());
        };
        if top_k == 0 || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), text)
            .await
            .map_err(QueryError::Embedding)?;
        let hits = snapshot.search(&vector, top_k)?;
        debug!(hits = hits.len(), top_k, "query answered");
        Ok(hits)
    }

    /// Texts of the `top_k` nearest chunks. Never fails: any problem is
    /// logged and produces an empty result.
    pub async fn query(&self, text: &str, top_k: usize) -> Vec<String> {
        match self.search(text, top_k).await {
            Ok(hits) => hits.into_iter().map(|h| h.text).collect(),
            Err(e) => {
                warn!(error = %e, "query failed");
                Vec::new()
            }
        }
    }

    /// Read interface for the chat layer; same as [`query`](Self::query).
    pub async fn query_vector_store(&self, text: &str, top_k: usize) -> Vec<String> {
        self.query(text, top_k).await
    }

    /// Retrieved chunks joined by blank lines and capped at
    /// `retrieval.max_context_chars` characters.
    pub async fn grounding_context(&self, text: &str, top_k: usize) -> String {
        let chunks = self.query(text, top_k).await;
        truncate_chars(&chunks.join("\n\n"), self.config.retrieval.max_context_chars)
    }

    pub fn info(&self) -> IndexInfo {
        let loaded = self.ensure_loaded();
        let state = self.state();
        match loaded {
            Some(snapshot) => IndexInfo {
                state,
                num_chunks: snapshot.len(),
                dims: Some(snapshot.dims()),
                model: Some(snapshot.model().to_string()),
                built_at: Some(snapshot.built_at()),
                sample_chunk: snapshot
                    .chunks()
                    .first()
                    .map(|c| format!("{}...", truncate_chars(&c.text, SAMPLE_PREVIEW_CHARS)))
                    .unwrap_or_else(|| "No chunks available".to_string()),
            },
            None => IndexInfo {
                state,
                num_chunks: 0,
                dims: None,
                model: None,
                built_at: None,
                sample_chunk: "No chunks available".to_string(),
            },
        }
    }

    /// Empty the knowledge-base directory and copy `source` into it under
    /// its own file name. The caller rebuilds afterwards.
    pub async fn replace_documents(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let _writer = self.rebuild_lock.lock().await;

        if !source.is_file() {
            anyhow::bail!("not a file: {}", source.display());
        }
        let name = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("no file name: {}", source.display()))?;

        let dir = &self.config.knowledge_base.dir;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                debug!(file = %path.display(), "removed previous document");
            }
        }

        let dest = dir.join(name);
        std::fs::copy(source, &dest)
            .with_context(|| format!("Failed to copy {} into {}", source.display(), dir.display()))?;
        info!(file = %dest.display(), "stored new document");
        Ok(dest)
    }
}

fn usable(loaded: Result<Arc<Snapshot>, StoreError>) -> Option<Arc<Snapshot>> {
    match loaded {
        Ok(snapshot) => Some(snapshot),
        Err(StoreError::Missing(path)) => {
            debug!(missing = %path.display(), "no knowledge base yet");
            None
        }
        Err(e) => {
            warn!(error = %e, "persisted knowledge base is unusable");
            None
        }
    }
}

/// Top-level, non-hidden files in `dir`, sorted by name.
fn list_documents(dir: &Path) -> Result<Vec<SourceDocument>, RebuildError> {
    if !dir.is_dir() {
        return Err(RebuildError::MissingDirectory(dir.to_path_buf()));
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| RebuildError::ListDirectory {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        docs.push(SourceDocument::new(entry.path()));
    }
    Ok(docs)
}

fn collect_chunks(
    dir: &Path,
    max_words: usize,
) -> Result<(ChunkSequence, Vec<FileReport>), RebuildError> {
    let docs = list_documents(dir)?;
    if docs.is_empty() {
        return Err(RebuildError::NoFiles(dir.to_path_buf()));
    }

    let mut sequence = ChunkSequence::new();
    let mut reports = Vec::with_capacity(docs.len());

    for doc in docs {
        let outcome =
            load_document(&doc).map(|text| sequence.push_document(&doc.name(), &text, max_words));
        match &outcome {
            Ok(n) => info!(file = %doc.path.display(), format = doc.format.as_str(), chunks = n, "processed"),
            Err(e) if e.is_expected() => {
                info!(file = %doc.path.display(), reason = %e, "skipped")
            }
            Err(e) => warn!(file = %doc.path.display(), error = %e, "failed to read, skipping"),
        }
        reports.push(FileReport {
            path: doc.path,
            outcome,
        });
    }

    Ok((sequence, reports))
}

/// At most `max` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("", 4), "");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(KnowledgeState::Empty.as_str(), "empty");
        assert_eq!(KnowledgeState::Loaded.as_str(), "loaded");
        assert_eq!(KnowledgeState::StaleOnDisk.as_str(), "stale-on-disk");
    }

    #[test]
    fn test_report_counts() {
        let report = RebuildReport {
            files: vec![
                FileReport {
                    path: PathBuf::from("a.txt"),
                    outcome: Ok(3),
                },
                FileReport {
                    path: PathBuf::from("b.png"),
                    outcome: Err(LoadError::Unsupported("png".to_string())),
                },
            ],
            chunks: 3,
            dims: 8,
            model: "hash".to_string(),
            built_at: Utc::now(),
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(report.indexed_files(), 1);
        assert_eq!(report.skipped_files(), 1);
    }
}
