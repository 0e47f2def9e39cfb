//! Chunk store and companion-pair persistence.
//!
//! A rebuild persists two files that are only meaningful together: the
//! vector index and the chunk store it points into. The index header
//! carries the SHA-256 of the chunk-store bytes, and every vector carries
//! its chunk id, so a pair written by different rebuilds (or a file edited
//! by hand) is detected on load instead of returning the wrong text.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::index::{CompanionDigest, FlatIndex, IndexError};
use crate::models::Chunk;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no persisted knowledge base (missing {0})")]
    Missing(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("chunk store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("index and chunk store disagree: {0}")]
    Incoherent(String),
}

/// The ordered chunk texts of one build, plus the embedding identity the
/// companion index was built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkStore {
    pub model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
}

impl ChunkStore {
    pub fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

pub fn digest(bytes: &[u8]) -> CompanionDigest {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(bytes));
    out
}

/// Verify the parallel-array invariant: one vector per chunk, same order,
/// same ids, same dimensionality.
pub fn check_coherent(index: &FlatIndex, store: &ChunkStore) -> Result<(), StoreError> {
    if index.len() != store.chunks.len() {
        return Err(StoreError::Incoherent(format!(
            "{} vectors but {} chunks",
            index.len(),
            store.chunks.len()
        )));
    }
    if index.dims() != store.dims {
        return Err(StoreError::Incoherent(format!(
            "index has {} dims, chunk store records {}",
            index.dims(),
            store.dims
        )));
    }
    if let Some((position, (id, chunk))) = index
        .ids()
        .iter()
        .zip(store.chunks.iter())
        .enumerate()
        .find(|(_, (id, chunk))| **id != chunk.id)
    {
        return Err(StoreError::Incoherent(format!(
            "position {} holds vector for chunk {} but chunk {}",
            position, id, chunk.id
        )));
    }
    Ok(())
}

/// True when both companion files are present.
pub fn pair_exists(config: &StoreConfig) -> bool {
    config.index_path.is_file() && config.chunks_path.is_file()
}

/// Write both files. Each is written to a sibling temporary file and renamed
/// into place, chunk store first.
pub fn save_pair(
    config: &StoreConfig,
    index: &FlatIndex,
    store: &ChunkStore,
) -> Result<(), StoreError> {
    let json = store.to_json()?;
    let companion = digest(&json);

    let chunks_tmp = tmp_path(&config.chunks_path);
    let index_tmp = tmp_path(&config.index_path);

    ensure_parent(&config.chunks_path)?;
    ensure_parent(&config.index_path)?;

    write_synced(&chunks_tmp, &json)?;
    index.save(&index_tmp, &companion)?;

    rename(&chunks_tmp, &config.chunks_path)?;
    rename(&index_tmp, &config.index_path)?;

    tracing::debug!(
        index = %config.index_path.display(),
        chunks = %config.chunks_path.display(),
        vectors = index.len(),
        "persisted knowledge base"
    );
    Ok(())
}

/// Read both files and verify they belong together.
pub fn load_pair(config: &StoreConfig) -> Result<(FlatIndex, ChunkStore), StoreError> {
    for path in [&config.index_path, &config.chunks_path] {
        if !path.is_file() {
            return Err(StoreError::Missing(path.clone()));
        }
    }

    let json = std::fs::read(&config.chunks_path).map_err(|source| StoreError::Io {
        path: config.chunks_path.clone(),
        source,
    })?;
    let (index, companion) = FlatIndex::load(&config.index_path)?;

    if digest(&json) != companion {
        return Err(StoreError::Incoherent(
            "chunk store does not match the index it was saved with".to_string(),
        ));
    }

    let store: ChunkStore = serde_json::from_slice(&json)?;
    check_coherent(&index, &store)?;
    Ok((index, store))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
    std::fs::rename(from, to).map_err(|source| StoreError::Io {
        path: to.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: u64, text: &str) -> Chunk {
        Chunk {
            id,
            source: "resume.txt".to_string(),
            position: id as usize,
            text: text.to_string(),
        }
    }

    fn sample() -> (FlatIndex, ChunkStore) {
        let index = FlatIndex::build(vec![vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let store = ChunkStore {
            model: "hash".to_string(),
            dims: 2,
            built_at: Utc::now(),
            chunks: vec![chunk(0, "first"), chunk(1, "second")],
        };
        (index, store)
    }

    fn store_config(dir: &Path) -> StoreConfig {
        StoreConfig {
            index_path: dir.join("data/vector_index.bin"),
            chunks_path: dir.join("data/chunks.json"),
        }
    }

    #[test]
    fn test_save_load_pair() {
        let tmp = TempDir::new().unwrap();
        let config = store_config(tmp.path());
        let (index, store) = sample();

        assert!(!pair_exists(&config));
        save_pair(&config, &index, &store).unwrap();
        assert!(pair_exists(&config));
        assert!(!tmp_path(&config.index_path).exists());
        assert!(!tmp_path(&config.chunks_path).exists());

        let (loaded_index, loaded_store) = load_pair(&config).unwrap();
        assert_eq!(loaded_index, index);
        assert_eq!(loaded_store, store);
    }

    #[test]
    fn test_load_missing() {
        let tmp = TempDir::new().unwrap();
        let err = load_pair(&store_config(tmp.path())).unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
    }

    #[test]
    fn test_edited_chunk_store_is_incoherent() {
        let tmp = TempDir::new().unwrap();
        let config = store_config(tmp.path());
        let (index, store) = sample();
        save_pair(&config, &index, &store).unwrap();

        let edited = std::fs::read_to_string(&config.chunks_path)
            .unwrap()
            .replace("second", "tampered");
        std::fs::write(&config.chunks_path, edited).unwrap();

        let err = load_pair(&config).unwrap_err();
        assert!(matches!(err, StoreError::Incoherent(_)));
    }

    #[test]
    fn test_check_coherent_length_mismatch() {
        let (index, mut store) = sample();
        store.chunks.pop();
        let err = check_coherent(&index, &store).unwrap_err();
        assert!(err.to_string().contains("2 vectors but 1 chunks"));
    }

    #[test]
    fn test_check_coherent_id_mismatch() {
        let (index, mut store) = sample();
        store.chunks.swap(0, 1);
        assert!(matches!(
            check_coherent(&index, &store),
            Err(StoreError::Incoherent(_))
        ));
    }

    #[test]
    fn test_tmp_path() {
        assert_eq!(
            tmp_path(Path::new("data/chunks.json")),
            PathBuf::from("data/chunks.json.tmp")
        );
    }
}
