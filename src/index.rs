//! Flat (exhaustive) nearest-neighbor index over squared L2 distance.
//!
//! Vectors are stored contiguously, each paired with the id of the chunk it
//! embeds. Search scans every vector, which is exact and fast enough for a
//! knowledge base of a few personal documents.
//!
//! # File format
//!
//! ```text
//! magic      4 bytes   "RRIX"
//! version    u32 LE
//! dims       u32 LE
//! count      u64 LE
//! companion  32 bytes  SHA-256 of the chunk store written alongside
//! ids        count x u64 LE
//! vectors    count x dims x f32 LE
//! ```

use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::embedding::{bytes_to_vec, l2_squared, vec_to_bytes};

const MAGIC: &[u8; 4] = b"RRIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8 + 32;

/// SHA-256 digest of the companion chunk store.
pub type CompanionDigest = [u8; 32];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index over zero vectors")]
    Empty,
    #[error("vectors have zero dimensions")]
    ZeroDimensions,
    #[error("vector {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("query has {actual} dimensions, index has {expected}")]
    QueryDimension { expected: usize, actual: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt index file: {0}")]
    Corrupt(String),
}

/// One search result: where the vector sits in the index, the chunk id it
/// carries, and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub id: u64,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    ids: Vec<u64>,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Build an index whose ids are the vectors' positions.
    pub fn build(vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        Self::build_with_ids(vectors.into_iter().enumerate().map(|(i, v)| (i as u64, v)))
    }

    /// Build an index from `(id, vector)` pairs. All vectors must share the
    /// dimensionality of the first one.
    pub fn build_with_ids<I>(entries: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (u64, Vec<f32>)>,
    {
        let mut dims = 0;
        let mut ids = Vec::new();
        let mut data = Vec::new();

        for (index, (id, vector)) in entries.into_iter().enumerate() {
            if index == 0 {
                dims = vector.len();
                if dims == 0 {
                    return Err(IndexError::ZeroDimensions);
                }
            } else if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    index,
                    expected: dims,
                    actual: vector.len(),
                });
            }
            ids.push(id);
            data.extend_from_slice(&vector);
        }

        if ids.is_empty() {
            return Err(IndexError::Empty);
        }

        Ok(Self { dims, ids, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    /// The `k` nearest vectors, nearest first. `k` is clamped to the number
    /// of stored vectors; equal distances keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::QueryDimension {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dims)
            .zip(self.ids.iter())
            .enumerate()
            .map(|(position, (vector, &id))| Neighbor {
                position,
                id,
                distance: l2_squared(query, vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Serialize to the binary file format, stamping the companion digest.
    pub fn to_bytes(&self, companion: &CompanionDigest) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ids.len() * 8 + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        out.extend_from_slice(companion);
        for id in &self.ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
        out.extend_from_slice(&vec_to_bytes(&self.data));
        out
    }

    /// Parse the binary file format. The byte length must match the header
    /// exactly; a truncated or padded file is rejected.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, CompanionDigest), IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "{} bytes is shorter than the header",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dims = read_u32(&bytes[8..12]) as usize;
        let count = read_u64(&bytes[12..20]);
        let mut companion = [0u8; 32];
        companion.copy_from_slice(&bytes[20..52]);

        if dims == 0 || count == 0 {
            return Err(IndexError::Corrupt(format!(
                "dims={} count={}",
                dims, count
            )));
        }

        let count = usize::try_from(count)
            .map_err(|_| IndexError::Corrupt(format!("count {} too large", count)))?;
        let ids_len = count
            .checked_mul(8)
            .ok_or_else(|| IndexError::Corrupt("id table overflows".to_string()))?;
        let data_len = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("vector table overflows".to_string()))?;
        let expected = HEADER_LEN
            .checked_add(ids_len)
            .and_then(|n| n.checked_add(data_len))
            .ok_or_else(|| IndexError::Corrupt("file size overflows".to_string()))?;
        if bytes.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} bytes, found {}",
                expected,
                bytes.len()
            )));
        }

        let ids_end = HEADER_LEN + ids_len;
        let ids = bytes[HEADER_LEN..ids_end]
            .chunks_exact(8)
            .map(read_u64)
            .collect();
        let data = bytes_to_vec(&bytes[ids_end..]);

        Ok((Self { dims, ids, data }, companion))
    }

    pub fn save(&self, path: &Path, companion: &CompanionDigest) -> Result<(), IndexError> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&self.to_bytes(companion))?;
        file.sync_all()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<(Self, CompanionDigest), IndexError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(b)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> FlatIndex {
        FlatIndex::build(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 2.0],
            vec![3.0, 3.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(matches!(FlatIndex::build(vec![]), Err(IndexError::Empty)));
    }

    #[test]
    fn test_build_rejects_ragged_vectors() {
        let err = FlatIndex::build(vec![vec![0.0, 1.0], vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                index: 1,
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = sample();
        let hits = index.search(&[0.9, 0.1], 4).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![1, 0, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!((hits[0].distance - 0.02).abs() < 1e-6);
    }

    #[test]
    fn test_search_clamps_k() {
        let index = sample();
        let hits = index.search(&[0.0, 0.0], 100).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].position, 0);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = FlatIndex::build(vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ])
        .unwrap();
        let hits = index.search(&[0.0, 0.0], 4).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let err = sample().search(&[0.0, 0.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, IndexError::QueryDimension { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_explicit_ids_are_reported() {
        let index =
            FlatIndex::build_with_ids(vec![(10, vec![0.0]), (20, vec![5.0]), (30, vec![1.0])])
                .unwrap();
        let hits = index.search(&[0.9], 2).unwrap();
        assert_eq!(hits[0].id, 30);
        assert_eq!(hits[1].id, 10);
        assert_eq!(index.ids(), &[10, 20, 30]);
    }

    #[test]
    fn test_save_load_search_identical() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vector_index.bin");
        let index = sample();
        let digest = [7u8; 32];
        index.save(&path, &digest).unwrap();

        let (loaded, loaded_digest) = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_digest, digest);
        for query in [[0.9f32, 0.1], [2.0, 2.0], [-1.0, 5.0]] {
            for k in 0..6 {
                assert_eq!(index.search(&query, k).unwrap(), loaded.search(&query, k).unwrap());
            }
        }
    }

    #[test]
    fn test_from_bytes_rejects_truncation() {
        let bytes = sample().to_bytes(&[0u8; 32]);
        let err = FlatIndex::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }

    #[test]
    fn test_from_bytes_rejects_bad_magic() {
        let mut bytes = sample().to_bytes(&[0u8; 32]);
        bytes[0] = b'X';
        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(IndexError::Corrupt(_))
        ));
        assert!(matches!(
            FlatIndex::from_bytes(b"RRIX"),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_build_rejects_zero_dimensions() {
        let err = FlatIndex::build(vec![vec![], vec![]]).unwrap_err();
        assert!(matches!(err, IndexError::ZeroDimensions));
        assert_eq!(err.to_string(), "vectors have zero dimensions");
    }
}
