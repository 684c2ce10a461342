//! Nearest-neighbour vector index backends.
//!
//! The [`VectorIndex`] trait is the only contract the retrieval pipeline
//! depends on. Two exact implementations exist and are chosen by
//! configuration (`vector.backend`), never by inspecting types at runtime:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `flat` | [`FlatIndex`] | single-threaded linear scan, reference implementation |
//! | `parallel` | `ParallelIndex` | rayon-partitioned scan, requires the `parallel-index` feature |
//!
//! Both store rows as one contiguous row-major `Vec<f32>` and share the
//! on-disk format in [`persist`], so an artifact written by one backend
//! loads in the other and searches return identical results.
//!
//! Scores are inner products. Callers insert and query with L2-normalized
//! vectors, which makes the score a cosine similarity in `[-1, 1]`.

pub mod flat;
#[cfg(feature = "parallel-index")]
pub mod parallel;
pub mod persist;

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, TriageError};

pub use flat::FlatIndex;
#[cfg(feature = "parallel-index")]
pub use parallel::ParallelIndex;

/// One neighbour returned by [`VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Row position inside the index (insertion order, 0-based).
    pub pos: usize,
    /// Raw inner-product score.
    pub score: f32,
}

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Flat,
    Parallel,
}

impl IndexBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexBackend::Flat => "flat",
            IndexBackend::Parallel => "parallel",
        }
    }

    /// Construct an empty index. `dim = None` fixes the dimensionality on
    /// the first [`VectorIndex::add`].
    pub fn create(self, dim: Option<usize>) -> Result<Box<dyn VectorIndex>> {
        self.from_rows(Rows::new(dim))
    }

    /// Restore an index persisted with [`VectorIndex::save`].
    pub fn load(self, path: &Path) -> Result<Box<dyn VectorIndex>> {
        let rows = persist::read_rows(path)?;
        self.from_rows(rows)
    }

    fn from_rows(self, rows: Rows) -> Result<Box<dyn VectorIndex>> {
        match self {
            IndexBackend::Flat => Ok(Box::new(FlatIndex::from_rows(rows))),
            #[cfg(feature = "parallel-index")]
            IndexBackend::Parallel => Ok(Box::new(ParallelIndex::from_rows(rows))),
            #[cfg(not(feature = "parallel-index"))]
            IndexBackend::Parallel => Err(TriageError::invalid(
                "parallel vector backend requires the parallel-index feature",
            )),
        }
    }
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexBackend {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flat" => Ok(IndexBackend::Flat),
            "parallel" => Ok(IndexBackend::Parallel),
            other => Err(TriageError::invalid(format!("unknown vector backend: {}", other))),
        }
    }
}

/// Exact or approximate nearest-neighbour store over fixed-dimension rows.
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> IndexBackend;

    /// Fixed dimensionality, or `None` before the first row is added.
    fn dim(&self) -> Option<usize>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append rows. Fails with `InvalidInput` when any row's length differs
    /// from the index dimensionality.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Return at most `top_k` hits, highest score first, ties broken by
    /// ascending position.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>>;

    /// Row-major backing data, `len() × dim()` values.
    fn rows(&self) -> &[f32];

    /// Persist the full backing store (temp file + rename).
    fn save(&self, path: &Path) -> Result<()> {
        persist::write_rows(path, self.dim().unwrap_or(0), self.len(), self.rows())
    }
}

/// Contiguous row storage shared by the exact backends.
#[derive(Debug, Clone, Default)]
pub struct Rows {
    dim: Option<usize>,
    data: Vec<f32>,
}

impl Rows {
    pub fn new(dim: Option<usize>) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    pub(crate) fn from_parts(dim: usize, data: Vec<f32>) -> Self {
        Self {
            dim: Some(dim),
            data,
        }
    }

    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn len(&self) -> usize {
        match self.dim {
            Some(d) if d > 0 => self.data.len() / d,
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn push_all(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let dim = match self.dim {
            Some(d) => d,
            None => first.len(),
        };
        if dim == 0 {
            return Err(TriageError::invalid("vectors must have at least one dimension"));
        }
        // Validate everything before mutating so a bad batch adds nothing.
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(TriageError::invalid(format!(
                "vector dimension {} does not match index dimension {}",
                bad.len(),
                dim
            )));
        }
        self.dim = Some(dim);
        self.data.reserve(vectors.len() * dim);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    /// Check a query against the index dimensionality. Returns `false` when
    /// the index holds no rows and the search should short-circuit.
    pub(crate) fn check_query(&self, query: &[f32]) -> Result<bool> {
        let Some(dim) = self.dim else {
            return Ok(false);
        };
        if query.len() != dim {
            return Err(TriageError::invalid(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                dim
            )));
        }
        Ok(!self.is_empty())
    }
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn rank_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.pos.cmp(&b.pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(v: &[f32]) -> Vec<f32> {
        let mut v = v.to_vec();
        crate::embedding::l2_normalize(&mut v);
        v
    }

    fn sample_rows() -> Vec<Vec<f32>> {
        vec![
            unit(&[1.0, 0.0, 0.0]),
            unit(&[0.0, 1.0, 0.0]),
            unit(&[0.7, 0.7, 0.0]),
            unit(&[0.0, 0.0, 1.0]),
        ]
    }

    fn backends() -> Vec<IndexBackend> {
        let mut backends = vec![IndexBackend::Flat];
        if cfg!(feature = "parallel-index") {
            backends.push(IndexBackend::Parallel);
        }
        backends
    }

    #[test]
    fn test_search_orders_by_score() {
        for backend in backends() {
            let mut index = backend.create(None).unwrap();
            index.add(&sample_rows()).unwrap();
            assert_eq!(index.len(), 4);
            assert_eq!(index.dim(), Some(3));

            let hits = index.search(&unit(&[1.0, 0.1, 0.0]), 2).unwrap();
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].pos, 0);
            assert_eq!(hits[1].pos, 2);
            assert!(hits[0].score >= hits[1].score);
            assert!(hits[0].score <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_top_k_larger_than_size() {
        for backend in backends() {
            let mut index = backend.create(Some(3)).unwrap();
            index.add(&sample_rows()).unwrap();
            let hits = index.search(&unit(&[0.0, 0.0, 1.0]), 50).unwrap();
            assert_eq!(hits.len(), 4);
            assert_eq!(hits[0].pos, 3);
        }
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        for backend in backends() {
            let mut index = backend.create(Some(3)).unwrap();
            let err = index.add(&[vec![1.0, 0.0]]).unwrap_err();
            assert!(matches!(err, TriageError::InvalidInput(_)));
            assert!(index.is_empty());

            index.add(&sample_rows()).unwrap();
            let err = index.search(&[1.0, 0.0], 1).unwrap_err();
            assert!(matches!(err, TriageError::InvalidInput(_)));
        }
    }

    #[test]
    fn test_mixed_batch_adds_nothing() {
        let mut index = IndexBackend::Flat.create(None).unwrap();
        let err = index
            .add(&[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(err, TriageError::InvalidInput(_)));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_empty_index_returns_no_hits() {
        for backend in backends() {
            let index = backend.create(None).unwrap();
            assert!(index.search(&[1.0, 0.0], 5).unwrap().is_empty());
        }
    }

    #[test]
    fn test_ties_break_by_position() {
        let mut index = IndexBackend::Flat.create(None).unwrap();
        index
            .add(&[vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.pos).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("flat".parse::<IndexBackend>().unwrap(), IndexBackend::Flat);
        assert_eq!(
            "parallel".parse::<IndexBackend>().unwrap(),
            IndexBackend::Parallel
        );
        assert!("faiss".parse::<IndexBackend>().is_err());
    }

    #[cfg(feature = "parallel-index")]
    #[test]
    fn test_backends_agree() {
        let rows: Vec<Vec<f32>> = (0..200)
            .map(|i| {
                let a = i as f32 * 0.37;
                unit(&[a.sin(), a.cos(), (a * 0.5).sin(), 1.0])
            })
            .collect();
        let mut flat = IndexBackend::Flat.create(None).unwrap();
        let mut par = IndexBackend::Parallel.create(None).unwrap();
        flat.add(&rows).unwrap();
        par.add(&rows).unwrap();
        let q = unit(&[0.3, -0.2, 0.9, 0.1]);
        assert_eq!(flat.search(&q, 10).unwrap(), par.search(&q, 10).unwrap());
    }
}
