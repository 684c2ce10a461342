//! Exact scan partitioned across the rayon thread pool.
//!
//! Produces the same hits as [`FlatIndex`](super::FlatIndex); only the
//! scoring and ordering work is spread over worker threads.

use rayon::prelude::*;

use super::{dot, rank_hits, IndexBackend, Rows, SearchHit, VectorIndex};
use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct ParallelIndex {
    rows: Rows,
}

impl ParallelIndex {
    pub fn from_rows(rows: Rows) -> Self {
        Self { rows }
    }
}

impl VectorIndex for ParallelIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Parallel
    }

    fn dim(&self) -> Option<usize> {
        self.rows.dim()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        self.rows.push_all(vectors)
    }

    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 || !self.rows.check_query(query)? {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .rows
            .data()
            .par_chunks_exact(query.len())
            .enumerate()
            .map(|(pos, row)| SearchHit {
                pos,
                score: dot(row, query),
            })
            .collect();

        // Positions are unique, so the unstable sort is still deterministic.
        hits.par_sort_unstable_by(rank_hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    fn rows(&self) -> &[f32] {
        self.rows.data()
    }
}
