//! Exact linear-scan backend.

use super::{dot, rank_hits, IndexBackend, Rows, SearchHit, VectorIndex};
use crate::error::Result;

/// Reference implementation: scores every row on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    rows: Rows,
}

impl FlatIndex {
    pub fn from_rows(rows: Rows) -> Self {
        Self { rows }
    }
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> IndexBackend {
        IndexBackend::Flat
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
            .chunks_exact(query.len())
            .enumerate()
            .map(|(pos, row)| SearchHit {
                pos,
                score: dot(row, query),
            })
            .collect();

        hits.sort_by(rank_hits);
        hits.truncate(top_k);
        Ok(hits)
    }

    fn rows(&self) -> &[f32] {
        self.rows.data()
    }
}
