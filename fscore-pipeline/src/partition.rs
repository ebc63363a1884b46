//! Batch Partitioner
//!
//! Splits the evidence store into fixed-size, order-preserving, non-overlapping
//! batches. The iterator borrows the store and holds no other state, so
//! partitioning the same store twice yields the same batches.

use crate::error::{PipelineError, Result};
use crate::evidence::{EvidenceEntry, EvidenceStore};

/// One scoring request worth of users
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    /// 0-based position of this batch in the run
    pub index: usize,
    pub entries: &'a [EvidenceEntry],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.entries.iter().map(|e| e.user_id.as_str())
    }
}

/// Lazy sequence of batches over an evidence store
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    chunks: std::iter::Enumerate<std::slice::Chunks<'a, EvidenceEntry>>,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks
            .next()
            .map(|(index, entries)| Batch { index, entries })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

/// Partition `store` into batches of at most `batch_size` users
///
/// The last batch may be shorter. An empty store yields no batches.
///
/// # Errors
/// `PipelineError::InvalidInput` if `batch_size` is 0.
pub fn partition(store: &EvidenceStore, batch_size: usize) -> Result<Batches<'_>> {
    if batch_size == 0 {
        return Err(PipelineError::InvalidInput(
            "batch size must be at least 1".to_string(),
        ));
    }

    Ok(Batches {
        chunks: store.entries().chunks(batch_size).enumerate(),
    })
}

/// Number of batches `len` users produce at `batch_size` per batch
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    len.div_ceil(batch_size)
}
