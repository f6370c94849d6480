//! Chunk codec for the polling transport
//!
//! Outbound payloads are split into parts no larger than the relay's part
//! ceiling. Inbound parts are collected per session in a [`ChunkSet`] and
//! merged in index order once every index `0..total` is present.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::clipboard::Snapshot;

/// Default part ceiling agreed with the relay (300 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 300 * 1024;

/// Chunk codec errors
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Not every index is present yet
    #[error("incomplete chunk set: {have} of {total} parts")]
    Incomplete { have: usize, total: usize },

    /// Part index outside `0..total`
    #[error("chunk index {index} out of range for {total} parts")]
    OutOfRange { index: usize, total: usize },

    /// Merged payload is not a snapshot
    #[error("malformed snapshot payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Split `payload` into parts of at most `max_part` bytes.
///
/// Parts share the payload's buffer. An empty payload yields one empty part
/// so the declared total is never zero.
pub fn split(payload: &Bytes, max_part: usize) -> Vec<Bytes> {
    let max_part = max_part.max(1);
    if payload.is_empty() {
        return vec![Bytes::new()];
    }

    (0..payload.len())
        .step_by(max_part)
        .map(|start| payload.slice(start..(start + max_part).min(payload.len())))
        .collect()
}

/// Parts of one transfer session received so far
#[derive(Debug, Clone)]
pub struct ChunkSet {
    cid: String,
    total: usize,
    parts: BTreeMap<usize, Bytes>,
}

impl ChunkSet {
    pub fn new(cid: impl Into<String>, total: usize) -> Self {
        Self {
            cid: cid.into(),
            total,
            parts: BTreeMap::new(),
        }
    }

    pub fn cid(&self) -> &str {
        &self.cid
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of distinct parts held
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.parts.contains_key(&index)
    }

    /// Store one part. A repeated index replaces the earlier copy.
    pub fn insert(&mut self, index: usize, data: Bytes) -> Result<(), ChunkError> {
        if index >= self.total {
            return Err(ChunkError::OutOfRange {
                index,
                total: self.total,
            });
        }
        self.parts.insert(index, data);
        Ok(())
    }

    /// Advertised indices worth fetching: in range and not yet held
    pub fn missing<'a>(&'a self, advertised: &'a [usize]) -> impl Iterator<Item = usize> + 'a {
        advertised
            .iter()
            .copied()
            .filter(move |index| *index < self.total && !self.contains(*index))
    }

    /// Every index `0..total` is present
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.parts.len() == self.total
    }

    /// Concatenate the parts in index order
    pub fn merge(&self) -> Result<Bytes, ChunkError> {
        if !self.is_complete() {
            return Err(ChunkError::Incomplete {
                have: self.parts.len(),
                total: self.total,
            });
        }

        let size = self.parts.values().map(Bytes::len).sum();
        let mut merged = BytesMut::with_capacity(size);
        for part in self.parts.values() {
            merged.extend_from_slice(part);
        }
        Ok(merged.freeze())
    }

    /// Merge and decode the snapshot
    pub fn assemble(&self) -> Result<Snapshot, ChunkError> {
        let merged = self.merge()?;
        Ok(serde_json::from_slice(&merged)?)
    }
}
