//! File manifests.
//!
//! A manifest names a file, its inclusive segment range and the repos that
//! hold each contiguous shard of it. The writer serves an "info" manifest
//! with no shards; a repo answering `get` fills the shard list in.

use crate::{DifsError, Name, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRange {
    /// Repo prefix holding the shard.
    pub name: String,
    pub start: u64,
    /// Exclusive.
    pub end: u64,
}

impl ShardRange {
    pub fn repo_name(&self) -> Result<Name> {
        Name::from_uri(&self.name)
    }

    pub fn segments(&self) -> std::ops::Range<u64> {
        self.start..self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub start_block_id: u64,
    /// Inclusive; the final segment number.
    pub end_block_id: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repos: Vec<ShardRange>,
}

impl Manifest {
    /// Shard-less manifest describing a file of `end_block_id + 1` segments.
    pub fn info(name: impl Into<String>, end_block_id: u64) -> Self {
        Self {
            name: name.into(),
            start_block_id: 0,
            end_block_id,
            repos: Vec::new(),
        }
    }

    /// Info manifest for `total_bytes` cut into `block_size` chunks.
    pub fn for_content(name: impl Into<String>, total_bytes: u64, block_size: usize) -> Result<Self> {
        if total_bytes == 0 || block_size == 0 {
            return Err(DifsError::InvalidManifest(format!(
                "cannot describe {} bytes with block size {}",
                total_bytes, block_size
            )));
        }
        let block_count = total_bytes.div_ceil(block_size as u64);
        Ok(Self::info(name, block_count - 1))
    }

    pub fn with_repo(mut self, name: impl Into<String>, start: u64, end: u64) -> Self {
        self.repos.push(ShardRange {
            name: name.into(),
            start,
            end,
        });
        self
    }

    pub fn file_name(&self) -> Result<Name> {
        Name::from_uri(&self.name)
    }

    pub fn segment_count(&self) -> u64 {
        self.end_block_id
            .saturating_sub(self.start_block_id)
            .saturating_add(1)
    }

    /// Parse and validate a manifest carrying shard ranges. An empty
    /// payload is a not-found condition.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        if payload.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DifsError::NotFound("empty manifest payload".to_string()));
        }

        let manifest: Manifest = serde_json::from_slice(payload)
            .map_err(|error| DifsError::InvalidManifest(format!("malformed manifest json: {}", error)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Ranges must be non-empty, sorted by start and exactly tile
    /// `[start_block_id, end_block_id]`.
    pub fn validate(&self) -> Result<()> {
        if self.start_block_id != 0 {
            return Err(DifsError::InvalidManifest(format!(
                "manifest for {} starts at segment {}",
                self.name, self.start_block_id
            )));
        }
        if self.start_block_id > self.end_block_id {
            return Err(DifsError::InvalidManifest(format!(
                "manifest for {} has start {} after end {}",
                self.name, self.start_block_id, self.end_block_id
            )));
        }
        if self.end_block_id == u64::MAX {
            return Err(DifsError::InvalidManifest(format!(
                "manifest for {} has no representable segment count",
                self.name
            )));
        }
        if self.repos.is_empty() {
            return Err(DifsError::InvalidManifest(format!(
                "manifest for {} lists no repos",
                self.name
            )));
        }

        let mut ranges: Vec<&ShardRange> = self.repos.iter().collect();
        ranges.sort_by_key(|range| range.start);

        let mut next = self.start_block_id;
        for range in ranges {
            if range.start >= range.end {
                return Err(DifsError::InvalidManifest(format!(
                    "empty shard range [{}, {}) on {}",
                    range.start, range.end, range.name
                )));
            }
            if range.start > next {
                return Err(DifsError::InvalidManifest(format!(
                    "gap in {} between segments {} and {}",
                    self.name, next, range.start
                )));
            }
            if range.start < next {
                return Err(DifsError::InvalidManifest(format!(
                    "shard range [{}, {}) on {} overlaps segment {}",
                    range.start, range.end, range.name, range.start
                )));
            }
            next = range.end;
        }

        if next != self.end_block_id + 1 {
            return Err(DifsError::InvalidManifest(format!(
                "shards of {} cover [0, {}) but the file ends at segment {}",
                self.name, next, self.end_block_id
            )));
        }

        Ok(())
    }
}
