/*
 * RexFS - Realtime Extent File System
 * Copyright 2025 RexFS Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Per-Operation Buffer Cache
//!
//! A realtime operation touches the same bitmap and summary blocks over
//! and over while walking neighboring ranges, so the allocation context
//! pins the most recently used block of each and releases both at
//! well-defined points (strategy fallback, end of operation).

use crate::shared::errors::RexfsResult;
use crate::shared::types::BlockNumber;
use crate::storage::transaction::RexfsTransaction;

use super::mount::RtMeta;

/// Most-recently-used bitmap and summary block cache for one operation
#[derive(Debug, Default)]
pub(crate) struct RtBufCache {
    bitmap: Option<BlockNumber>,
    summary: Option<BlockNumber>,
    hits: u64,
    misses: u64,
}

impl RtBufCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record an access; returns whether the block was already pinned.
    pub(crate) fn note(&mut self, meta: RtMeta, block: BlockNumber) -> bool {
        let slot = match meta {
            RtMeta::Bitmap => &mut self.bitmap,
            RtMeta::Summary => &mut self.summary,
        };
        if *slot == Some(block) {
            self.hits += 1;
            true
        } else {
            *slot = Some(block);
            self.misses += 1;
            false
        }
    }

    /// Release both pinned blocks
    pub(crate) fn release(&mut self) {
        self.bitmap = None;
        self.summary = None;
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Context threaded through one allocation or free operation: the
/// transaction (which carries the group lock) plus the per-operation
/// buffer cache. The bitmap and summary codecs hang off this type; all
/// of them take the geometry as an explicit parameter so grow can run
/// old-geometry and new-geometry views over the same inodes.
pub(crate) struct RtAllocArgs<'t, 'm> {
    pub(crate) tx: &'t mut RexfsTransaction<'m>,
    pub(crate) cache: RtBufCache,
}

impl<'t, 'm> RtAllocArgs<'t, 'm> {
    pub(crate) fn new(tx: &'t mut RexfsTransaction<'m>) -> Self {
        Self {
            tx,
            cache: RtBufCache::new(),
        }
    }

    /// Fetch a metadata block for reading
    pub(crate) fn fetch_block(&mut self, meta: RtMeta, block: BlockNumber) -> RexfsResult<&[u8]> {
        self.cache.note(meta, block);
        self.tx.meta_block(meta, block)
    }

    /// Fetch a metadata block for writing, journaling its before-image
    pub(crate) fn modify_block(
        &mut self,
        meta: RtMeta,
        block: BlockNumber,
    ) -> RexfsResult<&mut [u8]> {
        self.cache.note(meta, block);
        self.tx.log_meta_block(meta, block)?;
        self.tx.meta_block_mut(meta, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_tracks_last_block_per_kind() {
        let mut cache = RtBufCache::new();
        assert!(!cache.note(RtMeta::Bitmap, 0));
        assert!(cache.note(RtMeta::Bitmap, 0));
        assert!(!cache.note(RtMeta::Summary, 0));
        assert!(cache.note(RtMeta::Summary, 0));
        assert!(!cache.note(RtMeta::Bitmap, 1));
        assert!(!cache.note(RtMeta::Bitmap, 0));
        cache.release();
        assert!(!cache.note(RtMeta::Bitmap, 0));
        assert_eq!(cache.stats(), (3, 5));
    }
}
