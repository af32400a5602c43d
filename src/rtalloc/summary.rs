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

//! Realtime Summary Codec
//!
//! The summary is a row-major matrix of u32 little-endian counters in
//! the summary inode's data fork: cell (L, B) counts the maximal free
//! runs of length in [2^L, 2^(L+1)) whose first rtx lands in bitmap
//! block B. The in-memory summary cache holds, per bitmap block, an
//! exclusive upper bound on the classes with any run starting there; it
//! is a soft hint outside the transaction, raised coarsely on increment
//! and tightened monotonically by searches.

use crate::shared::errors::{CorruptionKind, RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, SumCount, SumLevel};
use crate::storage::superblock::RtGeometry;

use super::bufcache::RtAllocArgs;
use super::mount::RtMeta;

/// Read a summary cell from a block buffer
pub(crate) fn read_cell(buf: &[u8], offset: usize) -> SumCount {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn write_cell(buf: &mut [u8], offset: usize, value: SumCount) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl RtAllocArgs<'_, '_> {
    /// Read one summary counter
    pub(crate) fn get_summary(
        &mut self,
        geo: &RtGeometry,
        level: SumLevel,
        bmblock: BlockNumber,
    ) -> RexfsResult<SumCount> {
        debug_assert!(level < geo.rsumlevels);
        debug_assert!(bmblock < geo.rbmblocks);
        let (block, offset) = geo.sum_cell(level, bmblock);
        let buf = self.fetch_block(RtMeta::Summary, block)?;
        Ok(read_cell(buf, offset))
    }

    /// Add a signed delta to one summary counter, journaling the block.
    /// An increment that leaves the cell nonzero raises the cache hint
    /// for the bitmap block, keeping it a valid upper bound.
    pub(crate) fn modify_summary(
        &mut self,
        geo: &RtGeometry,
        level: SumLevel,
        bmblock: BlockNumber,
        delta: i64,
    ) -> RexfsResult<()> {
        debug_assert!(level < geo.rsumlevels);
        debug_assert!(bmblock < geo.rbmblocks);
        if delta == 0 {
            return Ok(());
        }

        let (block, offset) = geo.sum_cell(level, bmblock);
        let buf = self.modify_block(RtMeta::Summary, block)?;
        let new = read_cell(buf, offset) as i64 + delta;
        if new < 0 {
            return Err(RexfsError::Corruption(CorruptionKind::SummaryUnderflow {
                level,
                bmblock,
            }));
        }
        if new > u32::MAX as i64 {
            return Err(RexfsError::Corruption(CorruptionKind::SummaryOverflow {
                level,
                bmblock,
            }));
        }
        write_cell(buf, offset, new as u32);

        if delta > 0 && new > 0 {
            let group = self.tx.group()?;
            let idx = bmblock as usize;
            if idx < group.rsum_cache.len() && (group.rsum_cache[idx] as u32) < level + 1 {
                group.rsum_cache[idx] = (level + 1) as u8;
            }
        }
        Ok(())
    }

    /// Return the highest class in [low, high] with any free run
    /// starting in `bmblock`, consulting and re-tightening the cache
    /// hint. `high` must cover the top class so the tightened bound
    /// stays valid.
    pub(crate) fn any_summary(
        &mut self,
        geo: &RtGeometry,
        low: SumLevel,
        high: SumLevel,
        bmblock: BlockNumber,
    ) -> RexfsResult<Option<SumLevel>> {
        debug_assert!(high == geo.rsumlevels - 1);
        let hint = self.tx.group()?.rsum_cache[bmblock as usize];

        // No runs at classes >= hint.
        let high = (high as i64).min(hint as i64 - 1);
        if low as i64 > high {
            return Ok(None);
        }

        let mut found = None;
        let mut level = high;
        while level >= low as i64 {
            if self.get_summary(geo, level as SumLevel, bmblock)? != 0 {
                found = Some(level as SumLevel);
                break;
            }
            level -= 1;
        }

        let bound = match found {
            Some(level) => level + 1,
            None => low,
        };
        let group = self.tx.group()?;
        if bound < group.rsum_cache[bmblock as usize] as u32 {
            group.rsum_cache[bmblock as usize] = bound as u8;
        }
        Ok(found)
    }

    /// Move every nonzero counter from the old geometry's layout to the
    /// new one. Both views run over the same inode, so iterate classes
    /// and blocks descending: a source cell is always read and zeroed
    /// before any destination cell that could alias it is written.
    pub(crate) fn copy_summary(
        &mut self,
        old: &RtGeometry,
        new: &RtGeometry,
    ) -> RexfsResult<()> {
        for level in (0..old.rsumlevels).rev() {
            for bmblock in (0..old.rbmblocks).rev() {
                let sum = self.get_summary(old, level, bmblock)?;
                if sum == 0 {
                    continue;
                }
                self.modify_summary(old, level, bmblock, -(sum as i64))?;
                self.modify_summary(new, level, bmblock, sum as i64)?;
            }
        }
        self.cache.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtalloc::bufcache::RtAllocArgs;
    use crate::rtalloc::mount::{RtMount, RtMountConfig};
    use crate::shared::types::UserContext;

    fn grown(rblocks: u64) -> RtMount {
        let mount = RtMount::mount(RtMountConfig {
            rtdev_blocks: Some(rblocks),
            ..RtMountConfig::default()
        })
        .unwrap();
        mount.grow_rt(&UserContext::root(), rblocks, 1).unwrap();
        mount
    }

    #[test]
    fn test_cell_roundtrip() {
        let mut buf = vec![0u8; 32];
        write_cell(&mut buf, 8, 0xDEAD_BEEF);
        assert_eq!(read_cell(&buf, 8), 0xDEAD_BEEF);
        assert_eq!(read_cell(&buf, 4), 0);
        assert_eq!(buf[8], 0xEF); // little-endian on disk
    }

    #[test]
    fn test_modify_summary_bounds() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        assert_eq!(args.get_summary(&geo, 8, 0).unwrap(), 1);
        let err = args.modify_summary(&geo, 8, 0, -2).unwrap_err();
        assert!(err.is_corruption());
        args.modify_summary(&geo, 3, 0, 1).unwrap();
        assert_eq!(args.get_summary(&geo, 3, 0).unwrap(), 1);
        tx.cancel();
    }

    #[test]
    fn test_any_summary_tightens_hint() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        // Only class 8 is populated; hint starts at the 0xFF maximum.
        assert_eq!(args.any_summary(&geo, 0, 8, 0).unwrap(), Some(8));
        assert_eq!(args.tx.group().unwrap().rsum_cache[0], 9);

        // Searching strictly above the only run finds nothing and pulls
        // the bound down no further than `low`.
        args.modify_summary(&geo, 8, 0, -1).unwrap();
        assert_eq!(args.any_summary(&geo, 2, 8, 0).unwrap(), None);
        assert_eq!(args.tx.group().unwrap().rsum_cache[0], 2);

        // An increment raises the bound again.
        args.modify_summary(&geo, 5, 0, 1).unwrap();
        assert_eq!(args.tx.group().unwrap().rsum_cache[0], 6);
        assert_eq!(args.any_summary(&geo, 0, 8, 0).unwrap(), Some(5));
        tx.cancel();
    }

    #[test]
    fn test_copy_summary_new_level_same_blocks() {
        // Growing within one bitmap block adds summary levels but keeps
        // every cell at the same offset; the move must tolerate full
        // aliasing.
        let mount = grown(256);
        let geo = mount.geometry();
        let bigger = crate::storage::superblock::RtGeometry::compute(4096, 1, 1024);
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        args.copy_summary(&geo, &bigger).unwrap();
        assert_eq!(args.get_summary(&bigger, 8, 0).unwrap(), 1);
        tx.cancel();
    }
}
