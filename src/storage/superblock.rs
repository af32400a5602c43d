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

//! Superblock and Realtime Geometry
//!
//! The superblock holds the primary realtime fields (region size, extent
//! size, free-extent count); everything else about the region's shape is
//! derived into an immutable [`RtGeometry`] descriptor. Grow projects a
//! trial geometry from candidate primaries without touching the live
//! superblock, so the codecs take geometry as an explicit parameter and
//! can compose old and new views over the same inodes.

use bitflags::bitflags;

use crate::shared::constants::*;
use crate::shared::errors::{RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, RtxNumber, SumLevel};
use crate::shared::utils::{blocks_for_size, log2_floor};

bitflags! {
    /// Superblock feature flags
    pub struct RexfsFeatures: u32 {
        /// A realtime region is present
        const REALTIME = 0x01;
        /// Reverse-mapping btree
        const RMAPBT   = 0x02;
        /// Reference-counted shared extents
        const REFLINK  = 0x04;
        /// Quota accounting
        const QUOTA    = 0x08;
    }
}

/// Superblock fields a transaction may log deltas against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SbField {
    /// Realtime region size in filesystem blocks
    Rblocks,
    /// Realtime extent size in filesystem blocks
    Rextsize,
    /// Realtime extent count
    Rextents,
    /// Realtime bitmap block count
    Rbmblocks,
    /// log2 of the realtime extent count
    Rextslog,
    /// Free realtime extents
    Frextents,
    /// Free realtime extents already taken by a delayed reservation;
    /// adjusts the on-disk mirror only
    ResFrextents,
}

/// RexFS in-core superblock (realtime fields)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RexfsSuperblock {
    /// Magic number (REXFS_SUPER_MAGIC)
    pub s_magic: u64,

    /// Block size in bytes
    pub s_block_size: u32,

    /// Realtime region size in filesystem blocks
    pub s_rblocks: u64,

    /// Realtime extent size in filesystem blocks
    pub s_rextsize: u32,

    /// Realtime extent count
    pub s_rextents: u64,

    /// Realtime bitmap block count
    pub s_rbmblocks: u64,

    /// log2 of the realtime extent count
    pub s_rextslog: u32,

    /// Free realtime extents
    pub s_frextents: u64,

    /// Log size in blocks
    pub s_logblocks: u32,

    /// Feature flags
    pub s_features: RexfsFeatures,
}

impl RexfsSuperblock {
    /// Create a fresh superblock with no realtime region provisioned
    pub fn new(block_size: u32, logblocks: u32, features: RexfsFeatures) -> Self {
        Self {
            s_magic: REXFS_SUPER_MAGIC,
            s_block_size: block_size,
            s_rblocks: 0,
            s_rextsize: 0,
            s_rextents: 0,
            s_rbmblocks: 0,
            s_rextslog: 0,
            s_frextents: 0,
            s_logblocks: logblocks,
            s_features: features,
        }
    }

    /// Apply a journaled field delta. Counters refusing to go negative
    /// or overflow their width is the last line of defense against a
    /// corrupted transaction.
    pub fn apply_delta(&mut self, field: SbField, delta: i64) -> RexfsResult<()> {
        fn checked_u64(value: u64, delta: i64) -> RexfsResult<u64> {
            let new = value as i64 + delta;
            if new < 0 {
                return Err(RexfsError::Internal(format!(
                    "superblock counter would go negative: {} {:+}",
                    value, delta
                )));
            }
            Ok(new as u64)
        }

        match field {
            SbField::Rblocks => self.s_rblocks = checked_u64(self.s_rblocks, delta)?,
            SbField::Rextsize => {
                self.s_rextsize = checked_u64(self.s_rextsize as u64, delta)? as u32
            }
            SbField::Rextents => self.s_rextents = checked_u64(self.s_rextents, delta)?,
            SbField::Rbmblocks => self.s_rbmblocks = checked_u64(self.s_rbmblocks, delta)?,
            SbField::Rextslog => {
                self.s_rextslog = checked_u64(self.s_rextslog as u64, delta)? as u32
            }
            SbField::Frextents | SbField::ResFrextents => {
                self.s_frextents = checked_u64(self.s_frextents, delta)?
            }
        }
        Ok(())
    }
}

/// Derived realtime geometry descriptor.
///
/// All fields follow from `(block_size, rextsize, rblocks)`. The
/// descriptor is a small `Copy` value; grow builds trial descriptors
/// from candidate primaries and passes them alongside the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtGeometry {
    /// Filesystem block size in bytes
    pub block_size: u32,
    /// Realtime extent size in filesystem blocks
    pub rextsize: u32,
    /// Realtime region size in filesystem blocks
    pub rblocks: u64,
    /// Realtime extent count
    pub rextents: u64,
    /// Bitmap block count
    pub rbmblocks: u64,
    /// log2 of the extent count
    pub rextslog: u32,
    /// Summary size-class count (rextslog + 1)
    pub rsumlevels: u32,
    /// Summary block count
    pub rsumblocks: u64,
    /// Bitmap bits per bitmap block (block_size * 8)
    pub bits_per_bmblock: u64,
    /// log2 of bits_per_bmblock
    pub blkbit_log: u32,
}

impl RtGeometry {
    /// Derive the full geometry from the primary fields. A zero
    /// `rextsize` or `rblocks` yields the empty geometry.
    pub fn compute(block_size: u32, rextsize: u32, rblocks: u64) -> Self {
        let bits_per_bmblock = block_size as u64 * REXFS_NBBY as u64;
        let blkbit_log = log2_floor(bits_per_bmblock);

        let rextents = if rextsize == 0 { 0 } else { rblocks / rextsize as u64 };
        let rbmblocks = (rextents + bits_per_bmblock - 1) / bits_per_bmblock;
        let rextslog = log2_floor(rextents);
        let rsumlevels = rextslog + 1;
        let rsumblocks = blocks_for_size(
            rsumlevels as u64 * rbmblocks * REXFS_SUMMARY_CELL_SIZE as u64,
            block_size,
        );

        Self {
            block_size,
            rextsize,
            rblocks,
            rextents,
            rbmblocks,
            rextslog,
            rsumlevels,
            rsumblocks,
            bits_per_bmblock,
            blkbit_log,
        }
    }

    /// Derive the geometry recorded by a superblock
    pub fn from_superblock(sb: &RexfsSuperblock) -> Self {
        Self::compute(sb.s_block_size, sb.s_rextsize, sb.s_rblocks)
    }

    /// Bitmap block holding the bit for an rtx
    pub fn rtx_to_bmblock(&self, rtx: RtxNumber) -> BlockNumber {
        rtx >> self.blkbit_log
    }

    /// First rtx covered by a bitmap block
    pub fn bmblock_to_rtx(&self, bmblock: BlockNumber) -> RtxNumber {
        bmblock << self.blkbit_log
    }

    /// Location of a summary cell: (summary block, byte offset within)
    pub fn sum_cell(&self, level: SumLevel, bmblock: BlockNumber) -> (BlockNumber, usize) {
        let byte = (level as u64 * self.rbmblocks + bmblock) * REXFS_SUMMARY_CELL_SIZE as u64;
        (
            byte / self.block_size as u64,
            (byte % self.block_size as u64) as usize,
        )
    }

    /// Convert a filesystem-block position to an rtx number
    pub fn fsb_to_rtx(&self, fsb: u64) -> RtxNumber {
        fsb / self.rextsize as u64
    }

    /// Convert an rtx number to its first filesystem block
    pub fn rtx_to_fsb(&self, rtx: RtxNumber) -> u64 {
        rtx * self.rextsize as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_small_region() {
        let geo = RtGeometry::compute(4096, 1, 256);
        assert_eq!(geo.rextents, 256);
        assert_eq!(geo.rbmblocks, 1);
        assert_eq!(geo.rextslog, 8);
        assert_eq!(geo.rsumlevels, 9);
        assert_eq!(geo.rsumblocks, 1);
        assert_eq!(geo.bits_per_bmblock, 32768);
        assert_eq!(geo.blkbit_log, 15);
    }

    #[test]
    fn test_geometry_two_bitmap_blocks() {
        let geo = RtGeometry::compute(4096, 1, 65536);
        assert_eq!(geo.rextents, 65536);
        assert_eq!(geo.rbmblocks, 2);
        assert_eq!(geo.rextslog, 16);
        assert_eq!(geo.rsumlevels, 17);
        assert_eq!(geo.rsumblocks, 1);
    }

    #[test]
    fn test_geometry_empty() {
        let geo = RtGeometry::compute(4096, 0, 0);
        assert_eq!(geo.rextents, 0);
        assert_eq!(geo.rbmblocks, 0);
        assert_eq!(geo.rsumblocks, 0);
    }

    #[test]
    fn test_rtx_bmblock_mapping() {
        let geo = RtGeometry::compute(4096, 1, 65536);
        assert_eq!(geo.rtx_to_bmblock(0), 0);
        assert_eq!(geo.rtx_to_bmblock(32767), 0);
        assert_eq!(geo.rtx_to_bmblock(32768), 1);
        assert_eq!(geo.bmblock_to_rtx(1), 32768);
    }

    #[test]
    fn test_sum_cell_layout() {
        let geo = RtGeometry::compute(4096, 1, 65536);
        // rbmblocks = 2: cell (L, B) lives at byte (L * 2 + B) * 4
        assert_eq!(geo.sum_cell(0, 0), (0, 0));
        assert_eq!(geo.sum_cell(0, 1), (0, 4));
        assert_eq!(geo.sum_cell(1, 0), (0, 8));
        assert_eq!(geo.sum_cell(16, 1), (0, 132));
    }

    #[test]
    fn test_apply_delta() {
        let mut sb = RexfsSuperblock::new(4096, 2048, RexfsFeatures::empty());
        sb.apply_delta(SbField::Rblocks, 256).unwrap();
        sb.apply_delta(SbField::Frextents, 256).unwrap();
        assert_eq!(sb.s_rblocks, 256);
        assert_eq!(sb.s_frextents, 256);
        sb.apply_delta(SbField::Frextents, -256).unwrap();
        assert_eq!(sb.s_frextents, 0);
        assert!(sb.apply_delta(SbField::Frextents, -1).is_err());
    }
}
