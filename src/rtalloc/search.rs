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

//! Allocation Search Strategies
//!
//! Three search strategies over the bitmap and summary, all returning
//! an rtx start and length in [minlen, maxlen] aligned down to the
//! product factor:
//!
//! - exact: succeed at the requested start or not at all;
//! - near: exact first, then a zig-zag scan over bitmap blocks by
//!   distance from the hint, using the summary to skip empty blocks;
//! - size-first: walk summary classes from the request size upward,
//!   then smaller classes for partial allocations.

use core::cmp;

use crate::shared::errors::{RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, RtxLen, RtxNumber};
use crate::shared::utils::{log2_floor, round_down_to};
use crate::storage::superblock::RtGeometry;

use super::bufcache::RtAllocArgs;

/// Outcome of scanning a single bitmap block
pub(crate) enum ScanResult {
    /// A suitable run was found
    Found { rtx: RtxNumber, len: RtxLen },
    /// Nothing suitable; `next` is the first rtx past the last region
    /// scanned, so callers can skip forward
    NoSpace { next: RtxNumber },
}

/// Clamp a requested length so it does not run off the end of the
/// region, keeping it a multiple of `prod`.
fn clamp_scan_len(geo: &RtGeometry, start: RtxNumber, maxlen: RtxLen, prod: RtxLen) -> RtxLen {
    let len = cmp::min(geo.rextents, start + maxlen) - start;
    round_down_to(len, prod)
}

/// Largest length worth scanning for given the best summary class with
/// a run starting in a block.
fn max_available(maxlen: RtxLen, maxlog: u32) -> RtxLen {
    if maxlog >= 63 {
        maxlen
    } else {
        cmp::min(maxlen, (1u64 << (maxlog + 1)) - 1)
    }
}

/// Scan free runs starting in bitmap block `bbno` for the leftmost run
/// of at least `maxlen`; failing that, the longest run of at least
/// `minlen` seen (variable-size requests only).
pub(crate) fn allocate_extent_block(
    args: &mut RtAllocArgs<'_, '_>,
    geo: &RtGeometry,
    bbno: BlockNumber,
    minlen: RtxLen,
    maxlen: RtxLen,
    prod: RtxLen,
) -> RexfsResult<ScanResult> {
    let end = cmp::min(geo.rextents, geo.bmblock_to_rtx(bbno + 1)) - 1;
    let mut best: Option<(RtxNumber, RtxLen)> = None;
    let mut next = end + 1;
    let mut i = geo.bmblock_to_rtx(bbno);

    while i <= end {
        let scanlen = clamp_scan_len(geo, i, maxlen, prod);
        if scanlen < minlen {
            break;
        }

        // Probe for scanlen free rtx at i; on failure `stop` is the
        // first allocated rtx in the probed range.
        let (stop, is_free) = args.check_range(geo, i, scanlen, true)?;
        if is_free {
            return Ok(ScanResult::Found { rtx: i, len: scanlen });
        }
        next = stop;

        if minlen < maxlen {
            let thislen = stop - i;
            if thislen >= minlen && best.map_or(true, |(_, len)| thislen > len) {
                best = Some((i, thislen));
            }
        }

        if stop >= end {
            break;
        }
        i = args.find_forw(geo, stop, end)?;
    }

    if let Some((rtx, len)) = best {
        let len = round_down_to(len, prod);
        if len >= minlen {
            return Ok(ScanResult::Found { rtx, len });
        }
    }
    Ok(ScanResult::NoSpace { next })
}

/// Allocate exactly at `start`, or fail
pub(crate) fn allocate_extent_exact(
    args: &mut RtAllocArgs<'_, '_>,
    geo: &RtGeometry,
    start: RtxNumber,
    minlen: RtxLen,
    maxlen: RtxLen,
    prod: RtxLen,
) -> RexfsResult<(RtxNumber, RtxLen)> {
    debug_assert!(prod <= 1 || (minlen % prod == 0 && maxlen % prod == 0));

    let scanlen = clamp_scan_len(geo, start, maxlen, prod);
    if scanlen < minlen {
        return Err(RexfsError::NoSpace);
    }

    let (stop, is_free) = args.check_range(geo, start, scanlen, true)?;
    if is_free {
        return Ok((start, scanlen));
    }

    // Take the free prefix if it still satisfies the minimum.
    let alloclen = round_down_to(stop - start, prod);
    if alloclen < minlen {
        return Err(RexfsError::NoSpace);
    }
    Ok((start, alloclen))
}

/// Outward zig-zag over bitmap-block offsets from a starting block:
/// 0, +1, -1, +2, -2, ..., skipping offsets past either edge and
/// stopping once both sides are exhausted.
pub(crate) struct ZigZagScan {
    bbno: i64,
    last: i64,
    dist: i64,
    pos_next: bool,
}

impl ZigZagScan {
    pub(crate) fn new(bbno: i64, rbmblocks: i64) -> Self {
        debug_assert!(bbno >= 0 && bbno < rbmblocks);
        Self {
            bbno,
            last: rbmblocks - 1,
            dist: 0,
            pos_next: true,
        }
    }
}

impl Iterator for ZigZagScan {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.dist == 0 {
            self.dist = 1;
            return Some(0);
        }
        while self.dist <= cmp::max(self.bbno, self.last - self.bbno) {
            let (offset, in_range) = if self.pos_next {
                (self.dist, self.bbno + self.dist <= self.last)
            } else {
                (-self.dist, self.dist <= self.bbno)
            };
            if self.pos_next {
                self.pos_next = false;
            } else {
                self.pos_next = true;
                self.dist += 1;
            }
            if in_range {
                return Some(offset);
            }
        }
        None
    }
}

/// Allocate as near to `start` as possible
pub(crate) fn allocate_extent_near(
    args: &mut RtAllocArgs<'_, '_>,
    geo: &RtGeometry,
    start: RtxNumber,
    minlen: RtxLen,
    maxlen: RtxLen,
    prod: RtxLen,
) -> RexfsResult<(RtxNumber, RtxLen)> {
    debug_assert!(minlen > 0);
    debug_assert!(prod <= 1 || (minlen % prod == 0 && maxlen % prod == 0));

    let start = cmp::min(start, geo.rextents - 1);

    match allocate_extent_exact(args, geo, start, minlen, maxlen, prod) {
        Err(RexfsError::NoSpace) => {}
        other => return other,
    }

    let bbno = geo.rtx_to_bmblock(start) as i64;
    let log2len = log2_floor(minlen);
    // Lowest negative offset already probed, plus one; blocks above it
    // on the negative side never need a second scan.
    let mut neg_checked: i64 = -1;

    for offset in ZigZagScan::new(bbno, geo.rbmblocks as i64) {
        let block = (bbno + offset) as BlockNumber;
        let maxlog = match args.any_summary(geo, log2len, geo.rsumlevels - 1, block)? {
            Some(maxlog) => maxlog,
            None => continue,
        };
        let maxavail = max_available(maxlen, maxlog);

        if offset >= 0 {
            match allocate_extent_block(args, geo, block, minlen, maxavail, prod)? {
                ScanResult::Found { rtx, len } => return Ok((rtx, len)),
                ScanResult::NoSpace { .. } => {}
            }
        } else {
            // A run counted in this block may reach forward under the
            // blocks between it and the hint; probe those from nearest
            // to farthest before the block itself.
            let maxblocks: i64 = if maxlog == 0 {
                0
            } else if maxlog < geo.blkbit_log {
                1
            } else {
                2i64 << (maxlog - geo.blkbit_log)
            };
            let mut j = cmp::min(offset + maxblocks, neg_checked);
            while j >= offset {
                match allocate_extent_block(args, geo, (bbno + j) as BlockNumber, minlen, maxavail, prod)? {
                    ScanResult::Found { rtx, len } => return Ok((rtx, len)),
                    ScanResult::NoSpace { .. } => {}
                }
                j -= 1;
            }
            neg_checked = offset - 1;
        }
    }
    Err(RexfsError::NoSpace)
}

/// One size-first pass over a single summary class
fn allocate_sumlevel(
    args: &mut RtAllocArgs<'_, '_>,
    geo: &RtGeometry,
    level: u32,
    minlen: RtxLen,
    maxlen: RtxLen,
    prod: RtxLen,
) -> RexfsResult<Option<(RtxNumber, RtxLen)>> {
    let mut bbno = 0;
    while bbno < geo.rbmblocks {
        if args.get_summary(geo, level, bbno)? != 0 {
            match allocate_extent_block(args, geo, bbno, minlen, maxlen, prod)? {
                ScanResult::Found { rtx, len } => return Ok(Some((rtx, len))),
                ScanResult::NoSpace { next } => {
                    // Skip ahead when the scan already covered blocks
                    // past the next one.
                    let next_bbno = geo.rtx_to_bmblock(next);
                    if next_bbno > bbno + 1 {
                        bbno = next_bbno - 1;
                    }
                }
            }
        }
        bbno += 1;
    }
    Ok(None)
}

/// Allocate with no position preference, preferring classes that can
/// hold the full request, then smaller classes for partial results.
pub(crate) fn allocate_extent_size(
    args: &mut RtAllocArgs<'_, '_>,
    geo: &RtGeometry,
    minlen: RtxLen,
    maxlen: RtxLen,
    prod: RtxLen,
) -> RexfsResult<(RtxNumber, RtxLen)> {
    debug_assert!(minlen > 0 && maxlen > 0);
    debug_assert!(prod <= 1 || (minlen % prod == 0 && maxlen % prod == 0));
    debug_assert!(maxlen <= geo.rextents);

    // Any class from log2(maxlen) up can hold the whole request. Only
    // on the first class can a nonzero summary cell fail to satisfy it.
    for level in log2_floor(maxlen)..geo.rsumlevels {
        if let Some(found) = allocate_sumlevel(args, geo, level, minlen, maxlen, prod)? {
            return Ok(found);
        }
    }

    if minlen == maxlen {
        return Err(RexfsError::NoSpace);
    }

    // Partial allocations out of smaller classes, clamping the request
    // into each class's length range.
    let top = log2_floor(maxlen);
    let bottom = log2_floor(minlen);
    for level in (bottom..top).rev() {
        let level_min = cmp::max(minlen, 1u64 << level);
        let level_max = cmp::min(maxlen, (1u64 << (level + 1)) - 1);
        if let Some(found) = allocate_sumlevel(args, geo, level, level_min, level_max, prod)? {
            return Ok(found);
        }
    }
    Err(RexfsError::NoSpace)
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_zigzag_order() {
        let offsets: Vec<i64> = ZigZagScan::new(2, 5).collect();
        assert_eq!(offsets, vec![0, 1, -1, 2, -2]);

        let offsets: Vec<i64> = ZigZagScan::new(0, 4).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3]);

        let offsets: Vec<i64> = ZigZagScan::new(3, 4).collect();
        assert_eq!(offsets, vec![0, -1, -2, -3]);

        let offsets: Vec<i64> = ZigZagScan::new(0, 1).collect();
        assert_eq!(offsets, vec![0]);

        let offsets: Vec<i64> = ZigZagScan::new(1, 5).collect();
        assert_eq!(offsets, vec![0, 1, -1, 2, 3]);
    }

    #[test]
    fn test_exact_takes_free_prefix() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        args.allocate_range(&geo, 50, 10).unwrap();
        assert_eq!(
            allocate_extent_exact(&mut args, &geo, 10, 1, 100, 1).unwrap(),
            (10, 40)
        );
        assert!(matches!(
            allocate_extent_exact(&mut args, &geo, 45, 10, 10, 1),
            Err(RexfsError::NoSpace)
        ));
        // Clamped at the end of the region.
        assert_eq!(
            allocate_extent_exact(&mut args, &geo, 250, 1, 20, 1).unwrap(),
            (250, 6)
        );
        tx.cancel();
    }

    #[test]
    fn test_block_scan_prefers_leftmost_full_fit() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        // Free runs: [0, 20), [30, 45), [50, 256).
        args.allocate_range(&geo, 20, 10).unwrap();
        args.allocate_range(&geo, 45, 5).unwrap();

        match allocate_extent_block(&mut args, &geo, 0, 1, 18, 1).unwrap() {
            ScanResult::Found { rtx, len } => {
                assert_eq!((rtx, len), (0, 18));
            }
            ScanResult::NoSpace { .. } => panic!("expected a fit"),
        }

        // No run holds 300, so the longest >= minlen wins.
        match allocate_extent_block(&mut args, &geo, 0, 10, 300, 1).unwrap() {
            ScanResult::Found { rtx, len } => {
                assert_eq!((rtx, len), (50, 206));
            }
            ScanResult::NoSpace { .. } => panic!("expected best-effort fit"),
        }

        // Fixed-size request bigger than any run fails.
        match allocate_extent_block(&mut args, &geo, 0, 250, 250, 1).unwrap() {
            ScanResult::Found { .. } => panic!("no run holds 250"),
            ScanResult::NoSpace { .. } => {}
        }
        tx.cancel();
    }

    #[test]
    fn test_size_first_walks_classes_upward() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        // Free runs: [0, 10) class 3, [20, 84) class 6, [100, 256) class 7.
        args.allocate_range(&geo, 10, 10).unwrap();
        args.allocate_range(&geo, 84, 16).unwrap();

        // A request of 32 starts at class 5; first populated class with
        // a fit is 6.
        assert_eq!(
            allocate_extent_size(&mut args, &geo, 32, 32, 1).unwrap(),
            (20, 32)
        );

        // A fixed request no run can hold fails outright.
        assert!(matches!(
            allocate_extent_size(&mut args, &geo, 200, 200, 1),
            Err(RexfsError::NoSpace)
        ));

        // A variable request falls back to smaller classes.
        assert_eq!(
            allocate_extent_size(&mut args, &geo, 5, 200, 1).unwrap(),
            (100, 156)
        );
        tx.cancel();
    }

    #[test]
    fn test_near_scans_negative_side() {
        let mount = grown(65536);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        // Fill all of bitmap block 1, leaving space only in block 0.
        args.allocate_range(&geo, 32768, 32768).unwrap();
        let (rtx, len) = allocate_extent_near(&mut args, &geo, 40000, 1, 100, 1).unwrap();
        assert_eq!((rtx, len), (0, 100));
        tx.cancel();
    }
}
