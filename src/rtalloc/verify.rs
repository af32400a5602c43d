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

//! Consistency Checker
//!
//! Recomputes every structure derived from the bitmap — the free-extent
//! count, the full summary matrix, the tail padding, and the summary
//! cache hint bound — and verifies the stored state against it. Runs
//! under the group lock with no transaction; this is the allocator's
//! fsck.

use hashbrown::HashMap;

use crate::shared::errors::{CorruptionKind, RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, RtxNumber, SumCount, SumLevel};
use crate::shared::utils::log2_floor;
use crate::storage::inode::RexfsInode;
use crate::storage::superblock::RtGeometry;

use super::bitmap::{popcount_prefix, scan_mismatch};
use super::mount::{RtMeta, RtMount};
use super::summary::read_cell;

fn bit_at(bitmap: &RexfsInode, geo: &RtGeometry, rtx: RtxNumber) -> RexfsResult<bool> {
    let bbno = geo.rtx_to_bmblock(rtx);
    let bit = (rtx - geo.bmblock_to_rtx(bbno)) as usize;
    let buf = bitmap.block(bbno)?;
    Ok(buf[bit / 8] >> (bit % 8) & 1 == 1)
}

/// Exclusive end of the maximal same-state run containing `rtx`,
/// capped at the region end.
fn run_end(
    bitmap: &RexfsInode,
    geo: &RtGeometry,
    rtx: RtxNumber,
    state: bool,
) -> RexfsResult<RtxNumber> {
    let mut pos = rtx;
    while pos < geo.rextents {
        let bbno = geo.rtx_to_bmblock(pos);
        let base = geo.bmblock_to_rtx(bbno);
        let lo = (pos - base) as usize;
        let hi = (geo.rextents - base).min(geo.bits_per_bmblock) as usize;
        let buf = bitmap.block(bbno)?;
        if let Some(bit) = scan_mismatch(buf, lo, hi, state) {
            return Ok(base + bit as u64);
        }
        pos = base + hi as u64;
    }
    Ok(geo.rextents)
}

pub(crate) fn check_consistency(mount: &RtMount) -> RexfsResult<()> {
    let geo = mount.geometry();
    let group = mount.group_lock();
    let sb = *mount.sb_lock();

    if geo.rextents == 0 {
        if sb.s_frextents != 0 || mount.frextents() != 0 {
            return Err(RexfsError::Corruption(CorruptionKind::FreeCountMismatch {
                counted: 0,
                recorded: sb.s_frextents,
            }));
        }
        return Ok(());
    }

    let bitmap = group.meta(RtMeta::Bitmap)?;
    let summary = group.meta(RtMeta::Summary)?;

    // Population count and tail padding.
    let mut counted = 0u64;
    for bbno in 0..geo.rbmblocks {
        let base = geo.bmblock_to_rtx(bbno);
        let used = (geo.rextents - base).min(geo.bits_per_bmblock) as usize;
        let buf = bitmap.block(bbno)?;
        counted += popcount_prefix(buf, used);
        if used < geo.bits_per_bmblock as usize
            && scan_mismatch(buf, used, geo.bits_per_bmblock as usize, false).is_some()
        {
            return Err(RexfsError::Corruption(CorruptionKind::TailBitsSet));
        }
    }
    if counted != sb.s_frextents {
        return Err(RexfsError::Corruption(CorruptionKind::FreeCountMismatch {
            counted,
            recorded: sb.s_frextents,
        }));
    }
    // The replica may run below the mirror while reservations are
    // outstanding, never above it.
    if mount.frextents() > sb.s_frextents {
        return Err(RexfsError::Corruption(CorruptionKind::FreeCountMismatch {
            counted,
            recorded: mount.frextents(),
        }));
    }

    // Recompute the summary matrix from the maximal free runs, and
    // check the cache hint upper-bounds each run's class on the way.
    let mut expected: HashMap<(SumLevel, BlockNumber), SumCount> = HashMap::new();
    let mut pos: RtxNumber = 0;
    while pos < geo.rextents {
        let free = bit_at(bitmap, &geo, pos)?;
        let end = run_end(bitmap, &geo, pos, free)?;
        if free {
            let class = log2_floor(end - pos);
            let bmblock = geo.rtx_to_bmblock(pos);
            *expected.entry((class, bmblock)).or_insert(0) += 1;
            if (group.rsum_cache[bmblock as usize] as u32) <= class {
                return Err(RexfsError::Corruption(CorruptionKind::HintTooLow { bmblock }));
            }
        }
        pos = end;
    }

    for level in 0..geo.rsumlevels {
        for bmblock in 0..geo.rbmblocks {
            let (block, offset) = geo.sum_cell(level, bmblock);
            let stored = read_cell(summary.block(block)?, offset);
            let computed = expected.get(&(level, bmblock)).copied().unwrap_or(0);
            if stored != computed {
                return Err(RexfsError::Corruption(CorruptionKind::SummaryMismatch {
                    level,
                    bmblock,
                }));
            }
        }
    }
    Ok(())
}
