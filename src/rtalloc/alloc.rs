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

//! Top-Level Realtime Allocation
//!
//! The public allocate and free entry points: length alignment against
//! the caller's product factor, strategy selection (near the hint,
//! sequence-seeded placement for initial user data, or size-first),
//! the range update that commits the winner, and the free-extent
//! counter delta. Public interfaces speak filesystem blocks; the
//! search core speaks rtx.

use core::cmp;

use log::trace;

use crate::shared::errors::{CorruptionKind, RexfsError, RexfsResult};
use crate::shared::types::{RtxLen, RtxNumber};
use crate::shared::utils::{highbit64, round_down_to};
use crate::storage::inode::RexfsInodeFlags;
use crate::storage::superblock::{RtGeometry, SbField};
use crate::storage::transaction::RexfsTransaction;

use super::bufcache::RtAllocArgs;
use super::mount::RtMeta;
use super::search::{allocate_extent_near, allocate_extent_size};

/// A realtime allocation request
#[derive(Debug, Clone, Copy)]
pub struct RtAllocRequest {
    /// Preferred position in filesystem blocks, if the caller has a
    /// neighboring extent to place against
    pub bno_hint: Option<u64>,
    /// Minimum acceptable length in filesystem blocks
    pub minlen: u64,
    /// Requested length in filesystem blocks
    pub maxlen: u64,
    /// Length alignment factor in filesystem blocks, from the caller's
    /// extent size hint
    pub prod: u64,
    /// The extents were already taken from the in-core free counter by
    /// a delayed reservation
    pub wasdel: bool,
    /// First allocation of user data at offset 0; spreads files across
    /// the region
    pub initial_user_data: bool,
}

impl RtAllocRequest {
    /// Request between `minlen` and `maxlen` filesystem blocks
    pub fn new(minlen: u64, maxlen: u64) -> Self {
        Self {
            bno_hint: None,
            minlen,
            maxlen,
            prod: 1,
            wasdel: false,
            initial_user_data: false,
        }
    }

    /// Place near the given filesystem block
    pub fn with_hint(mut self, bno: u64) -> Self {
        self.bno_hint = Some(bno);
        self
    }

    /// Align the returned length to a multiple of `prod`
    pub fn with_prod(mut self, prod: u64) -> Self {
        self.prod = prod;
        self
    }

    /// Mark the request as backed by a delayed reservation
    pub fn with_wasdel(mut self) -> Self {
        self.wasdel = true;
        self
    }

    /// Mark the request as the first user-data allocation of a file
    pub fn with_initial_user_data(mut self) -> Self {
        self.initial_user_data = true;
        self
    }
}

/// A successful realtime allocation, in filesystem blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtAllocation {
    /// First filesystem block of the extent
    pub bno: u64,
    /// Length in filesystem blocks
    pub len: u64,
}

/// Align minlen up and maxlen down to the product factor; if that
/// leaves nothing allocatable, go ahead without alignment.
fn align_minmax(minlen: RtxLen, maxlen: RtxLen, prod: RtxLen) -> (RtxLen, RtxLen, RtxLen) {
    let new_max = maxlen - maxlen % prod;
    let slack = minlen % prod;
    let new_min = if slack != 0 { minlen + prod - slack } else { minlen };
    if new_max < new_min {
        return (minlen, maxlen, 1);
    }
    (new_min, new_max, prod)
}

/// Pick a start for the first allocation of a file, spreading files
/// across the region with the van der Corput sequence 0, 1/2, 1/4,
/// 3/4, 1/8, 3/8, .... The sequence counter lives in the bitmap
/// inode's atime-seconds field; NEWRTBM marks the field as repurposed.
fn pick_extent(
    tx: &mut RexfsTransaction<'_>,
    geo: &RtGeometry,
    len: RtxLen,
) -> RexfsResult<RtxNumber> {
    tx.log_meta_inode(RtMeta::Bitmap)?;
    let bitmap = tx.group()?.meta_mut(RtMeta::Bitmap)?;

    let seq = if !bitmap.core.flags.contains(RexfsInodeFlags::NEWRTBM) {
        bitmap.core.flags.insert(RexfsInodeFlags::NEWRTBM);
        0
    } else {
        bitmap.core.atime_sec
    };

    let mut rtx = 0;
    if let Some(log2) = highbit64(seq) {
        let resid = seq - (1u64 << log2);
        rtx = ((geo.rextents as u128 * (2 * resid as u128 + 1)) >> (log2 + 1)) as u64;
        if rtx >= geo.rextents {
            rtx %= geo.rextents;
        }
        if rtx + len > geo.rextents {
            rtx = geo.rextents - len;
        }
    }
    bitmap.core.atime_sec = seq + 1;
    Ok(rtx)
}

/// Allocate a realtime extent. Returns `None` when the search
/// exhausts the region.
pub(crate) fn rtallocate(
    tx: &mut RexfsTransaction<'_>,
    req: &RtAllocRequest,
) -> RexfsResult<Option<RtAllocation>> {
    let mount = tx.mount();
    let geo = mount.geometry();
    if geo.rextents == 0 {
        return Ok(None);
    }

    if req.minlen == 0 || req.minlen > req.maxlen {
        debug_assert!(false, "invalid allocation length bounds");
        return Err(RexfsError::InvalidArgument(
            "allocation length bounds must satisfy 0 < minlen <= maxlen".to_string(),
        ));
    }

    let rextsize = geo.rextsize as u64;
    let mut minlen = cmp::max(1, req.minlen / rextsize);
    let mut maxlen = cmp::max(1, req.maxlen / rextsize);
    let mut prod = cmp::max(1, req.prod / rextsize);

    if prod > 1 {
        let aligned = align_minmax(minlen, maxlen, prod);
        minlen = aligned.0;
        maxlen = aligned.1;
        prod = aligned.2;
    }
    if maxlen > geo.rextents {
        maxlen = round_down_to(geo.rextents, prod);
        if maxlen < minlen {
            return Ok(None);
        }
    }

    tx.join_group();

    // For an allocation to an empty file at offset 0, pick an extent
    // that spaces things out in the realtime region.
    let start = if let Some(hint) = req.bno_hint {
        geo.fsb_to_rtx(hint)
    } else if req.initial_user_data {
        pick_extent(tx, &geo, maxlen)?
    } else {
        0
    };

    let mut args = RtAllocArgs::new(tx);
    let near = if start != 0 {
        match allocate_extent_near(&mut args, &geo, start, minlen, maxlen, prod) {
            Ok(found) => Some(found),
            Err(RexfsError::NoSpace) => {
                trace!("near-hint search at rtx {} exhausted, retrying size-first", start);
                args.cache.release();
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    let (rtx, len) = match near {
        Some(found) => found,
        None => match allocate_extent_size(&mut args, &geo, minlen, maxlen, prod) {
            Ok(found) => found,
            Err(RexfsError::NoSpace) => return Ok(None),
            Err(e) => return Err(e),
        },
    };

    args.allocate_range(&geo, rtx, len)?;
    args.tx.mod_sb(
        if req.wasdel {
            SbField::ResFrextents
        } else {
            SbField::Frextents
        },
        -(len as i64),
    );

    Ok(Some(RtAllocation {
        bno: geo.rtx_to_fsb(rtx),
        len: len * rextsize,
    }))
}

/// Free a realtime extent previously returned by allocate
pub(crate) fn rtfree_extent(
    tx: &mut RexfsTransaction<'_>,
    bno: u64,
    len: u64,
) -> RexfsResult<()> {
    let mount = tx.mount();
    let geo = mount.geometry();
    let rextsize = geo.rextsize as u64;

    if len == 0 || rextsize == 0 || bno % rextsize != 0 || len % rextsize != 0 {
        debug_assert!(false, "misaligned realtime free");
        return Err(RexfsError::InvalidArgument(
            "freed extent must be a whole number of realtime extents".to_string(),
        ));
    }
    let start = geo.fsb_to_rtx(bno);
    let rtxlen = len / rextsize;
    if start + rtxlen > geo.rextents {
        return Err(RexfsError::InvalidArgument(
            "freed extent is outside the realtime region".to_string(),
        ));
    }

    tx.join_group();
    let mut args = RtAllocArgs::new(tx);

    let (stop, all_allocated) = args.check_range(&geo, start, rtxlen, false)?;
    if !all_allocated {
        return Err(RexfsError::Corruption(CorruptionKind::FreeingFreeSpace {
            rtx: stop,
        }));
    }

    args.free_range(&geo, start, rtxlen)?;
    args.tx.mod_sb(SbField::Frextents, rtxlen as i64);
    Ok(())
}

impl RexfsTransaction<'_> {
    /// Allocate a realtime extent within this transaction. Returns
    /// `None` when no space satisfies the request.
    pub fn allocate(&mut self, req: &RtAllocRequest) -> RexfsResult<Option<RtAllocation>> {
        rtallocate(self, req)
    }

    /// Free a realtime extent within this transaction
    pub fn free_extent(&mut self, bno: u64, len: u64) -> RexfsResult<()> {
        rtfree_extent(self, bno, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_minmax() {
        assert_eq!(align_minmax(5, 50, 8), (8, 48, 8));
        assert_eq!(align_minmax(8, 48, 8), (8, 48, 8));
        // Alignment would invert the pair; fall back to no alignment.
        assert_eq!(align_minmax(7, 9, 8), (7, 9, 1));
    }
}
