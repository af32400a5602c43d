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

//! Realtime Region Grow
//!
//! Online growth of the realtime region: after validating the target,
//! the bitmap and summary inodes are extended to their final block
//! counts, then the region is advanced one bitmap block at a time.
//! Each step runs in its own transaction against a trial geometry
//! projected from the step's block count, so a failure leaves every
//! previously committed step standing and the region simply shorter
//! than requested; the next grow resumes from the new end.

use core::cmp;

use log::{debug, trace, warn};

use crate::shared::constants::{REXFS_MAX_RTEXTSIZE, REXFS_MIN_RTEXTSIZE};
use crate::shared::errors::{RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, UserContext};
use crate::storage::inode::RexfsInodeFlags;
use crate::storage::superblock::{RexfsFeatures, RtGeometry, SbField};

use super::bufcache::RtAllocArgs;
use super::mount::{RtMeta, RtMount};

/// Last bitmap block currently in use; the next grow step starts
/// there, or at the following block when the current one is exactly
/// full. Handles the empty region too.
fn last_rt_bmblock(geo: &RtGeometry) -> BlockNumber {
    let mut bmbno = geo.rbmblocks;
    if geo.rextents % geo.bits_per_bmblock != 0 {
        bmbno -= 1;
    }
    bmbno
}

/// Extend the bitmap and summary inodes' data forks to the target
/// geometry's block counts, one transaction each. On-disk sizes stay
/// behind; the per-bitmap-block steps move them forward.
fn grow_alloc_blocks(mount: &RtMount, target: &RtGeometry) -> RexfsResult<()> {
    for (meta, nblocks) in [
        (RtMeta::Bitmap, target.rbmblocks),
        (RtMeta::Summary, target.rsumblocks),
    ] {
        let mut tx = mount.trans_begin();
        tx.join_group();
        let current = tx.group()?.meta(meta)?.core.nblocks;
        if nblocks > current {
            tx.log_meta_inode(meta)?;
            tx.group()?
                .meta_mut(meta)?
                .extend_fork(nblocks - current, target.block_size);
            tx.commit()?;
        } else {
            tx.cancel();
        }
    }
    Ok(())
}

/// One grow step: bring the region up to the capacity of bitmap block
/// `bmbno` (clamped to the overall target), in a single transaction.
fn grow_rt_bmblock(
    mount: &RtMount,
    new_rblocks: u64,
    new_rextsize: u32,
    bmbno: BlockNumber,
) -> RexfsResult<()> {
    let ogeo = mount.geometry();
    let step_rblocks = cmp::min(
        new_rblocks,
        (bmbno + 1) * ogeo.bits_per_bmblock * new_rextsize as u64,
    );
    let ngeo = RtGeometry::compute(ogeo.block_size, new_rextsize, step_rblocks);

    let mut tx = mount.trans_begin();
    tx.join_group();

    tx.set_meta_size(RtMeta::Bitmap, ngeo.rbmblocks * ngeo.block_size as u64)?;
    tx.set_meta_size(RtMeta::Summary, ngeo.rsumblocks * ngeo.block_size as u64)?;

    let mut args = RtAllocArgs::new(&mut tx);

    // Rewrite the summary into the new layout when its shape changes.
    if ogeo.rbmblocks != ngeo.rbmblocks || ogeo.rsumlevels != ngeo.rsumlevels {
        args.copy_summary(&ogeo, &ngeo)?;
    }

    if ngeo.rextsize != ogeo.rextsize {
        args.tx
            .mod_sb(SbField::Rextsize, ngeo.rextsize as i64 - ogeo.rextsize as i64);
    }
    if ngeo.rbmblocks != ogeo.rbmblocks {
        args.tx
            .mod_sb(SbField::Rbmblocks, ngeo.rbmblocks as i64 - ogeo.rbmblocks as i64);
    }
    if ngeo.rblocks != ogeo.rblocks {
        args.tx
            .mod_sb(SbField::Rblocks, ngeo.rblocks as i64 - ogeo.rblocks as i64);
    }
    if ngeo.rextents != ogeo.rextents {
        args.tx
            .mod_sb(SbField::Rextents, ngeo.rextents as i64 - ogeo.rextents as i64);
    }
    if ngeo.rextslog != ogeo.rextslog {
        args.tx
            .mod_sb(SbField::Rextslog, ngeo.rextslog as i64 - ogeo.rextslog as i64);
    }

    // Free the new extent interval; this rebuilds the summary for it.
    let freed = ngeo.rextents - ogeo.rextents;
    debug_assert!(freed > 0);
    args.free_range(&ngeo, ogeo.rextents, freed)?;
    args.cache.release();
    args.tx.mod_sb(SbField::Frextents, freed as i64);

    trace!(
        "realtime grow step: bitmap block {}, {} extents added",
        bmbno,
        freed
    );
    tx.commit()?;
    mount.set_feature(RexfsFeatures::REALTIME);
    Ok(())
}

/// Setting the extent size for the first time can leave the root
/// directory's inherited extent size hint incongruent; re-log the root
/// inode so the hint is revalidated.
fn fixup_root_extsize(mount: &RtMount) -> RexfsResult<()> {
    let flags = mount.root_core().flags;
    if !flags.contains(RexfsInodeFlags::RTINHERIT)
        || !flags.contains(RexfsInodeFlags::EXTSZINHERIT)
    {
        return Ok(());
    }
    trace!("revalidating root inode extent size hint");
    let mut tx = mount.trans_begin();
    tx.log_root_inode();
    tx.commit()
}

/// Grow the realtime region to `new_rblocks` filesystem blocks with
/// extents of `new_rextsize` filesystem blocks. Shrinking is not
/// supported, and the extent size is fixed once the region exists.
pub(crate) fn growfs_rt(
    mount: &RtMount,
    user: &UserContext,
    new_rblocks: u64,
    new_rextsize: u32,
) -> RexfsResult<()> {
    if !user.is_privileged() {
        return Err(RexfsError::PermissionDenied(
            "growing the realtime region requires privilege".to_string(),
        ));
    }
    let dev = mount.device().ok_or(RexfsError::NotRealtime)?;
    let _grow_guard = mount.try_growlock().ok_or(RexfsError::Busy)?;

    let old_sb = mount.superblock();
    if new_rblocks <= old_sb.s_rblocks {
        return Err(RexfsError::InvalidArgument(
            "realtime region cannot shrink".to_string(),
        ));
    }
    if old_sb.s_rblocks > 0 && new_rextsize != old_sb.s_rextsize {
        return Err(RexfsError::InvalidArgument(
            "extent size is fixed once the region exists".to_string(),
        ));
    }
    let extsize_bytes = new_rextsize as u64 * old_sb.s_block_size as u64;
    if extsize_bytes < REXFS_MIN_RTEXTSIZE || extsize_bytes > REXFS_MAX_RTEXTSIZE {
        return Err(RexfsError::InvalidArgument(format!(
            "extent size of {} bytes outside supported range",
            extsize_bytes
        )));
    }
    if old_sb
        .s_features
        .intersects(RexfsFeatures::RMAPBT | RexfsFeatures::REFLINK | RexfsFeatures::QUOTA)
    {
        return Err(RexfsError::Unsupported(
            "realtime region with rmapbt, reflink or quota".to_string(),
        ));
    }

    // The last claimed block must exist on the device.
    dev.read_uncached(new_rblocks - 1)
        .map_err(|_| RexfsError::TooBig)?;

    let target = RtGeometry::compute(old_sb.s_block_size, new_rextsize, new_rblocks);
    if target.rextents == 0 {
        return Err(RexfsError::InvalidArgument(
            "resulting extent count is zero".to_string(),
        ));
    }
    if target.rextents <= mount.geometry().rextents {
        return Err(RexfsError::InvalidArgument(
            "grow adds no whole extents".to_string(),
        ));
    }
    // The summary is logged wholesale during grow steps; keep it small
    // enough for the log.
    if target.rsumblocks > (old_sb.s_logblocks as u64) >> 1 {
        return Err(RexfsError::InvalidArgument(
            "summary would exceed half the log capacity".to_string(),
        ));
    }

    debug!(
        "growing realtime region from {} to {} blocks ({} extents)",
        old_sb.s_rblocks, new_rblocks, target.rextents
    );

    mount.ensure_rt_inodes();
    grow_alloc_blocks(mount, &target)?;
    let old_cache = mount.resize_rsum_cache(target.rbmblocks);

    let first = last_rt_bmblock(&mount.geometry());
    for bmbno in first..target.rbmblocks {
        if let Err(e) = grow_rt_bmblock(mount, new_rblocks, new_rextsize, bmbno) {
            warn!("realtime grow failed at bitmap block {}: {}", bmbno, e);
            if let Some(old) = old_cache {
                mount.restore_rsum_cache(old);
            }
            return Err(e);
        }
    }

    if old_sb.s_rextsize != new_rextsize {
        fixup_root_extsize(mount)?;
    }
    Ok(())
}
