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

//! Realtime Mount Lifecycle
//!
//! [`RtMount`] owns the realtime group's metadata inodes, the summary
//! cache hint array, the superblock mirror with its atomic free-counter
//! replica, and the mount-level locks. All bitmap and summary mutation
//! happens under the group's bitmap lock, which transactions join so
//! commit releases it atomically.

use core::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};

use crate::rtalloc::grow::growfs_rt;
use crate::rtalloc::verify;
use crate::shared::constants::{REXFS_DEFAULT_BLOCK_SIZE, REXFS_DEFAULT_LOG_BLOCKS, REXFS_RBM_INO, REXFS_ROOT_INO, REXFS_RSUM_INO};
use crate::shared::errors::{RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, InodeNumber, SumCount, SumLevel, UserContext};
use crate::shared::utils::validate_block_size;
use crate::storage::block::RtDevice;
use crate::storage::inode::{InodeCore, RexfsInode, RexfsInodeFlags};
use crate::storage::superblock::{RexfsFeatures, RexfsSuperblock, RtGeometry};
use crate::storage::transaction::RexfsTransaction;

use super::bitmap::popcount_prefix;
use super::summary::read_cell;

/// Which realtime metadata inode an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RtMeta {
    Bitmap,
    Summary,
}

/// The realtime group: metadata inodes plus the summary cache hint.
/// Guarded by the group's bitmap lock in [`RtMount`].
pub struct RtGroup {
    bitmap: Option<RexfsInode>,
    summary: Option<RexfsInode>,
    /// Per-bitmap-block exclusive upper bound on the summary classes
    /// with any free run starting there. Soft state: not journaled,
    /// only ever an over-approximation.
    pub(crate) rsum_cache: Vec<u8>,
}

impl RtGroup {
    fn new() -> Self {
        Self {
            bitmap: None,
            summary: None,
            rsum_cache: Vec::new(),
        }
    }

    pub(crate) fn meta(&self, meta: RtMeta) -> RexfsResult<&RexfsInode> {
        let inode = match meta {
            RtMeta::Bitmap => self.bitmap.as_ref(),
            RtMeta::Summary => self.summary.as_ref(),
        };
        inode.ok_or(RexfsError::NotMounted)
    }

    pub(crate) fn meta_mut(&mut self, meta: RtMeta) -> RexfsResult<&mut RexfsInode> {
        let inode = match meta {
            RtMeta::Bitmap => self.bitmap.as_mut(),
            RtMeta::Summary => self.summary.as_mut(),
        };
        inode.ok_or(RexfsError::NotMounted)
    }

    pub(crate) fn inode_by_ino_mut(&mut self, ino: InodeNumber) -> Option<&mut RexfsInode> {
        match ino {
            REXFS_RBM_INO => self.bitmap.as_mut(),
            REXFS_RSUM_INO => self.summary.as_mut(),
            _ => None,
        }
    }
}

/// Mount configuration
#[derive(Debug, Clone, Copy)]
pub struct RtMountConfig {
    /// Filesystem block size in bytes
    pub block_size: u32,
    /// Capacity of the realtime device in filesystem blocks, if one is
    /// attached
    pub rtdev_blocks: Option<u64>,
    /// Log size in blocks; bounds the summary size a grow may reach
    pub log_blocks: u32,
    /// Filesystem feature flags
    pub features: RexfsFeatures,
}

impl Default for RtMountConfig {
    fn default() -> Self {
        Self {
            block_size: REXFS_DEFAULT_BLOCK_SIZE,
            rtdev_blocks: None,
            log_blocks: REXFS_DEFAULT_LOG_BLOCKS,
            features: RexfsFeatures::empty(),
        }
    }
}

/// A mounted realtime region
pub struct RtMount {
    dev: Option<RtDevice>,
    sb: Mutex<RexfsSuperblock>,
    geometry: RwLock<RtGeometry>,
    group: Mutex<RtGroup>,
    root: Mutex<RexfsInode>,
    /// In-core replica of the free-extent counter; delayed reservations
    /// draw from it ahead of their allocation transactions.
    frextents: AtomicU64,
    growlock: Mutex<()>,
}

impl RtMount {
    /// Mount a fresh, unprovisioned realtime region. The region gains
    /// its extents through [`RtMount::grow_rt`].
    pub fn mount(config: RtMountConfig) -> RexfsResult<Self> {
        validate_block_size(config.block_size)?;
        let sb = RexfsSuperblock::new(config.block_size, config.log_blocks, config.features);
        let geometry = RtGeometry::from_superblock(&sb);
        debug!(
            "mounting realtime region: block size {}, device blocks {:?}",
            config.block_size, config.rtdev_blocks
        );
        Ok(Self {
            dev: config.rtdev_blocks.map(RtDevice::new),
            sb: Mutex::new(sb),
            geometry: RwLock::new(geometry),
            group: Mutex::new(RtGroup::new()),
            root: Mutex::new(RexfsInode::new(
                REXFS_ROOT_INO,
                RexfsInodeFlags::RTINHERIT | RexfsInodeFlags::EXTSZINHERIT,
            )),
            frextents: AtomicU64::new(0),
            growlock: Mutex::new(()),
        })
    }

    /// Snapshot of the derived realtime geometry
    pub fn geometry(&self) -> RtGeometry {
        *self.geometry.read()
    }

    /// Snapshot of the superblock
    pub fn superblock(&self) -> RexfsSuperblock {
        *self.sb.lock()
    }

    /// Current free-extent count (in-core replica)
    pub fn frextents(&self) -> u64 {
        self.frextents.load(Ordering::SeqCst)
    }

    /// Begin a transaction against this mount
    pub fn trans_begin(&self) -> RexfsTransaction<'_> {
        RexfsTransaction::new(self)
    }

    /// Grow the realtime region; see the grow module for the rules
    pub fn grow_rt(
        &self,
        user: &UserContext,
        new_rblocks: u64,
        new_rextsize: u32,
    ) -> RexfsResult<()> {
        growfs_rt(self, user, new_rblocks, new_rextsize)
    }

    /// Take free extents out of the in-core counter ahead of a delayed
    /// allocation; the allocation itself then passes `wasdel`.
    pub fn reserve_frextents(&self, count: u64) -> RexfsResult<()> {
        let mut current = self.frextents.load(Ordering::SeqCst);
        loop {
            if current < count {
                return Err(RexfsError::NoSpace);
            }
            match self.frextents.compare_exchange(
                current,
                current - count,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Recompute the free-extent count from the bitmap and reset both
    /// the superblock mirror and the in-core replica. Callers must
    /// ensure no other activity in the filesystem.
    pub fn reinit_frextents(&self) -> RexfsResult<()> {
        let group = self.group.lock();
        let geo = self.geometry();
        let mut count = 0u64;
        if geo.rextents > 0 {
            let bitmap = group.meta(RtMeta::Bitmap)?;
            for bbno in 0..geo.rbmblocks {
                let base = geo.bmblock_to_rtx(bbno);
                let bits = geo.bits_per_bmblock.min(geo.rextents - base) as usize;
                count += popcount_prefix(bitmap.block(bbno)?, bits);
            }
        }
        self.sb.lock().s_frextents = count;
        self.frextents.store(count, Ordering::SeqCst);
        Ok(())
    }

    /// Read one summary counter (count-only scan, no transaction)
    pub fn summary_count(&self, level: SumLevel, bmblock: BlockNumber) -> RexfsResult<SumCount> {
        let geo = self.geometry();
        if level >= geo.rsumlevels || bmblock >= geo.rbmblocks {
            return Err(RexfsError::InvalidArgument(
                "summary cell outside the current geometry".to_string(),
            ));
        }
        let group = self.group.lock();
        let summary = group.meta(RtMeta::Summary)?;
        let (block, offset) = geo.sum_cell(level, bmblock);
        Ok(read_cell(summary.block(block)?, offset))
    }

    /// Recompute every derived structure from the bitmap and verify the
    /// free counter, summary matrix, tail padding, and cache hint
    /// against it.
    pub fn check_consistency(&self) -> RexfsResult<()> {
        verify::check_consistency(self)
    }

    // Crate-internal access for transactions, codecs, and grow.

    pub(crate) fn group_lock(&self) -> MutexGuard<'_, RtGroup> {
        self.group.lock()
    }

    pub(crate) fn sb_lock(&self) -> MutexGuard<'_, RexfsSuperblock> {
        self.sb.lock()
    }

    pub(crate) fn geometry_write(&self) -> RwLockWriteGuard<'_, RtGeometry> {
        self.geometry.write()
    }

    pub(crate) fn frextents_add(&self, delta: i64) {
        if delta >= 0 {
            self.frextents.fetch_add(delta as u64, Ordering::SeqCst);
        } else {
            self.frextents.fetch_sub((-delta) as u64, Ordering::SeqCst);
        }
    }

    pub(crate) fn device(&self) -> Option<&RtDevice> {
        self.dev.as_ref()
    }

    pub(crate) fn try_growlock(&self) -> Option<MutexGuard<'_, ()>> {
        self.growlock.try_lock()
    }

    pub(crate) fn root_core(&self) -> InodeCore {
        self.root.lock().core
    }

    pub(crate) fn restore_root_core(&self, core: InodeCore) {
        self.root.lock().restore_core(core);
    }

    pub(crate) fn set_feature(&self, feature: RexfsFeatures) {
        self.sb.lock().s_features.insert(feature);
    }

    /// Create the bitmap and summary inodes on first grow
    pub(crate) fn ensure_rt_inodes(&self) {
        let mut group = self.group.lock();
        if group.bitmap.is_none() {
            group.bitmap = Some(RexfsInode::new(REXFS_RBM_INO, RexfsInodeFlags::empty()));
        }
        if group.summary.is_none() {
            group.summary = Some(RexfsInode::new(REXFS_RSUM_INO, RexfsInodeFlags::empty()));
        }
    }

    /// Size the summary cache hint for a new bitmap block count,
    /// initialized to the trivially valid maximum. Returns the
    /// previous array for restore on failure.
    pub(crate) fn resize_rsum_cache(&self, rbmblocks: u64) -> Option<Vec<u8>> {
        let mut group = self.group.lock();
        if group.rsum_cache.len() != rbmblocks as usize {
            Some(core::mem::replace(
                &mut group.rsum_cache,
                vec![0xFF; rbmblocks as usize],
            ))
        } else {
            None
        }
    }

    /// Put a saved hint array back after a failed grow, padded out to
    /// whatever geometry the committed steps reached.
    pub(crate) fn restore_rsum_cache(&self, mut old: Vec<u8>) {
        let committed = self.geometry().rbmblocks as usize;
        old.resize(committed, 0xFF);
        self.group.lock().rsum_cache = old;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_validates_block_size() {
        assert!(RtMount::mount(RtMountConfig {
            block_size: 3000,
            ..RtMountConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_fresh_mount_is_empty() {
        let mount = RtMount::mount(RtMountConfig::default()).unwrap();
        assert_eq!(mount.geometry().rextents, 0);
        assert_eq!(mount.frextents(), 0);
        assert!(mount.summary_count(0, 0).is_err());
        mount.check_consistency().unwrap();
    }

    #[test]
    fn test_reinit_frextents_reconciles() {
        let mount = RtMount::mount(RtMountConfig {
            rtdev_blocks: Some(1024),
            ..RtMountConfig::default()
        })
        .unwrap();
        mount.grow_rt(&UserContext::root(), 1024, 1).unwrap();

        let mut tx = mount.trans_begin();
        tx.allocate(&crate::rtalloc::alloc::RtAllocRequest::new(100, 100))
            .unwrap()
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(mount.frextents(), 924);
        mount.reinit_frextents().unwrap();
        assert_eq!(mount.frextents(), 924);
        assert_eq!(mount.superblock().s_frextents, 924);
    }

    #[test]
    fn test_reserve_frextents() {
        let mount = RtMount::mount(RtMountConfig {
            rtdev_blocks: Some(1024),
            ..RtMountConfig::default()
        })
        .unwrap();
        mount.grow_rt(&UserContext::root(), 1024, 1).unwrap();

        mount.reserve_frextents(1000).unwrap();
        assert_eq!(mount.frextents(), 24);
        assert!(mount.reserve_frextents(25).is_err());

        // The delayed allocation only settles the on-disk mirror.
        let mut tx = mount.trans_begin();
        let got = tx
            .allocate(&crate::rtalloc::alloc::RtAllocRequest::new(1000, 1000).with_wasdel())
            .unwrap()
            .unwrap();
        tx.commit().unwrap();
        assert_eq!(got.len, 1000);
        assert_eq!(mount.frextents(), 24);
        assert_eq!(mount.superblock().s_frextents, 24);
        mount.check_consistency().unwrap();
    }
}
