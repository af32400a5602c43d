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

//! Transactions
//!
//! Every bitmap, summary, superblock, and inode-core mutation flows
//! through a transaction. Logged blocks keep a before-image on first
//! touch, superblock field changes accumulate as signed deltas applied
//! at commit, and the realtime group's bitmap lock is joined to the
//! transaction so commit and cancel release it atomically. Cancelling
//! (or dropping an active transaction) restores every before-image;
//! the in-memory summary cache hint is deliberately outside the
//! transaction and keeps its stale upper bounds.

use hashbrown::HashMap;
use parking_lot::MutexGuard;

use crate::rtalloc::mount::{RtGroup, RtMeta, RtMount};
use crate::shared::constants::REXFS_ROOT_INO;
use crate::shared::errors::{RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, InodeNumber};
use crate::storage::inode::InodeCore;
use crate::storage::superblock::{RtGeometry, SbField};

/// Transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Building operations
    Active,
    /// Committed; all changes applied
    Committed,
    /// Cancelled; all changes rolled back
    Cancelled,
}

/// A RexFS transaction
pub struct RexfsTransaction<'m> {
    mount: &'m RtMount,
    state: TransactionState,
    group: Option<MutexGuard<'m, RtGroup>>,
    block_undo: HashMap<(InodeNumber, BlockNumber), Box<[u8]>>,
    inode_undo: HashMap<InodeNumber, InodeCore>,
    sb_deltas: Vec<(SbField, i64)>,
}

impl<'m> RexfsTransaction<'m> {
    pub(crate) fn new(mount: &'m RtMount) -> Self {
        Self {
            mount,
            state: TransactionState::Active,
            group: None,
            block_undo: HashMap::new(),
            inode_undo: HashMap::new(),
            sb_deltas: Vec::new(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn mount(&self) -> &'m RtMount {
        self.mount
    }

    /// Take the group's bitmap lock and join it to this transaction, so
    /// commit or cancel releases it.
    pub(crate) fn join_group(&mut self) {
        if self.group.is_none() {
            self.group = Some(self.mount.group_lock());
        }
    }

    pub(crate) fn group(&mut self) -> RexfsResult<&mut RtGroup> {
        match self.group.as_deref_mut() {
            Some(group) => Ok(group),
            None => Err(RexfsError::Internal(
                "transaction not joined to the realtime group".to_string(),
            )),
        }
    }

    fn group_ref(&self) -> RexfsResult<&RtGroup> {
        match self.group.as_deref() {
            Some(group) => Ok(group),
            None => Err(RexfsError::Internal(
                "transaction not joined to the realtime group".to_string(),
            )),
        }
    }

    /// Record the before-image of a metadata block, once per block per
    /// transaction.
    pub(crate) fn log_meta_block(&mut self, meta: RtMeta, block: BlockNumber) -> RexfsResult<()> {
        let key;
        let image: Box<[u8]>;
        {
            let group = match self.group.as_deref() {
                Some(group) => group,
                None => {
                    return Err(RexfsError::Internal(
                        "transaction not joined to the realtime group".to_string(),
                    ))
                }
            };
            let inode = group.meta(meta)?;
            key = (inode.ino, block);
            if self.block_undo.contains_key(&key) {
                return Ok(());
            }
            image = inode.block(block)?.into();
        }
        self.block_undo.insert(key, image);
        Ok(())
    }

    /// Borrow a metadata block for reading
    pub(crate) fn meta_block(&self, meta: RtMeta, block: BlockNumber) -> RexfsResult<&[u8]> {
        self.group_ref()?.meta(meta)?.block(block)
    }

    /// Borrow a metadata block for writing; the caller must have logged
    /// it first.
    pub(crate) fn meta_block_mut(
        &mut self,
        meta: RtMeta,
        block: BlockNumber,
    ) -> RexfsResult<&mut [u8]> {
        self.group()?.meta_mut(meta)?.block_mut(block)
    }

    /// Record the before-image of a metadata inode's core
    pub(crate) fn log_meta_inode(&mut self, meta: RtMeta) -> RexfsResult<()> {
        let (ino, core) = {
            let inode = self.group_ref()?.meta(meta)?;
            (inode.ino, inode.core)
        };
        self.inode_undo.entry(ino).or_insert(core);
        Ok(())
    }

    /// Log and update a metadata inode's on-disk size
    pub(crate) fn set_meta_size(&mut self, meta: RtMeta, size: u64) -> RexfsResult<()> {
        self.log_meta_inode(meta)?;
        self.group()?.meta_mut(meta)?.core.size = size;
        Ok(())
    }

    /// Record the before-image of the root inode's core
    pub(crate) fn log_root_inode(&mut self) {
        let core = self.mount.root_core();
        self.inode_undo.entry(REXFS_ROOT_INO).or_insert(core);
    }

    /// Accumulate a journaled superblock field delta, applied at commit
    pub(crate) fn mod_sb(&mut self, field: SbField, delta: i64) {
        self.sb_deltas.push((field, delta));
    }

    /// Commit: apply superblock deltas, refresh the derived geometry and
    /// the free-counter replica, discard undo state, release the group
    /// lock.
    pub fn commit(mut self) -> RexfsResult<()> {
        debug_assert_eq!(self.state, TransactionState::Active);

        let mut applied = Ok(());
        {
            let mut sb = self.mount.sb_lock();
            let mut trial = *sb;
            for (field, delta) in &self.sb_deltas {
                if let Err(e) = trial.apply_delta(*field, *delta) {
                    applied = Err(e);
                    break;
                }
            }
            if applied.is_ok() {
                *sb = trial;
                *self.mount.geometry_write() = RtGeometry::from_superblock(&trial);
            }
        }
        if let Err(e) = applied {
            self.rollback();
            return Err(e);
        }

        // The in-core replica mirrors the journaled counter; delayed
        // reservations already took their extents from it.
        for (field, delta) in &self.sb_deltas {
            if *field == SbField::Frextents {
                self.mount.frextents_add(*delta);
            }
        }

        self.block_undo.clear();
        self.inode_undo.clear();
        self.sb_deltas.clear();
        self.state = TransactionState::Committed;
        self.group = None;
        Ok(())
    }

    /// Cancel: restore every before-image and release the group lock
    pub fn cancel(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        if let Some(group) = self.group.as_deref_mut() {
            for ((ino, block), image) in self.block_undo.drain() {
                if let Some(inode) = group.inode_by_ino_mut(ino) {
                    inode.restore_block(block, &image);
                }
            }
        }
        self.block_undo.clear();

        if let Some(core) = self.inode_undo.remove(&REXFS_ROOT_INO) {
            self.mount.restore_root_core(core);
        }
        if let Some(group) = self.group.as_deref_mut() {
            for (ino, core) in self.inode_undo.drain() {
                if let Some(inode) = group.inode_by_ino_mut(ino) {
                    inode.restore_core(core);
                }
            }
        }
        self.inode_undo.clear();

        self.sb_deltas.clear();
        self.state = TransactionState::Cancelled;
        self.group = None;
    }
}

impl Drop for RexfsTransaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.rollback();
        }
    }
}
