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

//! Metadata Inodes
//!
//! Minimal metadata inode model for the realtime bitmap and summary
//! files: an inode core (size, flags, repurposed atime) plus a data fork
//! of block buffers. The fork may hold more blocks than the on-disk size
//! covers; grow extends the fork first and moves the size forward one
//! bitmap block at a time.

use bitflags::bitflags;

use crate::shared::errors::{CorruptionKind, RexfsError, RexfsResult};
use crate::shared::types::{BlockNumber, InodeNumber};

bitflags! {
    /// Inode flags
    pub struct RexfsInodeFlags: u32 {
        /// The bitmap inode's atime field carries the allocation
        /// sequence counter
        const NEWRTBM      = 0x01;
        /// New files inherit realtime placement
        const RTINHERIT    = 0x02;
        /// New files inherit the extent size hint
        const EXTSZINHERIT = 0x04;
    }
}

/// Journaled inode core: the fields a transaction snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeCore {
    /// On-disk size in bytes
    pub size: u64,
    /// Blocks mapped in the data fork
    pub nblocks: u64,
    /// Inode flags
    pub flags: RexfsInodeFlags,
    /// atime seconds; repurposed as the allocation sequence counter on
    /// the bitmap inode when NEWRTBM is set
    pub atime_sec: u64,
}

/// A metadata inode with its data fork
#[derive(Debug)]
pub struct RexfsInode {
    /// Inode number
    pub ino: InodeNumber,
    /// Journaled core fields
    pub core: InodeCore,
    data: Vec<Box<[u8]>>,
}

impl RexfsInode {
    /// Create an inode with an empty data fork
    pub fn new(ino: InodeNumber, flags: RexfsInodeFlags) -> Self {
        Self {
            ino,
            core: InodeCore {
                size: 0,
                nblocks: 0,
                flags,
                atime_sec: 0,
            },
            data: Vec::new(),
        }
    }

    /// Extend the data fork by `count` zero-filled blocks
    pub fn extend_fork(&mut self, count: u64, block_size: u32) {
        for _ in 0..count {
            self.data
                .push(vec![0u8; block_size as usize].into_boxed_slice());
        }
        self.core.nblocks = self.data.len() as u64;
    }

    /// Borrow a data fork block
    pub fn block(&self, block: BlockNumber) -> RexfsResult<&[u8]> {
        self.data
            .get(block as usize)
            .map(|b| &**b)
            .ok_or(RexfsError::Corruption(CorruptionKind::BlockOutOfRange { block }))
    }

    /// Mutably borrow a data fork block
    pub fn block_mut(&mut self, block: BlockNumber) -> RexfsResult<&mut [u8]> {
        self.data
            .get_mut(block as usize)
            .map(|b| &mut **b)
            .ok_or(RexfsError::Corruption(CorruptionKind::BlockOutOfRange { block }))
    }

    /// Restore a journaled before-image over a data fork block
    pub fn restore_block(&mut self, block: BlockNumber, image: &[u8]) {
        if let Some(buf) = self.data.get_mut(block as usize) {
            buf.copy_from_slice(image);
        }
    }

    /// Restore a journaled inode core, truncating any fork blocks the
    /// snapshot did not cover
    pub fn restore_core(&mut self, core: InodeCore) {
        self.core = core;
        self.data.truncate(core.nblocks as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_and_access() {
        let mut ino = RexfsInode::new(2, RexfsInodeFlags::empty());
        assert!(ino.block(0).is_err());
        ino.extend_fork(2, 512);
        assert_eq!(ino.core.nblocks, 2);
        assert_eq!(ino.block(1).unwrap().len(), 512);
        ino.block_mut(0).unwrap()[0] = 0xAB;
        assert_eq!(ino.block(0).unwrap()[0], 0xAB);
        assert!(ino.block(2).is_err());
    }

    #[test]
    fn test_restore_core_truncates_fork() {
        let mut ino = RexfsInode::new(2, RexfsInodeFlags::empty());
        ino.extend_fork(1, 512);
        let snapshot = ino.core;
        ino.extend_fork(3, 512);
        ino.core.size = 2048;
        ino.restore_core(snapshot);
        assert_eq!(ino.core.nblocks, 1);
        assert_eq!(ino.core.size, 0);
        assert!(ino.block(1).is_err());
    }
}
