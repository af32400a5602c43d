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

//! Block Device Descriptor
//!
//! Describes the realtime block device backing the region. The allocator
//! never reads region data through it; it only probes that blocks the
//! superblock claims actually exist before committing to a geometry.

use crate::shared::errors::{IoErrorKind, RexfsError, RexfsResult};
use crate::shared::types::BlockNumber;

/// Realtime block device descriptor
#[derive(Debug, Clone, Copy)]
pub struct RtDevice {
    /// Device capacity in filesystem blocks
    blocks: u64,
}

impl RtDevice {
    /// Create a device descriptor with the given capacity in blocks
    pub fn new(blocks: u64) -> Self {
        Self { blocks }
    }

    /// Device capacity in filesystem blocks
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Probe a single block with an uncached read, verifying it exists.
    pub fn read_uncached(&self, block: BlockNumber) -> RexfsResult<()> {
        if block >= self.blocks {
            return Err(RexfsError::IoError(IoErrorKind::InvalidOffset));
        }
        Ok(())
    }
}
