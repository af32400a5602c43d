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

//! RexFS — Realtime Extent Allocator
//!
//! This library implements the realtime extent allocation engine of the
//! RexFS large-file filesystem: a dedicated region of fixed-size
//! extents tracked by an on-disk bitmap and a log2-size-class summary,
//! with locality-preserving allocation search and online grow.
//!
//! ```
//! use rexfs::{RtAllocRequest, RtMount, RtMountConfig, UserContext};
//!
//! let mount = RtMount::mount(RtMountConfig {
//!     rtdev_blocks: Some(1024),
//!     ..RtMountConfig::default()
//! })
//! .unwrap();
//! mount.grow_rt(&UserContext::root(), 1024, 1).unwrap();
//!
//! let mut tx = mount.trans_begin();
//! let got = tx.allocate(&RtAllocRequest::new(16, 64)).unwrap().unwrap();
//! tx.commit().unwrap();
//! assert!(got.len >= 16 && got.len <= 64);
//! ```

// Shared domain - foundational components used across all domains
pub mod shared;

// Storage domain - block device, superblock, inodes, transactions
pub mod storage;

// Realtime allocator domain - bitmap/summary codecs, search, grow,
// mount lifecycle
pub mod rtalloc;

// Re-export shared domain components at crate level for easy access
pub use shared::{
    errors::{CorruptionKind, IoErrorKind, RexfsError, RexfsResult},
    types::{BlockNumber, InodeNumber, RtxLen, RtxNumber, UserContext},
};

// Re-export storage domain components at crate level for easy access
pub use storage::{
    RexfsFeatures, RexfsInodeFlags, RexfsSuperblock, RexfsTransaction, RtDevice, RtGeometry,
    TransactionState,
};

// Re-export realtime allocator components at crate level for easy access
pub use rtalloc::{RtAllocRequest, RtAllocation, RtMount, RtMountConfig};
