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

//! RexFS Storage Domain
//!
//! Block device descriptor, superblock and derived geometry, metadata
//! inodes, and the transaction layer.

pub mod block;
pub mod inode;
pub mod superblock;
pub mod transaction;

pub use block::RtDevice;
pub use inode::{InodeCore, RexfsInode, RexfsInodeFlags};
pub use superblock::{RexfsFeatures, RexfsSuperblock, RtGeometry, SbField};
pub use transaction::{RexfsTransaction, TransactionState};
