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

//! Constants for the RexFS Shared Domain
//!
//! This module contains the shared constants used throughout the RexFS
//! codebase, organized by category: magic numbers, block sizes, realtime
//! geometry limits, and metadata inode numbers.

// =======================
// Filesystem Magic Numbers
// =======================

/// RexFS superblock magic number for validation
pub const REXFS_SUPER_MAGIC: u64 = 0x5245584653555045; // "REXFSUPE" in ASCII

// =======================
// Block and Size Constants
// =======================

/// Default block size (4KB)
pub const REXFS_DEFAULT_BLOCK_SIZE: u32 = 4096;

/// Minimum block size (512 bytes)
pub const REXFS_MIN_BLOCK_SIZE: u32 = 512;

/// Maximum block size (64KB)
pub const REXFS_MAX_BLOCK_SIZE: u32 = 65536;

/// Bits per byte
pub const REXFS_NBBY: u32 = 8;

/// Size of one summary counter cell on disk (u32, little-endian)
pub const REXFS_SUMMARY_CELL_SIZE: u32 = 4;

// =======================
// Realtime Geometry Limits
// =======================

/// Minimum realtime extent size in bytes (4KB)
pub const REXFS_MIN_RTEXTSIZE: u64 = 4 * 1024;

/// Maximum realtime extent size in bytes (1GB)
pub const REXFS_MAX_RTEXTSIZE: u64 = 1024 * 1024 * 1024;

/// Default log size in blocks, used to bound single-transaction summary
/// rewrites during grow
pub const REXFS_DEFAULT_LOG_BLOCKS: u32 = 2048;

// =======================
// Metadata Inode Numbers
// =======================

/// Root directory inode number
pub const REXFS_ROOT_INO: u64 = 1;

/// Realtime bitmap inode number
pub const REXFS_RBM_INO: u64 = 2;

/// Realtime summary inode number
pub const REXFS_RSUM_INO: u64 = 3;
