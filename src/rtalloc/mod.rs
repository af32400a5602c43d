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

//! RexFS Realtime Allocator Domain
//!
//! The realtime region is a flat array of fixed-size extents tracked by
//! an on-disk bitmap (1 bit per extent, 1 = free) and a summary matrix
//! counting free runs per log2 size class per bitmap block. This domain
//! holds the codecs over both structures, the allocation search
//! strategies, the top-level allocate/free entry points, online grow,
//! and the mount lifecycle.

pub mod alloc;
pub(crate) mod bitmap;
pub(crate) mod bufcache;
pub(crate) mod grow;
pub mod mount;
pub(crate) mod search;
pub(crate) mod summary;
pub(crate) mod verify;

pub use alloc::{RtAllocRequest, RtAllocation};
pub use mount::{RtMount, RtMountConfig};
