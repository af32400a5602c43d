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

//! Utilities for the RexFS Shared Domain
//!
//! Common helper functions used throughout the RexFS codebase: integer
//! log2, alignment, and block-count arithmetic.

use crate::shared::constants::*;
use crate::shared::errors::{RexfsError, RexfsResult};

// =======================
// Bit Utilities
// =======================

/// Floor of log2 of a value. Returns 0 for an input of 0 or 1.
pub fn log2_floor(value: u64) -> u32 {
    if value == 0 {
        return 0;
    }
    63 - value.leading_zeros()
}

/// Floor of log2 of a value, or `None` for 0.
pub fn highbit64(value: u64) -> Option<u32> {
    if value == 0 {
        None
    } else {
        Some(63 - value.leading_zeros())
    }
}

/// Check if a value is a power of 2
pub fn is_power_of_2(value: u64) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

// =======================
// Alignment Utilities
// =======================

/// Round a value down to a multiple of `multiple` (not necessarily a
/// power of two). A multiple of 0 or 1 leaves the value unchanged.
pub fn round_down_to(value: u64, multiple: u64) -> u64 {
    if multiple <= 1 {
        return value;
    }
    value - value % multiple
}

/// Round a value up to a multiple of `multiple` (not necessarily a
/// power of two). A multiple of 0 or 1 leaves the value unchanged.
pub fn round_up_to(value: u64, multiple: u64) -> u64 {
    if multiple <= 1 {
        return value;
    }
    let slack = value % multiple;
    if slack == 0 {
        value
    } else {
        value + (multiple - slack)
    }
}

// =======================
// Block Utilities
// =======================

/// Calculate the number of blocks needed for a given byte size
pub fn blocks_for_size(size: u64, block_size: u32) -> u64 {
    (size + block_size as u64 - 1) / block_size as u64
}

// =======================
// Validation Utilities
// =======================

/// Validate a block size is a power of 2 and within limits
pub fn validate_block_size(block_size: u32) -> RexfsResult<()> {
    if block_size == 0 {
        return Err(RexfsError::InvalidArgument(
            "block size cannot be zero".to_string(),
        ));
    }

    if !is_power_of_2(block_size as u64) {
        return Err(RexfsError::InvalidArgument(
            "block size must be a power of 2".to_string(),
        ));
    }

    if block_size < REXFS_MIN_BLOCK_SIZE || block_size > REXFS_MAX_BLOCK_SIZE {
        return Err(RexfsError::InvalidArgument(format!(
            "block size {} outside supported range [{}, {}]",
            block_size, REXFS_MIN_BLOCK_SIZE, REXFS_MAX_BLOCK_SIZE
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log2_floor() {
        assert_eq!(log2_floor(0), 0);
        assert_eq!(log2_floor(1), 0);
        assert_eq!(log2_floor(2), 1);
        assert_eq!(log2_floor(10), 3);
        assert_eq!(log2_floor(16), 4);
        assert_eq!(log2_floor(u64::MAX), 63);
    }

    #[test]
    fn test_highbit64() {
        assert_eq!(highbit64(0), None);
        assert_eq!(highbit64(1), Some(0));
        assert_eq!(highbit64(256), Some(8));
    }

    #[test]
    fn test_round_to_multiple() {
        assert_eq!(round_down_to(50, 8), 48);
        assert_eq!(round_down_to(48, 8), 48);
        assert_eq!(round_down_to(50, 1), 50);
        assert_eq!(round_up_to(5, 8), 8);
        assert_eq!(round_up_to(8, 8), 8);
        assert_eq!(round_up_to(9, 0), 9);
    }

    #[test]
    fn test_blocks_for_size() {
        assert_eq!(blocks_for_size(8192, 4096), 2);
        assert_eq!(blocks_for_size(8000, 4096), 2);
        assert_eq!(blocks_for_size(0, 4096), 0);
    }

    #[test]
    fn test_validate_block_size() {
        assert!(validate_block_size(4096).is_ok());
        assert!(validate_block_size(0).is_err());
        assert!(validate_block_size(3000).is_err());
        assert!(validate_block_size(256).is_err());
        assert!(validate_block_size(131072).is_err());
    }
}
