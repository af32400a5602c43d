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

//! Error types for the RexFS Shared Domain
//!
//! This module defines the error handling system for the realtime
//! allocator: the crate-wide error enum, focused kind sub-enums for I/O
//! and corruption, and the conversions the kernel interface needs.

use core::fmt;

use crate::shared::types::{BlockNumber, RtxNumber, SumLevel};

// =======================
// Core Error Types
// =======================

/// Main error type for RexFS operations
#[derive(Debug, Clone, PartialEq)]
pub enum RexfsError {
    /// Allocation search exhausted without finding space
    NoSpace,

    /// Memory allocation failed
    OutOfMemory,

    /// Buffer read or write failure
    IoError(IoErrorKind),

    /// Bitmap/summary inconsistency detected during a range operation
    Corruption(CorruptionKind),

    /// Precondition violation by the caller
    InvalidArgument(String),

    /// A grow is already in progress
    Busy,

    /// The filesystem carries a feature incompatible with the operation
    Unsupported(String),

    /// Caller lacks the privilege for a control-plane operation
    PermissionDenied(String),

    /// The realtime device is smaller than the size claimed
    TooBig,

    /// The mount has no realtime device configured
    NotRealtime,

    /// Metadata inode missing or not loaded
    NotMounted,

    /// Internal invariant violated (programmer error)
    Internal(String),
}

/// I/O error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    ReadError,
    WriteError,
    DeviceError,
    InvalidOffset,
}

/// Corruption kinds detected by range operations and the checker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// A summary counter would go negative
    SummaryUnderflow { level: SumLevel, bmblock: BlockNumber },
    /// A summary counter would exceed its cell width
    SummaryOverflow { level: SumLevel, bmblock: BlockNumber },
    /// A summary cell disagrees with the bitmap
    SummaryMismatch { level: SumLevel, bmblock: BlockNumber },
    /// The free-extent counter disagrees with the bitmap population count
    FreeCountMismatch { counted: u64, recorded: u64 },
    /// Bits past the end of the realtime region are set
    TailBitsSet,
    /// The summary cache hint under-approximates a free run's class
    HintTooLow { bmblock: BlockNumber },
    /// An extent being freed is not fully allocated
    FreeingFreeSpace { rtx: RtxNumber },
    /// A metadata block index is outside the inode's mapped range
    BlockOutOfRange { block: BlockNumber },
}

// =======================
// Result Type
// =======================

/// Result type alias for RexFS operations
pub type RexfsResult<T> = Result<T, RexfsError>;

// =======================
// Error Implementation
// =======================

impl fmt::Display for RexfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexfsError::NoSpace => write!(f, "No space left in realtime region"),
            RexfsError::OutOfMemory => write!(f, "Out of memory"),
            RexfsError::IoError(kind) => write!(f, "I/O error: {}", kind),
            RexfsError::Corruption(kind) => write!(f, "Corruption detected: {}", kind),
            RexfsError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            RexfsError::Busy => write!(f, "Realtime grow already in progress"),
            RexfsError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            RexfsError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            RexfsError::TooBig => write!(f, "Realtime device smaller than claimed size"),
            RexfsError::NotRealtime => write!(f, "No realtime device configured"),
            RexfsError::NotMounted => write!(f, "Realtime metadata inode not loaded"),
            RexfsError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoErrorKind::ReadError => write!(f, "read operation failed"),
            IoErrorKind::WriteError => write!(f, "write operation failed"),
            IoErrorKind::DeviceError => write!(f, "device error"),
            IoErrorKind::InvalidOffset => write!(f, "offset beyond device"),
        }
    }
}

impl fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptionKind::SummaryUnderflow { level, bmblock } => {
                write!(f, "summary counter underflow at level {} block {}", level, bmblock)
            }
            CorruptionKind::SummaryOverflow { level, bmblock } => {
                write!(f, "summary counter overflow at level {} block {}", level, bmblock)
            }
            CorruptionKind::SummaryMismatch { level, bmblock } => {
                write!(f, "summary cell at level {} block {} disagrees with bitmap", level, bmblock)
            }
            CorruptionKind::FreeCountMismatch { counted, recorded } => {
                write!(f, "free extent count {} disagrees with bitmap count {}", recorded, counted)
            }
            CorruptionKind::TailBitsSet => write!(f, "bits set past end of realtime region"),
            CorruptionKind::HintTooLow { bmblock } => {
                write!(f, "summary cache hint too low for block {}", bmblock)
            }
            CorruptionKind::FreeingFreeSpace { rtx } => {
                write!(f, "freeing extent that is not allocated at rtx {}", rtx)
            }
            CorruptionKind::BlockOutOfRange { block } => {
                write!(f, "metadata block {} outside mapped range", block)
            }
        }
    }
}

impl RexfsError {
    /// Convert to a kernel error code
    pub fn to_kernel_errno(&self) -> i32 {
        match self {
            RexfsError::NoSpace => -28,             // ENOSPC
            RexfsError::OutOfMemory => -12,         // ENOMEM
            RexfsError::IoError(_) => -5,           // EIO
            RexfsError::Corruption(_) => -117,      // EUCLEAN
            RexfsError::InvalidArgument(_) => -22,  // EINVAL
            RexfsError::Busy => -11,                // EWOULDBLOCK
            RexfsError::Unsupported(_) => -95,      // EOPNOTSUPP
            RexfsError::PermissionDenied(_) => -1,  // EPERM
            RexfsError::TooBig => -27,              // EFBIG
            RexfsError::NotRealtime => -22,         // EINVAL
            RexfsError::NotMounted => -19,          // ENODEV
            RexfsError::Internal(_) => -22,         // EINVAL
        }
    }

    /// Check if the error is recoverable by retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RexfsError::Busy | RexfsError::NoSpace | RexfsError::OutOfMemory)
    }

    /// Check if the error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, RexfsError::Corruption(_))
    }
}

impl From<IoErrorKind> for RexfsError {
    fn from(kind: IoErrorKind) -> Self {
        RexfsError::IoError(kind)
    }
}

impl From<CorruptionKind> for RexfsError {
    fn from(kind: CorruptionKind) -> Self {
        RexfsError::Corruption(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", RexfsError::NoSpace),
            "No space left in realtime region"
        );
        assert_eq!(
            format!("{}", RexfsError::IoError(IoErrorKind::ReadError)),
            "I/O error: read operation failed"
        );
        assert_eq!(
            format!(
                "{}",
                RexfsError::Corruption(CorruptionKind::SummaryUnderflow { level: 3, bmblock: 1 })
            ),
            "Corruption detected: summary counter underflow at level 3 block 1"
        );
    }

    #[test]
    fn test_error_conversion() {
        let error: RexfsError = IoErrorKind::WriteError.into();
        assert!(matches!(error, RexfsError::IoError(IoErrorKind::WriteError)));

        let error: RexfsError = CorruptionKind::TailBitsSet.into();
        assert!(error.is_corruption());
    }

    #[test]
    fn test_kernel_errno_conversion() {
        assert_eq!(RexfsError::NoSpace.to_kernel_errno(), -28);
        assert_eq!(RexfsError::Busy.to_kernel_errno(), -11);
        assert_eq!(RexfsError::TooBig.to_kernel_errno(), -27);
        assert_eq!(
            RexfsError::PermissionDenied("grow".to_string()).to_kernel_errno(),
            -1
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(RexfsError::Busy.is_recoverable());
        assert!(!RexfsError::TooBig.is_recoverable());
        assert!(RexfsError::Corruption(CorruptionKind::TailBitsSet).is_corruption());
        assert!(!RexfsError::NoSpace.is_corruption());
    }
}
