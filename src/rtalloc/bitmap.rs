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

//! Realtime Bitmap Codec
//!
//! Packed bit-vector operations over the bitmap inode's data blocks.
//! One bit per realtime extent, 1 = free; bit k of byte b within a
//! bitmap block is rtx `base + b*8 + k`. All walks go block-at-a-time
//! and word-at-a-time within a block, with masked heads and tails for
//! unaligned ranges.
//!
//! The range primitives at the bottom keep the summary coherent with
//! the bitmap: allocating out of the middle of a free run replaces one
//! summary bucket with up to two smaller remnants, and freeing merges
//! with both neighbors into a single combined bucket.

use crate::shared::errors::RexfsResult;
use crate::shared::types::{RtxLen, RtxNumber};
use crate::shared::utils::log2_floor;
use crate::storage::superblock::RtGeometry;

use super::bufcache::RtAllocArgs;
use super::mount::RtMeta;

const WORD_BITS: usize = 64;

fn load_word(buf: &[u8], word: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[word * 8..word * 8 + 8]);
    u64::from_le_bytes(bytes)
}

fn store_word(buf: &mut [u8], word: usize, value: u64) {
    buf[word * 8..word * 8 + 8].copy_from_slice(&value.to_le_bytes());
}

/// Mask selecting bits [lo, hi) of a word, hi <= 64
fn word_mask(lo: usize, hi: usize) -> u64 {
    debug_assert!(lo < hi && hi <= WORD_BITS);
    let high = if hi == WORD_BITS {
        u64::MAX
    } else {
        (1u64 << hi) - 1
    };
    high & !((1u64 << lo) - 1)
}

/// Find the lowest bit in [lo, hi) of a block whose value differs from
/// `want_set`, if any.
pub(crate) fn scan_mismatch(buf: &[u8], lo: usize, hi: usize, want_set: bool) -> Option<usize> {
    debug_assert!(lo < hi && hi <= buf.len() * 8);
    let first_w = lo / WORD_BITS;
    let last_w = (hi - 1) / WORD_BITS;
    for w in first_w..=last_w {
        let word_lo = if w == first_w { lo % WORD_BITS } else { 0 };
        let word_hi = if w == last_w { (hi - 1) % WORD_BITS + 1 } else { WORD_BITS };
        let mut word = load_word(buf, w);
        if want_set {
            word = !word;
        }
        word &= word_mask(word_lo, word_hi);
        if word != 0 {
            return Some(w * WORD_BITS + word.trailing_zeros() as usize);
        }
    }
    None
}

/// Find the highest bit in [0, top] of a block whose value differs from
/// `want_set`, if any.
fn scan_mismatch_back(buf: &[u8], top: usize, want_set: bool) -> Option<usize> {
    let first_w = top / WORD_BITS;
    for w in (0..=first_w).rev() {
        let word_hi = if w == first_w { top % WORD_BITS + 1 } else { WORD_BITS };
        let mut word = load_word(buf, w);
        if want_set {
            word = !word;
        }
        word &= word_mask(0, word_hi);
        if word != 0 {
            return Some(w * WORD_BITS + (WORD_BITS - 1) - word.leading_zeros() as usize);
        }
    }
    None
}

/// Count the set bits among the first `bits` bits of a block
pub(crate) fn popcount_prefix(buf: &[u8], bits: usize) -> u64 {
    if bits == 0 {
        return 0;
    }
    let last_w = (bits - 1) / WORD_BITS;
    let mut count = 0u64;
    for w in 0..=last_w {
        let word_hi = if w == last_w { (bits - 1) % WORD_BITS + 1 } else { WORD_BITS };
        let word = load_word(buf, w) & word_mask(0, word_hi);
        count += word.count_ones() as u64;
    }
    count
}

impl RtAllocArgs<'_, '_> {
    /// Read the free/allocated state of one rtx
    pub(crate) fn peek_bit(&mut self, geo: &RtGeometry, rtx: RtxNumber) -> RexfsResult<bool> {
        debug_assert!(rtx < geo.rextents);
        let bbno = geo.rtx_to_bmblock(rtx);
        let bit = (rtx - geo.bmblock_to_rtx(bbno)) as usize;
        let buf = self.fetch_block(RtMeta::Bitmap, bbno)?;
        Ok(load_word(buf, bit / WORD_BITS) >> (bit % WORD_BITS) & 1 == 1)
    }

    /// Scan `len` bits from `start`; if all equal `free`, return
    /// `(start + len, true)`, else the first differing rtx and `false`.
    pub(crate) fn check_range(
        &mut self,
        geo: &RtGeometry,
        start: RtxNumber,
        len: RtxLen,
        free: bool,
    ) -> RexfsResult<(RtxNumber, bool)> {
        debug_assert!(len > 0);
        debug_assert!(start + len <= geo.rextents);
        let end = start + len;
        let mut pos = start;
        while pos < end {
            let bbno = geo.rtx_to_bmblock(pos);
            let base = geo.bmblock_to_rtx(bbno);
            let lo = (pos - base) as usize;
            let hi = (end - base).min(geo.bits_per_bmblock) as usize;
            let buf = self.fetch_block(RtMeta::Bitmap, bbno)?;
            if let Some(bit) = scan_mismatch(buf, lo, hi, free) {
                return Ok((base + bit as u64, false));
            }
            pos = base + hi as u64;
        }
        Ok((end, true))
    }

    /// Write `free` into `len` consecutive bits, journaling every block
    /// touched.
    pub(crate) fn modify_range(
        &mut self,
        geo: &RtGeometry,
        start: RtxNumber,
        len: RtxLen,
        free: bool,
    ) -> RexfsResult<()> {
        debug_assert!(len > 0);
        debug_assert!(start + len <= geo.rextents);
        let end = start + len;
        let mut pos = start;
        while pos < end {
            let bbno = geo.rtx_to_bmblock(pos);
            let base = geo.bmblock_to_rtx(bbno);
            let lo = (pos - base) as usize;
            let hi = (end - base).min(geo.bits_per_bmblock) as usize;
            let buf = self.modify_block(RtMeta::Bitmap, bbno)?;
            let first_w = lo / WORD_BITS;
            let last_w = (hi - 1) / WORD_BITS;
            for w in first_w..=last_w {
                let word_lo = if w == first_w { lo % WORD_BITS } else { 0 };
                let word_hi = if w == last_w { (hi - 1) % WORD_BITS + 1 } else { WORD_BITS };
                let mask = word_mask(word_lo, word_hi);
                let mut word = load_word(buf, w);
                if free {
                    word |= mask;
                } else {
                    word &= !mask;
                }
                store_word(buf, w, word);
            }
            pos = base + hi as u64;
        }
        Ok(())
    }

    /// Walk backward from `rtx` to the first rtx of the maximal
    /// same-state run containing it. Returns 0 if the run reaches the
    /// start of the region.
    pub(crate) fn find_back(&mut self, geo: &RtGeometry, rtx: RtxNumber) -> RexfsResult<RtxNumber> {
        let state = self.peek_bit(geo, rtx)?;
        let mut pos = rtx;
        loop {
            let bbno = geo.rtx_to_bmblock(pos);
            let base = geo.bmblock_to_rtx(bbno);
            let top = (pos - base) as usize;
            let buf = self.fetch_block(RtMeta::Bitmap, bbno)?;
            if let Some(bit) = scan_mismatch_back(buf, top, state) {
                return Ok(base + bit as u64 + 1);
            }
            if base == 0 {
                return Ok(0);
            }
            pos = base - 1;
        }
    }

    /// Walk forward from `rtx` to the exclusive end of the maximal
    /// same-state run containing it, capped at `limit + 1`.
    pub(crate) fn find_forw(
        &mut self,
        geo: &RtGeometry,
        rtx: RtxNumber,
        limit: RtxNumber,
    ) -> RexfsResult<RtxNumber> {
        debug_assert!(rtx <= limit && limit < geo.rextents);
        let state = self.peek_bit(geo, rtx)?;
        let (stop, _) = self.check_range(geo, rtx, limit - rtx + 1, state)?;
        Ok(stop)
    }

    /// Mark `[start, start + len)` allocated, rewriting the summary
    /// buckets of the free run it is carved from. The range must be
    /// entirely free.
    pub(crate) fn allocate_range(
        &mut self,
        geo: &RtGeometry,
        start: RtxNumber,
        len: RtxLen,
    ) -> RexfsResult<()> {
        debug_assert!(len > 0 && start + len <= geo.rextents);
        let end = start + len;

        // Find the bounds of the surrounding free run before any bits
        // change; the summary tracks whole runs, not this request.
        let preblock = self.find_back(geo, start)?;
        let postblock = self.find_forw(geo, end - 1, geo.rextents - 1)?;

        self.modify_summary(
            geo,
            log2_floor(postblock - preblock),
            geo.rtx_to_bmblock(preblock),
            -1,
        )?;
        if preblock < start {
            self.modify_summary(
                geo,
                log2_floor(start - preblock),
                geo.rtx_to_bmblock(preblock),
                1,
            )?;
        }
        if postblock > end {
            self.modify_summary(geo, log2_floor(postblock - end), geo.rtx_to_bmblock(end), 1)?;
        }

        self.modify_range(geo, start, len, false)
    }

    /// Mark `[start, start + len)` free, merging with both free
    /// neighbors and rewriting their summary buckets into one.
    pub(crate) fn free_range(
        &mut self,
        geo: &RtGeometry,
        start: RtxNumber,
        len: RtxLen,
    ) -> RexfsResult<()> {
        debug_assert!(len > 0 && start + len <= geo.rextents);
        let end = start + len;

        self.modify_range(geo, start, len, true)?;

        // The freed bits now bridge any adjacent free runs; walk out to
        // the merged run's bounds.
        let preblock = self.find_back(geo, start)?;
        let postblock = self.find_forw(geo, end - 1, geo.rextents - 1)?;

        if preblock < start {
            self.modify_summary(
                geo,
                log2_floor(start - preblock),
                geo.rtx_to_bmblock(preblock),
                -1,
            )?;
        }
        if postblock > end {
            self.modify_summary(geo, log2_floor(postblock - end), geo.rtx_to_bmblock(end), -1)?;
        }
        self.modify_summary(
            geo,
            log2_floor(postblock - preblock),
            geo.rtx_to_bmblock(preblock),
            1,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtalloc::mount::{RtMount, RtMountConfig};
    use crate::shared::types::UserContext;

    fn grown(rblocks: u64) -> RtMount {
        let mount = RtMount::mount(RtMountConfig {
            rtdev_blocks: Some(rblocks),
            ..RtMountConfig::default()
        })
        .unwrap();
        mount.grow_rt(&UserContext::root(), rblocks, 1).unwrap();
        mount
    }

    #[test]
    fn test_word_mask() {
        assert_eq!(word_mask(0, 64), u64::MAX);
        assert_eq!(word_mask(0, 1), 1);
        assert_eq!(word_mask(4, 8), 0xF0);
        assert_eq!(word_mask(63, 64), 1 << 63);
    }

    #[test]
    fn test_scan_mismatch_directions() {
        let mut buf = vec![0xFFu8; 64];
        buf[2] = 0b1111_0111; // bit 19 clear
        assert_eq!(scan_mismatch(&buf, 0, 512, true), Some(19));
        assert_eq!(scan_mismatch(&buf, 20, 512, true), None);
        assert_eq!(scan_mismatch_back(&buf, 511, true), Some(19));
        assert_eq!(scan_mismatch_back(&buf, 18, true), None);
    }

    #[test]
    fn test_popcount_prefix() {
        let mut buf = vec![0u8; 64];
        buf[0] = 0xFF;
        buf[8] = 0x01;
        assert_eq!(popcount_prefix(&buf, 512), 9);
        assert_eq!(popcount_prefix(&buf, 4), 4);
        assert_eq!(popcount_prefix(&buf, 0), 0);
    }

    #[test]
    fn test_check_and_modify_range() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        assert_eq!(args.check_range(&geo, 0, 256, true).unwrap(), (256, true));
        args.modify_range(&geo, 100, 10, false).unwrap();
        assert_eq!(args.check_range(&geo, 0, 256, true).unwrap(), (100, false));
        assert_eq!(args.check_range(&geo, 100, 10, false).unwrap(), (110, true));
        assert_eq!(args.check_range(&geo, 100, 20, false).unwrap(), (110, false));
        tx.cancel();
    }

    #[test]
    fn test_find_back_and_forw() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        args.modify_range(&geo, 100, 10, false).unwrap();
        // Free run [110, 256)
        assert_eq!(args.find_back(&geo, 200).unwrap(), 110);
        assert_eq!(args.find_forw(&geo, 200, 255).unwrap(), 256);
        // Free run [0, 100)
        assert_eq!(args.find_back(&geo, 50).unwrap(), 0);
        assert_eq!(args.find_forw(&geo, 50, 255).unwrap(), 100);
        // Allocated run [100, 110)
        assert_eq!(args.find_back(&geo, 105).unwrap(), 100);
        assert_eq!(args.find_forw(&geo, 105, 255).unwrap(), 110);
        // Capped forward walk
        assert_eq!(args.find_forw(&geo, 120, 130).unwrap(), 131);
        tx.cancel();
    }

    #[test]
    fn test_walks_cross_bitmap_blocks() {
        let mount = grown(65536);
        let geo = mount.geometry();
        assert_eq!(geo.rbmblocks, 2);
        let mut tx = mount.trans_begin();
        tx.join_group();
        let mut args = RtAllocArgs::new(&mut tx);

        // Allocate a range straddling the block boundary.
        args.modify_range(&geo, 32700, 200, false).unwrap();
        assert_eq!(args.find_back(&geo, 32800).unwrap(), 32700);
        assert_eq!(args.find_forw(&geo, 32750, 65535).unwrap(), 32900);
        assert_eq!(args.find_back(&geo, 40000).unwrap(), 32900);
        assert_eq!(args.check_range(&geo, 0, 65536, true).unwrap(), (32700, false));
        tx.cancel();
    }

    #[test]
    fn test_range_primitives_update_summary() {
        let mount = grown(256);
        let geo = mount.geometry();
        let mut tx = mount.trans_begin();
        tx.join_group();
        {
            let mut args = RtAllocArgs::new(&mut tx);
            // Whole region is one run of 256 at class 8.
            assert_eq!(args.get_summary(&geo, 8, 0).unwrap(), 1);
            args.allocate_range(&geo, 100, 10).unwrap();
            // Remnants: [0, 100) class 6 and [110, 256) class 7.
            assert_eq!(args.get_summary(&geo, 8, 0).unwrap(), 0);
            assert_eq!(args.get_summary(&geo, 6, 0).unwrap(), 1);
            assert_eq!(args.get_summary(&geo, 7, 0).unwrap(), 1);
            args.free_range(&geo, 100, 10).unwrap();
            assert_eq!(args.get_summary(&geo, 8, 0).unwrap(), 1);
            assert_eq!(args.get_summary(&geo, 6, 0).unwrap(), 0);
            assert_eq!(args.get_summary(&geo, 7, 0).unwrap(), 0);
        }
        tx.cancel();
    }
}
