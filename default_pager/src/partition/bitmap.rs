/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use log::error;

use crate::util::div_ceil;

type Word = u64;

const WORD_BITS: usize = Word::BITS as usize;

/// Allocation bitmap of one partition, one bit per block (set = allocated).
///
/// Bits past `total` in the last word are never set, so
/// `free + allocated() == total` holds at all times.
#[derive(Debug)]
pub(crate) struct BlockBitmap {
    words: Vec<Word>,
    total: u32,
    free: u32,
}

impl BlockBitmap {
    pub(crate) fn new(total: u32) -> Self {
        BlockBitmap {
            words: vec![0; div_ceil(total as usize, WORD_BITS)],
            total,
            free: total,
        }
    }

    #[inline]
    pub(crate) fn total(&self) -> u32 {
        self.total
    }

    #[inline]
    pub(crate) fn free(&self) -> u32 {
        self.free
    }

    /// Number of set bits
    pub(crate) fn allocated(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub(crate) fn is_set(&self, block: u32) -> bool {
        let (index, mask) = Self::locate(block);
        (self.words[index] & mask) != 0
    }

    /// Finds the first free block, marks it allocated and returns it.
    ///
    /// Returns `None` only if the free count is zero. A non-zero free count
    /// without any clear bit means the bitmap is corrupt, which is fatal.
    pub(crate) fn alloc(&mut self) -> Option<u32> {
        if self.free == 0 {
            return None;
        }

        for (index, word) in self.words.iter_mut().enumerate() {
            if *word == Word::MAX {
                continue;
            }

            let bit = (!*word).trailing_zeros() as usize;
            let block = index * WORD_BITS + bit;
            if block >= self.total as usize {
                // only the zero tail of the last word is left
                break;
            }

            *word |= 1 << bit;
            self.free -= 1;
            return Some(block as u32);
        }

        error!(
            "block bitmap claims {} free blocks but has no clear bit",
            self.free
        );
        panic!("corrupt block bitmap: free count does not match bitmap");
    }

    /// Marks `block` allocated without searching, used for reserved blocks
    pub(crate) fn mark(&mut self, block: u32) {
        assert!(block < self.total, "block {} out of range", block);

        let (index, mask) = Self::locate(block);
        if self.words[index] & mask == 0 {
            self.words[index] |= mask;
            self.free -= 1;
        }
    }

    /// Releases an allocated block. Releasing a free block is fatal.
    pub(crate) fn release(&mut self, block: u32) {
        assert!(block < self.total, "block {} out of range", block);

        let (index, mask) = Self::locate(block);
        if self.words[index] & mask == 0 {
            error!("block {} released twice", block);
            panic!("corrupt block bitmap: block {} is not allocated", block);
        }

        self.words[index] &= !mask;
        self.free += 1;
    }

    #[inline]
    fn locate(block: u32) -> (usize, Word) {
        let block = block as usize;
        (block / WORD_BITS, 1 << (block % WORD_BITS))
    }
}
