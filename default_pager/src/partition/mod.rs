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

pub(crate) mod bitmap;
mod registry;
mod signature;

use core::fmt;
use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::modules::partition_storage::PartitionStorage;
use bitmap::BlockBitmap;

pub use registry::PartitionRegistry;
pub use signature::{build_swap_header_v2, SignatureCheck, SWAP_MAGIC_V1, SWAP_MAGIC_V2};

/// Stable partition identifier, derived from the partition name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartitionId(u32);

impl PartitionId {
    /// 32 bit FNV-1a hash of the name
    pub fn from_name(name: &str) -> Self {
        const OFFSET_BASIS: u32 = 0x811c_9dc5;
        const PRIME: u32 = 0x0100_0193;

        let hash = name
            .bytes()
            .fold(OFFSET_BASIS, |hash, b| (hash ^ b as u32).wrapping_mul(PRIME));
        PartitionId(hash)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// A (partition, block) pair: where one page of a paged object lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub partition: PartitionId,
    pub block: u32,
}

/// Snapshot of a partition's state, for the administrative surface
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartitionInfo {
    pub name: String,
    pub id: PartitionId,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub going_away: bool,
}

pub struct Partition {
    id: PartitionId,
    name: String,
    storage: Box<dyn PartitionStorage>,
    page_size: usize,

    /// Set while the partition's pages are migrated away.
    /// No new allocations land here, deallocations are still honoured.
    going_away: AtomicBool,

    /// Blocks pre-marked by the swap header, they never hold pages
    reserved: u32,

    bitmap: Mutex<BlockBitmap>,
}

impl Partition {
    pub(crate) fn new(
        name: String,
        storage: Box<dyn PartitionStorage>,
        page_size: usize,
        bitmap: BlockBitmap,
    ) -> Self {
        let reserved = bitmap.total() - bitmap.free();

        Partition {
            id: PartitionId::from_name(&name),
            name,
            storage,
            page_size,
            going_away: AtomicBool::new(false),
            reserved,
            bitmap: Mutex::new(bitmap),
        }
    }

    #[inline]
    pub fn id(&self) -> PartitionId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_blocks(&self) -> u32 {
        self.bitmap.lock().total()
    }

    pub fn free_blocks(&self) -> u32 {
        self.bitmap.lock().free()
    }

    /// Blocks currently holding pages, excluding reserved ones
    pub fn used_blocks(&self) -> u32 {
        let bitmap = self.bitmap.lock();
        bitmap.total() - bitmap.free() - self.reserved
    }

    pub fn is_going_away(&self) -> bool {
        self.going_away.load(Ordering::SeqCst)
    }

    /// Taken under the bitmap lock, so an allocation either completes
    /// before the flag is set or sees it
    pub(crate) fn set_going_away(&self, going_away: bool) {
        let _bitmap = self.bitmap.lock();
        self.going_away.store(going_away, Ordering::SeqCst);
    }

    /// Free space in bytes
    pub fn free_bytes(&self) -> u64 {
        self.free_blocks() as u64 * self.page_size as u64
    }

    pub fn info(&self) -> PartitionInfo {
        let bitmap = self.bitmap.lock();
        PartitionInfo {
            name: self.name.clone(),
            id: self.id,
            total_blocks: bitmap.total(),
            free_blocks: bitmap.free(),
            going_away: self.is_going_away(),
        }
    }

    /// Allocates one block, `None` if the partition is full or going away
    pub(crate) fn alloc(&self) -> Option<u32> {
        let mut bitmap = self.bitmap.lock();
        if self.is_going_away() {
            return None;
        }
        bitmap.alloc()
    }

    pub(crate) fn release(&self, block: u32) {
        self.bitmap.lock().release(block);
    }

    #[cfg(test)]
    pub(crate) fn is_allocated(&self, block: u32) -> bool {
        self.bitmap.lock().is_set(block)
    }

    #[cfg(test)]
    pub(crate) fn allocated_blocks(&self) -> u32 {
        self.bitmap.lock().allocated()
    }

    #[inline]
    fn block_offset(&self, block: u32) -> u64 {
        block as u64 * self.page_size as u64
    }

    /// Reads the full page stored in `block`
    pub(crate) fn read_block(&self, block: u32, dest: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(dest.len(), self.page_size);
        self.storage.read_exact_at(dest, self.block_offset(block))
    }

    /// Writes a full page into `block`
    pub(crate) fn write_block(&self, block: u32, src: &[u8]) -> io::Result<()> {
        debug_assert_eq!(src.len(), self.page_size);
        self.storage.write_all_at(src, self.block_offset(block))
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("going_away", &self.is_going_away())
            .finish()
    }
}
