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

use std::sync::Arc;

use log::{error, info};
use parking_lot::RwLock;

use super::{
    bitmap::BlockBitmap,
    signature::{apply_swap_header, SignatureCheck},
    BlockRef, Partition, PartitionId, PartitionInfo,
};
use crate::{error::PagerError, modules::partition_storage::PartitionStorage};

/// Process wide list of live paging partitions.
///
/// The registry lock only guards insertion and removal, each partition's
/// bitmap has its own lock. Partitions are kept in attach order, which is
/// the order `choose` prefers them in.
pub struct PartitionRegistry {
    partitions: RwLock<Vec<Arc<Partition>>>,
    page_size: usize,
}

impl PartitionRegistry {
    pub fn new(page_size: usize) -> Self {
        Self {
            partitions: RwLock::new(Vec::new()),
            page_size,
        }
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Attaches a new backing store.
    ///
    /// With [`SignatureCheck::LinuxSwap`] the first page has to carry a swap
    /// signature and the blocks it declares unusable are never handed out.
    pub fn register(
        &self,
        name: &str,
        storage: Box<dyn PartitionStorage>,
        check: SignatureCheck,
    ) -> Result<Arc<Partition>, PagerError> {
        let id = PartitionId::from_name(name);
        if self.get(id).is_some() {
            return Err(PagerError::DuplicatePartition(name.to_string()));
        }

        let total = storage.len()? / self.page_size as u64;
        if total == 0 {
            return Err(PagerError::EmptyPartition(name.to_string()));
        }
        let total = u32::try_from(total).unwrap_or(u32::MAX);

        let mut bitmap = BlockBitmap::new(total);
        if check == SignatureCheck::LinuxSwap {
            let mut header = vec![0u8; self.page_size];
            storage.read_exact_at(&mut header, 0)?;
            if apply_swap_header(&header, &mut bitmap).is_none() {
                return Err(PagerError::BadSignature(name.to_string()));
            }
        }

        let partition = Arc::new(Partition::new(
            name.to_string(),
            storage,
            self.page_size,
            bitmap,
        ));

        let mut partitions = self.partitions.write();
        // checked again, someone could have registered the same name meanwhile
        if partitions.iter().any(|p| p.id() == id) {
            return Err(PagerError::DuplicatePartition(name.to_string()));
        }
        partitions.push(partition.clone());

        info!(
            "attached partition {} ({}): {} blocks, {} free",
            name,
            id,
            total,
            partition.free_blocks()
        );

        Ok(partition)
    }

    pub fn get(&self, id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions.read().iter().find(|p| p.id() == id).cloned()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Partition>> {
        self.get(PartitionId::from_name(name))
    }

    /// Looks up a partition a page map entry refers to. An unknown id means
    /// the page map is corrupt, which is fatal.
    pub(crate) fn expect(&self, id: PartitionId) -> Arc<Partition> {
        match self.get(id) {
            Some(partition) => partition,
            None => {
                error!("page map refers to unknown partition {}", id);
                panic!("unknown partition {} referenced", id);
            }
        }
    }

    /// Returns the first live partition with at least `min_bytes` free,
    /// skipping `excluded` and partitions that are going away
    pub fn choose(&self, min_bytes: u64, excluded: Option<PartitionId>) -> Option<Arc<Partition>> {
        self.partitions
            .read()
            .iter()
            .filter(|p| Some(p.id()) != excluded && !p.is_going_away())
            .find(|p| p.free_bytes() >= min_bytes)
            .cloned()
    }

    /// Allocates one block on partition `id`
    pub fn alloc_block(&self, id: PartitionId) -> Result<BlockRef, PagerError> {
        let partition = self.get(id).ok_or(PagerError::NoSpace)?;
        partition
            .alloc()
            .map(|block| BlockRef {
                partition: id,
                block,
            })
            .ok_or(PagerError::NoSpace)
    }

    /// Releases a block. The partition has to be registered, going away or not.
    pub fn dealloc_block(&self, block: BlockRef) {
        self.expect(block.partition).release(block.block);
    }

    /// Marks partition `name` as going away, the first step of its removal
    pub(crate) fn begin_removal(&self, name: &str) -> Result<Arc<Partition>, PagerError> {
        let partitions = self.partitions.write();
        let id = PartitionId::from_name(name);
        let partition = partitions
            .iter()
            .find(|p| p.id() == id)
            .ok_or_else(|| PagerError::NoSuchPartition(name.to_string()))?;

        if partition.is_going_away() {
            // another removal is already migrating this partition
            return Err(PagerError::PartitionBusy(name.to_string()));
        }
        partition.set_going_away(true);

        Ok(partition.clone())
    }

    /// Puts a partition whose removal failed back into service
    pub(crate) fn abort_removal(&self, partition: &Partition) {
        let _partitions = self.partitions.write();
        partition.set_going_away(false);
    }

    /// Drops a fully migrated partition from the registry
    pub(crate) fn unregister(&self, partition: &Partition) {
        let mut partitions = self.partitions.write();
        debug_assert!(partition.is_going_away());
        partitions.retain(|p| p.id() != partition.id());
    }

    pub fn infos(&self) -> Vec<PartitionInfo> {
        self.partitions.read().iter().map(|p| p.info()).collect()
    }

    /// Total and free paging space in bytes over all partitions
    pub fn space(&self) -> (u64, u64) {
        let page_size = self.page_size as u64;
        self.partitions
            .read()
            .iter()
            .fold((0, 0), |(total, free), p| {
                let info = p.info();
                (
                    total + info.total_blocks as u64 * page_size,
                    free + info.free_blocks as u64 * page_size,
                )
            })
    }
}
