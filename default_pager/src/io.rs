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

use log::trace;

use crate::{
    error::PagerError,
    object::{Backing, PagedObject},
    partition::BlockRef,
};

/// Result of a successful page read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRead {
    /// The page was read from its block
    Stored,

    /// Never written page of an external object, the buffer was zero filled
    Zeroed,

    /// Never written page of an internal object, the buffer is untouched
    Absent,
}

impl PagedObject {
    /// Reads page `page` into `dest`, which has to be exactly one page long.
    ///
    /// The backing lock is held across the transfer so the block cannot be
    /// migrated away while it is read.
    pub fn read_page(&self, page: usize, dest: &mut [u8]) -> Result<PageRead, PagerError> {
        debug_assert_eq!(dest.len(), self.page_size());

        let backing = self.backing.read();
        let block = match backing.map.lookup(page) {
            Some(block) => block,
            None if self.is_external() => {
                dest.fill(0);
                return Ok(PageRead::Zeroed);
            }
            None => return Ok(PageRead::Absent),
        };

        trace!("page-in {} page {} from {:?}", self.id(), page, block);
        self.registry()
            .expect(block.partition)
            .read_block(block.block, dest)?;

        Ok(PageRead::Stored)
    }

    /// Writes one page, allocating its block first if needed
    pub fn write_page(&self, page: usize, src: &[u8]) -> Result<BlockRef, PagerError> {
        debug_assert_eq!(src.len(), self.page_size());

        let mut backing = self.backing.write();
        let Backing { map, partition } = &mut *backing;
        let block = map.write_lookup(page, partition, self.registry())?;

        trace!("page-out {} page {} to {:?}", self.id(), page, block);
        self.registry()
            .expect(block.partition)
            .write_block(block.block, src)?;

        Ok(block)
    }

    /// Whether page `page` is stored on a partition
    pub fn has_page(&self, page: usize) -> bool {
        self.backing.read().map.lookup(page).is_some()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::PageRead;
    use crate::{
        config::PagerConfig,
        error::PagerError,
        modules::partition_storage::MemoryStorage,
        object::{ObjectId, PagedObject},
        page_map::MapGeometry,
        partition::{PartitionRegistry, SignatureCheck},
    };

    const PAGE_SIZE: usize = 4096;

    fn object(external: bool, storage: MemoryStorage) -> (Arc<PartitionRegistry>, PagedObject) {
        let registry = Arc::new(PartitionRegistry::new(PAGE_SIZE));
        registry
            .register("swap0", Box::new(storage), SignatureCheck::Trust)
            .unwrap();

        let object = PagedObject::new(
            ObjectId(1),
            external,
            4,
            MapGeometry::from_config(&PagerConfig::default()),
            None,
            registry.clone(),
            None,
        );
        (registry, object)
    }

    #[test]
    fn test_write_then_read() {
        let (_registry, object) = object(false, MemoryStorage::new(8 * PAGE_SIZE));

        let page = vec![0x5a; PAGE_SIZE];
        object.write_page(2, &page).unwrap();
        assert!(object.has_page(2));

        let mut buf = vec![0; PAGE_SIZE];
        assert_eq!(object.read_page(2, &mut buf).unwrap(), PageRead::Stored);
        assert_eq!(buf, page);
    }

    #[test]
    fn test_unwritten_page_of_internal_object_is_absent() {
        let (_registry, object) = object(false, MemoryStorage::new(8 * PAGE_SIZE));

        let mut buf = vec![0x11; PAGE_SIZE];
        assert_eq!(object.read_page(1, &mut buf).unwrap(), PageRead::Absent);
        assert_eq!(object.read_page(100, &mut buf).unwrap(), PageRead::Absent);
        assert!(!object.has_page(1));
    }

    #[test]
    fn test_unwritten_page_of_external_object_is_zero() {
        let (_registry, object) = object(true, MemoryStorage::new(8 * PAGE_SIZE));

        let mut buf = vec![0x11; PAGE_SIZE];
        assert_eq!(object.read_page(1, &mut buf).unwrap(), PageRead::Zeroed);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_short_transfers_are_completed() {
        // every transfer moves at most 100 bytes
        let storage = MemoryStorage::with_max_transfer(8 * PAGE_SIZE, 100);
        let (_registry, object) = object(false, storage);

        let page: Vec<u8> = (0..PAGE_SIZE).map(|i| (i % 251) as u8).collect();
        object.write_page(0, &page).unwrap();

        let mut buf = vec![0; PAGE_SIZE];
        object.read_page(0, &mut buf).unwrap();
        assert_eq!(buf, page);
    }

    #[test]
    fn test_full_partition_reports_no_space() {
        let (_registry, object) = object(false, MemoryStorage::new(2 * PAGE_SIZE));

        let page = vec![1; PAGE_SIZE];
        object.write_page(0, &page).unwrap();
        object.write_page(1, &page).unwrap();
        assert!(matches!(object.write_page(2, &page), Err(PagerError::NoSpace)));
    }

    #[test]
    fn test_failed_write_is_reported() {
        let storage = MemoryStorage::new(4 * PAGE_SIZE);
        storage.set_fail_writes(true);
        let (_registry, object) = object(false, storage);

        let res = object.write_page(0, &vec![1; PAGE_SIZE]);
        assert!(matches!(res, Err(PagerError::Io(_))));
    }

    #[test]
    fn test_dropping_object_releases_blocks() {
        let (registry, object) = object(false, MemoryStorage::new(8 * PAGE_SIZE));
        for page in 0..5 {
            object.write_page(page, &vec![page as u8; PAGE_SIZE]).unwrap();
        }
        assert_eq!(registry.infos()[0].free_blocks, 3);

        drop(object);
        assert_eq!(registry.infos()[0].free_blocks, 8);
    }
}
