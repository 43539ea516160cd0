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

//! Removing a partition while objects still have pages on it.
//!
//! The partition is first marked as going away so no new block lands on it.
//! Every page still stored there is then copied to another partition. If a
//! single page cannot be moved the removal is aborted, pages moved so far
//! stay where they are and the partition is put back into service.

use std::{sync::Arc, thread};

use log::{debug, info, warn};

use crate::{
    error::PagerError,
    object::PagedObject,
    partition::{BlockRef, Partition, PartitionRegistry},
};

/// Copies the page stored in `src` to a block on another partition and
/// releases `src`. Returns `None` and leaves `src` untouched if no other
/// partition has room or the copy failed.
pub(crate) fn relocate_page(registry: &PartitionRegistry, src: BlockRef) -> Option<BlockRef> {
    let page_size = registry.page_size();

    let dest_partition = registry.choose(page_size as u64, Some(src.partition))?;
    let dest = registry.alloc_block(dest_partition.id()).ok()?;

    let mut buf = vec![0u8; page_size];
    let copied = registry
        .expect(src.partition)
        .read_block(src.block, &mut buf)
        .and_then(|_| dest_partition.write_block(dest.block, &buf));

    if let Err(err) = copied {
        warn!("could not move block {:?} to {}: {}", src, dest_partition.name(), err);
        registry.dealloc_block(dest);
        return None;
    }

    registry.dealloc_block(src);
    Some(dest)
}

/// Moves every page of `object` stored on `partition` elsewhere.
/// Returns the number of pages that could not be moved.
fn evacuate_object(registry: &PartitionRegistry, object: &PagedObject, partition: &Partition) -> usize {
    // the object lock is taken without blocking so a worker holding it
    // while it waits for a partition can always make progress
    let mut backing = loop {
        match object.backing.try_write() {
            Some(backing) => break backing,
            None => thread::yield_now(),
        }
    };

    let pages: Vec<(usize, BlockRef)> = backing
        .map
        .iter_allocated()
        .filter(|(_, block)| block.partition == partition.id())
        .collect();

    let mut failed = 0;
    for (page, block) in pages {
        match relocate_page(registry, block) {
            Some(new_block) => {
                backing.map.replace(page, new_block);
                if backing.partition == Some(partition.id()) {
                    backing.partition = Some(new_block.partition);
                }
            }
            None => failed += 1,
        }
    }

    if backing.partition == Some(partition.id()) {
        backing.partition = None;
    }

    debug!("evacuated object {} ({} pages left behind)", object.id(), failed);
    failed
}

/// Removes the partition named `name` after migrating all pages off it
pub(crate) fn remove_partition(
    registry: &PartitionRegistry,
    objects: &[Arc<PagedObject>],
    name: &str,
) -> Result<(), PagerError> {
    let partition = registry.begin_removal(name)?;
    info!(
        "removing partition {}, {} blocks in use",
        name,
        partition.used_blocks()
    );

    let failed: usize = objects
        .iter()
        .map(|object| evacuate_object(registry, object, &partition))
        .sum();

    if failed > 0 || partition.used_blocks() != 0 {
        warn!(
            "aborting removal of partition {}: {} pages could not be moved",
            name, failed
        );
        registry.abort_removal(&partition);
        return Err(PagerError::PartitionBusy(name.to_string()));
    }

    registry.unregister(&partition);
    info!("removed partition {}", name);
    Ok(())
}
