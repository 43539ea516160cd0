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

use log::{debug, error, trace};

use crate::{
    config::PagerConfig,
    error::PagerError,
    partition::{BlockRef, PartitionId, PartitionRegistry},
    util::{div_ceil, round_up_to_nearest},
};

/// One page map entry, `None` means the page was never written
pub(crate) type Slot = Option<BlockRef>;

/// Sizing parameters shared by all page maps of a pager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapGeometry {
    /// Slots per second-level block
    pub chunk: usize,

    /// Maps smaller than this many slots grow to the next power of two
    pub doubling_ceiling: usize,
}

impl MapGeometry {
    pub fn from_config(config: &PagerConfig) -> Self {
        MapGeometry {
            chunk: config.pagemap_chunk,
            doubling_ceiling: config.doubling_ceiling_pages(),
        }
    }

    #[inline]
    fn is_indirect(&self, size: usize) -> bool {
        size > self.chunk
    }
}

#[derive(Debug)]
enum Repr {
    /// Flat array of `size` slots
    Direct(Vec<Slot>),

    /// Second-level blocks of `chunk` slots each, `None` while completely empty
    Indirect(Vec<Option<Box<[Slot]>>>),
}

/// Sparse page index to block translation of one paged object.
///
/// The representation only depends on `size`: maps with at most `chunk`
/// slots are direct, larger maps are indirect. [`PageMap::extend`] and
/// [`PageMap::truncate`] are the only places where it changes.
#[derive(Debug)]
pub struct PageMap {
    size: usize,
    repr: Repr,
    geometry: MapGeometry,
}

impl PageMap {
    /// Creates an empty map covering at least `pages` pages
    pub fn new(geometry: MapGeometry, pages: usize) -> Self {
        let mut map = PageMap {
            size: 1,
            repr: Repr::Direct(vec![None]),
            geometry,
        };
        map.extend(pages);
        map
    }

    /// Number of addressable slots
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_indirect(&self) -> bool {
        matches!(self.repr, Repr::Indirect(_))
    }

    /// Returns the block holding `page`, `None` if it is unallocated or
    /// beyond the end of the map. Never allocates.
    pub fn lookup(&self, page: usize) -> Option<BlockRef> {
        if page >= self.size {
            return None;
        }

        match &self.repr {
            Repr::Direct(slots) => slots[page],
            Repr::Indirect(chunks) => {
                let chunk = self.geometry.chunk;
                chunks[page / chunk]
                    .as_ref()
                    .and_then(|slots| slots[page % chunk])
            }
        }
    }

    /// Grows the map so it covers at least `pages` slots.
    ///
    /// Below the doubling ceiling the new size is the next power of two,
    /// above it the size is rounded up to whole second-level blocks.
    pub fn extend(&mut self, pages: usize) {
        if pages <= self.size {
            return;
        }

        let new_size = if self.size < self.geometry.doubling_ceiling {
            pages.next_power_of_two()
        } else {
            round_up_to_nearest(pages, self.geometry.chunk)
        };

        debug!(
            "extend page map from {} to {} slots (requested {})",
            self.size, new_size, pages
        );

        if self.geometry.is_indirect(new_size) {
            let chunk = self.geometry.chunk;
            let chunk_count = div_ceil(new_size, chunk);

            let converted = match &mut self.repr {
                Repr::Direct(slots) => {
                    // the direct array always fits into the first block
                    let mut chunks: Vec<Option<Box<[Slot]>>> = Vec::with_capacity(chunk_count);
                    if slots.iter().any(Option::is_some) {
                        let mut first = vec![None; chunk];
                        first[..slots.len()].copy_from_slice(slots);
                        chunks.push(Some(first.into_boxed_slice()));
                    } else {
                        chunks.push(None);
                    }
                    chunks.resize_with(chunk_count, || None);
                    Some(Repr::Indirect(chunks))
                }
                Repr::Indirect(chunks) => {
                    chunks.resize_with(chunk_count, || None);
                    None
                }
            };
            if let Some(repr) = converted {
                self.repr = repr;
            }
        } else {
            match &mut self.repr {
                Repr::Direct(slots) => slots.resize(new_size, None),
                Repr::Indirect(_) => unreachable!("indirect map smaller than one block"),
            }
        }

        self.size = new_size;
    }

    /// Shrinks the map to `pages` slots, releasing every block at or beyond
    /// `pages`. A size of zero is kept as a single empty slot.
    ///
    /// Callers must make sure no cached copy of the dropped pages can still
    /// be written back, the released blocks are reused right away.
    pub fn truncate(&mut self, pages: usize, registry: &PartitionRegistry) {
        self.check_repr();

        let new_size = pages.max(1);
        let released = self.release_from(pages, registry);
        if new_size >= self.size {
            return;
        }

        let chunk = self.geometry.chunk;
        let repr = std::mem::replace(&mut self.repr, Repr::Direct(Vec::new()));
        self.repr = match repr {
            Repr::Direct(mut slots) => {
                slots.truncate(new_size);
                slots.shrink_to_fit();
                Repr::Direct(slots)
            }
            Repr::Indirect(mut chunks) if self.geometry.is_indirect(new_size) => {
                chunks.truncate(div_ceil(new_size, chunk));
                Repr::Indirect(chunks)
            }
            Repr::Indirect(mut chunks) => {
                // collapse into a direct map, only the first block can be left
                let mut slots = vec![None; new_size];
                if let Some(Some(first)) = chunks.drain(..).next() {
                    slots.copy_from_slice(&first[..new_size]);
                }
                Repr::Direct(slots)
            }
        };

        debug!(
            "truncated page map from {} to {} slots, released {} blocks",
            self.size, new_size, released
        );
        self.size = new_size;
    }

    /// Releases every allocated block, leaving an empty map of the same size
    pub fn release_all(&mut self, registry: &PartitionRegistry) -> usize {
        self.release_from(0, registry)
    }

    /// Returns the slot for `page`, allocating a block if it is empty and
    /// growing the map if `page` is beyond its end.
    ///
    /// The block comes from `partition` if it has room, otherwise from any
    /// other partition with free space, which then becomes the new current
    /// partition. Fails with `NoSpace` only if no partition has room.
    pub fn write_lookup(
        &mut self,
        page: usize,
        partition: &mut Option<PartitionId>,
        registry: &PartitionRegistry,
    ) -> Result<BlockRef, PagerError> {
        if page >= self.size {
            self.extend(page + 1);
        }

        if let Some(block) = self.lookup(page) {
            return Ok(block);
        }

        let block = allocate_block(partition, registry)?;
        trace!("page {} gets block {:?}", page, block);
        *self.slot_mut(page) = Some(block);

        Ok(block)
    }

    /// Points `page` at another block, used when migrating
    pub(crate) fn replace(&mut self, page: usize, block: BlockRef) {
        let slot = self.slot_mut(page);
        debug_assert!(slot.is_some(), "only allocated slots are relocated");
        *slot = Some(block);
    }

    /// Iterates over `(page, block)` of every allocated slot in page order
    pub fn iter_allocated(&self) -> impl Iterator<Item = (usize, BlockRef)> + '_ {
        let chunk = self.geometry.chunk;
        let (direct, indirect) = match &self.repr {
            Repr::Direct(slots) => (Some(slots), None),
            Repr::Indirect(chunks) => (None, Some(chunks)),
        };

        let direct = direct.into_iter().flat_map(|slots| {
            slots
                .iter()
                .enumerate()
                .filter_map(|(page, slot)| slot.map(|block| (page, block)))
        });

        let indirect = indirect.into_iter().flat_map(move |chunks| {
            chunks
                .iter()
                .enumerate()
                .filter_map(|(index, slots)| slots.as_ref().map(|slots| (index, slots)))
                .flat_map(move |(index, slots)| {
                    slots.iter().enumerate().filter_map(move |(i, slot)| {
                        slot.map(|block| (index * chunk + i, block))
                    })
                })
        });

        direct.chain(indirect)
    }

    pub fn allocated_count(&self) -> usize {
        self.iter_allocated().count()
    }

    /// `page` has to be below `size`
    fn slot_mut(&mut self, page: usize) -> &mut Slot {
        debug_assert!(page < self.size);

        match &mut self.repr {
            Repr::Direct(slots) => &mut slots[page],
            Repr::Indirect(chunks) => {
                let chunk = self.geometry.chunk;
                let slots = chunks[page / chunk]
                    .get_or_insert_with(|| vec![None; chunk].into_boxed_slice());
                &mut slots[page % chunk]
            }
        }
    }

    /// Releases the blocks of all slots at or beyond `from` and drops
    /// second-level blocks that end up empty
    fn release_from(&mut self, from: usize, registry: &PartitionRegistry) -> usize {
        let mut released = 0;
        let mut release = |slot: &mut Slot| {
            if let Some(block) = slot.take() {
                registry.dealloc_block(block);
                released += 1;
            }
        };

        match &mut self.repr {
            Repr::Direct(slots) => slots.iter_mut().skip(from).for_each(&mut release),
            Repr::Indirect(chunks) => {
                let chunk = self.geometry.chunk;
                for (index, entry) in chunks.iter_mut().enumerate() {
                    let start = index * chunk;
                    if start + chunk <= from {
                        continue;
                    }

                    if let Some(slots) = entry {
                        let skip = from.saturating_sub(start);
                        slots.iter_mut().skip(skip).for_each(&mut release);
                        if slots.iter().all(Option::is_none) {
                            *entry = None;
                        }
                    }
                }
            }
        }

        released
    }

    /// The representation has to match the size, anything else is corruption
    fn check_repr(&self) {
        let consistent = match &self.repr {
            Repr::Direct(slots) => {
                !self.geometry.is_indirect(self.size) && slots.len() == self.size
            }
            Repr::Indirect(chunks) => {
                self.geometry.is_indirect(self.size)
                    && chunks.len() == div_ceil(self.size, self.geometry.chunk)
            }
        };

        if !consistent {
            error!("page map of {} slots has a corrupt representation", self.size);
            panic!("page map representation does not match its size");
        }
    }
}

/// Allocates a block, trying the current partition first
fn allocate_block(
    partition: &mut Option<PartitionId>,
    registry: &PartitionRegistry,
) -> Result<BlockRef, PagerError> {
    if let Some(current) = *partition {
        if let Ok(block) = registry.alloc_block(current) {
            return Ok(block);
        }
    }

    // the current partition is full, gone or was never chosen.
    // `choose` may race with other allocations, so keep trying until nothing is left
    loop {
        let candidate = registry
            .choose(registry.page_size() as u64, *partition)
            .ok_or(PagerError::NoSpace)?;

        if let Ok(block) = registry.alloc_block(candidate.id()) {
            debug!("switching to partition {}", candidate.name());
            *partition = Some(candidate.id());
            return Ok(block);
        }
    }
}
