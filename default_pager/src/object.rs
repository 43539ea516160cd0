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

use core::fmt;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use log::info;
use parking_lot::{Mutex, RwLock};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    page_map::{MapGeometry, PageMap},
    partition::{PartitionId, PartitionRegistry},
    protocol::{ControlHandle, ReplyId},
    sequencer::Sequencer,
};

/// Opaque identity of a paged object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Page map together with the partition new blocks are preferably taken from.
/// Both are only changed under the object's backing lock.
#[derive(Debug)]
pub(crate) struct Backing {
    pub(crate) map: PageMap,
    pub(crate) partition: Option<PartitionId>,
}

/// A set-size request waiting for the kernel to flush the dropped pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingTruncation {
    pub(crate) limit: u64,
    pub(crate) reply: ReplyId,
}

#[derive(Debug)]
pub(crate) struct ObjectState {
    /// Logical size limit in bytes
    pub(crate) limit: u64,

    /// Set by `init`, cleared by `terminate`
    pub(crate) control: Option<ControlHandle>,

    pub(crate) pending: Option<PendingTruncation>,
}

/// One kernel memory object whose pages are stored by the pager
pub struct PagedObject {
    id: ObjectId,

    /// Unwritten pages of external objects read as zero instead of absent
    external: bool,

    registry: Arc<PartitionRegistry>,

    pub(crate) backing: RwLock<Backing>,
    pub(crate) sequencer: Sequencer,
    pub(crate) state: Mutex<ObjectState>,

    /// Failed page-outs so far
    errors: AtomicU32,
}

impl PagedObject {
    pub(crate) fn new(
        id: ObjectId,
        external: bool,
        pages: usize,
        geometry: MapGeometry,
        partition: Option<PartitionId>,
        registry: Arc<PartitionRegistry>,
        control: Option<ControlHandle>,
    ) -> Self {
        PagedObject {
            id,
            external,
            registry,
            backing: RwLock::new(Backing {
                map: PageMap::new(geometry, pages),
                partition,
            }),
            sequencer: Sequencer::new(),
            state: Mutex::new(ObjectState {
                limit: u64::MAX,
                control,
                pending: None,
            }),
            errors: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.external
    }

    #[inline]
    pub(crate) fn registry(&self) -> &PartitionRegistry {
        &self.registry
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.registry.page_size()
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self) -> u32 {
        self.errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn control(&self) -> Option<ControlHandle> {
        self.state.lock().control
    }

    pub fn limit(&self) -> u64 {
        self.state.lock().limit
    }

    /// Number of page map slots
    pub fn map_size(&self) -> usize {
        self.backing.read().map.size()
    }

    pub fn preferred_partition(&self) -> Option<PartitionId> {
        self.backing.read().partition
    }

    /// Byte offsets of all pages currently stored on a partition
    pub fn allocated_pages(&self) -> Vec<u64> {
        let page_size = self.page_size() as u64;
        self.backing
            .read()
            .map
            .iter_allocated()
            .map(|(page, _)| page as u64 * page_size)
            .collect()
    }
}

impl fmt::Debug for PagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedObject")
            .field("id", &self.id)
            .field("external", &self.external)
            .field("errors", &self.errors())
            .finish()
    }
}

impl Drop for PagedObject {
    fn drop(&mut self) {
        let released = self.backing.get_mut().map.release_all(&self.registry);
        info!("destroyed object {}, released {} blocks", self.id, released);
    }
}
