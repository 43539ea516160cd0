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

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, error, info, warn};
use parking_lot::RwLock;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{ControlHandle, Envelope, KernelPort, ReplyId, Request};
use crate::{
    config::PagerConfig,
    error::PagerError,
    io::PageRead,
    migration,
    modules::partition_storage::PartitionStorage,
    object::{ObjectId, PagedObject, PendingTruncation},
    page_map::MapGeometry,
    partition::{PartitionInfo, PartitionRegistry, SignatureCheck},
    util::pages_for,
};

/// Aggregate paging space
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PagingInfo {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub page_size: usize,
    pub objects: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub external: bool,

    /// Bytes covered by the page map
    pub size: u64,
    pub limit: u64,
    pub stored_pages: usize,
    pub errors: u32,
}

/// The default pager: the backing store of all anonymous memory.
///
/// Messages are handed in through [`DefaultPager::handle`], usually by a
/// [`super::Dispatcher`]. Several workers may call `handle` concurrently,
/// each object's sequencer restores the order the kernel sent its messages in.
pub struct DefaultPager {
    config: PagerConfig,
    geometry: MapGeometry,
    registry: Arc<PartitionRegistry>,
    objects: RwLock<HashMap<ObjectId, Arc<PagedObject>>>,
    next_id: AtomicU64,
    kernel: Arc<dyn KernelPort>,
}

impl DefaultPager {
    pub fn new(config: PagerConfig, kernel: Arc<dyn KernelPort>) -> Result<Self, PagerError> {
        config.validate()?;

        Ok(DefaultPager {
            geometry: MapGeometry::from_config(&config),
            registry: Arc::new(PartitionRegistry::new(config.page_size)),
            objects: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            kernel,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn object(&self, id: ObjectId) -> Option<Arc<PagedObject>> {
        self.objects.read().get(&id).cloned()
    }

    /// Creates an internal object on behalf of the kernel, which already
    /// holds its control handle
    pub fn create(&self, size: u64, control: ControlHandle) -> ObjectId {
        let id = self.install(size, false, Some(control));
        self.kernel.set_attributes(control, false);
        id
    }

    /// Creates an external object, the kernel attaches to it with `init`
    pub fn object_create(&self, size: u64) -> ObjectId {
        self.install(size, true, None)
    }

    fn install(&self, size: u64, external: bool, control: Option<ControlHandle>) -> ObjectId {
        let id = ObjectId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let partition = self
            .registry
            .choose(size, None)
            .or_else(|| self.registry.choose(self.page_size() as u64, None))
            .map(|p| p.id());

        // larger objects grow their map on demand
        let pages = pages_for(size, self.page_size()).min(self.geometry.doubling_ceiling);
        let object = Arc::new(PagedObject::new(
            id,
            external,
            pages,
            self.geometry,
            partition,
            self.registry.clone(),
            control,
        ));
        self.objects.write().insert(id, object);

        info!(
            "created {} object {} of {} bytes",
            if external { "external" } else { "internal" },
            id,
            size
        );
        id
    }

    /// Processes one inbound message. Messages for unknown objects are dropped.
    pub fn handle(&self, envelope: Envelope) {
        let Envelope {
            object: id,
            seqno,
            request,
        } = envelope;

        let object = match self.object(id) {
            Some(object) => object,
            None => {
                warn!("dropping {} for unknown object {}", request.name(), id);
                return;
            }
        };
        debug!("{} #{} for object {}", request.name(), seqno, id);

        match request {
            Request::Init { control, page_size } => self.init(&object, seqno, control, page_size),
            Request::Terminate => self.terminate(&object, seqno),
            Request::DataRequest { offset, length } => {
                self.data_request(&object, seqno, offset, length)
            }
            Request::DataWrite { offset, data } => {
                self.data_write(&object, seqno, offset, &data, false)
            }
            Request::DataInitialize { offset, data } => {
                self.data_write(&object, seqno, offset, &data, true)
            }
            Request::Copy => {
                error!("copy requested for object {}", id);
                panic!("memory object copy is not supported");
            }
            Request::LockCompleted { offset, length } => {
                self.lock_completed(&object, seqno, offset, length)
            }
            Request::NoSenders => self.no_senders(&object, seqno),
            Request::SetSize { limit, reply } => self.set_size(&object, seqno, limit, reply),
        }
    }

    fn init(&self, object: &PagedObject, seqno: u64, control: ControlHandle, page_size: usize) {
        let _turn = object.sequencer.enter(seqno);

        if page_size != self.page_size() {
            error!(
                "object {} initialized with page size {}, pager uses {}",
                object.id(),
                page_size,
                self.page_size()
            );
            panic!("page size mismatch");
        }

        let mut state = object.state.lock();
        if let Some(previous) = state.control {
            error!(
                "object {} initialized twice ({:?} and {:?})",
                object.id(),
                previous,
                control
            );
            panic!("object initialized twice");
        }
        state.control = Some(control);
        drop(state);

        self.kernel.set_attributes(control, false);
    }

    fn terminate(&self, object: &PagedObject, seqno: u64) {
        let turn = object.sequencer.enter(seqno);
        turn.drain();
        turn.wait_for_name_refs();

        let mut state = object.state.lock();
        state.control = None;
        let pending = state.pending.take();
        drop(state);

        // the kernel has no cached pages left, nothing can race the truncation
        if let Some(pending) = pending {
            self.truncate(object, pending.limit);
            object.state.lock().limit = pending.limit;
            self.kernel.set_size_reply(pending.reply, Ok(()));
        }

        debug!("terminated object {}", object.id());
    }

    fn data_request(&self, object: &PagedObject, seqno: u64, offset: u64, length: u64) {
        let turn = object.sequencer.enter(seqno);
        let control = match object.control() {
            Some(control) => control,
            None => {
                warn!("data-request for uninitialized object {}", object.id());
                return;
            }
        };
        let _read = turn.start_read();

        let page_size = self.page_size() as u64;
        let end = match offset.checked_add(length) {
            Some(end) if offset % page_size == 0 && length % page_size == 0 => end,
            _ => {
                error!(
                    "data-request for object {} not page aligned or out of range: {} + {}",
                    object.id(),
                    offset,
                    length
                );
                panic!("malformed data-request");
            }
        };

        let errors = object.errors();
        if errors > 0 {
            warn!(
                "refusing data-request for object {}, {} page-outs failed",
                object.id(),
                errors
            );
            self.kernel
                .data_error(control, offset, length, &PagerError::Unreliable(errors));
            return;
        }

        for offset in (offset..end).step_by(page_size as usize) {
            let page = (offset / page_size) as usize;
            let mut buf = vec![0u8; page_size as usize];

            match object.read_page(page, &mut buf) {
                Ok(PageRead::Stored) => self.kernel.data_provided(control, offset, buf),
                Ok(PageRead::Zeroed) => self.kernel.data_supply(control, offset, buf),
                Ok(PageRead::Absent) => self.kernel.data_unavailable(control, offset, page_size),
                Err(err) => {
                    warn!("page-in of object {} at {} failed: {}", object.id(), offset, err);
                    self.kernel.data_error(control, offset, page_size, &err);
                }
            }
        }
    }

    /// data-write and data-initialize. The latter never overwrites a page
    /// that is already stored.
    fn data_write(
        &self,
        object: &PagedObject,
        seqno: u64,
        offset: u64,
        data: &[u8],
        initialize: bool,
    ) {
        let _write = object.sequencer.enter(seqno).start_write();

        let page_size = self.page_size();
        if offset % page_size as u64 != 0 || data.len() % page_size != 0 {
            error!(
                "data-write for object {} not page aligned: {} + {}",
                object.id(),
                offset,
                data.len()
            );
            panic!("malformed data-write");
        }

        let first_page = (offset / page_size as u64) as usize;
        for (i, contents) in data.chunks_exact(page_size).enumerate() {
            let page = first_page + i;
            if initialize && object.has_page(page) {
                continue;
            }

            if let Err(err) = object.write_page(page, contents) {
                let errors = object.record_error();
                warn!(
                    "page-out of object {} page {} failed ({} failures so far): {}",
                    object.id(),
                    page,
                    errors,
                    err
                );
            }
        }
    }

    fn set_size(&self, object: &PagedObject, seqno: u64, limit: u64, reply: ReplyId) {
        let turn = object.sequencer.enter(seqno);
        turn.drain();

        let pages = pages_for(limit, self.page_size());
        let map_size = object.map_size();

        let mut state = object.state.lock();
        if state.pending.is_some() {
            drop(state);
            self.kernel
                .set_size_reply(reply, Err(PagerError::TruncationPending));
            return;
        }

        if pages >= map_size {
            state.limit = limit;
            drop(state);
            self.kernel.set_size_reply(reply, Ok(()));
            return;
        }

        match state.control {
            Some(control) => {
                state.pending = Some(PendingTruncation { limit, reply });
                drop(state);

                let page_size = self.page_size() as u64;
                let start = pages as u64 * page_size;
                let end = map_size as u64 * page_size;
                debug!(
                    "object {}: flushing {}..{} before truncation",
                    object.id(),
                    start,
                    end
                );
                self.kernel.lock_request(control, start, end - start, true);
            }
            None => {
                // nothing is cached in the kernel
                state.limit = limit;
                drop(state);
                self.truncate(object, limit);
                self.kernel.set_size_reply(reply, Ok(()));
            }
        }
    }

    fn lock_completed(&self, object: &PagedObject, seqno: u64, offset: u64, length: u64) {
        let turn = object.sequencer.enter(seqno);
        turn.drain();

        let pending = object.state.lock().pending.take();
        let Some(pending) = pending else {
            warn!(
                "lock-completed ({} + {}) for object {} without pending truncation",
                offset,
                length,
                object.id()
            );
            return;
        };

        self.truncate(object, pending.limit);
        object.state.lock().limit = pending.limit;
        self.kernel.set_size_reply(pending.reply, Ok(()));
    }

    fn no_senders(&self, object: &PagedObject, seqno: u64) {
        let turn = object.sequencer.enter(seqno);
        turn.drain();
        turn.wait_for_name_refs();

        if let Some(pending) = object.state.lock().pending.take() {
            debug!(
                "object {} went away with truncation to {} pending",
                object.id(),
                pending.limit
            );
        }

        // blocks are released once the last reference is gone
        self.objects.write().remove(&object.id());
        info!("object {} has no senders left", object.id());
    }

    fn truncate(&self, object: &PagedObject, limit: u64) {
        let pages = pages_for(limit, self.page_size());
        object.backing.write().map.truncate(pages, &self.registry);
    }

    /// Snapshot of all live objects
    pub fn objects(&self) -> Vec<ObjectInfo> {
        let objects: Vec<_> = self.objects.read().values().cloned().collect();
        let page_size = self.page_size() as u64;

        let mut infos: Vec<ObjectInfo> = objects
            .iter()
            .map(|object| {
                let _name = object.sequencer.name_ref();
                let backing = object.backing.read();
                ObjectInfo {
                    id: object.id(),
                    external: object.is_external(),
                    size: backing.map.size() as u64 * page_size,
                    limit: object.limit(),
                    stored_pages: backing.map.allocated_count(),
                    errors: object.errors(),
                }
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Byte offsets of the stored pages of object `id`
    pub fn object_pages(&self, id: ObjectId) -> Result<Vec<u64>, PagerError> {
        let object = self.object(id).ok_or(PagerError::NoSuchObject(id))?;
        let _name = object.sequencer.name_ref();
        Ok(object.allocated_pages())
    }

    pub fn paging_info(&self) -> PagingInfo {
        let (total_bytes, free_bytes) = self.registry.space();
        PagingInfo {
            total_bytes,
            free_bytes,
            page_size: self.page_size(),
            objects: self.objects.read().len(),
        }
    }

    pub fn partitions(&self) -> Vec<PartitionInfo> {
        self.registry.infos()
    }

    pub fn add_partition(
        &self,
        name: &str,
        storage: Box<dyn PartitionStorage>,
        check: SignatureCheck,
    ) -> Result<PartitionInfo, PagerError> {
        self.registry
            .register(name, storage, check)
            .map(|partition| partition.info())
    }

    /// Migrates every page off partition `name` and detaches it.
    /// Fails with `PartitionBusy` if a page could not be moved.
    pub fn remove_partition(&self, name: &str) -> Result<(), PagerError> {
        let objects: Vec<_> = self.objects.read().values().cloned().collect();
        migration::remove_partition(&self.registry, &objects, name)
    }
}
