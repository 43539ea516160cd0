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

use std::{collections::HashMap, sync::Arc};

use env_logger::{Builder, Env};
use parking_lot::Mutex;

use crate::{
    config::PagerConfig,
    error::PagerError,
    modules::partition_storage::MemoryStorage,
    object::ObjectId,
    partition::SignatureCheck,
    protocol::{ControlHandle, DefaultPager, Envelope, KernelPort, ReplyId, Request},
};

mod scenarios;

pub(crate) const PAGE_SIZE: usize = 4096;

/// One message the pager sent to the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum KernelEvent {
    SetAttributes {
        control: ControlHandle,
        may_cache: bool,
    },
    DataSupply {
        control: ControlHandle,
        offset: u64,
        data: Vec<u8>,
    },
    DataProvided {
        control: ControlHandle,
        offset: u64,
        data: Vec<u8>,
    },
    DataUnavailable {
        control: ControlHandle,
        offset: u64,
        length: u64,
    },
    DataError {
        control: ControlHandle,
        offset: u64,
        length: u64,
        error: String,
    },
    LockRequest {
        control: ControlHandle,
        offset: u64,
        length: u64,
        flush: bool,
    },
    SetSizeReply {
        reply: ReplyId,
        result: Result<(), String>,
    },
}

/// Kernel stand-in that remembers everything it was sent
#[derive(Debug, Default)]
pub(crate) struct RecordingKernel {
    events: Mutex<Vec<KernelEvent>>,
}

impl RecordingKernel {
    pub(crate) fn take(&self) -> Vec<KernelEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    fn record(&self, event: KernelEvent) {
        self.events.lock().push(event);
    }
}

impl KernelPort for RecordingKernel {
    fn set_attributes(&self, control: ControlHandle, may_cache: bool) {
        self.record(KernelEvent::SetAttributes { control, may_cache });
    }

    fn data_supply(&self, control: ControlHandle, offset: u64, data: Vec<u8>) {
        self.record(KernelEvent::DataSupply {
            control,
            offset,
            data,
        });
    }

    fn data_provided(&self, control: ControlHandle, offset: u64, data: Vec<u8>) {
        self.record(KernelEvent::DataProvided {
            control,
            offset,
            data,
        });
    }

    fn data_unavailable(&self, control: ControlHandle, offset: u64, length: u64) {
        self.record(KernelEvent::DataUnavailable {
            control,
            offset,
            length,
        });
    }

    fn data_error(&self, control: ControlHandle, offset: u64, length: u64, error: &PagerError) {
        self.record(KernelEvent::DataError {
            control,
            offset,
            length,
            error: error.to_string(),
        });
    }

    fn lock_request(&self, control: ControlHandle, offset: u64, length: u64, flush: bool) {
        self.record(KernelEvent::LockRequest {
            control,
            offset,
            length,
            flush,
        });
    }

    fn set_size_reply(&self, reply: ReplyId, result: Result<(), PagerError>) {
        self.record(KernelEvent::SetSizeReply {
            reply,
            result: result.map_err(|err| err.to_string()),
        });
    }
}

pub(crate) fn init_test_logging() {
    let _ = Builder::from_env(Env::default()).is_test(true).try_init();
}

pub(crate) fn test_config() -> PagerConfig {
    PagerConfig {
        workers_per_queue: 2,
        ..Default::default()
    }
}

/// A pager driven synchronously, one message at a time
pub(crate) struct TestPager {
    pub(crate) pager: DefaultPager,
    pub(crate) kernel: Arc<RecordingKernel>,
    seqnos: HashMap<ObjectId, u64>,
}

impl TestPager {
    /// Pager with one in-memory partition per entry of `blocks`,
    /// named `swap0`, `swap1`, ...
    pub(crate) fn new(blocks: &[usize]) -> Self {
        init_test_logging();

        let kernel = Arc::new(RecordingKernel::default());
        let pager = DefaultPager::new(test_config(), kernel.clone()).unwrap();
        for (i, count) in blocks.iter().enumerate() {
            pager
                .add_partition(
                    &format!("swap{}", i),
                    Box::new(MemoryStorage::new(count * PAGE_SIZE)),
                    SignatureCheck::Trust,
                )
                .unwrap();
        }

        TestPager {
            pager,
            kernel,
            seqnos: HashMap::new(),
        }
    }

    /// Delivers `request` with the object's next sequence number and
    /// returns what the pager sent back
    pub(crate) fn send(&mut self, object: ObjectId, request: Request) -> Vec<KernelEvent> {
        let next = self.seqnos.entry(object).or_insert(0);
        let seqno = *next;
        *next += 1;

        self.pager.handle(Envelope {
            object,
            seqno,
            request,
        });
        self.kernel.take()
    }

    pub(crate) fn write_pages(&mut self, object: ObjectId, first_page: usize, pages: &[u8]) {
        let data: Vec<u8> = pages
            .iter()
            .flat_map(|value| std::iter::repeat(*value).take(PAGE_SIZE))
            .collect();
        let events = self.send(
            object,
            Request::DataWrite {
                offset: (first_page * PAGE_SIZE) as u64,
                data,
            },
        );
        assert_eq!(events, vec![]);
    }

    /// Requests a single page and returns the one reply
    pub(crate) fn read_page(&mut self, object: ObjectId, page: usize) -> KernelEvent {
        let mut events = self.send(
            object,
            Request::DataRequest {
                offset: (page * PAGE_SIZE) as u64,
                length: PAGE_SIZE as u64,
            },
        );
        assert_eq!(events.len(), 1, "expected exactly one reply: {:?}", events);
        events.remove(0)
    }
}

/// Expected reply for a stored page filled with `value`
pub(crate) fn provided(control: ControlHandle, page: usize, value: u8) -> KernelEvent {
    KernelEvent::DataProvided {
        control,
        offset: (page * PAGE_SIZE) as u64,
        data: vec![value; PAGE_SIZE],
    }
}

pub(crate) fn unavailable(control: ControlHandle, page: usize) -> KernelEvent {
    KernelEvent::DataUnavailable {
        control,
        offset: (page * PAGE_SIZE) as u64,
        length: PAGE_SIZE as u64,
    }
}
