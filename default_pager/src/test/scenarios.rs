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

use super::{provided, unavailable, KernelEvent, TestPager, PAGE_SIZE};
use crate::{
    error::PagerError,
    modules::partition_storage::MemoryStorage,
    partition::{PartitionId, SignatureCheck},
    protocol::{ControlHandle, ReplyId, Request},
};

const CONTROL: ControlHandle = ControlHandle(42);

#[test]
fn test_create_disables_caching() {
    let test = TestPager::new(&[16]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);

    assert_eq!(
        test.kernel.take(),
        vec![KernelEvent::SetAttributes {
            control: CONTROL,
            may_cache: false
        }]
    );
    assert_eq!(test.pager.objects()[0].id, id);
    assert!(!test.pager.objects()[0].external);
}

#[test]
fn test_sparse_object_grows_indirect() {
    let mut test = TestPager::new(&[16]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.kernel.take();

    test.write_pages(id, 0, &[0xAB]);
    test.write_pages(id, 1000, &[0xCD]);

    let object = test.pager.object(id).unwrap();
    assert!(object.backing.read().map.is_indirect());
    assert!(object.map_size() > 1000);

    assert_eq!(test.read_page(id, 0), provided(CONTROL, 0, 0xAB));
    assert_eq!(test.read_page(id, 1000), provided(CONTROL, 1000, 0xCD));
    assert_eq!(test.read_page(id, 500), unavailable(CONTROL, 500));

    assert_eq!(
        test.pager.object_pages(id).unwrap(),
        vec![0, 1000 * PAGE_SIZE as u64]
    );
}

#[test]
fn test_shrinking_waits_for_flush() {
    let mut test = TestPager::new(&[32]);
    let id = test.pager.create(10 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();

    let contents: Vec<u8> = (0..10).map(|i| 0x10 + i).collect();
    test.write_pages(id, 0, &contents);
    let map_size = test.pager.object(id).unwrap().map_size() as u64;

    let events = test.send(
        id,
        Request::SetSize {
            limit: 5 * PAGE_SIZE as u64,
            reply: ReplyId(7),
        },
    );
    // no reply before the kernel confirmed the flush
    assert_eq!(
        events,
        vec![KernelEvent::LockRequest {
            control: CONTROL,
            offset: 5 * PAGE_SIZE as u64,
            length: (map_size - 5) * PAGE_SIZE as u64,
            flush: true,
        }]
    );
    assert_eq!(test.pager.partitions()[0].free_blocks, 22);

    let events = test.send(
        id,
        Request::LockCompleted {
            offset: 5 * PAGE_SIZE as u64,
            length: (map_size - 5) * PAGE_SIZE as u64,
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(7),
            result: Ok(())
        }]
    );

    assert_eq!(test.read_page(id, 7), unavailable(CONTROL, 7));
    assert_eq!(test.read_page(id, 3), provided(CONTROL, 3, 0x13));
    assert_eq!(test.pager.partitions()[0].free_blocks, 27);
    assert_eq!(test.pager.object(id).unwrap().limit(), 5 * PAGE_SIZE as u64);
}

#[test]
fn test_second_truncation_is_rejected_while_pending() {
    let mut test = TestPager::new(&[32]);
    let id = test.pager.create(8 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[1; 8]);

    let events = test.send(
        id,
        Request::SetSize {
            limit: 2 * PAGE_SIZE as u64,
            reply: ReplyId(1),
        },
    );
    assert!(matches!(events[..], [KernelEvent::LockRequest { .. }]));

    let events = test.send(
        id,
        Request::SetSize {
            limit: PAGE_SIZE as u64,
            reply: ReplyId(2),
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(2),
            result: Err(PagerError::TruncationPending.to_string())
        }]
    );

    // the first one still completes
    let events = test.send(
        id,
        Request::LockCompleted {
            offset: 2 * PAGE_SIZE as u64,
            length: 6 * PAGE_SIZE as u64,
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(1),
            result: Ok(())
        }]
    );
    assert_eq!(test.pager.object_pages(id).unwrap().len(), 2);
}

#[test]
fn test_growing_is_applied_immediately() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(2 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[9, 9]);

    let events = test.send(
        id,
        Request::SetSize {
            limit: 64 * PAGE_SIZE as u64,
            reply: ReplyId(3),
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(3),
            result: Ok(())
        }]
    );
    assert_eq!(test.read_page(id, 1), provided(CONTROL, 1, 9));
}

#[test]
fn test_unlimited_size_keeps_every_page() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(4 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[1, 2, 3, 4]);

    let events = test.send(
        id,
        Request::SetSize {
            limit: u64::MAX,
            reply: ReplyId(4),
        },
    );
    // nothing to flush, the reply is immediate
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(4),
            result: Ok(())
        }]
    );

    assert_eq!(test.pager.object(id).unwrap().limit(), u64::MAX);
    assert_eq!(test.pager.object_pages(id).unwrap().len(), 4);
    for (page, value) in [1, 2, 3, 4].iter().enumerate() {
        assert_eq!(test.read_page(id, page), provided(CONTROL, page, *value));
    }
}

#[test]
fn test_object_without_size_limit() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(u64::MAX, CONTROL);
    test.kernel.take();

    // the map starts small and grows with the pages actually written
    assert!(test.pager.object(id).unwrap().map_size() < 1 << 20);
    test.write_pages(id, 3000, &[0x5A]);
    assert_eq!(test.read_page(id, 3000), provided(CONTROL, 3000, 0x5A));
}

#[test]
fn test_stray_lock_completed_is_ignored() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[3]);

    let events = test.send(
        id,
        Request::LockCompleted {
            offset: 0,
            length: PAGE_SIZE as u64,
        },
    );
    assert_eq!(events, vec![]);
    assert_eq!(test.read_page(id, 0), provided(CONTROL, 0, 3));
}

#[test]
fn test_external_object_reads_zero_pages() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.object_create(4 * PAGE_SIZE as u64);
    assert_eq!(test.kernel.take(), vec![]);

    // nobody to answer to before init
    let events = test.send(
        id,
        Request::DataRequest {
            offset: 0,
            length: PAGE_SIZE as u64,
        },
    );
    assert_eq!(events, vec![]);

    let events = test.send(
        id,
        Request::Init {
            control: CONTROL,
            page_size: PAGE_SIZE,
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetAttributes {
            control: CONTROL,
            may_cache: false
        }]
    );

    assert_eq!(
        test.read_page(id, 2),
        KernelEvent::DataSupply {
            control: CONTROL,
            offset: 2 * PAGE_SIZE as u64,
            data: vec![0; PAGE_SIZE],
        }
    );

    test.write_pages(id, 2, &[0x77]);
    assert_eq!(test.read_page(id, 2), provided(CONTROL, 2, 0x77));
}

#[test]
fn test_truncating_uninitialized_object_needs_no_flush() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.object_create(4 * PAGE_SIZE as u64);
    test.write_pages(id, 0, &[1, 2, 3, 4]);

    let events = test.send(
        id,
        Request::SetSize {
            limit: PAGE_SIZE as u64,
            reply: ReplyId(5),
        },
    );
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(5),
            result: Ok(())
        }]
    );
    assert_eq!(test.pager.object_pages(id).unwrap(), vec![0]);
}

#[test]
fn test_terminate_applies_pending_truncation() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.object_create(4 * PAGE_SIZE as u64);
    test.send(
        id,
        Request::Init {
            control: CONTROL,
            page_size: PAGE_SIZE,
        },
    );
    test.write_pages(id, 0, &[1, 2, 3, 4]);

    let events = test.send(
        id,
        Request::SetSize {
            limit: 0,
            reply: ReplyId(9),
        },
    );
    assert!(matches!(events[..], [KernelEvent::LockRequest { .. }]));

    let events = test.send(id, Request::Terminate);
    assert_eq!(
        events,
        vec![KernelEvent::SetSizeReply {
            reply: ReplyId(9),
            result: Ok(())
        }]
    );
    assert_eq!(test.pager.object_pages(id).unwrap(), vec![]);

    // the object survives termination and can be attached again
    let object = test.pager.object(id).unwrap();
    assert_eq!(object.control(), None);
    test.send(
        id,
        Request::Init {
            control: ControlHandle(43),
            page_size: PAGE_SIZE,
        },
    );
    assert_eq!(object.control(), Some(ControlHandle(43)));
}

#[test]
fn test_data_initialize_keeps_stored_pages() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(2 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[0x11]);

    let mut data = vec![0x22; 2 * PAGE_SIZE];
    data[PAGE_SIZE..].fill(0x33);
    let events = test.send(id, Request::DataInitialize { offset: 0, data });
    assert_eq!(events, vec![]);

    assert_eq!(test.read_page(id, 0), provided(CONTROL, 0, 0x11));
    assert_eq!(test.read_page(id, 1), provided(CONTROL, 1, 0x33));
}

#[test]
fn test_failed_page_out_degrades_reads() {
    let mut test = TestPager::new(&[]);
    let storage = MemoryStorage::new(8 * PAGE_SIZE);
    storage.set_fail_writes(true);
    test.pager
        .add_partition("broken", Box::new(storage), SignatureCheck::Trust)
        .unwrap();

    let id = test.pager.create(2 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();

    // both pages fail, neither aborts the batch
    test.write_pages(id, 0, &[1, 2]);
    assert_eq!(test.pager.object(id).unwrap().errors(), 2);

    assert_eq!(
        test.read_page(id, 5),
        KernelEvent::DataError {
            control: CONTROL,
            offset: 5 * PAGE_SIZE as u64,
            length: PAGE_SIZE as u64,
            error: PagerError::Unreliable(2).to_string(),
        }
    );
}

#[test]
fn test_page_out_without_space_is_counted() {
    let mut test = TestPager::new(&[2]);
    let id = test.pager.create(4 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();

    test.write_pages(id, 0, &[1, 2, 3]);
    let object = test.pager.object(id).unwrap();
    assert_eq!(object.errors(), 1);
    assert!(object.has_page(0));
    assert!(object.has_page(1));
    assert!(!object.has_page(2));
}

#[test]
fn test_no_senders_releases_everything() {
    let mut test = TestPager::new(&[16]);
    let id = test.pager.create(4 * PAGE_SIZE as u64, CONTROL);
    test.kernel.take();
    test.write_pages(id, 0, &[5, 6, 7, 8]);

    let info = test.pager.paging_info();
    assert_eq!(info.objects, 1);
    assert_eq!(info.free_bytes, 12 * PAGE_SIZE as u64);

    assert_eq!(test.send(id, Request::NoSenders), vec![]);

    let info = test.pager.paging_info();
    assert_eq!(info.objects, 0);
    assert_eq!(info.free_bytes, info.total_bytes);
    assert!(test.pager.objects().is_empty());
    assert!(matches!(
        test.pager.object_pages(id),
        Err(PagerError::NoSuchObject(_))
    ));

    // late messages are dropped
    let events = test.send(
        id,
        Request::DataRequest {
            offset: 0,
            length: PAGE_SIZE as u64,
        },
    );
    assert_eq!(events, vec![]);
}

#[test]
fn test_create_prefers_partition_with_room() {
    let test = TestPager::new(&[2, 8]);

    let id = test.pager.create(4 * PAGE_SIZE as u64, CONTROL);
    assert_eq!(
        test.pager.object(id).unwrap().preferred_partition(),
        Some(PartitionId::from_name("swap1"))
    );

    // nothing is large enough: fall back to any partition with a free page
    let id = test.pager.create(64 * PAGE_SIZE as u64, CONTROL);
    assert_eq!(
        test.pager.object(id).unwrap().preferred_partition(),
        Some(PartitionId::from_name("swap0"))
    );
}

#[test]
fn test_admin_surface() {
    let mut test = TestPager::new(&[8]);
    let a = test.pager.create(PAGE_SIZE as u64, CONTROL);
    let b = test.pager.object_create(PAGE_SIZE as u64);
    test.kernel.take();
    test.write_pages(a, 0, &[1, 2]);

    let objects = test.pager.objects();
    assert_eq!(objects.len(), 2);
    assert_eq!(objects[0].id, a);
    assert_eq!(objects[0].stored_pages, 2);
    assert_eq!(objects[1].id, b);
    assert!(objects[1].external);

    let res = test.pager.add_partition(
        "swap0",
        Box::new(MemoryStorage::new(PAGE_SIZE)),
        SignatureCheck::Trust,
    );
    assert!(matches!(res, Err(PagerError::DuplicatePartition(_))));

    let info = test
        .pager
        .add_partition(
            "swap1",
            Box::new(MemoryStorage::new(4 * PAGE_SIZE)),
            SignatureCheck::Trust,
        )
        .unwrap();
    assert_eq!(info.total_blocks, 4);
    assert_eq!(test.pager.paging_info().total_bytes, 12 * PAGE_SIZE as u64);
}

#[test]
#[should_panic]
fn test_copy_is_fatal() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.send(id, Request::Copy);
}

#[test]
#[should_panic]
fn test_partial_page_write_is_fatal() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.send(
        id,
        Request::DataWrite {
            offset: 0,
            data: vec![0; PAGE_SIZE + 1],
        },
    );
}

#[test]
#[should_panic(expected = "malformed data-request")]
fn test_data_request_past_address_space_is_fatal() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.send(
        id,
        Request::DataRequest {
            offset: u64::MAX - PAGE_SIZE as u64 + 1,
            length: 2 * PAGE_SIZE as u64,
        },
    );
}

#[test]
#[should_panic]
fn test_double_init_is_fatal() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.create(PAGE_SIZE as u64, CONTROL);
    test.send(
        id,
        Request::Init {
            control: ControlHandle(1),
            page_size: PAGE_SIZE,
        },
    );
}

#[test]
#[should_panic]
fn test_page_size_mismatch_is_fatal() {
    let mut test = TestPager::new(&[8]);
    let id = test.pager.object_create(PAGE_SIZE as u64);
    test.send(
        id,
        Request::Init {
            control: CONTROL,
            page_size: 2 * PAGE_SIZE,
        },
    );
}
