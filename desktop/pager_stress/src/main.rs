use std::{collections::HashMap, env, fs, sync::Arc, time::Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use default_pager::{
    modules::partition_storage::FileStorage, ControlHandle, DefaultPager, Dispatcher,
    KernelPort, ObjectId, PagerConfig, PagerError, ReplyId, Request, SignatureCheck,
};
use env_logger::{Builder, Env};
use log::{info, warn};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, RngCore, SeedableRng};

const SEED: u64 = 5446535461589659585;
const PAGE_SIZE: usize = 4096;
const PARTITION_PAGES: u64 = 256;
const OBJECT_COUNT: u64 = 8;
const OBJECT_PAGES: usize = 32;
const WRITES: usize = 5000;

/// What the kernel last heard about a page: its contents or "unavailable"
type PageState = Option<Vec<u8>>;

/// Plays the kernel: keeps the last reply per page and forwards flush
/// requests to the main thread
struct StressKernel {
    pages: Mutex<HashMap<(u64, u64), PageState>>,
    errors: Mutex<Vec<String>>,
    locks: Sender<(ControlHandle, u64, u64)>,
    replies: Sender<(ReplyId, Result<(), String>)>,
}

impl KernelPort for StressKernel {
    fn set_attributes(&self, _control: ControlHandle, may_cache: bool) {
        assert!(!may_cache);
    }

    fn data_supply(&self, control: ControlHandle, offset: u64, data: Vec<u8>) {
        self.pages.lock().insert((control.0, offset), Some(data));
    }

    fn data_provided(&self, control: ControlHandle, offset: u64, data: Vec<u8>) {
        self.pages.lock().insert((control.0, offset), Some(data));
    }

    fn data_unavailable(&self, control: ControlHandle, offset: u64, _length: u64) {
        self.pages.lock().insert((control.0, offset), None);
    }

    fn data_error(&self, control: ControlHandle, offset: u64, length: u64, error: &PagerError) {
        self.errors.lock().push(format!(
            "control {:?} {}+{}: {}",
            control, offset, length, error
        ));
    }

    fn lock_request(&self, control: ControlHandle, offset: u64, length: u64, _flush: bool) {
        self.locks.send((control, offset, length)).unwrap();
    }

    fn set_size_reply(&self, reply: ReplyId, result: Result<(), PagerError>) {
        self.replies
            .send((reply, result.map_err(|err| err.to_string())))
            .unwrap();
    }
}

fn attach_partition(pager: &DefaultPager, name: &str) {
    let path = env::temp_dir().join(format!("default_pager_{}.swap", name));
    let storage = FileStorage::create(&path, PARTITION_PAGES * PAGE_SIZE as u64).unwrap();
    let info = pager
        .add_partition(name, Box::new(storage), SignatureCheck::Trust)
        .unwrap();
    info!("attached {} at {}", info.name, path.display());
}

fn page_of(value: u8) -> Vec<u8> {
    vec![value; PAGE_SIZE]
}

/// Shrinks `object` to `pages` pages, playing the kernel's part of the handshake
fn truncate(
    dispatcher: &Dispatcher,
    object: ObjectId,
    pages: usize,
    locks: &Receiver<(ControlHandle, u64, u64)>,
    replies: &Receiver<(ReplyId, Result<(), String>)>,
) {
    dispatcher.send(
        object,
        Request::SetSize {
            limit: (pages * PAGE_SIZE) as u64,
            reply: ReplyId(object.0),
        },
    );

    let (control, offset, length) = locks.recv().unwrap();
    info!(
        "kernel flushes {:?} {}..{}",
        control,
        offset,
        offset + length
    );
    dispatcher.send(object, Request::LockCompleted { offset, length });

    let (reply, result) = replies.recv().unwrap();
    assert_eq!(reply, ReplyId(object.0));
    assert_eq!(result, Ok(()));
}

fn main() {
    Builder::from_env(Env::default())
        .filter_level(log::LevelFilter::Info)
        .format_module_path(false)
        .init();

    let (locks_tx, locks) = unbounded();
    let (replies_tx, replies) = unbounded();
    let kernel = Arc::new(StressKernel {
        pages: Mutex::new(HashMap::new()),
        errors: Mutex::new(vec![]),
        locks: locks_tx,
        replies: replies_tx,
    });

    let config = PagerConfig {
        page_size: PAGE_SIZE,
        workers_per_queue: 4,
        ..Default::default()
    };
    let pager = Arc::new(DefaultPager::new(config, kernel.clone()).unwrap());
    attach_partition(&pager, "stress-a");
    attach_partition(&pager, "stress-b");

    let dispatcher = Dispatcher::start(pager.clone()).unwrap();
    let start = Instant::now();

    // even objects are created by the kernel, odd ones through the admin surface
    let objects: Vec<ObjectId> = (0..OBJECT_COUNT)
        .map(|i| {
            let size = (OBJECT_PAGES * PAGE_SIZE) as u64;
            if i % 2 == 0 {
                pager.create(size, ControlHandle(i))
            } else {
                let id = pager.object_create(size);
                dispatcher.send(
                    id,
                    Request::Init {
                        control: ControlHandle(i),
                        page_size: PAGE_SIZE,
                    },
                );
                id
            }
        })
        .collect();

    let mut rand = SmallRng::seed_from_u64(SEED);
    let mut expected: HashMap<(u64, u64), u8> = HashMap::new();

    for i in 0..WRITES {
        let object = rand.next_u32() as usize % objects.len();
        let page = rand.next_u32() as usize % OBJECT_PAGES;
        let value = rand.next_u32() as u8;
        let offset = (page * PAGE_SIZE) as u64;

        dispatcher.send(
            objects[object],
            Request::DataWrite {
                offset,
                data: page_of(value),
            },
        );
        expected.insert((object as u64, offset), value);

        if i % 7 == 0 {
            dispatcher.send(
                objects[object],
                Request::DataRequest {
                    offset,
                    length: PAGE_SIZE as u64,
                },
            );
        }

        if i == WRITES / 2 {
            // the writes queued so far race the migration
            match pager.remove_partition("stress-a") {
                Ok(()) => info!("removed stress-a after {} writes", i),
                Err(err) => warn!("could not remove stress-a: {}", err),
            }
        }
    }

    // drop the upper half of object 0
    truncate(&dispatcher, objects[0], OBJECT_PAGES / 2, &locks, &replies);
    expected.retain(|(object, offset), _| {
        *object != 0 || *offset < (OBJECT_PAGES / 2 * PAGE_SIZE) as u64
    });

    for id in &objects {
        dispatcher.send(
            *id,
            Request::DataRequest {
                offset: 0,
                length: (OBJECT_PAGES * PAGE_SIZE) as u64,
            },
        );
    }
    dispatcher.shutdown();

    let errors = kernel.errors.lock();
    assert!(errors.is_empty(), "data errors: {:?}", *errors);

    let pages = kernel.pages.lock();
    let mut verified = 0;
    for object in 0..OBJECT_COUNT {
        for page in 0..OBJECT_PAGES {
            let offset = (page * PAGE_SIZE) as u64;
            let state = pages.get(&(object, offset)).cloned().flatten();
            match expected.get(&(object, offset)) {
                Some(value) => {
                    assert_eq!(state, Some(page_of(*value)), "object {} page {}", object, page);
                    verified += 1;
                }
                // never written: absent for internal objects, zero for external ones
                None if object % 2 == 0 => assert_eq!(state, None),
                None => assert_eq!(state, Some(page_of(0))),
            }
        }
    }

    println!(
        "verified {} pages in {} ms",
        verified,
        start.elapsed().as_millis()
    );
    println!("{}", serde_json::to_string_pretty(&pager.paging_info()).unwrap());
    println!("{}", serde_json::to_string_pretty(&pager.partitions()).unwrap());
    println!("{}", serde_json::to_string_pretty(&pager.objects()).unwrap());

    for name in ["stress-a", "stress-b"] {
        let _ = fs::remove_file(env::temp_dir().join(format!("default_pager_{}.swap", name)));
    }
}
