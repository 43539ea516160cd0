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
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use parking_lot::Mutex;

use super::{DefaultPager, Envelope, Request};
use crate::{error::PagerError, object::ObjectId};

/// Feeds protocol messages to a pool of worker threads.
///
/// Internal objects (created by the kernel under memory pressure) and
/// external objects are served from separate queues, each with its own
/// workers, so a backlog on one class never starves the other.
pub struct Dispatcher {
    pager: Arc<DefaultPager>,

    /// Next sequence number per object, in arrival order
    seqnos: Mutex<HashMap<ObjectId, u64>>,

    internal: Option<Sender<Envelope>>,
    external: Option<Sender<Envelope>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(pager: Arc<DefaultPager>) -> Result<Self, PagerError> {
        let per_queue = pager.config().workers_per_queue;
        let (internal, internal_rx) = unbounded();
        let (external, external_rx) = unbounded();

        let mut workers = Vec::with_capacity(2 * per_queue);
        for (class, receiver) in [("internal", internal_rx), ("external", external_rx)] {
            for i in 0..per_queue {
                workers.push(spawn_worker(
                    format!("pager-{}-{}", class, i),
                    pager.clone(),
                    receiver.clone(),
                )?);
            }
        }
        debug!("started {} pager workers", workers.len());

        Ok(Dispatcher {
            pager,
            seqnos: Mutex::new(HashMap::new()),
            internal: Some(internal),
            external: Some(external),
            workers,
        })
    }

    #[inline]
    pub fn pager(&self) -> &Arc<DefaultPager> {
        &self.pager
    }

    /// Queues `request` for `object`, assigning it the object's next
    /// sequence number
    pub fn send(&self, object: ObjectId, request: Request) {
        let external = self
            .pager
            .object(object)
            .map_or(true, |object| object.is_external());

        // numbering and queueing happen under one lock, so each queue holds
        // an object's messages in sequence order
        let mut seqnos = self.seqnos.lock();
        let next = seqnos.entry(object).or_insert(0);
        let seqno = *next;
        *next += 1;
        if matches!(request, Request::NoSenders) {
            seqnos.remove(&object);
        }

        let queue = if external { &self.external } else { &self.internal };
        let envelope = Envelope {
            object,
            seqno,
            request,
        };
        if let Some(Err(err)) = queue.as_ref().map(|queue| queue.send(envelope)) {
            error!("pager workers are gone, dropping {}", err.0.request.name());
        }
    }

    /// Lets the workers drain both queues and waits for them
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.internal.take();
        self.external.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("pager worker panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(
    name: String,
    pager: Arc<DefaultPager>,
    receiver: Receiver<Envelope>,
) -> Result<JoinHandle<()>, PagerError> {
    let handle = thread::Builder::new().name(name).spawn(move || {
        for envelope in receiver.iter() {
            pager.handle(envelope);
        }
    })?;
    Ok(handle)
}
