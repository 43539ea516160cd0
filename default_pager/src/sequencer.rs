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

//! Per-object admission control.
//!
//! Every message for a paged object carries a sequence number. A worker
//! first waits for its number to come up ([`Sequencer::enter`]), which yields
//! a [`Turn`]. While the turn is held no later message for the object is
//! admitted. Dropping the turn advances the expected number by one.
//!
//! Readers turn their `Turn` into a pass with [`Turn::start_read`]: the turn
//! ends as soon as the pass is granted, so several readers may run at once.
//! A writer keeps its turn until its [`WritePass`] is dropped, so a page-out
//! is fully applied before the next message of the object is admitted.

use log::{debug, error};
use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Admission {
    next_seqno: u64,
    readers: u32,
    writers: u32,

    /// Operations that currently hold a reference to the object's name
    name_refs: u32,
}

/// Observable admission state, mostly for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Reading(u32),
    Writing(u32),
}

#[derive(Debug, Default)]
pub struct Sequencer {
    admission: Mutex<Admission>,
    changed: Condvar,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `seqno` is the next expected sequence number.
    ///
    /// A number that was already processed means the dispatcher delivered a
    /// message twice, which is fatal.
    pub fn enter(&self, seqno: u64) -> Turn<'_> {
        let mut admission = self.admission.lock();
        if seqno < admission.next_seqno {
            error!(
                "sequence number {} already processed (next is {})",
                seqno, admission.next_seqno
            );
            panic!("duplicate message delivery");
        }

        while admission.next_seqno != seqno {
            self.changed.wait(&mut admission);
        }

        Turn { sequencer: self }
    }

    /// Raises the name reference count until the returned guard is dropped
    pub fn name_ref(&self) -> NameRef<'_> {
        self.admission.lock().name_refs += 1;
        NameRef { sequencer: self }
    }

    pub fn phase(&self) -> Phase {
        let admission = self.admission.lock();
        if admission.writers > 0 {
            Phase::Writing(admission.writers)
        } else if admission.readers > 0 {
            Phase::Reading(admission.readers)
        } else {
            Phase::Idle
        }
    }

    pub fn next_seqno(&self) -> u64 {
        self.admission.lock().next_seqno
    }

    fn wait_until(&self, mut done: impl FnMut(&Admission) -> bool) -> MutexGuard<'_, Admission> {
        let mut admission = self.admission.lock();
        while !done(&*admission) {
            self.changed.wait(&mut admission);
        }
        admission
    }

    fn update(&self, f: impl FnOnce(&mut Admission)) {
        let mut admission = self.admission.lock();
        f(&mut admission);
        drop(admission);
        self.changed.notify_all();
    }
}

/// The right to process the current message of an object
#[must_use]
pub struct Turn<'a> {
    sequencer: &'a Sequencer,
}

impl<'a> Turn<'a> {
    /// Waits until no reader or writer is active
    pub fn drain(&self) {
        let _admission = self
            .sequencer
            .wait_until(|a| a.readers == 0 && a.writers == 0);
    }

    /// Waits until no one but the caller references the object's name
    pub fn wait_for_name_refs(&self) {
        let _admission = self.sequencer.wait_until(|a| a.name_refs == 0);
    }

    /// Admits the message as a reader and ends the turn
    pub fn start_read(self) -> ReadPass<'a> {
        let mut admission = self.sequencer.wait_until(|a| a.writers == 0);
        admission.readers += 1;
        debug!("reader admitted ({} active)", admission.readers);
        drop(admission);

        ReadPass {
            sequencer: self.sequencer,
        }
    }

    /// Admits the message as a writer. The turn ends with the pass.
    pub fn start_write(self) -> WritePass<'a> {
        let mut admission = self.sequencer.wait_until(|a| a.readers == 0);
        admission.writers += 1;
        debug!("writer admitted ({} active)", admission.writers);
        drop(admission);

        WritePass { turn: self }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.sequencer.update(|a| a.next_seqno += 1);
    }
}

#[must_use]
pub struct ReadPass<'a> {
    sequencer: &'a Sequencer,
}

impl Drop for ReadPass<'_> {
    fn drop(&mut self) {
        self.sequencer.update(|a| a.readers -= 1);
    }
}

#[must_use]
pub struct WritePass<'a> {
    // dropped after `writers` is lowered
    turn: Turn<'a>,
}

impl Drop for WritePass<'_> {
    fn drop(&mut self) {
        self.turn.sequencer.update(|a| a.writers -= 1);
    }
}

pub struct NameRef<'a> {
    sequencer: &'a Sequencer,
}

impl Drop for NameRef<'_> {
    fn drop(&mut self) {
        self.sequencer.update(|a| a.name_refs -= 1);
    }
}
