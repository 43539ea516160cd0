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
    io::{self, ErrorKind},
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;

use super::PartitionStorage;

/// Partition storage kept in RAM.
///
/// Mostly useful for tests: transfers can be capped to `max_transfer` bytes
/// to provoke short reads and writes, and writes can be made to fail.
pub struct MemoryStorage {
    data: RwLock<Vec<u8>>,
    max_transfer: Option<usize>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0; size]),
            max_transfer: None,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Storage that never moves more than `max_transfer` bytes per call
    pub fn with_max_transfer(size: usize, max_transfer: usize) -> Self {
        assert_ne!(max_transfer, 0);

        Self {
            max_transfer: Some(max_transfer),
            ..Self::new(size)
        }
    }

    /// Storage initialised with `contents`, e.g. a prepared swap header
    pub fn from_bytes(contents: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(contents),
            max_transfer: None,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every following write fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn transfer_len(&self, requested: usize, offset: u64, size: usize) -> usize {
        let remaining = size.saturating_sub(offset as usize);
        let len = requested.min(remaining);
        match self.max_transfer {
            Some(max) => len.min(max),
            None => len,
        }
    }
}

impl PartitionStorage for MemoryStorage {
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.data.read();
        let len = self.transfer_len(dest.len(), offset, data.len());
        if len == 0 {
            return Ok(0);
        }

        let start = offset as usize;
        dest[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    fn write_at(&self, src: &[u8], offset: u64) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(ErrorKind::Other, "simulated write failure"));
        }

        let mut data = self.data.write();
        let len = self.transfer_len(src.len(), offset, data.len());
        if len == 0 {
            return Ok(0);
        }

        let start = offset as usize;
        data[start..start + len].copy_from_slice(&src[..len]);
        Ok(len)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}
