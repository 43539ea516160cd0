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

mod file_storage;
mod memory;
mod sliced;

use std::io::{self, ErrorKind};

pub use file_storage::FileStorage;
pub use memory::MemoryStorage;
pub use sliced::SlicedStorage;

/// Raw storage behind a paging partition (a device, a file or a window of either).
///
/// Transfers are positioned and may be short, exactly like `pread`/`pwrite`:
/// a single call can move fewer bytes than requested without that being an error.
pub trait PartitionStorage: Send + Sync {
    /// Reads up to `dest.len()` bytes starting at byte `offset`.
    ///
    /// Returns the number of bytes read; `0` means the end of the storage was reached.
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Writes up to `src.len()` bytes starting at byte `offset` and returns
    /// how many bytes were actually written.
    fn write_at(&self, src: &[u8], offset: u64) -> io::Result<usize>;

    /// Returns the size in bytes of this storage
    fn len(&self) -> io::Result<u64>;

    /// Reads exactly `dest.len()` bytes, retrying short reads.
    ///
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read_exact_at(&self, mut dest: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !dest.is_empty() {
            match self.read_at(dest, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "partition ended in the middle of a page",
                    ))
                }
                Ok(n) => {
                    dest = &mut dest[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Writes all of `src`, retrying short writes
    fn write_all_at(&self, mut src: &[u8], mut offset: u64) -> io::Result<()> {
        while !src.is_empty() {
            match self.write_at(src, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::WriteZero,
                        "partition accepted no bytes",
                    ))
                }
                Ok(n) => {
                    src = &src[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

impl<S: PartitionStorage + ?Sized> PartitionStorage for Box<S> {
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(dest, offset)
    }

    fn write_at(&self, src: &[u8], offset: u64) -> io::Result<usize> {
        (**self).write_at(src, offset)
    }

    fn len(&self) -> io::Result<u64> {
        (**self).len()
    }
}
