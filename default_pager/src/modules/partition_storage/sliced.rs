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

use std::io;

use super::PartitionStorage;

/// The window `[base, base + len)` of another storage.
///
/// Used for partitions that do not start at the beginning of their device.
pub struct SlicedStorage<S: PartitionStorage> {
    inner: S,
    base: u64,
    len: u64,
}

impl<S: PartitionStorage> SlicedStorage<S> {
    pub fn new(storage: S, base: u64, len: u64) -> io::Result<Self> {
        let inner_len = storage.len()?;
        if base.checked_add(len).map_or(true, |end| end > inner_len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slice exceeds the underlying storage",
            ));
        }

        Ok(Self {
            inner: storage,
            base,
            len,
        })
    }

    /// Clamps a transfer so it never crosses the end of the window
    fn clamp(&self, requested: usize, offset: u64) -> usize {
        let remaining = self.len.saturating_sub(offset);
        (requested as u64).min(remaining) as usize
    }
}

impl<S: PartitionStorage> PartitionStorage for SlicedStorage<S> {
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = self.clamp(dest.len(), offset);
        if len == 0 {
            return Ok(0);
        }
        self.inner.read_at(&mut dest[..len], self.base + offset)
    }

    fn write_at(&self, src: &[u8], offset: u64) -> io::Result<usize> {
        let len = self.clamp(src.len(), offset);
        if len == 0 {
            return Ok(0);
        }
        self.inner.write_at(&src[..len], self.base + offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.len)
    }
}
