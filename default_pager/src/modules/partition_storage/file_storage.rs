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
    fs::File,
    io::{self, Seek, SeekFrom},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use log::debug;

use super::PartitionStorage;

/// Partition storage on a swap file or raw block device
pub struct FileStorage {
    file: File,

    /// path of the file, only kept for diagnostics
    path: PathBuf,

    /// cached size, so no `metadata` call is necessary.
    /// Block devices report a zero length in their metadata, so this is
    /// determined by seeking to the end.
    size: u64,
}

impl FileStorage {
    /// Opens an existing swap file or device for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::options().read(true).write(true).open(&path)?;
        let size = file.seek(SeekFrom::End(0))?;

        debug!("opened partition storage {:?} ({} bytes)", path, size);

        Ok(Self { file, path, size })
    }

    /// Creates (or truncates) a swap file of `size` bytes
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(&path)?;

        file.set_len(size)?;

        debug!("created partition storage {:?} ({} bytes)", path, size);

        Ok(Self { file, path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartitionStorage for FileStorage {
    fn read_at(&self, dest: &mut [u8], offset: u64) -> io::Result<usize> {
        debug_assert!(
            offset + dest.len() as u64 <= self.size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            dest.len(),
            self.size
        );

        self.file.read_at(dest, offset)
    }

    fn write_at(&self, src: &[u8], offset: u64) -> io::Result<usize> {
        debug_assert!(
            offset + src.len() as u64 <= self.size,
            "illegal access, offset: {}, len: {}, file_size: {}",
            offset,
            src.len(),
            self.size
        );

        self.file.write_at(src, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.size)
    }
}
