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

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

use crate::error::PagerError;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Object data size up to which page maps grow by doubling
pub const DEFAULT_PAGEMAP_DOUBLING_CEILING: usize = 4 * 1024 * 1024;

/// Slots per second-level page map block
pub const DEFAULT_PAGEMAP_CHUNK: usize = 256;

const_assert!(DEFAULT_PAGE_SIZE.is_power_of_two());
const_assert!(DEFAULT_PAGEMAP_CHUNK.is_power_of_two());
const_assert!(DEFAULT_PAGEMAP_DOUBLING_CEILING % DEFAULT_PAGE_SIZE == 0);

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PagerConfig {
    /// Size of a page and of a partition block in bytes
    pub page_size: usize,

    /// While a page map covers less object data than this (in bytes),
    /// growth rounds up to the next power of two. Beyond it, growth rounds
    /// up to a multiple of `pagemap_chunk`.
    pub pagemap_doubling_ceiling: usize,

    /// Length of one second-level block of an indirect page map.
    /// Maps with more slots than this use the indirect form.
    pub pagemap_chunk: usize,

    /// Worker threads serving each dispatch queue
    pub workers_per_queue: usize,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pagemap_doubling_ceiling: DEFAULT_PAGEMAP_DOUBLING_CEILING,
            pagemap_chunk: DEFAULT_PAGEMAP_CHUNK,
            workers_per_queue: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
        }
    }
}

impl PagerConfig {
    pub fn validate(&self) -> Result<(), PagerError> {
        if !self.page_size.is_power_of_two() {
            return Err(PagerError::InvalidConfig("page size must be a power of two"));
        }
        if !self.pagemap_chunk.is_power_of_two() {
            return Err(PagerError::InvalidConfig(
                "page map chunk length must be a power of two",
            ));
        }
        if self.pagemap_doubling_ceiling < self.page_size {
            return Err(PagerError::InvalidConfig(
                "page map doubling ceiling must cover at least one page",
            ));
        }
        if self.workers_per_queue == 0 {
            return Err(PagerError::InvalidConfig("at least one worker per queue is required"));
        }

        Ok(())
    }

    /// Doubling ceiling expressed in page map slots
    pub(crate) fn doubling_ceiling_pages(&self) -> usize {
        self.pagemap_doubling_ceiling / self.page_size
    }
}
