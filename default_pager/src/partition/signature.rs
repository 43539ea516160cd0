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

//! Linux swap signatures.
//!
//! A checked partition must carry one of the two Linux swap formats in its
//! first page. The signature occupies the last ten bytes of that page.
//!
//! - `SWAP-SPACE` (old style): the rest of the first page is a bitmap of
//!   usable pages, bit set = usable.
//! - `SWAPSPACE2` (new style): the first page holds a header with the last
//!   usable page and a list of bad pages.
//!
//! ```text
//! Offset  Size  Description (new style)
//! 0       1024  boot block, ignored
//! 1024    4     version
//! 1028    4     last_page
//! 1032    4     nr_badpages
//! 1036    32    uuid and volume label, ignored
//! 1536    4*N   bad page numbers
//! ```

use log::{debug, warn};

use super::bitmap::BlockBitmap;

pub const SWAP_MAGIC_V1: &[u8; 10] = b"SWAP-SPACE";
pub const SWAP_MAGIC_V2: &[u8; 10] = b"SWAPSPACE2";

const MAGIC_LEN: usize = 10;
const V2_VERSION_OFFSET: usize = 1024;
const V2_LAST_PAGE_OFFSET: usize = 1028;
const V2_BAD_PAGE_COUNT_OFFSET: usize = 1032;
const V2_BAD_PAGES_OFFSET: usize = 1536;

/// How much of a partition's own contents to trust when attaching it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    /// Raw partition, every block is free
    Trust,

    /// First page must carry a Linux swap signature describing usable pages
    LinuxSwap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SwapSignature {
    V1,
    V2 { last_page: u32 },
}

/// Pre-marks every block the swap header declares unusable, including the
/// header page itself. Returns `None` if `header` has no known signature.
pub(crate) fn apply_swap_header(header: &[u8], bitmap: &mut BlockBitmap) -> Option<SwapSignature> {
    let page_size = header.len();
    if page_size < MAGIC_LEN {
        return None;
    }
    let magic = &header[page_size - MAGIC_LEN..];

    let signature = if magic == SWAP_MAGIC_V1 {
        apply_v1(header, bitmap);
        SwapSignature::V1
    } else if magic == SWAP_MAGIC_V2 {
        if page_size < V2_BAD_PAGES_OFFSET + MAGIC_LEN {
            warn!("{} byte pages cannot hold a new style swap header", page_size);
            return None;
        }
        apply_v2(header, bitmap)
    } else {
        return None;
    };

    // the header page never holds data
    bitmap.mark(0);
    debug!(
        "swap signature {:?}: {} of {} blocks usable",
        signature,
        bitmap.free(),
        bitmap.total()
    );

    Some(signature)
}

fn apply_v1(header: &[u8], bitmap: &mut BlockBitmap) {
    let covered = ((header.len() - MAGIC_LEN) * 8) as u32;

    for block in 1..bitmap.total() {
        let usable = block < covered && (header[(block / 8) as usize] >> (block % 8)) & 1 != 0;
        if !usable {
            bitmap.mark(block);
        }
    }
}

fn apply_v2(header: &[u8], bitmap: &mut BlockBitmap) -> SwapSignature {
    let version = read_u32(header, V2_VERSION_OFFSET);
    if version != 1 {
        warn!("unexpected swap header version {}", version);
    }

    let last_page = read_u32(header, V2_LAST_PAGE_OFFSET);
    for block in last_page.saturating_add(1)..bitmap.total() {
        bitmap.mark(block);
    }

    let max_bad_pages = (header.len() - MAGIC_LEN - V2_BAD_PAGES_OFFSET) / 4;
    let bad_pages = (read_u32(header, V2_BAD_PAGE_COUNT_OFFSET) as usize).min(max_bad_pages);
    for i in 0..bad_pages {
        let bad = read_u32(header, V2_BAD_PAGES_OFFSET + i * 4);
        if bad < bitmap.total() {
            bitmap.mark(bad);
        }
    }

    SwapSignature::V2 { last_page }
}

fn read_u32(header: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&header[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// Builds a new style swap header page, used by tests and tooling
pub fn build_swap_header_v2(page_size: usize, last_page: u32, bad_pages: &[u32]) -> Vec<u8> {
    assert!(page_size >= V2_BAD_PAGES_OFFSET + bad_pages.len() * 4 + MAGIC_LEN);

    let mut page = vec![0u8; page_size];
    page[V2_VERSION_OFFSET..V2_VERSION_OFFSET + 4].copy_from_slice(&1u32.to_le_bytes());
    page[V2_LAST_PAGE_OFFSET..V2_LAST_PAGE_OFFSET + 4].copy_from_slice(&last_page.to_le_bytes());
    page[V2_BAD_PAGE_COUNT_OFFSET..V2_BAD_PAGE_COUNT_OFFSET + 4]
        .copy_from_slice(&(bad_pages.len() as u32).to_le_bytes());
    for (i, bad) in bad_pages.iter().enumerate() {
        let offset = V2_BAD_PAGES_OFFSET + i * 4;
        page[offset..offset + 4].copy_from_slice(&bad.to_le_bytes());
    }
    page[page_size - MAGIC_LEN..].copy_from_slice(SWAP_MAGIC_V2);

    page
}
