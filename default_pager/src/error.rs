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

use thiserror::Error;

use crate::object::ObjectId;

/// Recoverable pager conditions.
///
/// Everything that indicates an already broken invariant (corrupt bitmap,
/// page map entry naming an unknown partition, malformed protocol payload)
/// is not represented here: those abort the pager.
#[derive(Debug, Error)]
pub enum PagerError {
    #[error("no space left on any paging partition")]
    NoSpace,

    #[error("partition `{0}` is already registered")]
    DuplicatePartition(String),

    #[error("partition `{0}` is busy, its pages could not all be migrated")]
    PartitionBusy(String),

    #[error("no paging partition named `{0}`")]
    NoSuchPartition(String),

    #[error("no such paged object {0}")]
    NoSuchObject(ObjectId),

    #[error("a truncation is already pending for this object")]
    TruncationPending,

    #[error("partition `{0}` carries no recognised swap signature")]
    BadSignature(String),

    #[error("partition `{0}` is too small to hold a single page")]
    EmptyPartition(String),

    #[error("object has seen {0} failed page-outs")]
    Unreliable(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("partition I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
