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

//! The kernel side of the pager.
//!
//! Inbound messages are [`Request`]s wrapped in an [`Envelope`] carrying the
//! object they are addressed to and their per-object sequence number.
//! Everything the pager sends back goes through a [`KernelPort`].

mod dispatch;
mod pager;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{error::PagerError, object::ObjectId};

pub use dispatch::Dispatcher;
pub use pager::{DefaultPager, ObjectInfo, PagingInfo};

/// Kernel handle used to send data and lock messages for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControlHandle(pub u64);

/// Where a deferred reply has to go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyId(pub u64);

/// Outbound one-way messages to the kernel
pub trait KernelPort: Send + Sync {
    /// Whether the kernel may keep pages of the object cached after the
    /// last mapping is gone
    fn set_attributes(&self, control: ControlHandle, may_cache: bool);

    /// Zero filled pages the pager made up itself
    fn data_supply(&self, control: ControlHandle, offset: u64, data: Vec<u8>);

    /// Pages read from a partition
    fn data_provided(&self, control: ControlHandle, offset: u64, data: Vec<u8>);

    /// The pager has no data, the kernel must supply its own zero pages
    fn data_unavailable(&self, control: ControlHandle, offset: u64, length: u64);

    fn data_error(&self, control: ControlHandle, offset: u64, length: u64, error: &PagerError);

    /// Asks the kernel to write back and drop its cached copies of the range.
    /// The kernel answers with [`Request::LockCompleted`].
    fn lock_request(&self, control: ControlHandle, offset: u64, length: u64, flush: bool);

    fn set_size_reply(&self, reply: ReplyId, result: Result<(), PagerError>);
}

/// Inbound protocol messages
#[derive(Debug)]
pub enum Request {
    Init {
        control: ControlHandle,
        page_size: usize,
    },
    Terminate,
    DataRequest {
        offset: u64,
        length: u64,
    },
    DataWrite {
        offset: u64,
        data: Vec<u8>,
    },
    DataInitialize {
        offset: u64,
        data: Vec<u8>,
    },
    /// Unsupported, fatal
    Copy,
    LockCompleted {
        offset: u64,
        length: u64,
    },
    NoSenders,
    SetSize {
        limit: u64,
        reply: ReplyId,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::Terminate => "terminate",
            Request::DataRequest { .. } => "data-request",
            Request::DataWrite { .. } => "data-write",
            Request::DataInitialize { .. } => "data-initialize",
            Request::Copy => "copy",
            Request::LockCompleted { .. } => "lock-completed",
            Request::NoSenders => "no-senders",
            Request::SetSize { .. } => "set-size",
        }
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub object: ObjectId,
    pub seqno: u64,
    pub request: Request,
}
