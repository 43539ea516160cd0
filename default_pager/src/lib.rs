mod config;
mod error;
mod io;
mod migration;
mod object;
mod page_map;
mod partition;
mod protocol;
mod sequencer;
mod util;

#[cfg(test)]
mod test;

pub use config::{
    PagerConfig, DEFAULT_PAGEMAP_CHUNK, DEFAULT_PAGEMAP_DOUBLING_CEILING, DEFAULT_PAGE_SIZE,
};
pub use error::PagerError;
pub use io::PageRead;
pub use object::{ObjectId, PagedObject};
pub use page_map::{MapGeometry, PageMap};
pub use partition::{
    build_swap_header_v2, BlockRef, Partition, PartitionId, PartitionInfo, PartitionRegistry,
    SignatureCheck, SWAP_MAGIC_V1, SWAP_MAGIC_V2,
};
pub use protocol::{
    ControlHandle, DefaultPager, Dispatcher, Envelope, KernelPort, ObjectInfo, PagingInfo,
    ReplyId, Request,
};
pub use sequencer::{NameRef, Phase, ReadPass, Sequencer, Turn, WritePass};
pub mod modules;
