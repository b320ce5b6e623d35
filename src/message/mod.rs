//! GIOP messages
//!
//! Header codec, fragment reassembly and splitting, and the few message
//! bodies the transport itself needs to produce or understand.

pub use fragment_assembler::{AssembledMessage, FragmentAssembler, FragmentKey};
pub use fragmenter::split_into_fragments;
pub use giop_header::{
    GiopHeader, GiopMessageType, GiopVersion, FLAG_FRAGMENT, GIOP_HEADER_SIZE, GIOP_MAGIC,
};
pub use locate::{LocateReply, LocateRequest, LocateStatus};
pub use service_context::ServiceContext;

mod fragment_assembler;
mod fragmenter;
mod giop_header;
mod locate;
mod service_context;
