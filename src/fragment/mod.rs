//! Bounded-memory fragmentation and reassembly.
//!
//! The outbound [`Fragmenter`] splits one message at a time into fragments of
//! at most the configured size, reading lazily from its source and
//! compressing on the fly. The inbound [`Reassembler`] validates fragment
//! ordering and hands decoded data to the application either as whole
//! messages or as a sequence of bounded chunks. Both take the
//! [`ConnectionContext`] explicitly on every call.

pub mod context;
pub mod error;
pub mod fragmenter;
pub mod reassembler;
pub mod source;

pub use context::ConnectionContext;
pub use error::{FragmentStatus, OrderViolation};
pub use fragmenter::{Fragmenter, OutboundTransfer, SendOutcome};
pub use reassembler::{
    Delivery,
    MessageChunk,
    MessageEnd,
    ReassembledMessage,
    Reassembler,
    ReassemblerState,
};
pub use source::{MessageSource, SendOptions};
