//! Status and ordering types emitted by the fragmentation layer.

use thiserror::Error;

/// Result of feeding a fragment into a [`Reassembler`](crate::fragment::Reassembler).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentStatus {
    /// The message still expects more fragments.
    Incomplete,
    /// The fragment carried the final flag.
    Complete,
}

impl FragmentStatus {
    pub(crate) const fn from_fin(fin: bool) -> Self {
        if fin { Self::Complete } else { Self::Incomplete }
    }
}

/// How a fragment broke the message ordering rules.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum OrderViolation {
    /// A continuation fragment arrived while no message was open.
    #[error("continuation fragment without an open message")]
    ContinuationWhileIdle,
    /// A new message started before the open one received its final fragment.
    #[error("new message started before the previous one finished")]
    StartWhileReceiving,
}
