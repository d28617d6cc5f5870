//! Per-connection state shared by the fragmenter and reassembler.

use std::num::NonZeroUsize;

use crate::{
    config::{Role, TransportConfig},
    extension::{ExtensionParams, MessageDeflater, MessageInflater},
};

/// Limits, negotiated parameters and compression streams of one connection.
///
/// Owned by the connection and passed explicitly into every fragmenter and
/// reassembler call. The deflate streams live here so that their windows
/// carry across messages when context takeover is in effect.
#[derive(Debug)]
pub struct ConnectionContext {
    role: Role,
    max_fragment_size: NonZeroUsize,
    params: ExtensionParams,
    deflater: Option<MessageDeflater>,
    inflater: Option<MessageInflater>,
}

impl ConnectionContext {
    /// Build the context for a freshly negotiated connection.
    #[must_use]
    pub fn new(config: &TransportConfig, params: ExtensionParams) -> Self {
        Self {
            role: config.role(),
            max_fragment_size: config.max_fragment_size(),
            params,
            deflater: params.enabled.then(|| MessageDeflater::new(&params)),
            inflater: params.enabled.then(|| MessageInflater::new(&params)),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role { self.role }

    #[must_use]
    pub const fn max_fragment_size(&self) -> NonZeroUsize { self.max_fragment_size }

    #[must_use]
    pub const fn params(&self) -> &ExtensionParams { &self.params }

    #[must_use]
    pub const fn compression_enabled(&self) -> bool { self.params.enabled }

    pub(crate) fn deflater_mut(&mut self) -> Option<&mut MessageDeflater> { self.deflater.as_mut() }

    pub(crate) fn inflater_mut(&mut self) -> Option<&mut MessageInflater> { self.inflater.as_mut() }
}
