//! `permessage-deflate` negotiation for both endpoint roles.
//!
//! Servers walk the client's offers in order and accept the first one that
//! fits the local [`DeflatePolicy`]. Clients build a single offer from the
//! same policy and validate the server's response against it.

use std::fmt::Write as _;

use log::debug;

use super::{
    error::NegotiationMismatch,
    params::{DeflatePolicy, ExtensionParams, MAX_WINDOW_BITS, MIN_WINDOW_BITS},
    parse::{ExtensionOffer, parse_extension_list},
};

/// Registered extension token.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Outcome of server-side negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Negotiated {
    params: ExtensionParams,
    response: Option<String>,
}

impl Negotiated {
    fn disabled() -> Self {
        Self {
            params: ExtensionParams::disabled(),
            response: None,
        }
    }

    /// Parameters governing the server's streams.
    #[must_use]
    pub const fn params(&self) -> ExtensionParams { self.params }

    /// Header value to send back, if compression was accepted.
    #[must_use]
    pub fn response(&self) -> Option<&str> { self.response.as_deref() }
}

/// `permessage-deflate` parameters as they appear in one offer or response.
#[derive(Debug, Default)]
struct DeflateParams {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    /// `Some(None)` records the valueless form clients use to signal support.
    client_max_window_bits: Option<Option<u8>>,
}

impl DeflateParams {
    fn parse(offer: &ExtensionOffer<'_>) -> Result<Self, NegotiationMismatch> {
        let mut parsed = Self::default();
        let mut seen: Vec<&str> = Vec::with_capacity(offer.params().len());
        for &(name, value) in offer.params() {
            if seen.iter().any(|prior| prior.eq_ignore_ascii_case(name)) {
                return Err(NegotiationMismatch::DuplicateParameter(name.to_owned()));
            }
            seen.push(name);
            match name.to_ascii_lowercase().as_str() {
                SERVER_NO_CONTEXT_TAKEOVER => {
                    reject_value(name, value)?;
                    parsed.server_no_context_takeover = true;
                }
                CLIENT_NO_CONTEXT_TAKEOVER => {
                    reject_value(name, value)?;
                    parsed.client_no_context_takeover = true;
                }
                SERVER_MAX_WINDOW_BITS => {
                    let Some(raw) = value else {
                        return Err(invalid(name, value));
                    };
                    parsed.server_max_window_bits = Some(window_bits(name, raw)?);
                }
                CLIENT_MAX_WINDOW_BITS => {
                    parsed.client_max_window_bits =
                        Some(value.map(|raw| window_bits(name, raw)).transpose()?);
                }
                _ => return Err(NegotiationMismatch::UnknownParameter(name.to_owned())),
            }
        }
        Ok(parsed)
    }
}

fn reject_value(name: &str, value: Option<&str>) -> Result<(), NegotiationMismatch> {
    match value {
        None => Ok(()),
        Some(_) => Err(invalid(name, value)),
    }
}

fn window_bits(name: &str, raw: &str) -> Result<u8, NegotiationMismatch> {
    let bits: u8 = raw.parse().map_err(|_| invalid(name, Some(raw)))?;
    if (MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        Ok(bits)
    } else {
        Err(invalid(name, Some(raw)))
    }
}

fn invalid(name: &str, value: Option<&str>) -> NegotiationMismatch {
    NegotiationMismatch::InvalidValue {
        name: name.to_owned(),
        value: value.map(str::to_owned),
    }
}

/// Negotiates `permessage-deflate` parameters under a local policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtensionNegotiator {
    policy: DeflatePolicy,
}

impl ExtensionNegotiator {
    #[must_use]
    pub const fn new(policy: DeflatePolicy) -> Self { Self { policy } }

    #[must_use]
    pub const fn policy(&self) -> DeflatePolicy { self.policy }

    /// Accept the first acceptable offer from a client's extension header.
    ///
    /// A missing header, a header without a `permessage-deflate` entry, or a
    /// disabled policy yields disabled parameters.
    ///
    /// # Errors
    ///
    /// Returns the reason the last `permessage-deflate` offer was refused when
    /// the client offered compression but none of its offers fit the policy.
    pub fn negotiate_offer(&self, header: Option<&str>) -> Result<Negotiated, NegotiationMismatch> {
        let Some(header) = header.filter(|_| self.policy.enabled) else {
            return Ok(Negotiated::disabled());
        };
        let mut refusal = None;
        for offer in parse_extension_list(header) {
            if !offer.is(PERMESSAGE_DEFLATE) {
                continue;
            }
            match DeflateParams::parse(&offer).and_then(|params| self.accept_offer(&params)) {
                Ok(negotiated) => return Ok(negotiated),
                Err(reason) => {
                    debug!("declining permessage-deflate offer: {reason}");
                    refusal = Some(reason);
                }
            }
        }
        refusal.map_or_else(|| Ok(Negotiated::disabled()), Err)
    }

    fn accept_offer(&self, offer: &DeflateParams) -> Result<Negotiated, NegotiationMismatch> {
        let policy = self.policy;
        let local_bits = offer
            .server_max_window_bits
            .map_or(policy.max_window_bits, |bits| bits.min(policy.max_window_bits));
        if !policy.accepts(local_bits) {
            return Err(policy.out_of_bounds(local_bits));
        }
        let peer_bits = match offer.client_max_window_bits {
            Some(Some(bits)) => bits.min(policy.max_window_bits),
            Some(None) => policy.max_window_bits,
            None if policy.max_window_bits < MAX_WINDOW_BITS => {
                return Err(NegotiationMismatch::UnboundedPeerWindow {
                    max: policy.max_window_bits,
                });
            }
            None => MAX_WINDOW_BITS,
        };
        let params = ExtensionParams {
            enabled: true,
            no_context_takeover: offer.server_no_context_takeover || policy.no_context_takeover,
            max_window_bits: local_bits,
            peer_no_context_takeover: offer.client_no_context_takeover
                || policy.no_context_takeover,
            peer_max_window_bits: peer_bits,
        };

        let mut response = String::from(PERMESSAGE_DEFLATE);
        if params.no_context_takeover {
            response.push_str("; ");
            response.push_str(SERVER_NO_CONTEXT_TAKEOVER);
        }
        if params.peer_no_context_takeover {
            response.push_str("; ");
            response.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
        }
        if offer.server_max_window_bits.is_some() || local_bits < MAX_WINDOW_BITS {
            let _ = write!(response, "; {SERVER_MAX_WINDOW_BITS}={local_bits}");
        }
        if offer.client_max_window_bits.is_some() && peer_bits < MAX_WINDOW_BITS {
            let _ = write!(response, "; {CLIENT_MAX_WINDOW_BITS}={peer_bits}");
        }
        Ok(Negotiated {
            params,
            response: Some(response),
        })
    }

    /// Build the offer a client sends, or `None` if compression is disabled.
    #[must_use]
    pub fn offer(&self) -> Option<String> {
        let policy = self.policy;
        if !policy.enabled {
            return None;
        }
        let mut offer = String::from(PERMESSAGE_DEFLATE);
        if policy.no_context_takeover {
            let _ = write!(
                offer,
                "; {CLIENT_NO_CONTEXT_TAKEOVER}; {SERVER_NO_CONTEXT_TAKEOVER}"
            );
        }
        if policy.max_window_bits < MAX_WINDOW_BITS {
            let server_bits = policy.max_window_bits;
            let client_bits = server_bits.max(policy.compress_floor());
            let _ = write!(
                offer,
                "; {CLIENT_MAX_WINDOW_BITS}={client_bits}; {SERVER_MAX_WINDOW_BITS}={server_bits}"
            );
        } else {
            let _ = write!(offer, "; {CLIENT_MAX_WINDOW_BITS}");
        }
        Some(offer)
    }

    /// Validate a server's response to [`ExtensionNegotiator::offer`].
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationMismatch`] if the response accepts something that
    /// was not offered or falls outside the local policy.
    pub fn accept_response(&self, header: Option<&str>) -> Result<ExtensionParams, NegotiationMismatch> {
        let entries = header.map(parse_extension_list).unwrap_or_default();
        let mut entries = entries.into_iter();
        let Some(entry) = entries.next() else {
            return Ok(ExtensionParams::disabled());
        };
        if !self.policy.enabled || !entry.is(PERMESSAGE_DEFLATE) {
            return Err(NegotiationMismatch::UnexpectedExtension(entry.name().to_owned()));
        }
        if let Some(extra) = entries.next() {
            return Err(NegotiationMismatch::UnexpectedExtension(extra.name().to_owned()));
        }
        let response = DeflateParams::parse(&entry)?;
        let policy = self.policy;

        let local_bits = match response.client_max_window_bits {
            Some(Some(bits)) if !policy.accepts(bits) => return Err(policy.out_of_bounds(bits)),
            Some(Some(bits)) => bits,
            Some(None) => return Err(invalid(CLIENT_MAX_WINDOW_BITS, None)),
            None => policy.max_window_bits,
        };
        // The peer may compress with any window we can inflate, 8 bits included.
        let peer_bits = match response.server_max_window_bits {
            Some(bits) if bits > policy.max_window_bits => {
                return Err(NegotiationMismatch::WindowBitsOutOfBounds {
                    bits,
                    min: MIN_WINDOW_BITS,
                    max: policy.max_window_bits,
                });
            }
            Some(bits) => bits,
            None if policy.max_window_bits < MAX_WINDOW_BITS => {
                return Err(NegotiationMismatch::MissingParameter(SERVER_MAX_WINDOW_BITS));
            }
            None => MAX_WINDOW_BITS,
        };
        if policy.no_context_takeover && !response.server_no_context_takeover {
            return Err(NegotiationMismatch::MissingParameter(SERVER_NO_CONTEXT_TAKEOVER));
        }

        Ok(ExtensionParams {
            enabled: true,
            no_context_takeover: response.client_no_context_takeover
                || policy.no_context_takeover,
            max_window_bits: local_bits,
            peer_no_context_takeover: response.server_no_context_takeover,
            peer_max_window_bits: peer_bits,
        })
    }
}
