//! The control-transport interface.
//!
//! The balancer never speaks the Tor control protocol itself. The
//! embedding binary hands it an implementation of [`ControlTransport`]
//! and routes Tor's asynchronous descriptor events into
//! [`Balancer::handle_descriptor_content`](crate::Balancer::handle_descriptor_content).

use thiserror::Error;

/// The response code Tor uses to reject a malformed HSPOST request.
const CODE_INVALID_REQUEST: u16 = 552;

/// A router entry from the network consensus.
///
/// Only the pieces the balancer looks at: the (uppercase hex)
/// fingerprint and whether the router carries the HSDir flag.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct RouterStatus {
    /// The router's identity fingerprint, as 40 uppercase hex digits.
    pub fingerprint: String,
    /// True if the consensus flags this router as a hidden service
    /// directory.
    pub hs_dir: bool,
}

impl RouterStatus {
    /// Construct a router status entry.
    pub fn new(fingerprint: impl Into<String>, hs_dir: bool) -> Self {
        RouterStatus {
            fingerprint: fingerprint.into(),
            hs_dir,
        }
    }
}

/// An error from the control transport.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Tor rejected an upload as malformed (response code 552).
    ///
    /// Retrying the same descriptor will not help.
    #[error("Upload rejected as invalid (code {code}): {msg}")]
    InvalidRequest {
        /// The response code (always 552).
        code: u16,
        /// Tor's human-readable complaint.
        msg: String,
    },

    /// The control connection answered with an unexpected response
    /// code.
    #[error("Unexpected control response code {code}: {msg}")]
    Protocol {
        /// The response code.
        code: u16,
        /// The response text.
        msg: String,
    },

    /// The control connection itself failed.
    #[error("Control connection error: {0}")]
    Io(String),
}

impl TransportError {
    /// Classify a non-2xx control response.
    ///
    /// `552` means the request itself was invalid; everything else is
    /// an unexpected protocol-level failure.
    pub fn from_response(code: u16, msg: impl Into<String>) -> Self {
        if code == CODE_INVALID_REQUEST {
            TransportError::InvalidRequest {
                code,
                msg: msg.into(),
            }
        } else {
            TransportError::Protocol {
                code,
                msg: msg.into(),
            }
        }
    }
}

/// A connection to a Tor client's control interface.
///
/// Fetches are fire-and-forget: a successful return means the request
/// was accepted, and the descriptor (if any) arrives later through the
/// event callback.
pub trait ControlTransport: Send + Sync {
    /// Ask Tor to fetch the descriptor for `onion_address` from the
    /// HSDir system.
    fn fetch_descriptor(&self, onion_address: &str) -> Result<(), TransportError>;

    /// Upload a signed descriptor.
    ///
    /// When `hsdirs` is empty, Tor uploads to whatever directories it
    /// considers responsible; otherwise the descriptor is posted only
    /// to the named fingerprints.
    fn upload_descriptor(&self, signed_descriptor: &str, hsdirs: &[String])
        -> Result<(), TransportError>;

    /// Return the current consensus router list.
    fn router_statuses(&self) -> Result<Vec<RouterStatus>, TransportError>;
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;

    #[test]
    fn response_classification() {
        assert!(matches!(
            TransportError::from_response(552, "Malformed descriptor"),
            TransportError::InvalidRequest { code: 552, .. }
        ));
        assert!(matches!(
            TransportError::from_response(500, "Internal error"),
            TransportError::Protocol { code: 500, .. }
        ));
    }
}
