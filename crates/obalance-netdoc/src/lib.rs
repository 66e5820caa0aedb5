#![cfg_attr(docsrs, feature(doc_auto_cfg, doc_cfg))]
#![doc = include_str!("../README.md")]
// @@ begin lint list maintained by maint/add_warning @@
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![deny(clippy::missing_docs_in_private_items)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unnecessary_wraps)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

pub mod desc;
pub mod encode;
pub mod parse;

use thiserror::Error;

pub use desc::{generate, publication_time, sign, verify, IntroPoint};
pub use parse::{parse_instance_descriptor, InstanceDescriptor};

/// An error encountered while building, signing, or parsing a
/// descriptor.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Refused to build a descriptor with no introduction points.
    #[error("No introduction points for service {address}.onion")]
    NoIntroPoints {
        /// Address of the service whose descriptor was requested.
        address: String,
    },
    /// A required keyword line was missing.
    #[error("Descriptor has no {keyword} item")]
    MissingItem {
        /// The keyword we were looking for.
        keyword: &'static str,
    },
    /// A keyword line was present but its argument didn't parse.
    #[error("Malformed {keyword} item")]
    BadItem {
        /// The keyword whose argument was rejected.
        keyword: &'static str,
    },
    /// A framed object was missing, unterminated, or not valid base64.
    #[error("Malformed {label} object")]
    BadObject {
        /// The label of the rejected object.
        label: &'static str,
    },
    /// The introduction-point list is encrypted with a descriptor
    /// cookie, and we have no way to read it.
    #[error("Introduction point list is encrypted")]
    EncryptedIntroPoints,
    /// A signed descriptor had no `signature` item.
    #[error("Descriptor has no signature item")]
    MissingSignature,
    /// A timestamp couldn't be rendered in descriptor format.
    #[error("Unrepresentable descriptor timestamp")]
    TimeFormat,
    /// A key operation failed.
    #[error("Key error")]
    Key(#[from] obalance_crypto::KeyError),
}
