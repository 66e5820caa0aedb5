//! Support for writing the keyword/object document meta-format.
//!
//! A descriptor is a sequence of items. Each item is a keyword line
//! (keyword plus space-separated arguments), optionally followed by an
//! "object": a PEM-style block whose payload is base64 encoded and
//! wrapped at 64 columns.
//!
//! No checks are done on keyword presence or ordering; it is the
//! caller's responsibility to emit items in the order the document
//! format requires.

use std::fmt::Display;
use std::fmt::Write;

use base64ct::{Base64, Encoding};

/// Maximum line length for base64-encoded object bodies.
const BASE64_PEM_MAX_LINE: usize = 64;

/// Encoder, representing a partially-built document.
#[derive(Debug, Clone, Default)]
pub struct DocEncoder {
    /// The being-built document, with everything accumulated so far.
    ///
    /// If an [`ItemEncoder`] exists, it will add a newline when it's
    /// dropped.
    built: String,
}

/// Encoder for an individual item within a being-built document.
///
/// Returned by [`DocEncoder::item()`].
#[derive(Debug)]
pub struct ItemEncoder<'n> {
    /// The document including the partial item that we're building.
    ///
    /// We will always add a newline when we're dropped.
    doc: &'n mut DocEncoder,
}

impl DocEncoder {
    /// Start encoding a document.
    pub fn new() -> Self {
        DocEncoder::default()
    }

    /// Adds an item to the being-built document.
    ///
    /// The item can be further extended with arguments or an object,
    /// using the returned `ItemEncoder`.
    pub fn item(&mut self, keyword: &str) -> ItemEncoder<'_> {
        self.built.push_str(keyword);
        ItemEncoder { doc: self }
    }

    /// Build the document into textual form.
    pub fn finish(self) -> String {
        self.built
    }
}

impl<'n> ItemEncoder<'n> {
    /// Add a single argument to the item's keyword line.
    pub fn arg(self, arg: &dyn Display) -> Self {
        write!(self.doc.built, " {}", arg).expect("write! to String failed");
        self
    }

    /// Add an object to the item.
    ///
    /// `data` will be base64 encoded, wrapped, and framed with
    /// `-----BEGIN/END {label}-----` lines.
    pub fn object(self, label: &str, data: &[u8]) {
        self.doc.built.push('\n');
        self.doc.built.push_str(&pem_object(label, data));
        // The final newline is written by the Drop impl.
    }

    /// Add an already-framed object to the item.
    ///
    /// `block` must be a complete `-----BEGIN/END-----` framed object
    /// with no trailing newline; it is emitted verbatim.
    pub fn object_raw(self, block: &str) {
        self.doc.built.push('\n');
        self.doc.built.push_str(block);
        // The final newline is written by the Drop impl.
    }

    /// Finish encoding this item.
    ///
    /// The item will also automatically be finished if the
    /// `ItemEncoder` is dropped.
    pub fn finish(self) {}
}

impl Drop for ItemEncoder<'_> {
    fn drop(&mut self) {
        self.doc.built.push('\n');
    }
}

/// Encode `data` as a PEM-style object block with the given label.
///
/// The returned string has no trailing newline after the `END` line.
pub fn pem_object(label: &str, data: &[u8]) -> String {
    let mut out = String::new();
    writeln!(out, "-----BEGIN {}-----", label).expect("write! to String failed");
    let b64 = Base64::encode_string(data);
    let mut rest = &b64[..];
    while !rest.is_empty() {
        let (line, tail) = if rest.len() > BASE64_PEM_MAX_LINE {
            rest.split_at(BASE64_PEM_MAX_LINE)
        } else {
            (rest, "")
        };
        writeln!(out, "{}", line).expect("write! to String failed");
        rest = tail;
    }
    write!(out, "-----END {}-----", label).expect("write! to String failed");
    out
}
