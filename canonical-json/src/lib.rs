// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [`serde_json::ser::Formatter`] that serializes values as OLPC-style canonical JSON: the
//! preimage used everywhere a TUF signature or a key ID is computed.
//!
//! Canonical form, as produced by this crate:
//! * object keys are emitted in sorted (byte-wise, which is code-point order for valid UTF-8)
//!   order;
//! * no insignificant whitespace is written;
//! * strings escape only `"`, `\`, and the C0 control characters; every other byte of a UTF-8
//!   string, including non-ASCII code points, is passed through unchanged.
//!
//! Unlike the upstream `olpc-cjson` crate this is grounded on, this formatter does **not**
//! perform Unicode normalization (NFC) on string contents before writing them. Normalizing would
//! change the signed byte sequence of a payload that a remote signer already considered
//! canonical, which is exactly the kind of silent mutation a signature preimage must never be
//! subject to.

use serde::Serialize;
use serde_json::ser::Formatter;
use std::io;

/// Serializes `value` to a `Vec<u8>` using canonical JSON rules.
///
/// `value` is first converted through [`serde_json::to_value`], which guarantees that any
/// map-like field backed by `serde_json::Map` (a `BTreeMap` unless the `preserve_order` feature
/// is enabled upstream) is already key-sorted before the canonical formatter ever sees it.
/// Callers who serialize structs with `BTreeMap`-backed fields directly (as every metadata type
/// in this workspace does) may also serialize straight through a
/// `serde_json::Serializer::with_formatter`; both paths produce identical bytes.
pub fn to_canonical_vec<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Same as [`to_canonical_vec`] but returns a `String`. Panics only if canonical JSON ever
/// produced invalid UTF-8, which cannot happen since the input is always UTF-8 and escaping
/// never introduces invalid sequences.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let bytes = to_canonical_vec(value)?;
    Ok(String::from_utf8(bytes).expect("canonical JSON serializer produced invalid UTF-8"))
}

/// A [`Formatter`] implementation that emits OLPC-style canonical JSON.
///
/// This only controls whitespace and number/string formatting; key sorting is a property of the
/// underlying map type being iterated (see [`to_canonical_vec`]), not of this formatter.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalFormatter {
    first_in_container: bool,
}

impl CanonicalFormatter {
    /// Creates a new `CanonicalFormatter`.
    pub fn new() -> Self {
        CanonicalFormatter {
            first_in_container: true,
        }
    }
}

impl Formatter for CanonicalFormatter {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.first_in_container = true;
        writer.write_all(b"[")
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b"]")
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if !first {
            writer.write_all(b",")?;
        }
        Ok(())
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.first_in_container = true;
        writer.write_all(b"{")
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b"}")
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        if !first {
            writer.write_all(b",")?;
        }
        Ok(())
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b":")
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }

    // The default `write_string_fragment`/`write_char_escape` implementations already escape
    // only `"`, `\`, and the C0 control range, and pass every other byte through verbatim -
    // which is exactly the canonical rule in use here. They are intentionally not overridden.
}
