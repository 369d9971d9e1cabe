// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! The error type shared across every module of this crate.

use failure::Fail;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Every failure mode this crate's callers need to distinguish.
///
/// Each variant carries the contextual data named in its doc comment so
/// `Display` renders a complete, greppable message without the caller
/// needing to attach further context.
#[derive(Debug, Fail)]
pub enum Error {
    /// Null/empty required input, an unknown protocol keyword, or a
    /// duplicate element encountered while parsing.
    #[fail(display = "invalid argument: {}", _0)]
    InvalidArgument(String),

    /// Port bounds outside `[1, 65535]`, or `from > to`.
    #[fail(display = "invalid port range {}-{}: {}", from, to, reason)]
    InvalidRange {
        /// The offending lower bound.
        from: u32,
        /// The offending upper bound.
        to: u32,
        /// Human-readable reason the range was rejected.
        reason: String,
    },

    /// A malformed address, bad prefix length, or wrong-family destination.
    #[fail(display = "invalid prefix '{}': {}", input, reason)]
    InvalidPrefix {
        /// The offending input string.
        input: String,
        /// Human-readable reason the prefix was rejected.
        reason: String,
    },

    /// Unexpected XML structure while loading a service document.
    #[fail(display = "invalid service format in '{}': {}", path, reason)]
    InvalidFormat {
        /// The file or resource name the document came from.
        path: String,
        /// Human-readable description of the structural problem.
        reason: String,
    },

    /// A requested service was not present. Loaders return this as an
    /// `Option`/cache miss rather than bubbling it up as an error in normal
    /// operation; the variant exists so it can still be raised where a
    /// caller explicitly demands presence.
    #[fail(display = "service '{}' not found in {}", name, location)]
    NotFound {
        /// Name of the missing service.
        name: String,
        /// Where it was looked for (a directory path).
        location: String,
    },

    /// The system services directory contains a `<template>-<k>.xml` file,
    /// which this system never expects to find outside the local directory.
    #[fail(
        display = "configuration conflict: '{}' must not exist in the system services directory",
        path
    )]
    Conflict {
        /// The conflicting path.
        path: PathBuf,
    },

    /// The external firewall control program exited non-zero or could not
    /// be spawned at all.
    #[fail(display = "external command failed: {}", _0)]
    ExternalFailure(String),

    /// An internal invariant was violated. Never expected to fire; if it
    /// does, it indicates a bug in this crate rather than bad input.
    #[fail(display = "internal assertion failed: {}", _0)]
    Assertion(String),

    /// Wraps a lower-level I/O failure, preserving its cause chain.
    #[fail(display = "I/O error: {}", _0)]
    Io(#[cause] ::std::io::Error),
}

impl From<::std::io::Error> for Error {
    fn from(e: ::std::io::Error) -> Self {
        Error::Io(e)
    }
}
