// Copyright 2017 - 2019 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Logger construction: one `slog::Logger`, built once at startup via
//! `sloggers`, then threaded through every subsystem that performs I/O or
//! makes a decision worth recording.

use slog::Logger;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Verbosity levels the CLI exposes via repeated `-v` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Errors and informational messages. The default.
    Normal,
    /// Also debug-level detail.
    Verbose,
    /// Everything, including per-phase optimizer tracing.
    Debug,
}

impl Verbosity {
    /// Maps a `-v` repetition count to a verbosity level, saturating at
    /// [`Verbosity::Debug`].
    pub fn from_occurrences(count: u64) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }

    fn severity(self) -> Severity {
        match self {
            Verbosity::Quiet => Severity::Error,
            Verbosity::Normal => Severity::Info,
            Verbosity::Verbose => Severity::Debug,
            Verbosity::Debug => Severity::Trace,
        }
    }
}

/// Builds the process-wide logger, writing to standard error. Falls back to
/// a discarding logger on the (never expected) case that the terminal
/// builder itself fails.
pub fn build(verbosity: Verbosity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(verbosity.severity());
    builder.destination(Destination::Stderr);
    builder
        .build()
        .unwrap_or_else(|_| Logger::root(slog::Discard, slog::o!()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_occurrence_counts() {
        assert_eq!(Verbosity::from_occurrences(0), Verbosity::Normal);
        assert_eq!(Verbosity::from_occurrences(1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_occurrences(2), Verbosity::Debug);
        assert_eq!(Verbosity::from_occurrences(99), Verbosity::Debug);
    }

    #[test]
    fn builds_a_logger_without_panicking() {
        let logger = build(Verbosity::Normal);
        slog::info!(logger, "logger constructed");
    }
}
