/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Core of a Sieve (RFC 5228) mail filtering engine.
//!
//! The crate is split along the lifecycle of a script:
//!
//! - [`script`] parses a textual script into a command tree, validating
//!   `require`d extensions against the host's capability table.
//! - [`compile`] turns the tree into a compact, versioned bytecode blob
//!   that the host persists to disk.
//! - [`cache`] memory-maps compiled blobs and deduplicates them by inode,
//!   so an `include` graph never loads the same file twice.
//! - [`runtime`] evaluates a loaded blob against a message, accumulating
//!   delivery actions, pending notifications and duplicate-tracking
//!   records, then drives the host callbacks in the prescribed order.
//!
//! The host plugs in through an [`Interpreter`], a registry of callbacks
//! covering every delivery effect (keep, fileinto, redirect, reject,
//! vacation, notifications, ...) and every message accessor (headers,
//! envelope, body, size). Callbacks that are never registered surface as
//! [`ErrorKind::Internal`] only when a script actually reaches them.

pub mod cache;
pub mod compile;
pub mod context;
pub mod interp;
pub mod runtime;
pub mod script;

pub use cache::{load, unload, ExecuteHandle, Loaded};
pub use interp::Interpreter;
pub use runtime::{execute, ExecuteError};
pub use script::{parse, parse_only, parse_string, Script, ScriptErrors};

/// Failure classes surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic failure (missing file, interpreter not built).
    Generic,
    /// Use before initialization.
    NotFinalized,
    /// Syntax error or unsupported extension.
    Parse,
    /// Evaluation of a well-formed script failed.
    Run,
    /// Missing required capability or unreachable bytecode.
    Internal,
    /// Allocation failure reported by a host callback.
    NoMem,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ErrorKind::Generic => "Generic Error",
            ErrorKind::NotFinalized => "Sieve not finalized",
            ErrorKind::Parse => "Parse error",
            ErrorKind::Run => "Run error",
            ErrorKind::Internal => "Internal Error",
            ErrorKind::NoMem => "No memory",
        })
    }
}

/// Error returned by a host callback, carrying an optional
/// operator-readable reason that ends up in the action trace.
#[derive(Debug, Clone)]
pub struct CallbackError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl CallbackError {
    pub fn new(kind: ErrorKind) -> Self {
        CallbackError {
            kind,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        CallbackError {
            kind: ErrorKind::Generic,
            message: message.into().into(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into().into();
        self
    }

    pub(crate) fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| self.kind.to_string())
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason())
    }
}
