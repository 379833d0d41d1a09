/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Execution of a loaded script: evaluation, action dispatch and the
//! final duplicate-tracking writes.

pub mod actions;
mod dispatch;
mod eval;
mod notify;
mod pattern;
mod variables;

use crate::{
    cache::ExecuteHandle, context::DuplicateContext, interp::Interpreter,
    runtime::variables::Variables, ErrorKind,
};

/// Per-evaluation state: the variable frames plus the three out-lists
/// evaluation builds and dispatch consumes. Everything here lives and
/// dies inside one [`execute`] call.
pub(crate) struct RunData {
    pub vars: Variables,
    pub actions: Vec<actions::ActionItem>,
    pub notify: Vec<actions::NotifyEntry>,
    pub duptrack: Vec<actions::DuptrackEntry>,
    pub edited_headers: bool,
}

/// Failed execution: the failure class plus the operator trace
/// accumulated up to the point of failure.
#[derive(Debug, Clone)]
pub struct ExecuteError {
    pub kind: ErrorKind,
    pub trace: String,
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Evaluates the handle's current bytecode against a message and drives
/// the resulting actions through the host callbacks. On success the
/// operator trace is returned; duplicate-tracking records are written
/// last, and only then.
pub fn execute<SC, MC>(
    exe: &mut ExecuteHandle,
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
) -> Result<String, ExecuteError> {
    let mut data = RunData {
        vars: Variables::new(),
        actions: Vec::new(),
        notify: Vec::new(),
        duptrack: Vec::new(),
        edited_headers: false,
    };

    let eval_error = eval::eval(exe, interp, sc, mc, &mut data).err();
    let outcome = dispatch::dispatch(interp, sc, mc, &mut data, eval_error);

    if outcome.result.is_ok() {
        if let Some(duplicate) = &interp.duplicate {
            for entry in &data.duptrack {
                let context = DuplicateContext {
                    id: entry.id.clone(),
                    seconds: entry.seconds,
                };
                if let Err(error) = (duplicate.track)(&context, sc, mc) {
                    tracing::debug!(
                        context = "sieve_execute",
                        event = "duptrack_error",
                        id = entry.id.as_str(),
                        reason = %error,
                        "Failed to record duplicate-tracking entry",
                    );
                }
            }
        }
    }

    match outcome.result {
        Ok(()) => Ok(outcome.trace),
        Err(kind) => Err(ExecuteError {
            kind,
            trace: outcome.trace,
        }),
    }
}
