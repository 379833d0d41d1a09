/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Post-evaluation driver: walks the action list in order, invokes the
//! host callbacks, assembles the operator trace and funnels failures.
//! The error path runs flat — notifications once, the error reporter,
//! then implicit keep with a single retry-less failure pass — instead of
//! recursing, with identical semantics.

use crate::{
    context::{Autorespond, KeepContext, NotifyContext},
    interp::Interpreter,
    runtime::{actions::Action, eval::RuntimeError, notify::build_message, RunData},
    CallbackError, ErrorKind,
};

/// Host boundary for the formatted error report; the trace itself grows
/// unbounded.
const ERR_BUF_SIZE: usize = 1024;

pub(crate) struct DispatchOutcome {
    pub result: Result<(), ErrorKind>,
    pub trace: String,
}

pub(crate) fn dispatch<SC, MC>(
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    data: &mut RunData,
    eval_error: Option<RuntimeError>,
) -> DispatchOutcome {
    let mut trace = String::from("Action(s) taken:\n");
    let mut ret: Result<(), ErrorKind> = Ok(());
    let mut errmsg: Option<String> = None;
    let mut lastaction: Option<&'static str> = None;
    let mut lastitem: Option<String> = None;
    let mut implicit_keep = true;

    if let Some(error) = eval_error {
        if error.kind == ErrorKind::Internal {
            // Missing capability: report and terminate immediately.
            append_error_line(&mut trace, None, Some(&error.message), ErrorKind::Internal);
            report_error(
                interp,
                sc,
                mc,
                None,
                None,
                Some(&error.message),
                ErrorKind::Internal,
            );
            return DispatchOutcome {
                result: Err(ErrorKind::Internal),
                trace,
            };
        }
        // Evaluation failure: recorded actions are discarded, but
        // notifications and implicit keep still run.
        ret = Err(ErrorKind::Run);
        errmsg = Some(error.message);
    } else {
        let actions = std::mem::take(&mut data.actions);
        for item in &actions {
            lastaction = Some(item.action.name());
            lastitem = None;
            implicit_keep = implicit_keep && !item.cancel_keep;

            let step = match &item.action {
                Action::Reject(reject) | Action::EReject(reject) => match &interp.reject {
                    Some(callback) => {
                        lastitem = Some(reject.reason.clone());
                        let result = callback(reject, sc, mc);
                        if result.is_ok() {
                            trace.push_str(if reject.ereject {
                                "eRejected with: "
                            } else {
                                "Rejected with: "
                            });
                            trace.push_str(&reject.reason);
                            trace.push('\n');
                        }
                        result
                    }
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::FileInto(fileinto) => match &interp.fileinto {
                    Some(callback) => {
                        lastitem = Some(fileinto.mailbox.clone());
                        let result = callback(fileinto, sc, mc);
                        if result.is_ok() {
                            trace.push_str("Filed into: ");
                            trace.push_str(&fileinto.mailbox);
                            trace.push('\n');
                        }
                        result
                    }
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::Snooze(snooze) => match &interp.snooze {
                    Some(callback) => {
                        let result = callback(snooze, sc, mc);
                        if result.is_ok() {
                            trace.push_str("Snoozed\n");
                        }
                        result
                    }
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::Keep(keep) => match &interp.keep {
                    Some(callback) => {
                        let context = KeepContext {
                            flags: keep.flags.clone(),
                            headers: edited_headers(interp, mc, data),
                        };
                        let result = callback(&context, sc, mc);
                        if result.is_ok() {
                            trace.push_str("Kept\n");
                        }
                        result
                    }
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::Redirect(redirect) => match &interp.redirect {
                    Some(callback) => {
                        lastitem = Some(redirect.address.clone());
                        let result = callback(redirect, sc, mc);
                        if result.is_ok() {
                            trace.push_str("Redirected to ");
                            trace.push_str(&redirect.address);
                            trace.push('\n');
                        }
                        result
                    }
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::Discard => {
                    // Discard is optional: with no callback registered it
                    // is still considered done.
                    let result = match &interp.discard {
                        Some(callback) => callback(&(), sc, mc),
                        None => Ok(()),
                    };
                    if result.is_ok() {
                        trace.push_str("Discarded\n");
                    }
                    result
                }
                Action::Vacation(vacation) => match &interp.vacation {
                    Some(callbacks) => match (callbacks.autorespond)(
                        &vacation.autorespond,
                        sc,
                        mc,
                    ) {
                        Ok(Autorespond::Respond) => {
                            let result = (callbacks.send_response)(&vacation.send, sc, mc);
                            if result.is_ok() {
                                trace.push_str("Sent vacation reply\n");
                            }
                            result
                        }
                        Ok(Autorespond::Suppress) => {
                            trace.push_str("Vacation reply suppressed\n");
                            Ok(())
                        }
                        Err(error) => Err(error),
                    },
                    None => {
                        return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                    }
                },
                Action::None => Ok(()),
                // Flag operations mutate the flag frame during
                // evaluation and are never recorded.
                Action::SetFlag
                | Action::AddFlag
                | Action::RemoveFlag
                | Action::Mark
                | Action::Unmark
                | Action::Notify
                | Action::Denotify => {
                    return internal_abort(interp, sc, mc, lastaction, lastitem, trace)
                }
            };

            if let Err(error) = step {
                // The host's fallback will deliver to the inbox anyway;
                // a second implicit keep would double-deliver.
                implicit_keep = false;
                ret = Err(error.kind);
                errmsg = error.message;
                break;
            }
        }
    }

    if let Err(kind) = ret {
        append_error_line(&mut trace, lastaction, errmsg.as_deref(), kind);
    }

    // Notifications run exactly once, even on the error path; a failed
    // entry never stops the remaining ones.
    if interp.notify.is_some() && !data.notify.is_empty() {
        let entries = std::mem::take(&mut data.notify);
        let mut notify_error: Option<CallbackError> = None;
        for entry in entries.iter().filter(|entry| entry.active) {
            if let Err(error) = send_notify(interp, sc, mc, entry, &trace) {
                notify_error = Some(error);
            }
        }
        if let Some(error) = notify_error {
            lastaction = Some("Notify");
            lastitem = None;
            if ret.is_ok() {
                ret = Err(error.kind);
            }
            errmsg = error.message;
            append_error_line(&mut trace, lastaction, errmsg.as_deref(), error.kind);
        }
    }

    if let Err(kind) = ret {
        report_error(
            interp,
            sc,
            mc,
            lastaction,
            lastitem.as_deref(),
            errmsg.as_deref(),
            kind,
        );
    }

    if implicit_keep {
        let Some(keep) = &interp.keep else {
            return internal_abort(interp, sc, mc, Some("Keep"), None, trace);
        };
        let context = KeepContext {
            flags: data.vars.flags.clone(),
            headers: edited_headers(interp, mc, data),
        };
        match keep(&context, sc, mc) {
            Ok(()) => trace.push_str("Kept\n"),
            Err(error) => {
                // One failure pass with implicit keep disabled; a second
                // failure returns directly.
                if ret.is_ok() {
                    ret = Err(error.kind);
                }
                let reason = error.message;
                append_error_line(&mut trace, Some("Keep"), reason.as_deref(), error.kind);
                report_error(
                    interp,
                    sc,
                    mc,
                    Some("Keep"),
                    None,
                    reason.as_deref(),
                    error.kind,
                );
            }
        }
    }

    DispatchOutcome { result: ret, trace }
}

fn edited_headers<SC, MC>(
    interp: &Interpreter<SC, MC>,
    mc: &MC,
    data: &RunData,
) -> Option<Vec<u8>> {
    if data.edited_headers {
        interp
            .get_headersection
            .as_ref()
            .and_then(|get_headersection| get_headersection(mc))
    } else {
        None
    }
}

fn append_error_line(
    trace: &mut String,
    lastaction: Option<&str>,
    errmsg: Option<&str>,
    kind: ErrorKind,
) {
    let reason = errmsg.map_or_else(|| kind.to_string(), str::to_string);
    match lastaction {
        // No action ever ran.
        None => {
            trace.push_str("script execution failed: ");
            trace.push_str(&reason);
            trace.push('\n');
        }
        Some(action) => {
            trace.push_str(action);
            trace.push_str(" action failed: ");
            trace.push_str(&reason);
            trace.push('\n');
        }
    }
}

/// Formats the single-line report and hands it to the host's error
/// reporter, truncated at the host boundary.
fn report_error<SC, MC>(
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    lastaction: Option<&str>,
    lastitem: Option<&str>,
    errmsg: Option<&str>,
    kind: ErrorKind,
) {
    let Some(execute_err) = &interp.execute_err else {
        return;
    };
    let reason = errmsg.map_or_else(|| kind.to_string(), str::to_string);
    let mut report = match (lastaction, lastitem) {
        (None, _) => reason,
        (Some(action), Some(item)) => format!("{action} ({item}): {reason}"),
        (Some(action), None) => format!("{action}: {reason}"),
    };
    if report.len() > ERR_BUF_SIZE {
        let mut end = ERR_BUF_SIZE;
        while !report.is_char_boundary(end) {
            end -= 1;
        }
        report.truncate(end);
    }
    if let Err(error) = execute_err(&report, sc, mc) {
        tracing::debug!(
            context = "sieve_execute",
            event = "error",
            reason = %error,
            "Error reporter failed",
        );
    }
}

/// Missing capability mid-dispatch: report with the name of the last
/// attempted action and terminate immediately, skipping notifications
/// and implicit keep.
fn internal_abort<SC, MC>(
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    lastaction: Option<&'static str>,
    lastitem: Option<String>,
    trace: String,
) -> DispatchOutcome {
    report_error(
        interp,
        sc,
        mc,
        lastaction,
        lastitem.as_deref(),
        None,
        ErrorKind::Internal,
    );
    DispatchOutcome {
        result: Err(ErrorKind::Internal),
        trace,
    }
}

fn send_notify<SC, MC>(
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    entry: &crate::runtime::actions::NotifyEntry,
    trace: &str,
) -> Result<(), CallbackError> {
    let Some(notify) = &interp.notify else {
        return Ok(());
    };

    // A leading `$env-from$` option under mailto is replaced by the
    // envelope sender.
    let mut options = entry.options.clone();
    if entry.method == "mailto"
        && options.first().is_some_and(|option| option == "$env-from$")
    {
        options = interp
            .get_envelope
            .as_ref()
            .map_or_else(Vec::new, |get_envelope| get_envelope(mc, "From"));
    }

    let mut message = build_message(interp, mc, &entry.message);
    message.push_str("\n\n");
    message.push_str(trace);

    let context = NotifyContext {
        method: entry.method.clone(),
        from: entry.from.clone(),
        options,
        priority: entry.priority.clone(),
        message,
        fname: interp
            .get_fname
            .as_ref()
            .and_then(|get_fname| get_fname(mc)),
    };
    notify(&context, sc, mc)
}
