/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Tree-walking evaluation of a compiled program against one message.
//! Evaluation only records effects: actions append to the action list in
//! textual order, notifications and duplicate-tracking records to their
//! own lists. The only host callbacks invoked here are the ones whose
//! semantics are inherently evaluation-time: duplicate checks, header
//! edits, includes, logging and external-list membership.

use mail_parser::MessageParser;

use crate::{
    cache::{ExecuteHandle, Loaded},
    compile::from_bytecode,
    context::{
        AutorespondContext, FileIntoContext, KeepContext, RedirectContext, RejectContext,
        SendResponseContext, SnoozeContext, VacationContext,
    },
    interp::Interpreter,
    runtime::{
        actions::{Action, ActionItem, DuptrackEntry, NotifyEntry},
        notify::decode_header,
        pattern::match_value,
        variables::{apply_modifiers, Variables},
        RunData,
    },
    script::ast::{AddressPart, Command, MatchSpec, MatchType, Test},
    ErrorKind,
};

/// Default duplicate-tracking window when the script gives none.
const DUPLICATE_DEFAULT_SECONDS: u64 = 90 * 86400;
/// Default vacation response interval (RFC 5230 `:days 7`).
const VACATION_DEFAULT_SECONDS: u64 = 7 * 86400;

#[derive(Debug, Clone)]
pub(crate) struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RuntimeError {
    fn run(message: impl Into<String>) -> Self {
        RuntimeError {
            kind: ErrorKind::Run,
            message: message.into(),
        }
    }

    fn internal(capability: &str) -> Self {
        RuntimeError {
            kind: ErrorKind::Internal,
            message: format!("{capability} capability not registered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    /// `stop`: halt the whole script.
    Stop,
    /// `return`: halt the current include only.
    Return,
}

pub(crate) fn eval<SC, MC>(
    exe: &mut ExecuteHandle,
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    data: &mut RunData,
) -> Result<(), RuntimeError> {
    let program = from_bytecode(exe.current().data())
        .map_err(|kind| RuntimeError {
            kind,
            message: "malformed bytecode".into(),
        })?;
    eval_commands(&program.commands, exe, interp, sc, mc, data).map(|_| ())
}

fn eval_commands<SC, MC>(
    commands: &[Command],
    exe: &mut ExecuteHandle,
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    data: &mut RunData,
) -> Result<Flow, RuntimeError> {
    for command in commands {
        let flow = eval_command(command, exe, interp, sc, mc, data)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn eval_command<SC, MC>(
    command: &Command,
    exe: &mut ExecuteHandle,
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    data: &mut RunData,
) -> Result<Flow, RuntimeError> {
    match command {
        Command::If {
            branches,
            otherwise,
        } => {
            for (test, block) in branches {
                if eval_test(test, interp, sc, mc, data)? {
                    return eval_commands(block, exe, interp, sc, mc, data);
                }
            }
            if let Some(block) = otherwise {
                return eval_commands(block, exe, interp, sc, mc, data);
            }
        }
        Command::Stop => return Ok(Flow::Stop),
        Command::Return => return Ok(Flow::Return),
        Command::Keep { flags } => {
            let flags = match flags {
                Some(flags) => expand_flags(&data.vars, flags),
                None => data.vars.flags.clone(),
            };
            data.actions.push(ActionItem {
                action: Action::Keep(KeepContext {
                    flags,
                    headers: None,
                }),
                cancel_keep: true,
            });
        }
        Command::FileInto {
            mailbox,
            flags,
            copy,
            create,
            special_use,
            mailbox_id,
        } => {
            let flags = match flags {
                Some(flags) => expand_flags(&data.vars, flags),
                None => data.vars.flags.clone(),
            };
            data.actions.push(ActionItem {
                action: Action::FileInto(FileIntoContext {
                    mailbox: data.vars.expand(mailbox),
                    flags,
                    copy: *copy,
                    create: *create,
                    special_use: special_use.as_deref().map(|s| data.vars.expand(s)),
                    mailbox_id: mailbox_id.as_deref().map(|s| data.vars.expand(s)),
                }),
                cancel_keep: !*copy,
            });
        }
        Command::Redirect {
            address,
            copy,
            is_list,
        } => {
            data.actions.push(ActionItem {
                action: Action::Redirect(RedirectContext {
                    address: data.vars.expand(address),
                    is_ext_list: *is_list,
                    copy: *copy,
                }),
                cancel_keep: !*copy,
            });
        }
        Command::Discard => {
            data.actions.push(ActionItem {
                action: Action::Discard,
                cancel_keep: true,
            });
        }
        Command::Reject { reason, ereject } => {
            let context = RejectContext {
                reason: data.vars.expand(reason),
                ereject: *ereject,
            };
            data.actions.push(ActionItem {
                action: if *ereject {
                    Action::EReject(context)
                } else {
                    Action::Reject(context)
                },
                cancel_keep: true,
            });
        }
        Command::Vacation {
            seconds,
            subject,
            from,
            addresses: _,
            mime,
            handle,
            reason,
        } => {
            let vacation = interp
                .vacation
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("vacation"))?;
            let mut seconds = seconds.unwrap_or(VACATION_DEFAULT_SECONDS);
            if vacation.min_response > 0 {
                seconds = seconds.max(vacation.min_response);
            }
            if vacation.max_response > 0 {
                seconds = seconds.min(vacation.max_response);
            }

            let reason = data.vars.expand(reason);
            let subject = match subject {
                Some(subject) => data.vars.expand(subject),
                None => {
                    let original = headers(interp, mc, "Subject")
                        .into_iter()
                        .next()
                        .map(|raw| decode_header(&raw))
                        .unwrap_or_default();
                    format!("Auto: {original}")
                }
            };
            let from = from.as_deref().map(|s| data.vars.expand(s));
            let handle = match handle {
                Some(handle) => data.vars.expand(handle),
                None => reason.clone(),
            };
            let address = envelope(interp, mc, "From")
                .into_iter()
                .next()
                .or_else(|| {
                    headers(interp, mc, "From")
                        .first()
                        .and_then(|raw| parse_addresses(raw).into_iter().next())
                })
                .unwrap_or_default();

            data.actions.push(ActionItem {
                action: Action::Vacation(Box::new(VacationContext {
                    autorespond: AutorespondContext {
                        handle,
                        from: from.clone(),
                        seconds,
                    },
                    send: SendResponseContext {
                        address,
                        from,
                        subject,
                        message: reason,
                        mime: *mime,
                    },
                })),
                cancel_keep: true,
            });
        }
        Command::Snooze {
            mailbox,
            add_flags,
            remove_flags,
            weekdays,
            times,
        } => {
            data.actions.push(ActionItem {
                action: Action::Snooze(SnoozeContext {
                    mailbox: mailbox.as_deref().map(|s| data.vars.expand(s)),
                    add_flags: expand_flags(&data.vars, add_flags),
                    remove_flags: expand_flags(&data.vars, remove_flags),
                    weekdays: weekdays.clone(),
                    times: times.iter().map(|t| data.vars.expand(t)).collect(),
                }),
                cancel_keep: true,
            });
        }
        Command::SetFlag { flags } => {
            data.vars.flags = expand_flags(&data.vars, flags);
        }
        Command::AddFlag { flags } => {
            for flag in expand_flags(&data.vars, flags) {
                if !data.vars.flags.iter().any(|f| f.eq_ignore_ascii_case(&flag)) {
                    data.vars.flags.push(flag);
                }
            }
        }
        Command::RemoveFlag { flags } => {
            let removed = expand_flags(&data.vars, flags);
            data.vars
                .flags
                .retain(|f| !removed.iter().any(|r| r.eq_ignore_ascii_case(f)));
        }
        Command::Mark => {
            if !data
                .vars
                .flags
                .iter()
                .any(|f| f.eq_ignore_ascii_case("\\Flagged"))
            {
                data.vars.flags.push("\\Flagged".to_string());
            }
        }
        Command::Unmark => {
            data.vars
                .flags
                .retain(|f| !f.eq_ignore_ascii_case("\\Flagged"));
        }
        Command::Notify {
            method,
            from,
            options,
            priority,
            message,
        } => {
            data.notify.push(NotifyEntry {
                method: method
                    .as_deref()
                    .map_or_else(|| "default".to_string(), |m| data.vars.expand(m)),
                from: from.as_deref().map(|f| data.vars.expand(f)),
                options: options.iter().map(|o| data.vars.expand(o)).collect(),
                priority: priority
                    .as_deref()
                    .map_or_else(|| "normal".to_string(), |p| data.vars.expand(p)),
                message: message
                    .as_deref()
                    .unwrap_or("$from$: $subject$")
                    .to_string(),
                active: true,
            });
        }
        Command::Denotify {
            priority,
            spec,
            pattern,
        } => {
            let priority = priority.as_deref().map(|p| data.vars.expand(p));
            let pattern = pattern.as_deref().map(|p| data.vars.expand(p));
            let spec = spec.unwrap_or_default();
            for entry in data.notify.iter_mut().filter(|entry| entry.active) {
                if let Some(priority) = &priority {
                    if !entry.priority.eq_ignore_ascii_case(priority) {
                        continue;
                    }
                }
                if let Some(pattern) = &pattern {
                    if match_value(&spec, &entry.method, pattern).is_none() {
                        continue;
                    }
                }
                entry.active = false;
            }
        }
        Command::Set {
            modifiers,
            name,
            value,
        } => {
            let value = apply_modifiers(&data.vars.expand(value), modifiers);
            data.vars.set(name, value);
        }
        Command::Include {
            name,
            location,
            once: _,
            optional,
        } => {
            let get_include = interp
                .get_include
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("include"))?;
            let name = data.vars.expand(name);
            let Some(path) = get_include(sc, &name, *location) else {
                if *optional {
                    return Ok(Flow::Normal);
                }
                return Err(RuntimeError::run(format!("unknown script {name}")));
            };

            // Nested loads prepend blobs and shift indices, so the
            // caller's blob is re-found by inode afterwards.
            let caller = exe.current().inode();
            match exe.load_into(&path) {
                // Already seen under this handle: evaluating it again
                // would only repeat work or loop on an include cycle.
                Ok(Loaded::Reloaded) => {
                    if let Some(pos) = exe.position(caller) {
                        exe.set_cursor(pos);
                    }
                }
                Ok(Loaded::New) => {
                    let result = eval(exe, interp, sc, mc, data);
                    if let Some(pos) = exe.position(caller) {
                        exe.set_cursor(pos);
                    }
                    // A `return` in the child, or falling off its end,
                    // resumes the including script either way.
                    result?;
                }
                Err(_) => {
                    if !*optional {
                        return Err(RuntimeError::run(format!(
                            "unable to load script {name}"
                        )));
                    }
                }
            }
        }
        Command::AddHeader { name, value, last } => {
            let add_header = interp
                .add_header
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("editheader"))?;
            let name = data.vars.expand(name);
            let value = data.vars.expand(value);
            add_header(mc, &name, &value, *last)
                .map_err(|err| RuntimeError::run(err.reason()))?;
            data.edited_headers = true;
        }
        Command::DeleteHeader { name, index } => {
            let delete_header = interp
                .delete_header
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("editheader"))?;
            let name = data.vars.expand(name);
            delete_header(mc, &name, *index)
                .map_err(|err| RuntimeError::run(err.reason()))?;
            data.edited_headers = true;
        }
        Command::Log { message } => {
            let log = interp
                .log
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("logger"))?;
            log(sc, mc, &data.vars.expand(message));
        }
    }
    Ok(Flow::Normal)
}

fn eval_test<SC, MC>(
    test: &Test,
    interp: &Interpreter<SC, MC>,
    sc: &mut SC,
    mc: &mut MC,
    data: &mut RunData,
) -> Result<bool, RuntimeError> {
    match test {
        Test::True => Ok(true),
        Test::False => Ok(false),
        Test::Not(inner) => Ok(!eval_test(inner, interp, sc, mc, data)?),
        Test::AllOf(tests) => {
            for test in tests {
                if !eval_test(test, interp, sc, mc, data)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Test::AnyOf(tests) => {
            for test in tests {
                if eval_test(test, interp, sc, mc, data)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Test::Header {
            spec,
            headers: names,
            keys,
        } => {
            if interp.get_header.is_none() {
                return Err(RuntimeError::internal("header"));
            }
            let mut values = Vec::new();
            for name in names {
                values.extend(headers(interp, mc, &data.vars.expand(name)));
            }
            Ok(match_values(spec, &values, keys, &mut data.vars))
        }
        Test::Address {
            part,
            spec,
            is_list,
            headers: names,
            keys,
        } => {
            if interp.get_header.is_none() {
                return Err(RuntimeError::internal("header"));
            }
            let mut values = Vec::new();
            for name in names {
                for raw in headers(interp, mc, &data.vars.expand(name)) {
                    let addresses = match data.vars.cached_addresses(&raw) {
                        Some(cached) => cached.clone(),
                        None => {
                            let parsed = parse_addresses(&raw);
                            data.vars.cache_addresses(raw.clone(), parsed.clone());
                            parsed
                        }
                    };
                    values.extend(
                        addresses
                            .iter()
                            .map(|addr| address_part(addr, *part).to_string()),
                    );
                }
            }
            if *is_list {
                list_lookup(interp, mc, &values, keys)
            } else {
                Ok(match_values(spec, &values, keys, &mut data.vars))
            }
        }
        Test::Envelope {
            part,
            spec,
            is_list,
            fields,
            keys,
        } => {
            if interp.get_envelope.is_none() {
                return Err(RuntimeError::internal("envelope"));
            }
            let mut values = Vec::new();
            for field in fields {
                values.extend(
                    envelope(interp, mc, &data.vars.expand(field))
                        .iter()
                        .map(|addr| address_part(addr, *part).to_string()),
                );
            }
            if *is_list {
                list_lookup(interp, mc, &values, keys)
            } else {
                Ok(match_values(spec, &values, keys, &mut data.vars))
            }
        }
        Test::Exists { headers: names } => {
            if interp.get_header.is_none() {
                return Err(RuntimeError::internal("header"));
            }
            Ok(names
                .iter()
                .all(|name| !headers(interp, mc, &data.vars.expand(name)).is_empty()))
        }
        Test::Size { over, limit } => {
            let get_size = interp
                .get_size
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("size"))?;
            let size = get_size(mc) as u64;
            Ok(if *over { size > *limit } else { size < *limit })
        }
        Test::HasFlag { spec, flags } => {
            let values = data.vars.flags.clone();
            Ok(match_values(spec, &values, flags, &mut data.vars))
        }
        Test::StringTest { spec, source, keys } => {
            let values: Vec<String> = source.iter().map(|s| data.vars.expand(s)).collect();
            if let MatchType::Count(_) = spec.match_type {
                // Only non-empty strings count.
                let values: Vec<String> =
                    values.into_iter().filter(|v| !v.is_empty()).collect();
                Ok(match_values(spec, &values, keys, &mut data.vars))
            } else {
                Ok(match_values(spec, &values, keys, &mut data.vars))
            }
        }
        Test::Environment { spec, name, keys } => {
            let get_environment = interp
                .get_environment
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("environment"))?;
            match get_environment(mc, &data.vars.expand(name)) {
                Some(value) => Ok(match_values(spec, &[value], keys, &mut data.vars)),
                None => Ok(false),
            }
        }
        Test::MailboxExists { names } => {
            let mailbox_exists = interp
                .mailbox_exists
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("mailbox"))?;
            Ok(names
                .iter()
                .all(|name| mailbox_exists(mc, &data.vars.expand(name))))
        }
        Test::MailboxIdExists { ids } => {
            let mailboxid_exists = interp
                .mailboxid_exists
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("mailboxid"))?;
            Ok(ids
                .iter()
                .all(|id| mailboxid_exists(mc, &data.vars.expand(id))))
        }
        Test::SpecialUseExists { mailbox, flags } => {
            let specialuse_exists = interp
                .specialuse_exists
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("special-use"))?;
            let mailbox = mailbox.as_deref().map(|m| data.vars.expand(m));
            Ok(flags.iter().all(|flag| {
                specialuse_exists(mc, mailbox.as_deref(), &data.vars.expand(flag))
            }))
        }
        Test::Metadata {
            spec,
            mailbox,
            annotation,
            keys,
        } => {
            let get_metadata = interp
                .get_metadata
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("mboxmetadata"))?;
            match get_metadata(
                mc,
                &data.vars.expand(mailbox),
                &data.vars.expand(annotation),
            ) {
                Some(value) => Ok(match_values(spec, &[value], keys, &mut data.vars)),
                None => Ok(false),
            }
        }
        Test::Duplicate {
            id,
            header,
            seconds,
            last: _,
        } => {
            let duplicate = interp
                .duplicate
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("duplicate"))?;
            let id = match (id, header) {
                (Some(id), _) => data.vars.expand(id),
                (None, Some(header)) => headers(interp, mc, &data.vars.expand(header))
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
                (None, None) => headers(interp, mc, "Message-ID")
                    .into_iter()
                    .next()
                    .unwrap_or_default(),
            };
            if id.is_empty() {
                return Ok(false);
            }

            let mut seconds = seconds.unwrap_or(DUPLICATE_DEFAULT_SECONDS);
            if duplicate.max_expiration > 0 {
                seconds = seconds.min(duplicate.max_expiration);
            }

            let context = crate::context::DuplicateContext {
                id: id.clone(),
                seconds,
            };
            let seen = (duplicate.check)(&context, sc, mc)
                .map_err(|err| RuntimeError::run(err.reason()))?;
            data.duptrack.push(DuptrackEntry { id, seconds });
            Ok(seen)
        }
        Test::ValidExtList { lists } => {
            let list_validator = interp
                .list_validator
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("extlists"))?;
            Ok(lists.iter().all(|list| list_validator(list)))
        }
        Test::JmapQuery { query } => {
            let jmapquery = interp
                .jmapquery
                .as_ref()
                .ok_or_else(|| RuntimeError::internal("jmapquery"))?;
            Ok(jmapquery(mc, query))
        }
    }
}

/// Matches collected values against the key list, honoring `:count` and
/// writing `:matches` captures into the match-vars frame.
fn match_values(spec: &MatchSpec, values: &[String], keys: &[String], vars: &mut Variables) -> bool {
    if let MatchType::Count(relation) = spec.match_type {
        let count = values.len() as u64;
        return keys.iter().any(|key| {
            vars.expand(key)
                .parse::<u64>()
                .is_ok_and(|target| relation.holds(count.cmp(&target)))
        });
    }

    for value in values {
        for key in keys {
            let key = vars.expand(key);
            if let Some(captures) = match_value(spec, value, &key) {
                if spec.match_type == MatchType::Matches {
                    vars.set_match_vars(captures);
                }
                return true;
            }
        }
    }
    false
}

fn list_lookup<SC, MC>(
    interp: &Interpreter<SC, MC>,
    mc: &MC,
    values: &[String],
    lists: &[String],
) -> Result<bool, RuntimeError> {
    let list_comparator = interp
        .list_comparator
        .as_ref()
        .ok_or_else(|| RuntimeError::internal("extlists"))?;
    Ok(values
        .iter()
        .any(|value| lists.iter().any(|list| list_comparator(mc, list, value))))
}

fn headers<SC, MC>(interp: &Interpreter<SC, MC>, mc: &MC, name: &str) -> Vec<String> {
    interp
        .get_header
        .as_ref()
        .map_or_else(Vec::new, |get| get(mc, name))
}

fn envelope<SC, MC>(interp: &Interpreter<SC, MC>, mc: &MC, field: &str) -> Vec<String> {
    interp
        .get_envelope
        .as_ref()
        .map_or_else(Vec::new, |get| get(mc, field))
}

fn expand_flags(vars: &Variables, flags: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for flag in flags {
        for word in vars.expand(flag).split_whitespace() {
            if !out.iter().any(|f: &String| f.eq_ignore_ascii_case(word)) {
                out.push(word.to_string());
            }
        }
    }
    out
}

/// Extracts the addr-specs from a raw address header value, reusing the
/// message parser's address grammar.
fn parse_addresses(raw: &str) -> Vec<String> {
    let source = format!("To: {raw}\r\n\r\n");
    let mut out: Vec<String> = MessageParser::new()
        .parse(source.as_bytes())
        .as_ref()
        .and_then(|message| message.to())
        .map_or_else(Vec::new, |addresses| {
            addresses
                .iter()
                .filter_map(|addr| addr.address())
                .map(|addr| addr.to_string())
                .collect()
        });
    if out.is_empty() {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}

fn address_part(address: &str, part: AddressPart) -> &str {
    match part {
        AddressPart::All => address,
        AddressPart::Localpart => address.split('@').next().unwrap_or(address),
        AddressPart::Domain => address.split_once('@').map_or("", |(_, domain)| domain),
    }
}
