/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Black-box tests driving the full pipeline: parse, compile, load
//! through the bytecode cache, execute against a message and observe the
//! host callbacks.

use std::{collections::HashMap, path::PathBuf};

use sieve_core::{
    context::{Autorespond, NotifyContext},
    execute, load, parse_string, CallbackError, ErrorKind, Interpreter, Loaded,
};

#[derive(Default)]
struct Host {
    kept: Vec<Vec<String>>,
    filed: Vec<(String, Vec<String>)>,
    redirected: Vec<String>,
    rejected: Vec<String>,
    discarded: usize,
    snoozed: Vec<Vec<String>>,
    notified: Vec<NotifyContext>,
    tracked: Vec<(String, u64)>,
    errors: Vec<String>,
    logged: Vec<String>,
    seen_ids: Vec<String>,
    includes: HashMap<String, PathBuf>,
    vacation_due: bool,
    vacations_sent: Vec<String>,
    fail_redirect: bool,
}

#[derive(Default)]
struct Message {
    headers: Vec<(String, String)>,
    env_from: String,
    size: usize,
}

impl Message {
    fn sample() -> Self {
        Message {
            headers: vec![
                ("From".to_string(), "a@b".to_string()),
                ("Subject".to_string(), "Hello World".to_string()),
                ("Message-ID".to_string(), "<mid@b>".to_string()),
            ],
            env_from: "bounce@b".to_string(),
            size: 1024,
        }
    }
}

fn build_interp() -> Interpreter<Host, Message> {
    let mut interp: Interpreter<Host, Message> = Interpreter::new();
    interp.register_logger(|host, _, msg| host.logged.push(msg.to_string()));
    interp.register_execute_err(|report, host, _| {
        host.errors.push(report.to_string());
        Ok(())
    });
    interp.register_keep(|keep, host, _| {
        host.kept.push(keep.flags.clone());
        Ok(())
    });
    interp.register_fileinto(|fileinto, host, _| {
        host.filed
            .push((fileinto.mailbox.clone(), fileinto.flags.clone()));
        Ok(())
    });
    interp.register_redirect(|redirect, host, _| {
        if host.fail_redirect {
            Err(CallbackError::fail("boom"))
        } else {
            host.redirected.push(redirect.address.clone());
            Ok(())
        }
    });
    interp.register_reject(|reject, host, _| {
        host.rejected.push(reject.reason.clone());
        Ok(())
    });
    interp.register_discard(|_, host, _| {
        host.discarded += 1;
        Ok(())
    });
    interp.register_snooze(|snooze, host, _| {
        host.snoozed.push(snooze.times.clone());
        Ok(())
    });
    interp.register_environment(|_, name| {
        (name == "domain").then(|| "example.com".to_string())
    });
    interp.register_addheader(|message, name, value, _| {
        message.headers.push((name.to_string(), value.to_string()));
        Ok(())
    });
    interp.register_deleteheader(|message, name, _| {
        message.headers.retain(|(header, _)| !header.eq_ignore_ascii_case(name));
        Ok(())
    });
    interp.register_headersection(|message| {
        let mut section = Vec::new();
        for (name, value) in &message.headers {
            section.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        Some(section)
    });
    interp.register_notify(|notify, host, _| {
        host.notified.push(notify.clone());
        Ok(())
    });
    interp.register_vacation(
        0,
        0,
        |_, host, _| {
            Ok(if host.vacation_due {
                Autorespond::Respond
            } else {
                Autorespond::Suppress
            })
        },
        |send, host, _| {
            host.vacations_sent.push(send.subject.clone());
            Ok(())
        },
    );
    interp.register_duplicate(
        0,
        |check, host, _| Ok(host.seen_ids.contains(&check.id)),
        |track, host, _| {
            host.tracked.push((track.id.clone(), track.seconds));
            Ok(())
        },
    );
    interp.register_header(|message, name| {
        message
            .headers
            .iter()
            .filter(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect()
    });
    interp.register_envelope(|message, field| {
        if field.eq_ignore_ascii_case("from") {
            vec![message.env_from.clone()]
        } else {
            Vec::new()
        }
    });
    interp.register_size(|message| message.size);
    interp.register_include(|host, name, _| host.includes.get(name).cloned());
    interp
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sieve-core-filter-{}-{name}.bc", std::process::id()))
}

fn compile_to(name: &str, interp: &Interpreter<Host, Message>, src: &str) -> PathBuf {
    let script = parse_string(interp, src).expect("script must parse");
    let path = temp_path(name);
    std::fs::write(&path, script.to_bytecode().expect("script must compile")).unwrap();
    path
}

fn run(name: &str, src: &str, host: &mut Host, message: &mut Message) -> Result<String, sieve_core::ExecuteError> {
    let interp = build_interp();
    let path = compile_to(name, &interp, src);
    let mut handle = None;
    assert_eq!(load(&path, &mut handle), Ok(Loaded::New));
    let result = execute(handle.as_mut().unwrap(), &interp, host, message);
    std::fs::remove_file(&path).ok();
    result
}

#[test]
fn keep_only_suppresses_implicit_keep() {
    let mut host = Host::default();
    let trace = run("keep-only", "keep;", &mut host, &mut Message::sample()).unwrap();
    assert_eq!(trace, "Action(s) taken:\nKept\n");
    // Exactly the explicit keep; cancel_keep stopped the implicit one.
    assert_eq!(host.kept.len(), 1);
}

#[test]
fn discard_wins_over_implicit_keep() {
    let mut host = Host::default();
    let trace = run("discard", "discard;", &mut host, &mut Message::sample()).unwrap();
    assert!(trace.contains("Discarded\n"), "{trace}");
    assert_eq!(host.discarded, 1);
    assert!(host.kept.is_empty());
}

#[test]
fn unknown_require_fails_to_parse() {
    let errors = parse_string(&build_interp(), "require \"nosuchthing\";\nkeep;").unwrap_err();
    assert_eq!(errors.kind, ErrorKind::Parse);
    assert!(
        errors
            .report
            .contains("line 1: Unsupported feature nosuchthing"),
        "{}",
        errors.report
    );
}

#[test]
fn fileinto_carries_the_flag_frame() {
    let mut host = Host::default();
    let trace = run(
        "fileinto-flags",
        "require [\"fileinto\", \"imap4flags\"];\nsetflag \"\\\\Seen\";\nfileinto \"INBOX/x\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(
        host.filed,
        vec![("INBOX/x".to_string(), vec!["\\Seen".to_string()])]
    );
    assert!(trace.ends_with("Filed into: INBOX/x\n"), "{trace}");
    assert!(host.kept.is_empty());
}

#[test]
fn notify_message_is_expanded_and_carries_the_trace() {
    let mut host = Host::default();
    run(
        "notify-expansion",
        "require \"enotify\";\nnotify :message \"From: $from$, Subj: $subject[5]$\";\nkeep;",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.notified.len(), 1);
    let notified = &host.notified[0];
    assert_eq!(
        notified.message,
        "From: a@b, Subj: Hello\n\nAction(s) taken:\nKept\n"
    );
    assert_eq!(notified.priority, "normal");
}

#[test]
fn include_cycle_terminates_via_reloaded() {
    let interp = build_interp();
    let path_a = compile_to(
        "cycle-a",
        &interp,
        "require \"include\";\ninclude \"b\";\nkeep;",
    );
    let path_b = compile_to(
        "cycle-b",
        &interp,
        "require [\"include\", \"fileinto\"];\ninclude \"a\";\nfileinto \"fromB\";",
    );

    let mut host = Host::default();
    host.includes.insert("a".to_string(), path_a.clone());
    host.includes.insert("b".to_string(), path_b.clone());

    let mut handle = None;
    assert_eq!(load(&path_a, &mut handle), Ok(Loaded::New));
    let trace = execute(
        handle.as_mut().unwrap(),
        &interp,
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();

    // B's include of A was skipped; B's fileinto ran before A's keep.
    assert_eq!(host.filed.len(), 1);
    assert_eq!(host.filed[0].0, "fromB");
    assert_eq!(host.kept.len(), 1);
    assert!(trace.contains("Filed into: fromB\n"), "{trace}");
    assert!(trace.contains("Kept\n"), "{trace}");

    std::fs::remove_file(&path_a).ok();
    std::fs::remove_file(&path_b).ok();
}

#[test]
fn implicit_keep_fires_when_nothing_cancels_it() {
    let mut host = Host::default();
    let trace = run(
        "implicit-keep",
        "require \"imap4flags\";\naddflag \"\\\\Seen\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(trace, "Action(s) taken:\nKept\n");
    assert_eq!(host.kept, vec![vec!["\\Seen".to_string()]]);
}

#[test]
fn copy_preserves_implicit_keep() {
    let mut host = Host::default();
    run(
        "fileinto-copy",
        "require [\"fileinto\", \"copy\"];\nfileinto :copy \"Archive\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.filed.len(), 1);
    assert_eq!(host.kept.len(), 1);
}

#[test]
fn reject_traces_the_reason() {
    let mut host = Host::default();
    let trace = run(
        "reject",
        "require \"reject\";\nreject \"no thanks\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("Rejected with: no thanks\n"), "{trace}");
    assert_eq!(host.rejected, vec!["no thanks".to_string()]);
    assert!(host.kept.is_empty());
}

#[test]
fn vacation_two_phase() {
    let mut host = Host::default();
    host.vacation_due = true;
    let trace = run(
        "vacation-send",
        "require \"vacation\";\nvacation :subject \"Out\" \"gone fishing\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("Sent vacation reply\n"), "{trace}");
    assert_eq!(host.vacations_sent, vec!["Out".to_string()]);

    let mut host = Host::default();
    let trace = run(
        "vacation-suppressed",
        "require \"vacation\";\nvacation \"gone fishing\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("Vacation reply suppressed\n"), "{trace}");
    assert!(host.vacations_sent.is_empty());
}

#[test]
fn action_failure_aborts_dispatch_and_implicit_keep() {
    let mut host = Host::default();
    host.fail_redirect = true;
    let error = run(
        "redirect-fails",
        "redirect \"a@b\";\nkeep;",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Generic);
    assert!(
        error.trace.contains("Redirect action failed: boom\n"),
        "{}",
        error.trace
    );
    // The explicit keep after the failed redirect never ran, and the
    // implicit keep was disabled to avoid double delivery.
    assert!(host.kept.is_empty());
    assert_eq!(host.errors, vec!["Redirect (a@b): boom".to_string()]);
}

#[test]
fn include_of_missing_script_discards_actions_but_keeps() {
    let interp = build_interp();
    let path = compile_to(
        "include-missing",
        &interp,
        "require [\"include\", \"fileinto\"];\nfileinto \"Archive\";\ninclude \"gone\";",
    );
    let mut host = Host::default();
    host.includes
        .insert("gone".to_string(), temp_path("no-such-script"));

    let mut handle = None;
    load(&path, &mut handle).unwrap();
    let error = execute(
        handle.as_mut().unwrap(),
        &interp,
        &mut host,
        &mut Message::sample(),
    )
    .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Run);
    assert!(
        error.trace.contains("script execution failed:"),
        "{}",
        error.trace
    );
    // The fileinto recorded before the failure is not executed, but the
    // message is still delivered through implicit keep.
    assert!(host.filed.is_empty());
    assert_eq!(host.kept.len(), 1);
    assert_eq!(host.errors.len(), 1);

    std::fs::remove_file(&path).ok();
}

#[test]
fn include_of_corrupt_bytecode_behaves_like_missing() {
    let interp = build_interp();
    let path = compile_to(
        "include-corrupt",
        &interp,
        "require [\"include\", \"fileinto\"];\nfileinto \"Archive\";\ninclude \"bad\";",
    );
    let corrupt = temp_path("corrupt-child");
    std::fs::write(&corrupt, b"not bytecode at all").unwrap();

    let mut host = Host::default();
    host.includes.insert("bad".to_string(), corrupt.clone());

    let mut handle = None;
    load(&path, &mut handle).unwrap();
    let error = execute(
        handle.as_mut().unwrap(),
        &interp,
        &mut host,
        &mut Message::sample(),
    )
    .unwrap_err();

    assert_eq!(error.kind, ErrorKind::Run);
    assert!(host.filed.is_empty());
    assert_eq!(host.kept.len(), 1);

    std::fs::remove_file(&path).ok();
    std::fs::remove_file(&corrupt).ok();
}

#[test]
fn optional_include_of_missing_script_is_a_noop() {
    let mut host = Host::default();
    let trace = run(
        "include-optional",
        "require \"include\";\ninclude :optional \"gone\";\nkeep;",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("Kept\n"), "{trace}");
    assert_eq!(host.kept.len(), 1);
}

#[test]
fn duplicate_tracking_written_only_on_success() {
    let src = "require \"duplicate\";\nif duplicate :uniqueid \"x\" { discard; } else { keep; }";

    let mut host = Host::default();
    run("duptrack-ok", src, &mut host, &mut Message::sample()).unwrap();
    assert_eq!(host.kept.len(), 1);
    assert_eq!(host.tracked.len(), 1);
    assert_eq!(host.tracked[0].0, "x");

    // Same test with a failing run: nothing is tracked.
    let mut host = Host::default();
    host.fail_redirect = true;
    let src = "require \"duplicate\";\nif not duplicate :uniqueid \"x\" { redirect \"a@b\"; }";
    run("duptrack-err", src, &mut host, &mut Message::sample()).unwrap_err();
    assert!(host.tracked.is_empty());
}

#[test]
fn duplicate_check_drives_control_flow() {
    let src = "require [\"duplicate\", \"fileinto\"];\n\
               if duplicate :uniqueid \"x\" { discard; } else { fileinto \"New\"; }";

    let mut host = Host::default();
    host.seen_ids.push("x".to_string());
    run("duplicate-seen", src, &mut host, &mut Message::sample()).unwrap();
    assert_eq!(host.discarded, 1);
    assert!(host.filed.is_empty());

    let mut host = Host::default();
    run("duplicate-new", src, &mut host, &mut Message::sample()).unwrap();
    assert_eq!(host.discarded, 0);
    assert_eq!(host.filed.len(), 1);
}

#[test]
fn variables_expand_into_actions() {
    let mut host = Host::default();
    run(
        "variables",
        "require [\"variables\", \"fileinto\"];\n\
         set \"folder\" \"Lists\";\n\
         if header :matches \"subject\" \"*World\" { fileinto \"${folder}/${1}\"; }",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.filed[0].0, "Lists/Hello ");
}

#[test]
fn stop_halts_the_script() {
    let mut host = Host::default();
    let trace = run(
        "stop",
        "require \"fileinto\";\nif size :over 100 { stop; }\nfileinto \"Big\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(host.filed.is_empty());
    // Nothing canceled keep, so the implicit keep delivered the message.
    assert_eq!(trace, "Action(s) taken:\nKept\n");
}

#[test]
fn denotify_deactivates_matching_entries() {
    let mut host = Host::default();
    run(
        "denotify",
        "require \"enotify\";\n\
         notify :method \"mailto\" :high :message \"urgent\";\n\
         notify :method \"mailto\" :message \"routine\";\n\
         denotify :high;\n\
         keep;",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.notified.len(), 1);
    assert!(host.notified[0].message.starts_with("routine"));
}

#[test]
fn snooze_traces_and_cancels_keep() {
    let mut host = Host::default();
    let trace = run(
        "snooze",
        "require \"vnd.cyrus.snooze\";\nsnooze :mailbox \"Later\" [\"08:00\", \"17:00\"];",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("Snoozed\n"), "{trace}");
    assert_eq!(
        host.snoozed,
        vec![vec!["08:00".to_string(), "17:00".to_string()]]
    );
    assert!(host.kept.is_empty());
}

#[test]
fn ereject_uses_its_own_trace_label() {
    let mut host = Host::default();
    let trace = run(
        "ereject",
        "require \"ereject\";\nereject \"550 go away\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert!(trace.contains("eRejected with: 550 go away\n"), "{trace}");
}

#[test]
fn log_command_reaches_the_logger() {
    let mut host = Host::default();
    run(
        "log",
        "require [\"vnd.cyrus.log\", \"variables\"];\n\
         set \"who\" \"alice\";\nlog \"mail for ${who}\";",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.logged, vec!["mail for alice".to_string()]);
}

#[test]
fn edited_headers_reach_the_keep_context() {
    let interp = build_interp();
    let path = compile_to(
        "editheader",
        &interp,
        "require \"editheader\";\naddheader \"X-Filtered\" \"yes\";",
    );
    let mut host = Host::default();
    let mut message = Message::sample();

    let mut handle = None;
    load(&path, &mut handle).unwrap();

    let mut checking = build_interp();
    checking.register_keep(|keep, host, _| {
        host.kept.push(keep.flags.clone());
        assert!(keep.headers.is_some(), "edited header section missing");
        Ok(())
    });
    execute(handle.as_mut().unwrap(), &checking, &mut host, &mut message).unwrap();

    assert_eq!(host.kept.len(), 1);
    assert!(message
        .headers
        .iter()
        .any(|(name, _)| name == "X-Filtered"));
    std::fs::remove_file(&path).ok();
}

#[test]
fn environment_and_hasflag_tests() {
    let mut host = Host::default();
    run(
        "env-hasflag",
        "require [\"environment\", \"imap4flags\", \"fileinto\"];\n\
         setflag \"\\\\Answered\";\n\
         if allof (environment :contains \"domain\" \"example\",\n\
                   hasflag \"\\\\Answered\") { fileinto \"Matched\"; }",
        &mut host,
        &mut Message::sample(),
    )
    .unwrap();
    assert_eq!(host.filed.len(), 1);
    assert_eq!(host.filed[0].0, "Matched");
}

#[test]
fn envelope_and_header_tests() {
    let src = "require [\"envelope\", \"fileinto\"];\n\
               if allof (envelope :domain :is \"from\" \"b\",\n\
                         header :contains \"subject\" \"world\") { fileinto \"Match\"; }";
    let mut host = Host::default();
    run("envelope", src, &mut host, &mut Message::sample()).unwrap();
    assert_eq!(host.filed.len(), 1);
}
