/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The capability table: a registry of host callbacks and the extension
//! set they enable. Built once per interpreter instance and treated as
//! read-only during evaluation.

use std::path::PathBuf;

use crate::{
    context::{
        Autorespond, AutorespondContext, BodyPart, DuplicateContext, FileIntoContext,
        IncludeLocation, KeepContext, NotifyContext, RedirectContext, RejectContext,
        SendResponseContext, SnoozeContext,
    },
    CallbackError, ErrorKind,
};

/// Result of an action callback.
pub type ActionResult = Result<(), CallbackError>;

type ActionFn<SC, MC, A> = Box<dyn Fn(&A, &mut SC, &mut MC) -> ActionResult>;

// Capability bits OR'd into a script's support mask by `require`.
pub const CAPA_BASE: u64 = 1;
pub const CAPA_FILEINTO: u64 = 1 << 1;
pub const CAPA_REJECT: u64 = 1 << 2;
pub const CAPA_EREJECT: u64 = 1 << 3;
pub const CAPA_ENVELOPE: u64 = 1 << 4;
pub const CAPA_BODY: u64 = 1 << 5;
pub const CAPA_ENVIRONMENT: u64 = 1 << 6;
pub const CAPA_VARIABLES: u64 = 1 << 7;
pub const CAPA_IMAP4FLAGS: u64 = 1 << 8;
pub const CAPA_IMAPFLAGS: u64 = 1 << 9;
pub const CAPA_COPY: u64 = 1 << 10;
pub const CAPA_RELATIONAL: u64 = 1 << 11;
pub const CAPA_NOTIFY: u64 = 1 << 12;
pub const CAPA_INCLUDE: u64 = 1 << 13;
pub const CAPA_DUPLICATE: u64 = 1 << 14;
pub const CAPA_VACATION: u64 = 1 << 15;
pub const CAPA_VACATION_SECONDS: u64 = 1 << 16;
pub const CAPA_MAILBOX: u64 = 1 << 17;
pub const CAPA_MAILBOXID: u64 = 1 << 18;
pub const CAPA_SPECIAL_USE: u64 = 1 << 19;
pub const CAPA_MBOXMETADATA: u64 = 1 << 20;
pub const CAPA_EDITHEADER: u64 = 1 << 21;
pub const CAPA_EXTLISTS: u64 = 1 << 22;
pub const CAPA_LOG: u64 = 1 << 23;
pub const CAPA_SNOOZE: u64 = 1 << 24;
pub const CAPA_JMAPQUERY: u64 = 1 << 25;

/// Vacation callback pair. `autorespond` decides whether a reply is due;
/// `send_response` submits it.
pub struct Vacation<SC, MC> {
    pub min_response: u64,
    pub max_response: u64,
    pub(crate) autorespond:
        Box<dyn Fn(&AutorespondContext, &mut SC, &mut MC) -> Result<Autorespond, CallbackError>>,
    pub(crate) send_response: ActionFn<SC, MC, SendResponseContext>,
}

/// Duplicate-suppression callback pair backed by the host's tracking
/// database.
pub struct Duplicate<SC, MC> {
    /// Upper bound on a script's requested tracking window, in seconds.
    /// Zero means unbounded.
    pub max_expiration: u64,
    pub(crate) check:
        Box<dyn Fn(&DuplicateContext, &mut SC, &mut MC) -> Result<bool, CallbackError>>,
    pub(crate) track: ActionFn<SC, MC, DuplicateContext>,
}

/// Host callback registry, generic over the host's script context `SC`
/// and message context `MC`.
///
/// Every slot is optional; [`Interpreter::verify`] enforces only the
/// mandatory minimum (logger, error reporter, keep). A script reaching an
/// unregistered optional capability fails with [`ErrorKind::Internal`] at
/// dispatch time, which keeps parse-only interpreters cheap to build.
pub struct Interpreter<SC, MC> {
    pub(crate) keep: Option<ActionFn<SC, MC, KeepContext>>,
    pub(crate) fileinto: Option<ActionFn<SC, MC, FileIntoContext>>,
    pub(crate) redirect: Option<ActionFn<SC, MC, RedirectContext>>,
    pub(crate) reject: Option<ActionFn<SC, MC, RejectContext>>,
    pub(crate) discard: Option<ActionFn<SC, MC, ()>>,
    pub(crate) notify: Option<ActionFn<SC, MC, NotifyContext>>,
    pub(crate) snooze: Option<ActionFn<SC, MC, SnoozeContext>>,
    pub(crate) vacation: Option<Vacation<SC, MC>>,
    pub(crate) duplicate: Option<Duplicate<SC, MC>>,

    pub(crate) get_header: Option<Box<dyn Fn(&MC, &str) -> Vec<String>>>,
    pub(crate) get_headersection: Option<Box<dyn Fn(&MC) -> Option<Vec<u8>>>>,
    pub(crate) get_envelope: Option<Box<dyn Fn(&MC, &str) -> Vec<String>>>,
    pub(crate) get_environment: Option<Box<dyn Fn(&MC, &str) -> Option<String>>>,
    pub(crate) get_body: Option<Box<dyn Fn(&MC, &[&str]) -> Vec<BodyPart>>>,
    pub(crate) get_size: Option<Box<dyn Fn(&MC) -> usize>>,
    pub(crate) get_fname: Option<Box<dyn Fn(&MC) -> Option<String>>>,
    pub(crate) get_metadata: Option<Box<dyn Fn(&MC, &str, &str) -> Option<String>>>,
    pub(crate) mailbox_exists: Option<Box<dyn Fn(&MC, &str) -> bool>>,
    pub(crate) mailboxid_exists: Option<Box<dyn Fn(&MC, &str) -> bool>>,
    pub(crate) specialuse_exists: Option<Box<dyn Fn(&MC, Option<&str>, &str) -> bool>>,
    pub(crate) get_include:
        Option<Box<dyn Fn(&SC, &str, IncludeLocation) -> Option<PathBuf>>>,

    pub(crate) add_header: Option<Box<dyn Fn(&mut MC, &str, &str, bool) -> ActionResult>>,
    pub(crate) delete_header: Option<Box<dyn Fn(&mut MC, &str, Option<u32>) -> ActionResult>>,

    pub(crate) list_validator: Option<Box<dyn Fn(&str) -> bool>>,
    pub(crate) list_comparator: Option<Box<dyn Fn(&MC, &str, &str) -> bool>>,
    pub(crate) jmapquery: Option<Box<dyn Fn(&MC, &str) -> bool>>,

    pub(crate) log: Option<Box<dyn Fn(&mut SC, &MC, &str)>>,
    pub(crate) execute_err: Option<Box<dyn Fn(&str, &mut SC, &mut MC) -> ActionResult>>,
    pub(crate) parse_error: Option<Box<dyn Fn(u32, &str)>>,
}

impl<SC, MC> Interpreter<SC, MC> {
    pub fn new() -> Self {
        Interpreter {
            keep: None,
            fileinto: None,
            redirect: None,
            reject: None,
            discard: None,
            notify: None,
            snooze: None,
            vacation: None,
            duplicate: None,
            get_header: None,
            get_headersection: None,
            get_envelope: None,
            get_environment: None,
            get_body: None,
            get_size: None,
            get_fname: None,
            get_metadata: None,
            mailbox_exists: None,
            mailboxid_exists: None,
            specialuse_exists: None,
            get_include: None,
            add_header: None,
            delete_header: None,
            list_validator: None,
            list_comparator: None,
            jmapquery: None,
            log: None,
            execute_err: None,
            parse_error: None,
        }
    }

    /// Interpreter sanity check run before parsing: the logger, the error
    /// reporter and the keep action are mandatory.
    pub fn verify(&self) -> Result<(), ErrorKind> {
        if self.log.is_some() && self.execute_err.is_some() && self.keep.is_some() {
            Ok(())
        } else {
            Err(ErrorKind::Generic)
        }
    }

    /// Maps a `require` argument to its capability bit, or zero when the
    /// extension is unknown or its backing callbacks are not registered.
    pub fn extension_isactive(&self, name: &str) -> u64 {
        match name {
            "fileinto" if self.fileinto.is_some() => CAPA_FILEINTO,
            "reject" if self.reject.is_some() => CAPA_REJECT,
            "ereject" if self.reject.is_some() => CAPA_EREJECT,
            "envelope" if self.get_envelope.is_some() => CAPA_ENVELOPE,
            "body" if self.get_body.is_some() => CAPA_BODY,
            "environment" if self.get_environment.is_some() => CAPA_ENVIRONMENT,
            "variables" => CAPA_VARIABLES,
            "imap4flags" => CAPA_IMAP4FLAGS,
            "imapflags" => CAPA_IMAPFLAGS,
            "copy" => CAPA_COPY,
            "relational" => CAPA_RELATIONAL,
            "comparator-i;ascii-casemap" | "comparator-i;octet" => CAPA_BASE,
            "enotify" | "notify" if self.notify.is_some() => CAPA_NOTIFY,
            "include" if self.get_include.is_some() => CAPA_INCLUDE,
            "duplicate" if self.duplicate.is_some() => CAPA_DUPLICATE,
            "vacation" if self.vacation.is_some() => CAPA_VACATION,
            "vacation-seconds" if self.vacation.is_some() => {
                CAPA_VACATION | CAPA_VACATION_SECONDS
            }
            "mailbox" if self.mailbox_exists.is_some() => CAPA_MAILBOX,
            "mailboxid" if self.mailboxid_exists.is_some() => CAPA_MAILBOXID,
            "special-use" if self.specialuse_exists.is_some() => CAPA_SPECIAL_USE,
            "mboxmetadata" if self.get_metadata.is_some() => CAPA_MBOXMETADATA,
            "editheader" if self.add_header.is_some() && self.delete_header.is_some() => {
                CAPA_EDITHEADER
            }
            "extlists" if self.list_validator.is_some() && self.list_comparator.is_some() => {
                CAPA_EXTLISTS
            }
            "vnd.cyrus.log" | "x-cyrus-log" if self.log.is_some() => CAPA_LOG,
            "vnd.cyrus.snooze" | "x-cyrus-snooze" if self.snooze.is_some() => CAPA_SNOOZE,
            "vnd.cyrus.jmapquery" | "x-cyrus-jmapquery" if self.jmapquery.is_some() => {
                CAPA_JMAPQUERY
            }
            _ => 0,
        }
    }

    pub fn register_keep(
        &mut self,
        cb: impl Fn(&KeepContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.keep = Some(Box::new(cb));
    }

    pub fn register_fileinto(
        &mut self,
        cb: impl Fn(&FileIntoContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.fileinto = Some(Box::new(cb));
    }

    pub fn register_redirect(
        &mut self,
        cb: impl Fn(&RedirectContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.redirect = Some(Box::new(cb));
    }

    pub fn register_reject(
        &mut self,
        cb: impl Fn(&RejectContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.reject = Some(Box::new(cb));
    }

    pub fn register_discard(
        &mut self,
        cb: impl Fn(&(), &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.discard = Some(Box::new(cb));
    }

    pub fn register_notify(
        &mut self,
        cb: impl Fn(&NotifyContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.notify = Some(Box::new(cb));
    }

    pub fn register_snooze(
        &mut self,
        cb: impl Fn(&SnoozeContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.snooze = Some(Box::new(cb));
    }

    pub fn register_vacation(
        &mut self,
        min_response: u64,
        max_response: u64,
        autorespond: impl Fn(&AutorespondContext, &mut SC, &mut MC) -> Result<Autorespond, CallbackError>
            + 'static,
        send_response: impl Fn(&SendResponseContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.vacation = Some(Vacation {
            min_response,
            max_response,
            autorespond: Box::new(autorespond),
            send_response: Box::new(send_response),
        });
    }

    pub fn register_duplicate(
        &mut self,
        max_expiration: u64,
        check: impl Fn(&DuplicateContext, &mut SC, &mut MC) -> Result<bool, CallbackError> + 'static,
        track: impl Fn(&DuplicateContext, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.duplicate = Some(Duplicate {
            max_expiration,
            check: Box::new(check),
            track: Box::new(track),
        });
    }

    pub fn register_header(&mut self, cb: impl Fn(&MC, &str) -> Vec<String> + 'static) {
        self.get_header = Some(Box::new(cb));
    }

    pub fn register_headersection(&mut self, cb: impl Fn(&MC) -> Option<Vec<u8>> + 'static) {
        self.get_headersection = Some(Box::new(cb));
    }

    pub fn register_envelope(&mut self, cb: impl Fn(&MC, &str) -> Vec<String> + 'static) {
        self.get_envelope = Some(Box::new(cb));
    }

    pub fn register_environment(&mut self, cb: impl Fn(&MC, &str) -> Option<String> + 'static) {
        self.get_environment = Some(Box::new(cb));
    }

    pub fn register_body(&mut self, cb: impl Fn(&MC, &[&str]) -> Vec<BodyPart> + 'static) {
        self.get_body = Some(Box::new(cb));
    }

    pub fn register_size(&mut self, cb: impl Fn(&MC) -> usize + 'static) {
        self.get_size = Some(Box::new(cb));
    }

    pub fn register_fname(&mut self, cb: impl Fn(&MC) -> Option<String> + 'static) {
        self.get_fname = Some(Box::new(cb));
    }

    pub fn register_metadata(
        &mut self,
        cb: impl Fn(&MC, &str, &str) -> Option<String> + 'static,
    ) {
        self.get_metadata = Some(Box::new(cb));
    }

    pub fn register_mailboxexists(&mut self, cb: impl Fn(&MC, &str) -> bool + 'static) {
        self.mailbox_exists = Some(Box::new(cb));
    }

    pub fn register_mailboxidexists(&mut self, cb: impl Fn(&MC, &str) -> bool + 'static) {
        self.mailboxid_exists = Some(Box::new(cb));
    }

    pub fn register_specialuseexists(
        &mut self,
        cb: impl Fn(&MC, Option<&str>, &str) -> bool + 'static,
    ) {
        self.specialuse_exists = Some(Box::new(cb));
    }

    pub fn register_include(
        &mut self,
        cb: impl Fn(&SC, &str, IncludeLocation) -> Option<PathBuf> + 'static,
    ) {
        self.get_include = Some(Box::new(cb));
    }

    pub fn register_addheader(
        &mut self,
        cb: impl Fn(&mut MC, &str, &str, bool) -> ActionResult + 'static,
    ) {
        self.add_header = Some(Box::new(cb));
    }

    pub fn register_deleteheader(
        &mut self,
        cb: impl Fn(&mut MC, &str, Option<u32>) -> ActionResult + 'static,
    ) {
        self.delete_header = Some(Box::new(cb));
    }

    pub fn register_extlists(
        &mut self,
        validator: impl Fn(&str) -> bool + 'static,
        comparator: impl Fn(&MC, &str, &str) -> bool + 'static,
    ) {
        self.list_validator = Some(Box::new(validator));
        self.list_comparator = Some(Box::new(comparator));
    }

    pub fn register_jmapquery(&mut self, cb: impl Fn(&MC, &str) -> bool + 'static) {
        self.jmapquery = Some(Box::new(cb));
    }

    pub fn register_logger(&mut self, cb: impl Fn(&mut SC, &MC, &str) + 'static) {
        self.log = Some(Box::new(cb));
    }

    pub fn register_execute_err(
        &mut self,
        cb: impl Fn(&str, &mut SC, &mut MC) -> ActionResult + 'static,
    ) {
        self.execute_err = Some(Box::new(cb));
    }

    pub fn register_parse_error(&mut self, cb: impl Fn(u32, &str) + 'static) {
        self.parse_error = Some(Box::new(cb));
    }
}

impl<SC, MC> Default for Interpreter<SC, MC> {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter<(), ()> {
    /// Builds a single-use interpreter whose every slot is a poison stub.
    /// Parsing shares the regular code path against this table, which
    /// makes parse-only validation inherently free of side effects: if a
    /// stub is ever invoked, something reached execution that never
    /// should have.
    pub fn nonexec() -> Self {
        fn poison() -> ! {
            panic!("stub callback invoked");
        }

        let mut interp = Interpreter::new();
        interp.register_keep(|_, _, _| poison());
        interp.register_fileinto(|_, _, _| poison());
        interp.register_redirect(|_, _, _| poison());
        interp.register_reject(|_, _, _| poison());
        interp.register_discard(|_, _, _| poison());
        interp.register_notify(|_, _, _| poison());
        interp.register_snooze(|_, _, _| poison());
        interp.register_vacation(0, 0, |_, _, _| poison(), |_, _, _| poison());
        interp.register_duplicate(0, |_, _, _| poison(), |_, _, _| poison());
        interp.register_header(|_, _| poison());
        interp.register_headersection(|_| poison());
        interp.register_envelope(|_, _| poison());
        interp.register_environment(|_, _| poison());
        interp.register_body(|_, _| poison());
        interp.register_size(|_| poison());
        interp.register_fname(|_| poison());
        interp.register_metadata(|_, _, _| poison());
        interp.register_mailboxexists(|_, _| poison());
        interp.register_mailboxidexists(|_, _| poison());
        interp.register_specialuseexists(|_, _, _| poison());
        interp.register_include(|_, _, _| poison());
        interp.register_addheader(|_, _, _, _| poison());
        interp.register_deleteheader(|_, _, _| poison());
        interp.register_extlists(|_| poison(), |_, _, _| poison());
        interp.register_jmapquery(|_, _| poison());
        interp.register_logger(|_, _, _| poison());
        interp.register_execute_err(|_, _, _| poison());
        interp.register_parse_error(|_, _| poison());
        interp
    }
}
