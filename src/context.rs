/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Typed payloads handed to host callbacks. Each action the runtime
//! records carries one of these, fully expanded against the script's
//! variable frames before the dispatcher passes it on.

/// Payload of a `fileinto` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIntoContext {
    pub mailbox: String,
    /// IMAP flags to set on the filed copy.
    pub flags: Vec<String>,
    /// `:copy` was given; implicit keep stays in effect.
    pub copy: bool,
    /// `:create` was given; the host may create the mailbox.
    pub create: bool,
    pub special_use: Option<String>,
    pub mailbox_id: Option<String>,
}

/// Payload of a `redirect` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectContext {
    pub address: String,
    /// The address names an external list rather than a mailbox.
    pub is_ext_list: bool,
    pub copy: bool,
}

/// Payload of `reject` and `ereject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectContext {
    pub reason: String,
    pub ereject: bool,
}

/// Payload of an explicit or implicit `keep`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepContext {
    /// IMAP flag frame at the time the keep fires.
    pub flags: Vec<String>,
    /// Rewritten header section, present when `addheader`/`deleteheader`
    /// edited the message during evaluation.
    pub headers: Option<Vec<u8>>,
}

/// Payload of a `snooze` action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnoozeContext {
    pub mailbox: Option<String>,
    pub add_flags: Vec<String>,
    pub remove_flags: Vec<String>,
    pub weekdays: Vec<String>,
    /// Awaken times, `"hh:mm"`.
    pub times: Vec<String>,
}

/// The two halves of a vacation action: the autorespond decision and the
/// response to send if the decision is [`Autorespond::Respond`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationContext {
    pub autorespond: AutorespondContext,
    pub send: SendResponseContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutorespondContext {
    /// Deduplication handle (`:handle` or the reason text).
    pub handle: String,
    pub from: Option<String>,
    /// Minimum interval between responses to one correspondent.
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponseContext {
    /// Address the reply goes to (the message sender).
    pub address: String,
    pub from: Option<String>,
    pub subject: String,
    pub message: String,
    /// The reason text is a complete MIME entity.
    pub mime: bool,
}

/// Outcome of the host's autorespond decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Autorespond {
    Respond,
    /// A response was sent too recently; suppress this one.
    Suppress,
}

/// Payload of a pending notification, assembled by the dispatcher after
/// template expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyContext {
    pub method: String,
    pub from: Option<String>,
    pub options: Vec<String>,
    pub priority: String,
    /// Expanded message followed by the action trace.
    pub message: String,
    /// Spool file name, when the host registered an accessor for it.
    pub fname: Option<String>,
}

/// Payload of a duplicate check or tracking record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateContext {
    pub id: String,
    pub seconds: u64,
}

/// One decoded `text/*` body part returned by the body accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyPart {
    pub content_type: String,
    pub decoded: String,
}

/// Where an included script lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IncludeLocation {
    Personal,
    Global,
}
