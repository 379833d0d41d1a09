/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The lists evaluation builds and dispatch consumes: delivery actions,
//! pending notifications and duplicate-tracking records.

use crate::context::{
    FileIntoContext, KeepContext, RedirectContext, RejectContext, SnoozeContext,
    VacationContext,
};

/// One delivery effect. The tag set is closed; the dispatcher matches
/// exhaustively. Flag operations never reach the action list (they
/// mutate the flag frame during evaluation) but keep their kinds here so
/// error reports can name them.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Reject(RejectContext),
    EReject(RejectContext),
    FileInto(FileIntoContext),
    Snooze(SnoozeContext),
    Keep(KeepContext),
    Redirect(RedirectContext),
    Discard,
    Vacation(Box<VacationContext>),
    SetFlag,
    AddFlag,
    RemoveFlag,
    Mark,
    Unmark,
    Notify,
    Denotify,
    None,
}

impl Action {
    /// Label used in the operator trace and error reports.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Reject(_) => "Reject",
            Action::EReject(_) => "eReject",
            Action::FileInto(_) => "Fileinto",
            Action::Snooze(_) => "Snooze",
            Action::Keep(_) => "Keep",
            Action::Redirect(_) => "Redirect",
            Action::Discard => "Discard",
            Action::Vacation(_) => "Vacation",
            Action::SetFlag => "Setflag",
            Action::AddFlag => "Addflag",
            Action::RemoveFlag => "Removeflag",
            Action::Mark => "Mark",
            Action::Unmark => "Unmark",
            Action::Notify => "Notify",
            Action::Denotify => "Denotify",
            Action::None => "None",
        }
    }
}

/// Action plus its implicit-keep effect: when any executed entry has
/// `cancel_keep` set, implicit keep is suppressed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionItem {
    pub action: Action,
    pub cancel_keep: bool,
}

/// A pending notification. `active` entries are dispatched after the
/// action loop; `denotify` clears the flag instead of removing entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyEntry {
    pub method: String,
    pub from: Option<String>,
    pub options: Vec<String>,
    pub priority: String,
    pub message: String,
    pub active: bool,
}

/// Delivery-suppression record handed to the host's duplicate tracker
/// once the overall outcome is Ok.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuptrackEntry {
    pub id: String,
    pub seconds: u64,
}
