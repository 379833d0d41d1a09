/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The command tree produced by the parser. The same types double as the
//! bytecode payload: the compiler serializes them behind a versioned
//! header, so the runtime never re-parses source text.
//!
//! Strings are stored raw; variable references (`${name}`, `${digit}`)
//! are expanded by the runtime against the active frames.

use serde::{Deserialize, Serialize};

use crate::context::IncludeLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Relation {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "gt" => Relation::Gt,
            "ge" => Relation::Ge,
            "lt" => Relation::Lt,
            "le" => Relation::Le,
            "eq" => Relation::Eq,
            "ne" => Relation::Ne,
            _ => return None,
        })
    }

    pub(crate) fn holds(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Relation::Gt => ord == Greater,
            Relation::Ge => ord != Less,
            Relation::Lt => ord == Less,
            Relation::Le => ord != Greater,
            Relation::Eq => ord == Equal,
            Relation::Ne => ord != Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    Is,
    Contains,
    Matches,
    Value(Relation),
    Count(Relation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    AsciiCasemap,
    Octet,
}

/// Match type plus comparator, shared by every matching test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    pub match_type: MatchType,
    pub comparator: Comparator,
}

impl Default for MatchSpec {
    fn default() -> Self {
        MatchSpec {
            match_type: MatchType::Is,
            comparator: Comparator::AsciiCasemap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressPart {
    All,
    Localpart,
    Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    Lower,
    Upper,
    LowerFirst,
    UpperFirst,
    QuoteWildcard,
    Length,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Test {
    True,
    False,
    Address {
        part: AddressPart,
        spec: MatchSpec,
        /// Keys name external lists instead of match patterns.
        is_list: bool,
        headers: Vec<String>,
        keys: Vec<String>,
    },
    Envelope {
        part: AddressPart,
        spec: MatchSpec,
        is_list: bool,
        fields: Vec<String>,
        keys: Vec<String>,
    },
    Header {
        spec: MatchSpec,
        headers: Vec<String>,
        keys: Vec<String>,
    },
    Exists {
        headers: Vec<String>,
    },
    Size {
        over: bool,
        limit: u64,
    },
    AllOf(Vec<Test>),
    AnyOf(Vec<Test>),
    Not(Box<Test>),
    HasFlag {
        spec: MatchSpec,
        flags: Vec<String>,
    },
    StringTest {
        spec: MatchSpec,
        source: Vec<String>,
        keys: Vec<String>,
    },
    Environment {
        spec: MatchSpec,
        name: String,
        keys: Vec<String>,
    },
    MailboxExists {
        names: Vec<String>,
    },
    MailboxIdExists {
        ids: Vec<String>,
    },
    SpecialUseExists {
        mailbox: Option<String>,
        flags: Vec<String>,
    },
    Metadata {
        spec: MatchSpec,
        mailbox: String,
        annotation: String,
        keys: Vec<String>,
    },
    Duplicate {
        id: Option<String>,
        header: Option<String>,
        seconds: Option<u64>,
        last: bool,
    },
    ValidExtList {
        lists: Vec<String>,
    },
    JmapQuery {
        query: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    If {
        branches: Vec<(Test, Vec<Command>)>,
        otherwise: Option<Vec<Command>>,
    },
    Stop,
    Return,
    Keep {
        flags: Option<Vec<String>>,
    },
    FileInto {
        mailbox: String,
        flags: Option<Vec<String>>,
        copy: bool,
        create: bool,
        special_use: Option<String>,
        mailbox_id: Option<String>,
    },
    Redirect {
        address: String,
        copy: bool,
        is_list: bool,
    },
    Discard,
    Reject {
        reason: String,
        ereject: bool,
    },
    Vacation {
        seconds: Option<u64>,
        subject: Option<String>,
        from: Option<String>,
        addresses: Vec<String>,
        mime: bool,
        handle: Option<String>,
        reason: String,
    },
    SetFlag {
        flags: Vec<String>,
    },
    AddFlag {
        flags: Vec<String>,
    },
    RemoveFlag {
        flags: Vec<String>,
    },
    Mark,
    Unmark,
    Notify {
        method: Option<String>,
        from: Option<String>,
        options: Vec<String>,
        priority: Option<String>,
        message: Option<String>,
    },
    Denotify {
        priority: Option<String>,
        spec: Option<MatchSpec>,
        pattern: Option<String>,
    },
    Set {
        modifiers: Vec<Modifier>,
        name: String,
        value: String,
    },
    Include {
        name: String,
        location: IncludeLocation,
        once: bool,
        optional: bool,
    },
    Snooze {
        mailbox: Option<String>,
        add_flags: Vec<String>,
        remove_flags: Vec<String>,
        weekdays: Vec<String>,
        times: Vec<String>,
    },
    AddHeader {
        name: String,
        value: String,
        last: bool,
    },
    DeleteHeader {
        name: String,
        index: Option<u32>,
    },
    Log {
        message: String,
    },
}
