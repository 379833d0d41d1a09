/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Recursive-descent parser over the token stream. Parsing keeps going
//! past errors wherever the grammar allows, so one pass reports as many
//! problems as possible; recovery skips to the next command boundary.

use super::{
    ast::{AddressPart, Command, Comparator, MatchSpec, MatchType, Modifier, Relation, Test},
    lexer::{tokenize, Spanned, Token},
};
use crate::{
    context::IncludeLocation,
    interp::{
        CAPA_BASE, CAPA_COPY, CAPA_DUPLICATE, CAPA_EDITHEADER, CAPA_ENVELOPE,
        CAPA_ENVIRONMENT, CAPA_EREJECT, CAPA_EXTLISTS, CAPA_FILEINTO, CAPA_IMAP4FLAGS,
        CAPA_IMAPFLAGS, CAPA_INCLUDE, CAPA_JMAPQUERY, CAPA_LOG, CAPA_MAILBOX,
        CAPA_MAILBOXID, CAPA_MBOXMETADATA, CAPA_NOTIFY, CAPA_REJECT, CAPA_RELATIONAL,
        CAPA_SNOOZE, CAPA_SPECIAL_USE, CAPA_VACATION, CAPA_VACATION_SECONDS,
        CAPA_VARIABLES,
    },
};

#[derive(Debug)]
pub(crate) struct ParseOutput {
    pub commands: Vec<Command>,
    pub support: u64,
}

/// Parses a script source. `capability` answers `require` lookups with
/// the extension's bit (zero when unsupported); `valid_list` validates
/// external list names at parse time.
pub(crate) fn parse(
    src: &str,
    capability: impl Fn(&str) -> u64,
    valid_list: impl Fn(&str) -> bool,
) -> Result<ParseOutput, Vec<(u32, String)>> {
    let tokens = match tokenize(src) {
        Ok(tokens) => tokens,
        Err(err) => return Err(vec![(err.line, err.message)]),
    };

    let mut parser = Parser {
        tokens,
        pos: 0,
        support: CAPA_BASE,
        errors: Vec::new(),
        seen_command: false,
        capability: &capability,
        valid_list: &valid_list,
    };
    let commands = parser.commands(false);

    if parser.errors.is_empty() {
        Ok(ParseOutput {
            commands,
            support: parser.support,
        })
    } else {
        Err(parser.errors)
    }
}

struct Parser<'c> {
    tokens: Vec<Spanned>,
    pos: usize,
    support: u64,
    errors: Vec<(u32, String)>,
    seen_command: bool,
    capability: &'c dyn Fn(&str) -> u64,
    valid_list: &'c dyn Fn(&str) -> bool,
}

// Unit error: the message is already recorded, the caller only recovers.
type Parsed<T> = Result<T, ()>;

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.errors.push((line, message.into()));
    }

    /// Skips to the next command boundary after an error.
    fn recover(&mut self) {
        while let Some(token) = self.peek() {
            match token {
                Token::Semicolon => {
                    self.pos += 1;
                    return;
                }
                Token::LeftBrace => {
                    self.skip_block();
                    return;
                }
                Token::RightBrace => return,
                _ => self.pos += 1,
            }
        }
    }

    fn skip_block(&mut self) {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match token {
                Token::LeftBrace => depth += 1,
                Token::RightBrace => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += 1;
                        return;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn string(&mut self) -> Parsed<String> {
        let line = self.line();
        match self.bump() {
            Some(Token::Text(text)) => Ok(text),
            _ => {
                self.error(line, "expected string");
                Err(())
            }
        }
    }

    fn string_list(&mut self) -> Parsed<Vec<String>> {
        let line = self.line();
        match self.peek() {
            Some(Token::Text(_)) => Ok(vec![self.string()?]),
            Some(Token::LeftBracket) => {
                self.pos += 1;
                let mut items = vec![self.string()?];
                loop {
                    match self.bump() {
                        Some(Token::Comma) => items.push(self.string()?),
                        Some(Token::RightBracket) => return Ok(items),
                        _ => {
                            self.error(line, "expected , or ] in string list");
                            return Err(());
                        }
                    }
                }
            }
            _ => {
                self.error(line, "expected string list");
                Err(())
            }
        }
    }

    fn number(&mut self) -> Parsed<u64> {
        let line = self.line();
        match self.bump() {
            Some(Token::Number(value)) => Ok(value),
            _ => {
                self.error(line, "expected number");
                Err(())
            }
        }
    }

    fn semicolon(&mut self) -> Parsed<()> {
        let line = self.line();
        match self.bump() {
            Some(Token::Semicolon) => Ok(()),
            _ => {
                self.error(line, "expected ;");
                Err(())
            }
        }
    }

    /// Errors unless `capa` was required; returns whether it was.
    fn need(&mut self, line: u32, capa: u64, name: &str) -> bool {
        if self.support & capa != 0 {
            true
        } else {
            self.error(line, format!("Missing require for {name}"));
            false
        }
    }

    fn commands(&mut self, nested: bool) -> Vec<Command> {
        let mut commands = Vec::new();
        loop {
            match self.peek() {
                None => break,
                Some(Token::RightBrace) if nested => break,
                Some(Token::Semicolon) => {
                    self.pos += 1;
                }
                _ => match self.command() {
                    Ok(Some(command)) => commands.push(command),
                    Ok(None) => {}
                    Err(()) => self.recover(),
                },
            }
        }
        commands
    }

    fn block(&mut self) -> Parsed<Vec<Command>> {
        let line = self.line();
        match self.bump() {
            Some(Token::LeftBrace) => {}
            _ => {
                self.error(line, "expected {");
                return Err(());
            }
        }
        let commands = self.commands(true);
        let line = self.line();
        match self.bump() {
            Some(Token::RightBrace) => Ok(commands),
            _ => {
                self.error(line, "expected }");
                Err(())
            }
        }
    }

    fn command(&mut self) -> Parsed<Option<Command>> {
        let line = self.line();
        let word = match self.bump() {
            Some(Token::Identifier(word)) => word.to_ascii_lowercase(),
            _ => {
                self.error(line, "expected command");
                return Err(());
            }
        };

        if word != "require" {
            self.seen_command = true;
        }

        match word.as_str() {
            "require" => {
                if self.seen_command {
                    self.error(line, "require must come before other commands");
                }
                let names = self.string_list()?;
                for name in &names {
                    let capa = (self.capability)(name);
                    if capa == 0 {
                        self.error(line, format!("Unsupported feature {name}"));
                    } else {
                        self.support |= capa;
                    }
                }
                self.semicolon()?;
                Ok(None)
            }
            "if" => {
                let mut branches = vec![(self.test()?, self.block()?)];
                let mut otherwise = None;
                loop {
                    match self.peek() {
                        Some(Token::Identifier(word)) if word.eq_ignore_ascii_case("elsif") => {
                            self.pos += 1;
                            branches.push((self.test()?, self.block()?));
                        }
                        Some(Token::Identifier(word)) if word.eq_ignore_ascii_case("else") => {
                            self.pos += 1;
                            otherwise = Some(self.block()?);
                            break;
                        }
                        _ => break,
                    }
                }
                Ok(Some(Command::If {
                    branches,
                    otherwise,
                }))
            }
            "stop" => {
                self.semicolon()?;
                Ok(Some(Command::Stop))
            }
            "return" => {
                self.need(line, CAPA_INCLUDE, "include");
                self.semicolon()?;
                Ok(Some(Command::Return))
            }
            "discard" => {
                self.semicolon()?;
                Ok(Some(Command::Discard))
            }
            "mark" => {
                self.need(line, CAPA_IMAPFLAGS, "imapflags");
                self.semicolon()?;
                Ok(Some(Command::Mark))
            }
            "unmark" => {
                self.need(line, CAPA_IMAPFLAGS, "imapflags");
                self.semicolon()?;
                Ok(Some(Command::Unmark))
            }
            "keep" => {
                let mut flags = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "flags" => {
                            self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                            flags = Some(self.string_list()?);
                        }
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                self.semicolon()?;
                Ok(Some(Command::Keep { flags }))
            }
            "fileinto" => {
                self.need(line, CAPA_FILEINTO, "fileinto");
                let mut flags = None;
                let mut copy = false;
                let mut create = false;
                let mut special_use = None;
                let mut mailbox_id = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "copy" => {
                            self.need(line, CAPA_COPY, "copy");
                            copy = true;
                        }
                        "create" => {
                            self.need(line, CAPA_MAILBOX, "mailbox");
                            create = true;
                        }
                        "flags" => {
                            self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                            flags = Some(self.string_list()?);
                        }
                        "specialuse" => {
                            self.need(line, CAPA_SPECIAL_USE, "special-use");
                            special_use = Some(self.string()?);
                        }
                        "mailboxid" => {
                            self.need(line, CAPA_MAILBOXID, "mailboxid");
                            mailbox_id = Some(self.string()?);
                        }
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let mailbox = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::FileInto {
                    mailbox,
                    flags,
                    copy,
                    create,
                    special_use,
                    mailbox_id,
                }))
            }
            "redirect" => {
                let mut copy = false;
                let mut is_list = false;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "copy" => {
                            self.need(line, CAPA_COPY, "copy");
                            copy = true;
                        }
                        "list" => {
                            self.need(line, CAPA_EXTLISTS, "extlists");
                            is_list = true;
                        }
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let address = self.string()?;
                if is_list && !(self.valid_list)(&address) {
                    self.error(line, format!("invalid external list {address}"));
                }
                self.semicolon()?;
                Ok(Some(Command::Redirect {
                    address,
                    copy,
                    is_list,
                }))
            }
            "reject" | "ereject" => {
                let ereject = word == "ereject";
                self.need(
                    line,
                    if ereject { CAPA_EREJECT } else { CAPA_REJECT },
                    &word,
                );
                let reason = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::Reject { reason, ereject }))
            }
            "vacation" => {
                self.need(line, CAPA_VACATION, "vacation");
                let mut seconds = None;
                let mut subject = None;
                let mut from = None;
                let mut addresses = Vec::new();
                let mut mime = false;
                let mut handle = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "days" => seconds = Some(self.number()?.saturating_mul(86400)),
                        "seconds" => {
                            self.need(line, CAPA_VACATION_SECONDS, "vacation-seconds");
                            seconds = Some(self.number()?);
                        }
                        "subject" => subject = Some(self.string()?),
                        "from" => from = Some(self.string()?),
                        "addresses" => addresses = self.string_list()?,
                        "mime" => mime = true,
                        "handle" => handle = Some(self.string()?),
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let reason = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::Vacation {
                    seconds,
                    subject,
                    from,
                    addresses,
                    mime,
                    handle,
                    reason,
                }))
            }
            "setflag" | "addflag" | "removeflag" => {
                self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                let flags = self.string_list()?;
                self.semicolon()?;
                Ok(Some(match word.as_str() {
                    "setflag" => Command::SetFlag { flags },
                    "addflag" => Command::AddFlag { flags },
                    _ => Command::RemoveFlag { flags },
                }))
            }
            "notify" => {
                self.need(line, CAPA_NOTIFY, "enotify");
                let mut method = None;
                let mut from = None;
                let mut options = Vec::new();
                let mut priority = None;
                let mut message = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "method" => method = Some(self.string()?),
                        "from" => from = Some(self.string()?),
                        "options" => options = self.string_list()?,
                        "low" | "normal" | "high" => priority = Some(tag),
                        "priority" => priority = Some(self.string()?),
                        "message" => message = Some(self.string()?),
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                self.semicolon()?;
                Ok(Some(Command::Notify {
                    method,
                    from,
                    options,
                    priority,
                    message,
                }))
            }
            "denotify" => {
                self.need(line, CAPA_NOTIFY, "enotify");
                let mut priority = None;
                let mut spec: Option<MatchSpec> = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "low" | "normal" | "high" => priority = Some(tag),
                        "priority" => priority = Some(self.string()?),
                        _ => {
                            let mut parsed = spec.unwrap_or_default();
                            if self.match_tag(line, &tag, &mut parsed)? {
                                spec = Some(parsed);
                            } else {
                                self.error(line, format!("unexpected tag :{tag}"));
                                return Err(());
                            }
                        }
                    }
                }
                let pattern = if matches!(self.peek(), Some(Token::Text(_))) {
                    Some(self.string()?)
                } else {
                    None
                };
                self.semicolon()?;
                Ok(Some(Command::Denotify {
                    priority,
                    spec,
                    pattern,
                }))
            }
            "set" => {
                self.need(line, CAPA_VARIABLES, "variables");
                let mut modifiers = Vec::new();
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    let modifier = match tag.as_str() {
                        "lower" => Modifier::Lower,
                        "upper" => Modifier::Upper,
                        "lowerfirst" => Modifier::LowerFirst,
                        "upperfirst" => Modifier::UpperFirst,
                        "quotewildcard" => Modifier::QuoteWildcard,
                        "length" => Modifier::Length,
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    };
                    modifiers.push(modifier);
                }
                let name = self.string()?;
                if !is_identifier(&name) {
                    self.error(line, format!("invalid variable name {name}"));
                }
                let value = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::Set {
                    modifiers,
                    name,
                    value,
                }))
            }
            "include" => {
                self.need(line, CAPA_INCLUDE, "include");
                let mut location = IncludeLocation::Personal;
                let mut once = false;
                let mut optional = false;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "personal" => location = IncludeLocation::Personal,
                        "global" => location = IncludeLocation::Global,
                        "once" => once = true,
                        "optional" => optional = true,
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let name = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::Include {
                    name,
                    location,
                    once,
                    optional,
                }))
            }
            "snooze" => {
                self.need(line, CAPA_SNOOZE, "vnd.cyrus.snooze");
                let mut mailbox = None;
                let mut add_flags = Vec::new();
                let mut remove_flags = Vec::new();
                let mut weekdays = Vec::new();
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "mailbox" => mailbox = Some(self.string()?),
                        "addflags" => {
                            self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                            add_flags = self.string_list()?;
                        }
                        "removeflags" => {
                            self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                            remove_flags = self.string_list()?;
                        }
                        "weekdays" => weekdays = self.string_list()?,
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let times = self.string_list()?;
                self.semicolon()?;
                Ok(Some(Command::Snooze {
                    mailbox,
                    add_flags,
                    remove_flags,
                    weekdays,
                    times,
                }))
            }
            "addheader" => {
                self.need(line, CAPA_EDITHEADER, "editheader");
                let mut last = false;
                if let Some(Token::Tag(tag)) = self.peek() {
                    if tag == "last" {
                        last = true;
                        self.pos += 1;
                    }
                }
                let name = self.string()?;
                let value = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::AddHeader { name, value, last }))
            }
            "deleteheader" => {
                self.need(line, CAPA_EDITHEADER, "editheader");
                let mut index = None;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "index" => index = Some(self.number()? as u32),
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                let name = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::DeleteHeader { name, index }))
            }
            "log" => {
                self.need(line, CAPA_LOG, "vnd.cyrus.log");
                let message = self.string()?;
                self.semicolon()?;
                Ok(Some(Command::Log { message }))
            }
            _ => {
                self.error(line, format!("Unknown command {word}"));
                Err(())
            }
        }
    }

    /// Consumes one shared match/comparator tag into `spec`; returns
    /// false for tags the caller must handle itself.
    fn match_tag(&mut self, line: u32, tag: &str, spec: &mut MatchSpec) -> Parsed<bool> {
        match tag {
            "is" => spec.match_type = MatchType::Is,
            "contains" => spec.match_type = MatchType::Contains,
            "matches" => spec.match_type = MatchType::Matches,
            "value" | "count" => {
                self.need(line, CAPA_RELATIONAL, "relational");
                let relation = self.string()?;
                let Some(relation) = Relation::parse(&relation) else {
                    self.error(line, format!("invalid relation {relation}"));
                    return Err(());
                };
                spec.match_type = if tag == "value" {
                    MatchType::Value(relation)
                } else {
                    MatchType::Count(relation)
                };
            }
            "comparator" => {
                let name = self.string()?;
                spec.comparator = match name.as_str() {
                    "i;ascii-casemap" => Comparator::AsciiCasemap,
                    "i;octet" => Comparator::Octet,
                    _ => {
                        self.error(line, format!("unknown comparator {name}"));
                        return Err(());
                    }
                };
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn test(&mut self) -> Parsed<Test> {
        let line = self.line();
        let word = match self.bump() {
            Some(Token::Identifier(word)) => word.to_ascii_lowercase(),
            _ => {
                self.error(line, "expected test");
                return Err(());
            }
        };

        match word.as_str() {
            "true" => Ok(Test::True),
            "false" => Ok(Test::False),
            "not" => Ok(Test::Not(Box::new(self.test()?))),
            "allof" | "anyof" => {
                let tests = self.test_list()?;
                Ok(if word == "allof" {
                    Test::AllOf(tests)
                } else {
                    Test::AnyOf(tests)
                })
            }
            "address" | "envelope" => {
                if word == "envelope" {
                    self.need(line, CAPA_ENVELOPE, "envelope");
                }
                let mut part = AddressPart::All;
                let mut spec = MatchSpec::default();
                let mut is_list = false;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "all" => part = AddressPart::All,
                        "localpart" => part = AddressPart::Localpart,
                        "domain" => part = AddressPart::Domain,
                        "list" => {
                            self.need(line, CAPA_EXTLISTS, "extlists");
                            is_list = true;
                        }
                        other => {
                            if !self.match_tag(line, other, &mut spec)? {
                                self.error(line, format!("unexpected tag :{other}"));
                                return Err(());
                            }
                        }
                    }
                }
                let headers = self.string_list()?;
                let keys = if is_list {
                    let lists = self.string_list()?;
                    for list in &lists {
                        if !(self.valid_list)(list) {
                            self.error(line, format!("invalid external list {list}"));
                        }
                    }
                    lists
                } else {
                    self.string_list()?
                };
                Ok(if word == "address" {
                    Test::Address {
                        part,
                        spec,
                        is_list,
                        headers,
                        keys,
                    }
                } else {
                    Test::Envelope {
                        part,
                        spec,
                        is_list,
                        fields: headers,
                        keys,
                    }
                })
            }
            "header" => {
                let spec = self.match_spec(line)?;
                let headers = self.string_list()?;
                let keys = self.string_list()?;
                Ok(Test::Header {
                    spec,
                    headers,
                    keys,
                })
            }
            "exists" => Ok(Test::Exists {
                headers: self.string_list()?,
            }),
            "size" => {
                let over = match self.bump() {
                    Some(Token::Tag(tag)) if tag == "over" => true,
                    Some(Token::Tag(tag)) if tag == "under" => false,
                    _ => {
                        self.error(line, "expected :over or :under");
                        return Err(());
                    }
                };
                Ok(Test::Size {
                    over,
                    limit: self.number()?,
                })
            }
            "hasflag" => {
                self.need(line, CAPA_IMAP4FLAGS, "imap4flags");
                let spec = self.match_spec(line)?;
                Ok(Test::HasFlag {
                    spec,
                    flags: self.string_list()?,
                })
            }
            "string" => {
                self.need(line, CAPA_VARIABLES, "variables");
                let spec = self.match_spec(line)?;
                let source = self.string_list()?;
                let keys = self.string_list()?;
                Ok(Test::StringTest { spec, source, keys })
            }
            "environment" => {
                self.need(line, CAPA_ENVIRONMENT, "environment");
                let spec = self.match_spec(line)?;
                let name = self.string()?;
                let keys = self.string_list()?;
                Ok(Test::Environment { spec, name, keys })
            }
            "mailboxexists" => {
                self.need(line, CAPA_MAILBOX, "mailbox");
                Ok(Test::MailboxExists {
                    names: self.string_list()?,
                })
            }
            "mailboxidexists" => {
                self.need(line, CAPA_MAILBOXID, "mailboxid");
                Ok(Test::MailboxIdExists {
                    ids: self.string_list()?,
                })
            }
            "specialuseexists" => {
                self.need(line, CAPA_SPECIAL_USE, "special-use");
                let first = self.string_list()?;
                if matches!(self.peek(), Some(Token::Text(_) | Token::LeftBracket)) {
                    let flags = self.string_list()?;
                    let mut first = first;
                    if first.len() != 1 {
                        self.error(line, "expected a single mailbox name");
                        return Err(());
                    }
                    Ok(Test::SpecialUseExists {
                        mailbox: first.pop(),
                        flags,
                    })
                } else {
                    Ok(Test::SpecialUseExists {
                        mailbox: None,
                        flags: first,
                    })
                }
            }
            "metadata" => {
                self.need(line, CAPA_MBOXMETADATA, "mboxmetadata");
                let spec = self.match_spec(line)?;
                let mailbox = self.string()?;
                let annotation = self.string()?;
                let keys = self.string_list()?;
                Ok(Test::Metadata {
                    spec,
                    mailbox,
                    annotation,
                    keys,
                })
            }
            "duplicate" => {
                self.need(line, CAPA_DUPLICATE, "duplicate");
                let mut id = None;
                let mut header = None;
                let mut seconds = None;
                let mut last = false;
                while let Some(Token::Tag(tag)) = self.peek() {
                    let tag = tag.clone();
                    self.pos += 1;
                    match tag.as_str() {
                        "header" => header = Some(self.string()?),
                        "uniqueid" => id = Some(self.string()?),
                        "seconds" => seconds = Some(self.number()?),
                        "days" => seconds = Some(self.number()?.saturating_mul(86400)),
                        "last" => last = true,
                        _ => {
                            self.error(line, format!("unexpected tag :{tag}"));
                            return Err(());
                        }
                    }
                }
                if id.is_some() && header.is_some() {
                    self.error(line, ":header and :uniqueid are exclusive");
                }
                Ok(Test::Duplicate {
                    id,
                    header,
                    seconds,
                    last,
                })
            }
            "validextlist" => {
                self.need(line, CAPA_EXTLISTS, "extlists");
                Ok(Test::ValidExtList {
                    lists: self.string_list()?,
                })
            }
            "jmapquery" => {
                self.need(line, CAPA_JMAPQUERY, "vnd.cyrus.jmapquery");
                Ok(Test::JmapQuery {
                    query: self.string()?,
                })
            }
            _ => {
                self.error(line, format!("Unknown test {word}"));
                Err(())
            }
        }
    }

    /// Tag loop for tests that only take match/comparator tags.
    fn match_spec(&mut self, line: u32) -> Parsed<MatchSpec> {
        let mut spec = MatchSpec::default();
        while let Some(Token::Tag(tag)) = self.peek() {
            let tag = tag.clone();
            self.pos += 1;
            if !self.match_tag(line, &tag, &mut spec)? {
                self.error(line, format!("unexpected tag :{tag}"));
                return Err(());
            }
        }
        Ok(spec)
    }

    fn test_list(&mut self) -> Parsed<Vec<Test>> {
        let line = self.line();
        match self.bump() {
            Some(Token::LeftParen) => {}
            _ => {
                self.error(line, "expected (");
                return Err(());
            }
        }
        let mut tests = vec![self.test()?];
        loop {
            let line = self.line();
            match self.bump() {
                Some(Token::Comma) => tests.push(self.test()?),
                Some(Token::RightParen) => return Ok(tests),
                _ => {
                    self.error(line, "expected , or ) in test list");
                    return Err(());
                }
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(name: &str) -> u64 {
        // Mirrors a fully-registered interpreter.
        crate::Interpreter::nonexec().extension_isactive(name)
    }

    fn parse_ok(src: &str) -> ParseOutput {
        parse(src, active, |_| true).expect("script must parse")
    }

    fn parse_err(src: &str) -> Vec<(u32, String)> {
        parse(src, active, |_| true).expect_err("script must not parse")
    }

    #[test]
    fn keep_only() {
        let output = parse_ok("keep;");
        assert_eq!(output.commands, vec![Command::Keep { flags: None }]);
        assert_eq!(output.support, CAPA_BASE);
    }

    #[test]
    fn require_merges_support_bits() {
        let output = parse_ok("require [\"fileinto\", \"imap4flags\"];\nfileinto \"a\";");
        assert_ne!(output.support & CAPA_FILEINTO, 0);
        assert_ne!(output.support & CAPA_IMAP4FLAGS, 0);
    }

    #[test]
    fn unsupported_require_is_reported_with_line() {
        let errors = parse_err("require \"nosuchthing\";\nkeep;");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 1);
        assert_eq!(errors[0].1, "Unsupported feature nosuchthing");
    }

    #[test]
    fn command_without_require_is_rejected() {
        let errors = parse_err("fileinto \"a\";");
        assert_eq!(errors[0].1, "Missing require for fileinto");
    }

    #[test]
    fn if_elsif_else_chain() {
        let output = parse_ok(
            "if header :contains \"subject\" \"a\" { keep; }\n\
             elsif size :over 100K { discard; }\n\
             else { stop; }",
        );
        match &output.commands[0] {
            Command::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert!(otherwise.is_some());
                assert!(matches!(branches[1].0, Test::Size { over: true, .. }));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let errors = parse_err("bogus one;\nkeep extra;\ndiscard;");
        assert!(errors.len() >= 2, "{errors:?}");
        assert_eq!(errors[0].0, 1);
        assert_eq!(errors[1].0, 2);
    }

    #[test]
    fn relational_and_comparator_tags() {
        let output = parse_ok(
            "require \"relational\";\n\
             if header :value \"ge\" :comparator \"i;octet\" \"x-score\" \"5\" { discard; }",
        );
        match &output.commands[0] {
            Command::If { branches, .. } => match &branches[0].0 {
                Test::Header { spec, .. } => {
                    assert_eq!(spec.match_type, MatchType::Value(Relation::Ge));
                    assert_eq!(spec.comparator, Comparator::Octet);
                }
                other => panic!("unexpected test {other:?}"),
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn vacation_days_become_seconds() {
        let output = parse_ok("require \"vacation\";\nvacation :days 3 \"away\";");
        assert_eq!(
            output.commands[0],
            Command::Vacation {
                seconds: Some(3 * 86400),
                subject: None,
                from: None,
                addresses: Vec::new(),
                mime: false,
                handle: None,
                reason: "away".into(),
            }
        );
    }

    #[test]
    fn require_after_command_is_an_error() {
        let errors = parse_err("keep;\nrequire \"fileinto\";");
        assert_eq!(errors[0].1, "require must come before other commands");
    }

    #[test]
    fn invalid_external_list_fails_at_parse_time() {
        let errors = parse(
            "require \"extlists\";\nif address :list \"to\" \"badlist\" { keep; }",
            active,
            |list| list.starts_with("urn:"),
        )
        .expect_err("list must be rejected");
        assert_eq!(errors[0].1, "invalid external list badlist");
    }
}
