/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Notification message builder: expands `$from$`, `$env-from$`,
//! `$subject$` and `$text$` placeholders against the message accessors.
//! Every token accepts an octet limit (`$subject[5]$`); a `$` that does
//! not open a known token is copied verbatim and scanning resumes right
//! after it, which makes expansion idempotent on literal text.

use mail_parser::MessageParser;

use crate::interp::Interpreter;

#[derive(Clone, Copy)]
enum Token {
    From,
    EnvFrom,
    Subject,
    Text,
}

const TOKENS: [(&str, Token); 4] = [
    ("env-from", Token::EnvFrom),
    ("from", Token::From),
    ("subject", Token::Subject),
    ("text", Token::Text),
];

pub(crate) fn build_message<SC, MC>(
    interp: &Interpreter<SC, MC>,
    mc: &MC,
    template: &str,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        match parse_token(after) {
            Some((token, limit, consumed)) => {
                let expansion = expand(interp, mc, token);
                out.push_str(truncate(&expansion, limit));
                rest = &after[consumed..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes RFC 2047 encoded words in a raw header value. Routed through
/// the Subject parser, which performs full encoded-word decoding on an
/// arbitrary unstructured value.
pub(crate) fn decode_header(raw: &str) -> String {
    let source = format!("Subject: {raw}\r\n\r\n");
    MessageParser::new()
        .parse(source.as_bytes())
        .and_then(|message| message.subject().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

/// Parses a token name (plus optional `[limit]`) directly after a `$`.
/// Returns the token, the octet limit and the consumed length including
/// the closing `$`.
fn parse_token(rest: &str) -> Option<(Token, Option<usize>, usize)> {
    for (name, token) in TOKENS {
        if rest.len() > name.len() && rest[..name.len()].eq_ignore_ascii_case(name) {
            let after = &rest[name.len()..];
            if after.starts_with('$') {
                return Some((token, None, name.len() + 1));
            }
            if let Some(after) = after.strip_prefix('[') {
                let digits = after.bytes().take_while(u8::is_ascii_digit).count();
                if digits > 0 && after[digits..].starts_with("]$") {
                    let limit = after[..digits].parse().ok()?;
                    return Some((token, Some(limit), name.len() + digits + 3));
                }
            }
        }
    }
    None
}

fn expand<SC, MC>(interp: &Interpreter<SC, MC>, mc: &MC, token: Token) -> String {
    match token {
        Token::From => header_value(interp, mc, false, "From"),
        Token::EnvFrom => header_value(interp, mc, true, "From"),
        Token::Subject => header_value(interp, mc, false, "Subject"),
        Token::Text => interp
            .get_body
            .as_ref()
            .and_then(|get_body| {
                // Only the first text part is used.
                get_body(mc, &["text"]).into_iter().next()
            })
            .map(|part| part.decoded)
            .unwrap_or_default(),
    }
}

fn header_value<SC, MC>(
    interp: &Interpreter<SC, MC>,
    mc: &MC,
    envelope: bool,
    name: &str,
) -> String {
    let accessor = if envelope {
        &interp.get_envelope
    } else {
        &interp.get_header
    };
    accessor
        .as_ref()
        .and_then(|get| get(mc, name).into_iter().next())
        .map(|raw| decode_header(&raw))
        .unwrap_or_default()
}

fn truncate(value: &str, limit: Option<usize>) -> &str {
    match limit {
        Some(mut limit) if limit < value.len() => {
            while !value.is_char_boundary(limit) {
                limit -= 1;
            }
            &value[..limit]
        }
        _ => value,
    }
}
