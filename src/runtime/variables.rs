/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Variable frames for one evaluation. Three well-known frames always
//! exist: the unnamed frame backing the IMAP flag list, `match-vars`
//! holding the captures of the last successful `:matches`, and
//! `parsed-strings` caching parsed address results. Script variables
//! (`set`) live in their own named frame.

use ahash::AHashMap;

use crate::script::ast::Modifier;

#[derive(Debug, Default)]
pub(crate) struct Variables {
    /// The unnamed frame: IMAP flags mutated by setflag/addflag/...
    pub flags: Vec<String>,
    /// `${0}`..`${n}` from the last successful `:matches`.
    match_vars: Vec<String>,
    /// Parsed header/address cache, keyed by the raw header value.
    parsed: AHashMap<String, Vec<String>>,
    named: AHashMap<String, String>,
}

impl Variables {
    pub fn new() -> Self {
        Variables::default()
    }

    pub fn set(&mut self, name: &str, value: String) {
        self.named.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> &str {
        self.named
            .get(&name.to_ascii_lowercase())
            .map_or("", String::as_str)
    }

    pub fn set_match_vars(&mut self, captures: Vec<String>) {
        self.match_vars = captures;
    }

    pub fn cached_addresses(&self, raw: &str) -> Option<&Vec<String>> {
        self.parsed.get(raw)
    }

    pub fn cache_addresses(&mut self, raw: String, addresses: Vec<String>) {
        self.parsed.insert(raw, addresses);
    }

    /// Expands `${name}` and `${digits}` references. Anything that is
    /// not a well-formed reference to a known namespace is copied
    /// verbatim; undefined variables expand to the empty string.
    pub fn expand(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            match tail.find('}') {
                Some(end) if is_variable_ref(&tail[..end]) => {
                    let name = &tail[..end];
                    if name.chars().all(|c| c.is_ascii_digit()) {
                        if let Ok(index) = name.parse::<usize>() {
                            if let Some(capture) = self.match_vars.get(index) {
                                out.push_str(capture);
                            }
                        }
                    } else {
                        out.push_str(self.get(name));
                    }
                    rest = &tail[end + 1..];
                }
                _ => {
                    out.push_str("${");
                    rest = tail;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn is_variable_ref(name: &str) -> bool {
    !name.is_empty()
        && (name.chars().all(|c| c.is_ascii_digit())
            || (name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')))
}

/// Applies `set` modifiers in RFC 5229 precedence order: whole-string
/// case first, then first-character case, then wildcard quoting, with
/// `:length` always last.
pub(crate) fn apply_modifiers(value: &str, modifiers: &[Modifier]) -> String {
    let mut value = value.to_string();

    if modifiers.contains(&Modifier::Lower) {
        value = value.to_ascii_lowercase();
    } else if modifiers.contains(&Modifier::Upper) {
        value = value.to_ascii_uppercase();
    }

    if modifiers.contains(&Modifier::LowerFirst) {
        if let Some(first) = value.get(..1) {
            value = first.to_ascii_lowercase() + &value[1..];
        }
    } else if modifiers.contains(&Modifier::UpperFirst) {
        if let Some(first) = value.get(..1) {
            value = first.to_ascii_uppercase() + &value[1..];
        }
    }

    if modifiers.contains(&Modifier::QuoteWildcard) {
        let mut quoted = String::with_capacity(value.len());
        for c in value.chars() {
            if matches!(c, '*' | '?' | '\\') {
                quoted.push('\\');
            }
            quoted.push(c);
        }
        value = quoted;
    }

    if modifiers.contains(&Modifier::Length) {
        value = value.chars().count().to_string();
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_basics() {
        let mut vars = Variables::new();
        vars.set("company", "ACME".into());
        assert_eq!(vars.expand("from ${company}!"), "from ACME!");
        assert_eq!(vars.expand("${undefined} tail"), " tail");
        assert_eq!(vars.expand("a ${ b } c"), "a ${ b } c");
        assert_eq!(vars.expand("dangling ${open"), "dangling ${open");
        assert_eq!(vars.expand("plain"), "plain");
    }

    #[test]
    fn match_vars_are_numeric_references() {
        let mut vars = Variables::new();
        vars.set_match_vars(vec!["whole".into(), "first".into()]);
        assert_eq!(vars.expand("${0}/${1}/${2}"), "whole/first/");
    }

    #[test]
    fn variable_names_are_case_insensitive() {
        let mut vars = Variables::new();
        vars.set("Name", "x".into());
        assert_eq!(vars.get("name"), "x");
        assert_eq!(vars.expand("${NAME}"), "x");
    }

    #[test]
    fn modifier_precedence() {
        // RFC 5229: `set :upperfirst :lower "b" "vAlUe"` yields "Value".
        assert_eq!(
            apply_modifiers("vAlUe", &[Modifier::UpperFirst, Modifier::Lower]),
            "Value"
        );
        assert_eq!(
            apply_modifiers("a*b?c", &[Modifier::QuoteWildcard]),
            "a\\*b\\?c"
        );
        assert_eq!(
            apply_modifiers("a*b", &[Modifier::QuoteWildcard, Modifier::Length]),
            "4"
        );
    }
}
