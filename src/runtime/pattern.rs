/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Match-type evaluation: `:is`, `:contains`, `:matches` (glob with
//! capture groups) and relational `:value`, under the i;ascii-casemap or
//! i;octet comparators.

use crate::script::ast::{Comparator, MatchSpec, MatchType};

/// Matches one value against one key. `Some(captures)` on success, where
/// captures are `${0}` (the whole value) followed by one entry per
/// wildcard for `:matches`, and empty otherwise. `:count` never matches
/// here; the caller aggregates it over the value list.
pub(crate) fn match_value(spec: &MatchSpec, value: &str, key: &str) -> Option<Vec<String>> {
    let ci = spec.comparator == Comparator::AsciiCasemap;
    match spec.match_type {
        MatchType::Is => {
            let hit = if ci {
                value.eq_ignore_ascii_case(key)
            } else {
                value == key
            };
            hit.then(Vec::new)
        }
        MatchType::Contains => {
            let hit = if ci {
                value
                    .to_ascii_lowercase()
                    .contains(&key.to_ascii_lowercase())
            } else {
                value.contains(key)
            };
            hit.then(Vec::new)
        }
        MatchType::Matches => glob_match(key, value, ci).map(|wildcards| {
            let mut captures = Vec::with_capacity(wildcards.len() + 1);
            captures.push(value.to_string());
            captures.extend(wildcards);
            captures
        }),
        MatchType::Value(relation) => {
            let ord = if ci {
                value.to_ascii_lowercase().cmp(&key.to_ascii_lowercase())
            } else {
                value.cmp(key)
            };
            relation.holds(ord).then(Vec::new)
        }
        MatchType::Count(_) => None,
    }
}

/// Glob match of `pattern` against `value`. Returns one captured string
/// per wildcard (`*` greedy, `?` single character) on success. `\`
/// escapes the next pattern character.
pub(crate) fn glob_match(pattern: &str, value: &str, ci: bool) -> Option<Vec<String>> {
    let pattern: Vec<char> = pattern.chars().collect();
    let value: Vec<char> = value.chars().collect();
    let mut captures = Vec::new();
    step(&pattern, &value, ci, &mut captures).then_some(captures)
}

fn step(pattern: &[char], value: &[char], ci: bool, captures: &mut Vec<String>) -> bool {
    match pattern.split_first() {
        None => value.is_empty(),
        Some(('*', rest)) => {
            // Greedy: each wildcard captures as much as the remainder of
            // the pattern allows.
            for split in (0..=value.len()).rev() {
                let mut tail = Vec::new();
                if step(rest, &value[split..], ci, &mut tail) {
                    captures.push(value[..split].iter().collect());
                    captures.append(&mut tail);
                    return true;
                }
            }
            false
        }
        Some(('?', rest)) => match value.split_first() {
            Some((c, remaining)) => {
                let mut tail = Vec::new();
                if step(rest, remaining, ci, &mut tail) {
                    captures.push(c.to_string());
                    captures.append(&mut tail);
                    true
                } else {
                    false
                }
            }
            None => false,
        },
        Some(('\\', rest)) => match (rest.split_first(), value.split_first()) {
            (Some((pc, pr)), Some((vc, vr))) if chars_eq(*pc, *vc, ci) => {
                step(pr, vr, ci, captures)
            }
            _ => false,
        },
        Some((pc, rest)) => match value.split_first() {
            Some((vc, remaining)) if chars_eq(*pc, *vc, ci) => {
                step(rest, remaining, ci, captures)
            }
            _ => false,
        },
    }
}

fn chars_eq(a: char, b: char, ci: bool) -> bool {
    if ci {
        a.eq_ignore_ascii_case(&b)
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ast::Relation;

    fn spec(match_type: MatchType, comparator: Comparator) -> MatchSpec {
        MatchSpec {
            match_type,
            comparator,
        }
    }

    #[test]
    fn is_and_contains_respect_the_comparator() {
        let casemap = spec(MatchType::Is, Comparator::AsciiCasemap);
        assert!(match_value(&casemap, "INBOX", "inbox").is_some());
        let octet = spec(MatchType::Is, Comparator::Octet);
        assert!(match_value(&octet, "INBOX", "inbox").is_none());

        let contains = spec(MatchType::Contains, Comparator::AsciiCasemap);
        assert!(match_value(&contains, "Big Sale Today", "SALE").is_some());
        assert!(match_value(&contains, "Big Sale Today", "refund").is_none());
    }

    #[test]
    fn matches_captures_wildcards_in_order() {
        let matches = spec(MatchType::Matches, Comparator::AsciiCasemap);
        let captures = match_value(&matches, "coyote@desert.example.org", "*@*.example.org")
            .expect("pattern must match");
        assert_eq!(
            captures,
            vec![
                "coyote@desert.example.org".to_string(),
                "coyote".to_string(),
                "desert".to_string(),
            ]
        );

        let captures =
            match_value(&matches, "frobnicate", "?rob*").expect("pattern must match");
        assert_eq!(captures[1], "f");
        assert_eq!(captures[2], "nicate");
    }

    #[test]
    fn matches_wildcards_are_greedy() {
        let captures = glob_match("*x*", "axbxc", true).expect("pattern must match");
        assert_eq!(captures, vec!["axb".to_string(), "c".to_string()]);
    }

    #[test]
    fn escaped_wildcards_are_literal() {
        assert!(glob_match("a\\*b", "a*b", false).is_some());
        assert!(glob_match("a\\*b", "axb", false).is_none());
    }

    #[test]
    fn relational_value() {
        let ge = spec(MatchType::Value(Relation::Ge), Comparator::Octet);
        assert!(match_value(&ge, "b", "a").is_some());
        assert!(match_value(&ge, "a", "a").is_some());
        assert!(match_value(&ge, "a", "b").is_none());
    }
}
