/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Sieve tokenizer. Comments are consumed here; every surviving token
//! carries the line it started on for error reporting.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Unquoted identifier (`if`, `header`, `fileinto`, ...).
    Identifier(String),
    /// `:tag`, stored without the colon, lowercased.
    Tag(String),
    /// Quoted or `text:` multiline string, unescaped.
    Text(String),
    /// Number with the K/M/G multiplier applied.
    Number(u64),
    Comma,
    Semicolon,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, LexError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut line: u32 = 1;
    let mut i = 0;

    while i < bytes.len() {
        let ch = bytes[i];
        if ch == b'\n' {
            line += 1;
            i += 1;
            continue;
        }
        if ch.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let start_line = line;
        let simple = match ch {
            b',' => Some(Token::Comma),
            b';' => Some(Token::Semicolon),
            b'(' => Some(Token::LeftParen),
            b')' => Some(Token::RightParen),
            b'[' => Some(Token::LeftBracket),
            b']' => Some(Token::RightBracket),
            b'{' => Some(Token::LeftBrace),
            b'}' => Some(Token::RightBrace),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Spanned {
                token,
                line: start_line,
            });
            i += 1;
            continue;
        }

        match ch {
            // Hash comment runs to end of line.
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                loop {
                    match bytes.get(i) {
                        Some(b'*') if bytes.get(i + 1) == Some(&b'/') => {
                            i += 2;
                            break;
                        }
                        Some(b'\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                        None => {
                            return Err(LexError {
                                line: start_line,
                                message: "unterminated comment".into(),
                            });
                        }
                    }
                }
            }
            b'"' => {
                i += 1;
                let mut text = String::new();
                loop {
                    match bytes.get(i) {
                        Some(b'\\') => {
                            if let Some(&escaped) = bytes.get(i + 1) {
                                text.push(escaped as char);
                                i += 2;
                            } else {
                                return Err(LexError {
                                    line: start_line,
                                    message: "unterminated string".into(),
                                });
                            }
                        }
                        Some(b'"') => {
                            i += 1;
                            break;
                        }
                        Some(b'\n') => {
                            line += 1;
                            text.push('\n');
                            i += 1;
                        }
                        Some(&byte) => {
                            // Copy multi-byte sequences untouched.
                            let char_len = utf8_len(byte);
                            text.push_str(&input[i..(i + char_len).min(bytes.len())]);
                            i += char_len;
                        }
                        None => {
                            return Err(LexError {
                                line: start_line,
                                message: "unterminated string".into(),
                            });
                        }
                    }
                }
                tokens.push(Spanned {
                    token: Token::Text(text),
                    line: start_line,
                });
            }
            b'0'..=b'9' => {
                let mut value: u64 = 0;
                while let Some(&digit) = bytes.get(i).filter(|b| b.is_ascii_digit()) {
                    value = value
                        .saturating_mul(10)
                        .saturating_add(u64::from(digit - b'0'));
                    i += 1;
                }
                if let Some(&suffix) = bytes.get(i) {
                    let multiplier = match suffix {
                        b'K' | b'k' => Some(1u64 << 10),
                        b'M' | b'm' => Some(1 << 20),
                        b'G' | b'g' => Some(1 << 30),
                        _ => None,
                    };
                    if let Some(multiplier) = multiplier {
                        value = value.saturating_mul(multiplier);
                        i += 1;
                    }
                }
                tokens.push(Spanned {
                    token: Token::Number(value),
                    line: start_line,
                });
            }
            b':' => {
                i += 1;
                let word_start = i;
                while bytes
                    .get(i)
                    .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
                {
                    i += 1;
                }
                if i == word_start {
                    return Err(LexError {
                        line: start_line,
                        message: "empty tag".into(),
                    });
                }
                tokens.push(Spanned {
                    token: Token::Tag(input[word_start..i].to_ascii_lowercase()),
                    line: start_line,
                });
            }
            _ if ch.is_ascii_alphabetic() || ch == b'_' => {
                let word_start = i;
                while bytes
                    .get(i)
                    .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'.')
                {
                    i += 1;
                }
                let word = &input[word_start..i];
                if word.eq_ignore_ascii_case("text") && bytes.get(i) == Some(&b':') {
                    i += 1;
                    let (text, consumed, lines) =
                        multiline(input, i).ok_or_else(|| LexError {
                            line: start_line,
                            message: "unterminated multiline string".into(),
                        })?;
                    i = consumed;
                    line += lines;
                    tokens.push(Spanned {
                        token: Token::Text(text),
                        line: start_line,
                    });
                } else {
                    tokens.push(Spanned {
                        token: Token::Identifier(word.to_string()),
                        line: start_line,
                    });
                }
            }
            _ => {
                return Err(LexError {
                    line: start_line,
                    message: format!("unexpected character {:?}", ch as char),
                });
            }
        }
    }

    Ok(tokens)
}

fn utf8_len(byte: u8) -> usize {
    match byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

/// Reads a `text:` literal starting right after the colon. Returns the
/// body with dot-stuffing undone, the index past the terminating dot
/// line, and the number of newlines consumed.
fn multiline(input: &str, mut i: usize) -> Option<(String, usize, u32)> {
    let bytes = input.as_bytes();
    let mut lines = 0u32;

    // Rest of the `text:` line is ignored (whitespace or a comment).
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    i += 1;
    lines += 1;

    let mut body = String::new();
    loop {
        if i >= bytes.len() {
            return None;
        }
        let line_start = i;
        while i < bytes.len() && bytes[i] != b'\n' {
            i += 1;
        }
        let mut text_line = &input[line_start..i];
        if i < bytes.len() {
            i += 1;
            lines += 1;
        }
        let trimmed = text_line.trim_end_matches('\r');
        if trimmed == "." {
            return Some((body, i, lines));
        }
        // Undo dot-stuffing.
        if trimmed.starts_with("..") {
            text_line = &text_line[1..];
        }
        body.push_str(text_line.trim_end_matches('\r'));
        body.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn basic_command() {
        assert_eq!(
            kinds("require \"fileinto\";"),
            vec![
                Token::Identifier("require".into()),
                Token::Text("fileinto".into()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn tags_numbers_lists() {
        assert_eq!(
            kinds("size :over 100K"),
            vec![
                Token::Identifier("size".into()),
                Token::Tag("over".into()),
                Token::Number(100 * 1024),
            ]
        );
        assert_eq!(
            kinds("[\"a\", \"b\"]"),
            vec![
                Token::LeftBracket,
                Token::Text("a".into()),
                Token::Comma,
                Token::Text("b".into()),
                Token::RightBracket,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_lines_counted() {
        let tokens = tokenize("# comment\n/* block\nspanning */ keep;").unwrap();
        assert_eq!(tokens[0].token, Token::Identifier("keep".into()));
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\\c""#),
            vec![Token::Text("a\"b\\c".into())]
        );
    }

    #[test]
    fn multiline_literal() {
        let tokens = tokenize("text:\nline one\n..dot\n.\nkeep;").unwrap();
        assert_eq!(tokens[0].token, Token::Text("line one\n.dot\n".into()));
        assert_eq!(tokens[1].token, Token::Identifier("keep".into()));
        assert_eq!(tokens[1].line, 5);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("\"abc").is_err());
        assert!(tokenize("/* never closed").is_err());
    }
}
