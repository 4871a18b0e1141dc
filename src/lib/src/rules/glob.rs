//! Shell-style path patterns.
//!
//! Syntax:
//!
//! ```text
//! '*'          any sequence of characters except '/'
//! '?'          any single character except '/'
//! '[' ... ']'  a character class; '^' right after '[' negates it,
//!              'lo-hi' is an inclusive range, '\' escapes the next character
//! '\' c        the literal character c
//! c            the literal character c
//! ```
//!
//! Patterns are compiled once, so a malformed pattern is always an error
//! instead of only being detected when matching reaches the bad part.

use crate::error::InTotoError;
use std::fmt;

const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnySequence,
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => c != SEPARATOR,
            Token::AnySequence => false,
            Token::Class { negated, ranges } => {
                let in_class = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                in_class != *negated
            }
        }
    }
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Glob {
    pattern: String,
    tokens: Vec<Token>,
}

impl Glob {
    pub fn new(pattern: &str) -> Result<Self, InTotoError> {
        let tokens = compile(pattern)?;
        Ok(Glob {
            pattern: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Returns true if the whole of `name` matches the pattern.
    pub fn is_match(&self, name: &str) -> bool {
        let name: Vec<char> = name.chars().collect();
        let (nt, nn) = (self.tokens.len(), name.len());

        // reachable[t][n]: tokens[t..] match name[n..]
        let mut reachable = vec![vec![false; nn + 1]; nt + 1];
        reachable[nt][nn] = true;
        for t in (0..nt).rev() {
            for n in (0..=nn).rev() {
                reachable[t][n] = match &self.tokens[t] {
                    Token::AnySequence => {
                        reachable[t + 1][n] || (n < nn && name[n] != SEPARATOR && reachable[t][n + 1])
                    }
                    token => n < nn && token.matches(name[n]) && reachable[t + 1][n + 1],
                };
            }
        }
        reachable[0][0]
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn bad_pattern(pattern: &str, reason: &str) -> InTotoError {
    InTotoError::PatternError(format!("'{}': {}", pattern, reason))
}

fn compile(pattern: &str) -> Result<Vec<Token>, InTotoError> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // Consecutive stars are equivalent to one.
                if tokens.last() != Some(&Token::AnySequence) {
                    tokens.push(Token::AnySequence);
                }
            }
            '?' => tokens.push(Token::AnyChar),
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(Token::Literal(escaped)),
                None => return Err(bad_pattern(pattern, "trailing escape character")),
            },
            '[' => {
                let negated = chars.peek() == Some(&'^');
                if negated {
                    chars.next();
                }
                let mut ranges = Vec::new();
                loop {
                    match chars.peek() {
                        None => return Err(bad_pattern(pattern, "unterminated character class")),
                        Some(']') if !ranges.is_empty() => {
                            chars.next();
                            break;
                        }
                        _ => {}
                    }
                    let lo = class_char(&mut chars, pattern)?;
                    let hi = if chars.peek() == Some(&'-') {
                        chars.next();
                        class_char(&mut chars, pattern)?
                    } else {
                        lo
                    };
                    ranges.push((lo, hi));
                }
                tokens.push(Token::Class { negated, ranges });
            }
            c => tokens.push(Token::Literal(c)),
        }
    }
    Ok(tokens)
}

fn class_char(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, pattern: &str) -> Result<char, InTotoError> {
    match chars.next() {
        None => Err(bad_pattern(pattern, "unterminated character class")),
        Some('-') | Some(']') => Err(bad_pattern(pattern, "empty range in character class")),
        Some('\\') => chars
            .next()
            .ok_or_else(|| bad_pattern(pattern, "trailing escape character")),
        Some(c) => Ok(c),
    }
}
