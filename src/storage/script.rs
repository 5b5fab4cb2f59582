//! SQL script splitting.
//!
//! Turns the byte stream of a `.sql` asset into the ordered list of
//! statements that get executed one by one:
//! - `;` ends a statement
//! - quoted literals and identifiers (`'..'`, `".."`, `` `..` ``, `[..]`) never split
//! - `--` and `/* */` comments are stripped
//! - `CREATE TRIGGER .. BEGIN .. END` bodies stay in one statement
//! - blank statements are dropped

use std::io::{self, Read};
use thiserror::Error;

/// Statement delimiter.
pub const DELIMITER: char = ';';

/// Error type for script parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unterminated {quote} literal starting on line {line}")]
    UnterminatedLiteral { quote: char, line: usize },

    #[error("failed to read script: {0}")]
    Io(#[from] io::Error),
}

/// Read a whole script from `reader` and split it into statements.
///
/// # Errors
///
/// Fails on invalid UTF-8, read errors, or an unterminated quoted literal.
pub fn parse_script<R: Read>(mut reader: R) -> Result<Vec<String>, ParseError> {
    let mut script = String::new();
    reader.read_to_string(&mut script)?;
    split_statements(&script)
}

/// Split script text into trimmed, non-empty statements.
pub fn split_statements(script: &str) -> Result<Vec<String>, ParseError> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut word = String::new();
    let mut state = StatementState::default();
    let mut line = 1;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            current.push(c);
            continue;
        }
        state.finish_word(&mut word);

        match c {
            '\'' | '"' | '`' | '[' => {
                let start_line = line;
                let close = if c == '[' { ']' } else { c };
                current.push(c);
                loop {
                    match chars.next() {
                        Some(q) if q == close => {
                            current.push(q);
                            // A doubled quote is an escaped quote, not the end.
                            if close == c && chars.peek() == Some(&c) {
                                chars.next();
                                current.push(c);
                            } else {
                                break;
                            }
                        }
                        Some(other) => {
                            if other == '\n' {
                                line += 1;
                            }
                            current.push(other);
                        }
                        None => {
                            return Err(ParseError::UnterminatedLiteral {
                                quote: c,
                                line: start_line,
                            })
                        }
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                    }
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                current.push(' ');
            }
            DELIMITER if state.inside_trigger_body() => current.push(c),
            DELIMITER => {
                push_statement(&mut statements, &mut current);
                state = StatementState::default();
            }
            '\n' => {
                line += 1;
                current.push(c);
            }
            _ => current.push(c),
        }
    }

    push_statement(&mut statements, &mut current);
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

/// Keyword tracking for the statement being accumulated.
///
/// Only needed to keep trigger bodies, whose inner statements also end
/// with `;`, in one piece.
#[derive(Debug, Default)]
struct StatementState {
    words: usize,
    create: bool,
    trigger: bool,
    begin: bool,
    case_depth: usize,
    closed: bool,
}

impl StatementState {
    fn finish_word(&mut self, word: &mut String) {
        if word.is_empty() {
            return;
        }
        let upper = word.to_ascii_uppercase();
        word.clear();

        if self.words == 0 {
            self.create = upper == "CREATE";
        } else if self.create && self.words <= 2 && upper == "TRIGGER" {
            self.trigger = true;
        }
        self.words += 1;

        if !self.trigger {
            return;
        }
        self.closed = false;
        match upper.as_str() {
            "BEGIN" => self.begin = true,
            "CASE" => self.case_depth += 1,
            "END" if self.case_depth > 0 => self.case_depth -= 1,
            "END" => self.closed = true,
            _ => {}
        }
    }

    fn inside_trigger_body(&self) -> bool {
        self.trigger && self.begin && !self.closed
    }
}
