//! Best-effort static validation
//!
//! A delimiter and string-literal balance scan that understands each
//! language's comment and quoting rules. It never executes anything.

use thiserror::Error;

use super::Language;

/// First structural problem found in a source text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("line {line}: '{open}' is never closed")]
    Unclosed { open: char, line: usize },

    #[error("line {line}: unexpected '{found}'")]
    Unexpected { found: char, line: usize },

    #[error("line {line}: expected '{expected}' but found '{found}'")]
    Mismatched {
        expected: char,
        found: char,
        line: usize,
    },

    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("line {line}: unterminated block comment")]
    UnterminatedComment { line: usize },
}

fn closing(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Check that brackets and string literals in `source` are balanced.
pub fn check_balance(source: &str, language: Language) -> Result<(), BalanceError> {
    let chars: Vec<char> = source.chars().collect();
    let js = language == Language::JavaScript;
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            '#' if !js => {
                i = skip_line(&chars, i);
                continue;
            }
            '/' if js && next == Some('/') => {
                i = skip_line(&chars, i);
                continue;
            }
            '/' if js && next == Some('*') => {
                i = skip_block_comment(&chars, i, &mut line)?;
                continue;
            }
            '\'' | '"' => {
                i = skip_string(&chars, i, &mut line, !js)?;
                continue;
            }
            '`' if js => {
                i = skip_template(&chars, i, &mut line)?;
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                None => return Err(BalanceError::Unexpected { found: c, line }),
                Some((open, _)) if closing(open) != c => {
                    return Err(BalanceError::Mismatched {
                        expected: closing(open),
                        found: c,
                        line,
                    })
                }
                Some(_) => {}
            },
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, line)) => Err(BalanceError::Unclosed { open, line }),
        None => Ok(()),
    }
}

/// Index of the newline ending the current line (or the end of input)
fn skip_line(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(chars: &[char], start: usize, line: &mut usize) -> Result<usize, BalanceError> {
    let start_line = *line;
    let mut i = start + 2;
    while i < chars.len() {
        if chars[i] == '\n' {
            *line += 1;
        } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
            return Ok(i + 2);
        }
        i += 1;
    }
    Err(BalanceError::UnterminatedComment { line: start_line })
}

fn skip_string(
    chars: &[char],
    start: usize,
    line: &mut usize,
    allow_triple: bool,
) -> Result<usize, BalanceError> {
    let quote = chars[start];
    let start_line = *line;
    let triple = allow_triple
        && chars.get(start + 1) == Some(&quote)
        && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if chars.get(i + 1) == Some(&'\n') {
                    *line += 1;
                }
                i += 2;
                continue;
            }
            '\n' if triple => *line += 1,
            '\n' => return Err(BalanceError::UnterminatedString { line: start_line }),
            c if c == quote => {
                if !triple {
                    return Ok(i + 1);
                }
                if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    return Ok(i + 3);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(BalanceError::UnterminatedString { line: start_line })
}

fn skip_template(chars: &[char], start: usize, line: &mut usize) -> Result<usize, BalanceError> {
    let start_line = *line;
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '\n' => *line += 1,
            '`' => return Ok(i + 1),
            _ => {}
        }
        i += 1;
    }
    Err(BalanceError::UnterminatedString { line: start_line })
}
