//! Line splitting and token coercion.
//!
//! Scripts are line-oriented: each non-blank line holds one command. The
//! lexer never fails; malformed lines still produce tokens, and it is the
//! validator's job to complain about them.

use std::fmt;

use serde::Serialize;

use crate::script::grammar::ArgKind;

/// One non-blank line of a script.
///
/// `number` counts only non-blank lines, starting at 1, so diagnostics stay
/// stable when authors space their scripts out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub number: usize,
    pub text: String,
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
    Bool(bool),
}

impl Literal {
    /// Coerce a raw token. `true` and `false` become booleans, anything that
    /// parses as a finite number becomes a number, everything else stays a
    /// string. Quoting does not suppress coercion; quotes only exist to carry
    /// spaces.
    pub fn coerce(raw: &str) -> Literal {
        match raw {
            "true" => return Literal::Bool(true),
            "false" => return Literal::Bool(false),
            _ => {}
        }
        if let Ok(number) = raw.parse::<f64>()
            && number.is_finite()
        {
            return Literal::Number(number);
        }
        Literal::Str(raw.to_string())
    }

    pub fn kind(&self) -> ArgKind {
        match self {
            Literal::Str(_) => ArgKind::Str,
            Literal::Number(_) => ArgKind::Number,
            Literal::Bool(_) => ArgKind::Bool,
        }
    }

    /// The value as it reads in a script, used when a command consumes an
    /// argument as text.
    pub fn as_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(text) => f.write_str(text),
            Literal::Bool(flag) => write!(f, "{flag}"),
            Literal::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 1e15 {
                    write!(f, "{}", *number as i64)
                } else {
                    write!(f, "{number}")
                }
            }
        }
    }
}

impl Serialize for Literal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Literal::Str(text) => serializer.serialize_str(text),
            Literal::Bool(flag) => serializer.serialize_bool(*flag),
            Literal::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 1e15 {
                    serializer.serialize_i64(*number as i64)
                } else {
                    serializer.serialize_f64(*number)
                }
            }
        }
    }
}

/// A token plus its position inside the argument text.
///
/// `start` is a 0-based char offset, so diagnostics can point at the token
/// even when the script mixes multi-byte characters in.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub literal: Literal,
    pub start: usize,
}

/// Split a script into its non-blank lines.
///
/// Lines are separated by `\n`; a single trailing `\r` is stripped so CRLF
/// sources behave. Blank lines are discarded before numbering.
pub fn lines(source: &str) -> Vec<ScriptLine> {
    source
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(index, line)| ScriptLine {
            number: index + 1,
            text: line.to_string(),
        })
        .collect()
}

/// Split a line into its command name and argument text.
///
/// The separator is the first `": "`. A line without one is a bare command
/// with no arguments, which is how zero-argument commands are written.
pub fn split_command(text: &str) -> (&str, Option<&str>) {
    match text.find(": ") {
        Some(at) => (&text[..at], Some(&text[at + 2..])),
        None => (text, None),
    }
}

/// Tokenize argument text into coerced literals.
pub fn tokenize(args: &str) -> Vec<Literal> {
    tokenize_spanned(args)
        .into_iter()
        .map(|token| token.literal)
        .collect()
}

/// Tokenize argument text, keeping each token's char offset.
///
/// Tokens are space-separated. A token opening with `'` or `"` runs to the
/// matching quote, carrying any spaces in between; there are no escape
/// sequences. An unterminated quote runs to the end of the line rather than
/// failing.
pub fn tokenize_spanned(args: &str) -> Vec<SpannedToken> {
    let chars: Vec<char> = args.chars().collect();
    let mut tokens = Vec::new();
    let mut at = 0;

    while at < chars.len() {
        if chars[at] == ' ' {
            at += 1;
            continue;
        }
        let start = at;
        let raw: String = if chars[at] == '"' || chars[at] == '\'' {
            let quote = chars[at];
            at += 1;
            let from = at;
            while at < chars.len() && chars[at] != quote {
                at += 1;
            }
            let inner: String = chars[from..at].iter().collect();
            if at < chars.len() {
                at += 1;
            }
            inner
        } else {
            let from = at;
            while at < chars.len() && chars[at] != ' ' {
                at += 1;
            }
            chars[from..at].iter().collect()
        };
        tokens.push(SpannedToken {
            literal: Literal::coerce(&raw),
            start,
        });
    }

    tokens
}
