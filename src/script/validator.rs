//! Structural and grammatical script checks.
//!
//! Validation is pure and total: every check runs on every line, every issue
//! is collected, and nothing here ever fails or mutates state. Callers decide
//! what to do with the result; the assembler in particular ignores it.

use serde::Serialize;

use crate::script::grammar::Command;
use crate::script::lexer::{self, ScriptLine};

/// How serious an issue is.
///
/// Warnings point at sloppy formatting the engine tolerates. Errors mark
/// lines whose instruction is unlikely to execute meaningfully; the script
/// still assembles either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// What kind of problem was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    PaddedLine,
    MissingColon,
    UnknownCommand,
    ArgumentCount,
    ArgumentType,
}

impl IssueKind {
    pub fn severity(self) -> IssueSeverity {
        match self {
            IssueKind::PaddedLine => IssueSeverity::Warning,
            IssueKind::MissingColon
            | IssueKind::UnknownCommand
            | IssueKind::ArgumentCount
            | IssueKind::ArgumentType => IssueSeverity::Error,
        }
    }
}

/// One diagnostic, positioned by 1-based line and column.
///
/// Line numbers count non-blank lines only, matching instruction addresses
/// in the assembled script (line N is instruction N-1). Columns count chars.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserIssue {
    pub severity: IssueSeverity,
    pub kind: IssueKind,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParserIssue {
    fn new(kind: IssueKind, message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            line,
            column,
        }
    }
}

/// Validate a whole script.
///
/// Blank lines are dropped before numbering, exactly as the assembler drops
/// them, so reported line numbers address assembled instructions directly.
pub fn validate_script(source: &str) -> Vec<ParserIssue> {
    lexer::lines(source)
        .iter()
        .flat_map(validate_line)
        .collect()
}

/// Validate one line. All checks run; all issues are returned.
pub fn validate_line(line: &ScriptLine) -> Vec<ParserIssue> {
    let mut issues = Vec::new();
    let text = line.text.as_str();
    let length = text.chars().count();

    if text.starts_with(' ') {
        issues.push(ParserIssue::new(
            IssueKind::PaddedLine,
            "line starts with a space",
            line.number,
            1,
        ));
    }
    if text.ends_with(' ') {
        issues.push(ParserIssue::new(
            IssueKind::PaddedLine,
            "line ends with a space",
            line.number,
            length,
        ));
    }

    // The command must read `name: arguments`, colon hard against the name.
    let first_space = text.chars().position(|c| c == ' ');
    let first_colon = text.chars().position(|c| c == ':');
    if let Some(space) = first_space
        && first_colon != space.checked_sub(1)
    {
        issues.push(ParserIssue::new(
            IssueKind::MissingColon,
            "command is not terminated by ':' before its arguments",
            line.number,
            space + 1,
        ));
    }

    let (name, args) = lexer::split_command(text);
    let Some(command) = Command::from_name(name) else {
        issues.push(ParserIssue::new(
            IssueKind::UnknownCommand,
            format!("unknown command \"{name}\""),
            line.number,
            1,
        ));
        return issues;
    };

    let signature = command.signature();
    let tokens = lexer::tokenize_spanned(args.unwrap_or(""));
    if !signature.accepts_count(tokens.len()) {
        issues.push(ParserIssue::new(
            IssueKind::ArgumentCount,
            format!(
                "wrong number of arguments for {command}: expected {}, found {}",
                signature.expectation(),
                tokens.len()
            ),
            line.number,
            1,
        ));
    }

    let args_offset = name.chars().count() + 2;
    for (index, token) in tokens.iter().enumerate() {
        let Some(expected) = signature.params.get(index) else {
            break;
        };
        let actual = token.literal.kind();
        if !expected.accepts(actual) {
            issues.push(ParserIssue::new(
                IssueKind::ArgumentType,
                format!(
                    "argument {} of {command} should be a {expected}, found a {actual}",
                    index + 1
                ),
                line.number,
                args_offset + token.start + 1,
            ));
        }
    }

    issues
}
