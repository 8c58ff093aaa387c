//! The scripting language: grammar, lexer, validator, and assembler.
//!
//! Everything in this module is pure. Parsing a script produces data
//! (an [`Assembly`] plus diagnostics) and touches neither the browser nor
//! any instance state.

pub mod assembler;
pub mod grammar;
pub mod lexer;
pub mod validator;

pub use assembler::{Assembly, Instruction, parse_script};
pub use grammar::{ArgKind, Command, CommandSignature};
pub use lexer::{Literal, ScriptLine, SpannedToken};
pub use validator::{IssueKind, IssueSeverity, ParserIssue, validate_script};

/// A parsed script: the best-effort assembly with every diagnostic found.
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub assembly: Assembly,
    pub diagnostics: Vec<ParserIssue>,
}

impl ParsedScript {
    /// Whether any diagnostic is an error. Warnings alone do not count.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|issue| issue.severity == IssueSeverity::Error)
    }
}

/// Validate and assemble in one pass. The assembly is always produced.
pub fn parse(source: &str) -> ParsedScript {
    ParsedScript {
        assembly: parse_script(source),
        diagnostics: validate_script(source),
    }
}
