//! Command vocabulary of the scripting language.
//!
//! The grammar is a closed set: every command the engine understands is a
//! variant of [`Command`], and its argument signature lives in a process-wide
//! read-only table. Both the validator and the execution layer consult the
//! same table, so a command can never be accepted by one and rejected by the
//! other.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::Serialize;

/// Every command understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Origin,
    Field,
    Var,
    Open,
    Close,
    Select,
    SelectAll,
    SelectFrom,
    SelectAllFrom,
    SaveSelection,
}

/// Primitive kind of a script argument.
///
/// `Any` is only valid as a declared parameter kind; coerced tokens always
/// report one of the three concrete kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    #[serde(rename = "string")]
    Str,
    Number,
    #[serde(rename = "boolean")]
    Bool,
    Any,
}

impl ArgKind {
    /// Whether a token of kind `actual` satisfies this declared kind.
    pub fn accepts(self, actual: ArgKind) -> bool {
        self == ArgKind::Any || self == actual
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArgKind::Str => "string",
            ArgKind::Number => "number",
            ArgKind::Bool => "boolean",
            ArgKind::Any => "any",
        };
        f.write_str(label)
    }
}

/// Argument signature of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSignature {
    pub min_args: usize,
    pub max_args: usize,
    pub params: &'static [ArgKind],
}

impl CommandSignature {
    const fn exact(params: &'static [ArgKind]) -> Self {
        Self {
            min_args: params.len(),
            max_args: params.len(),
            params,
        }
    }

    /// Whether `found` arguments satisfy the signature's count bounds.
    pub fn accepts_count(&self, found: usize) -> bool {
        found >= self.min_args && found <= self.max_args
    }

    /// Human-readable count expectation, e.g. "exactly 2" or "1 to 3".
    pub fn expectation(&self) -> String {
        if self.min_args == self.max_args {
            format!("exactly {}", self.min_args)
        } else {
            format!("{} to {}", self.min_args, self.max_args)
        }
    }
}

const URL_ONLY: CommandSignature = CommandSignature::exact(&[ArgKind::Str]);
const NAME_VALUE: CommandSignature = CommandSignature::exact(&[ArgKind::Str, ArgKind::Str]);
const NAME_ANY: CommandSignature = CommandSignature::exact(&[ArgKind::Str, ArgKind::Any]);
const NO_ARGS: CommandSignature = CommandSignature::exact(&[]);
const SELECTOR_ONLY: CommandSignature = CommandSignature::exact(&[ArgKind::Str]);
const NAME_SELECTOR: CommandSignature = CommandSignature::exact(&[ArgKind::Str, ArgKind::Str]);
const NAME_ONLY: CommandSignature = CommandSignature::exact(&[ArgKind::Str]);

/// Name lookup table, built once from [`Command::ALL`].
static COMMANDS_BY_NAME: Lazy<HashMap<&'static str, Command>> = Lazy::new(|| {
    Command::ALL
        .iter()
        .map(|command| (command.name(), *command))
        .collect()
});

impl Command {
    /// Every command, in documentation order.
    pub const ALL: [Command; 10] = [
        Command::Origin,
        Command::Field,
        Command::Var,
        Command::Open,
        Command::Close,
        Command::Select,
        Command::SelectAll,
        Command::SelectFrom,
        Command::SelectAllFrom,
        Command::SaveSelection,
    ];

    /// The name a script uses to invoke this command.
    pub fn name(self) -> &'static str {
        match self {
            Command::Origin => "origin",
            Command::Field => "field",
            Command::Var => "var",
            Command::Open => "open",
            Command::Close => "close",
            Command::Select => "select",
            Command::SelectAll => "select_all",
            Command::SelectFrom => "select_from",
            Command::SelectAllFrom => "select_all_from",
            Command::SaveSelection => "save_selection",
        }
    }

    /// Resolve a raw command name. Names are case-sensitive.
    pub fn from_name(name: &str) -> Option<Command> {
        COMMANDS_BY_NAME.get(name).copied()
    }

    /// The command's argument signature.
    pub fn signature(self) -> &'static CommandSignature {
        match self {
            Command::Origin => &URL_ONLY,
            Command::Field => &NAME_VALUE,
            Command::Var => &NAME_ANY,
            Command::Open | Command::Close => &NO_ARGS,
            Command::Select | Command::SelectAll => &SELECTOR_ONLY,
            Command::SelectFrom | Command::SelectAllFrom => &NAME_SELECTOR,
            Command::SaveSelection => &NAME_ONLY,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
