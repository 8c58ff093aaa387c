//! Source text to executable assembly.
//!
//! Assembly is deliberately decoupled from validation: every non-blank line
//! becomes an instruction, valid or not, so a caller can show diagnostics
//! while still previewing or partially executing the script.

use serde::Serialize;

use crate::script::lexer::{self, Literal};

/// One assembled line.
///
/// `command` keeps the raw name from the source so unknown commands survive
/// assembly; resolution against the grammar happens at execution time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instruction {
    pub command: String,
    pub arguments: Vec<Literal>,
}

/// An ordered instruction list. The index of an instruction is its address.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Assembly {
    instructions: Vec<Instruction>,
}

impl Assembly {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, address: usize) -> Option<&Instruction> {
        self.instructions.get(address)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

/// Assemble a script. Never fails; blank lines are skipped, everything else
/// becomes an instruction in source order.
pub fn parse_script(source: &str) -> Assembly {
    let instructions = lexer::lines(source)
        .iter()
        .map(|line| {
            let (command, args) = lexer::split_command(&line.text);
            Instruction {
                command: command.to_string(),
                arguments: lexer::tokenize(args.unwrap_or("")),
            }
        })
        .collect();
    Assembly { instructions }
}
