//! Positioned semantic diagnostics.
//!
//! The analyser collects these instead of aborting; the driver renders the
//! whole batch, pointing at the offending source line with a caret.

use snafu::Snafu;

use crate::ast::{Pos, Type};

#[derive(Debug, Clone, Snafu)]
pub enum SemanticError {
    #[snafu(display("function '{name}' is defined more than once"))]
    RedefinedFunction { name: String, pos: Pos },

    #[snafu(display("variable '{name}' is already declared in this scope"))]
    RedefinedVariable { name: String, pos: Pos },

    #[snafu(display("variable '{name}' is not in scope"))]
    UndefinedVariable { name: String, pos: Pos },

    #[snafu(display("function '{name}' is not defined"))]
    UndefinedFunction { name: String, pos: Pos },

    #[snafu(display(
        "type mismatch in {context}: expected {}, got {got}",
        describe_expected(expected)
    ))]
    TypeMismatch {
        context: String,
        expected: Vec<Type>,
        got: Type,
        pos: Pos,
    },

    #[snafu(display(
        "call to '{name}' passes {got} argument(s) but '{name}' takes {expected}"
    ))]
    IncorrectNumberOfArgs {
        name: String,
        expected: usize,
        got: usize,
        pos: Pos,
    },

    #[snafu(display(
        "'{name}' is indexed with {used} subscript(s) but has only {declared} dimension(s)"
    ))]
    ArrayDimensionMismatch {
        name: String,
        declared: usize,
        used: usize,
        pos: Pos,
    },

    #[snafu(display("'return' is only allowed inside a function body"))]
    UnexpectedReturn { pos: Pos },
}

fn describe_expected(expected: &[Type]) -> String {
    match expected {
        [] => "nothing".to_string(),
        [one] => one.to_string(),
        many => {
            let names: Vec<String> = many.iter().map(Type::to_string).collect();
            format!("one of {{{}}}", names.join(", "))
        }
    }
}

impl SemanticError {
    pub fn pos(&self) -> Pos {
        match self {
            SemanticError::RedefinedFunction { pos, .. }
            | SemanticError::RedefinedVariable { pos, .. }
            | SemanticError::UndefinedVariable { pos, .. }
            | SemanticError::UndefinedFunction { pos, .. }
            | SemanticError::TypeMismatch { pos, .. }
            | SemanticError::IncorrectNumberOfArgs { pos, .. }
            | SemanticError::ArrayDimensionMismatch { pos, .. }
            | SemanticError::UnexpectedReturn { pos } => *pos,
        }
    }

    /// Render the diagnostic with the offending source line and a caret.
    pub fn render(&self, src: &str) -> String {
        let (line, col) = self.pos();
        let mut out = format!("semantic error at line {line}, column {col}: {self}");
        if line >= 1 {
            if let Some(text) = src.lines().nth(line as usize - 1) {
                out.push('\n');
                out.push_str(text);
                if col >= 1 {
                    out.push('\n');
                    out.push_str(&" ".repeat(col as usize - 1));
                    out.push('^');
                }
            }
        }
        out
    }
}
