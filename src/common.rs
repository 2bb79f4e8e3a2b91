//! Common definitions shared across the front-end, middle tier, and back-end.

// Use sorted maps for deterministic iteration (function-table dumps, etc.)
pub use std::collections::BTreeMap as Map;

/// Identifiers — interned so that symbol-table and function-table lookups
/// are cheap pointer compares rather than string compares.
pub type Id = internment::Intern<String>;

/// Error kinds, matching the taxonomy a diagnostic-quality interpreter
/// needs: lexical/syntax/semantic failures from compilation, and the
/// distinct runtime failure modes the VM can hit.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lexical error at line {line}: {message}")]
    Lexical { line: u32, message: String },

    #[error("syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },

    #[error("semantic error at line {line}: {message}")]
    SemanticsOther { line: u32, message: String },

    #[error("semantic error at line {line}: undefined variable '{name}'")]
    SemanticsUndefinedVariable { line: u32, name: String },

    #[error("semantic error at line {line}: undefined function '{name}'")]
    SemanticsUndefinedFunction { line: u32, name: String },

    #[error("memory allocation failed")]
    Memory,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("instruction has wrong operands: {0}")]
    InstructionWrongOperands(String),

    #[error("runtime error: incompatible types for {op}")]
    RuntimeIncompatibleTypes { op: String },

    #[error("runtime error: division by zero")]
    RuntimeZeroDivision,

    #[error("runtime error: cannot convert value to a number")]
    RuntimeNumericConversion,

    #[error("runtime error: {0}")]
    RuntimeOther(String),

    #[error("runtime error: stack underflow")]
    StackUnderflow,

    #[error("runtime error: stack overflow")]
    StackOverflow,
}

impl Error {
    /// Maps an error kind to the process exit code the CLI surfaces.
    /// 0 is reserved for success and is never returned here.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Lexical { .. } => 1,
            Error::Syntax { .. } => 2,
            Error::SemanticsOther { .. } => 3,
            Error::SemanticsUndefinedVariable { .. } => 4,
            Error::SemanticsUndefinedFunction { .. } => 5,
            Error::Memory => 6,
            Error::Internal(_) => 7,
            Error::InstructionWrongOperands(_) => 8,
            Error::RuntimeIncompatibleTypes { .. } => 9,
            Error::RuntimeZeroDivision => 10,
            Error::RuntimeNumericConversion => 11,
            Error::RuntimeOther(_) => 12,
            Error::StackUnderflow => 13,
            Error::StackOverflow => 14,
        }
    }
}

pub type TacResult<T> = Result<T, Error>;
