//! Error handling for implc

use serde::Serialize;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ==================== Semantic Errors ====================

    #[error("Undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("Undefined array {name}")]
    UndefinedArray { name: String },

    #[error("Undefined record variable {name}")]
    UndefinedRecord { name: String },

    #[error("Undefined routine {name}")]
    UndefinedRoutine { name: String },

    #[error("Unknown type {name}")]
    UndefinedType { name: String },

    #[error("Variable {name} is already declared in this scope")]
    DuplicateVariable { name: String },

    #[error("Parameter {name} is already declared in routine {routine}")]
    DuplicateParameter { name: String, routine: String },

    #[error("Routine {name} is already defined")]
    DuplicateRoutine { name: String },

    #[error("Type {name} is already defined")]
    DuplicateType { name: String },

    #[error("Variable {name} is not an array")]
    NotAnArray { name: String },

    #[error("Variable {name} is not a record")]
    NotARecord { name: String },

    #[error("Field {field} does not exist in record {record}")]
    UnknownField { record: String, field: String },

    #[error("Array index must be an integer, got {got}")]
    NonIntegerIndex { got: String },

    #[error("Array size must be positive, got {size} for {name}")]
    InvalidArraySize { name: String, size: i64 },

    #[error("Invalid field type {ty} in record {record}")]
    InvalidFieldType { record: String, ty: String },

    #[error("Type mismatch in {context}: expected {expected}, got {got}")]
    TypeMismatch {
        context: String,
        expected: String,
        got: String,
    },

    #[error("Invalid type cast from {from} to {to}")]
    InvalidCast { from: String, to: String },

    #[error("Wrong number of arguments in call to {name}: expected {expected}, got {got}")]
    ArgCountMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Type mismatch in argument {index} of call to {name}: expected {expected}, got {got}")]
    ArgTypeMismatch {
        name: String,
        index: usize,
        expected: String,
        got: String,
    },

    #[error("{construct} condition must be a boolean expression, got {got}")]
    NonBooleanCondition { construct: String, got: String },

    #[error("Logical operator '{op}' requires boolean operands")]
    NonBooleanOperands { op: String },

    #[error("Operator '{op}' cannot be applied to {left} and {right}")]
    InvalidOperands {
        op: String,
        left: String,
        right: String,
    },

    #[error("Operator '{op}' cannot be applied to {operand}")]
    InvalidOperand { op: String, operand: String },

    #[error("Undefined loop variable {name}")]
    UndefinedLoopVariable { name: String },

    #[error("Loop variable {name} must be an integer, got {got}")]
    NonIntegerLoopVariable { name: String, got: String },

    #[error("Routine '{name}' must return a value")]
    MissingReturn { name: String },

    #[error("Return statement not allowed outside a routine")]
    ReturnOutsideRoutine,

    #[error("Unexpected return value in routine without return type")]
    UnexpectedReturnValue,

    #[error("Missing return value for routine with return type {expected}")]
    MissingReturnValue { expected: String },

    #[error("Routine {name} does not return a value and cannot be used in an expression")]
    VoidInExpression { name: String },

    #[error("Cannot print a value of type {ty}")]
    InvalidPrint { ty: String },

    #[error("{what} {name} is only allowed at the top level")]
    NestedDeclaration { what: String, name: String },

    #[error("Variable {name} needs a type or an initializer")]
    UntypedDeclaration { name: String },

    // ==================== Code Generation Errors ====================

    #[error("Unresolved type reached code generation: {0}")]
    UnresolvedType(String),

    #[error("Unknown variable reached code generation: {0}")]
    UnknownLocal(String),

    #[error("Unknown routine reached code generation: {0}")]
    UnknownRoutine(String),

    #[error("Cannot lower {0}")]
    UnsupportedOperation(String),

    #[error("Code generation error: {0}")]
    Internal(String),

    // ==================== Pipeline ====================

    #[error("Semantic analysis failed with {} error(s)", .0.len())]
    Semantic(Vec<Diagnostic>),

    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Whether this error signals a broken contract between the analyzer
    /// and the code generator rather than a mistake in the user's program.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedType(_)
                | Self::UnknownLocal(_)
                | Self::UnknownRoutine(_)
                | Self::UnsupportedOperation(_)
                | Self::Internal(_)
        )
    }
}

/// A recoverable problem found during semantic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl From<Error> for Diagnostic {
    fn from(err: Error) -> Self {
        Self::new(err.to_string())
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SemanticError: {}", self.message)
    }
}
