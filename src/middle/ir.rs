//! Stack-machine IR definitions
//!
//! Structured, target-neutral instructions for an operand-stack virtual
//! machine with numbered local slots. Backends render a [`Module`] into
//! their own assembly syntax.

use std::fmt;

use crate::types::type_system::resolve_deep;
use crate::types::{PrimitiveType, Type, TypeEnvironment};
use crate::utils::{Error, Result};

/// Runtime representation of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Bool,
    Real,
    Str,
    Array(Box<ValueKind>),
    Record(String),
    Void,
}

impl ValueKind {
    /// Kind of a (possibly named) language type
    pub fn of(ty: &Type, env: &dyn TypeEnvironment) -> Result<Self> {
        let resolved =
            resolve_deep(ty, env).map_err(|_| Error::UnresolvedType(ty.to_string()))?;
        Self::of_resolved(&resolved)
    }

    fn of_resolved(ty: &Type) -> Result<Self> {
        match ty {
            Type::Primitive(p) => Ok(match p {
                PrimitiveType::Integer => Self::Int,
                PrimitiveType::Real => Self::Real,
                PrimitiveType::Boolean => Self::Bool,
                PrimitiveType::String => Self::Str,
                PrimitiveType::Void => Self::Void,
            }),
            Type::Array { element, .. } => Ok(Self::Array(Box::new(Self::of_resolved(element)?))),
            Type::Record { name, .. } => Ok(Self::Record(name.clone())),
            Type::Named(name) => Err(Error::UnresolvedType(name.clone())),
        }
    }

    /// Number of stack/local slots a value occupies
    pub fn width(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Real => 2,
            _ => 1,
        }
    }

    pub fn is_wide(&self) -> bool {
        self.width() == 2
    }

    /// Whether values of this kind are heap references
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Str | Self::Array(_) | Self::Record(_))
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Bool => write!(f, "bool"),
            Self::Real => write!(f, "real"),
            Self::Str => write!(f, "str"),
            Self::Array(element) => write!(f, "{}[]", element),
            Self::Record(name) => write!(f, "{}", name),
            Self::Void => write!(f, "void"),
        }
    }
}

/// Constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Real(f64),
    Bool(bool),
    Str(String),
}

impl Constant {
    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Real(_) => ValueKind::Real,
            Constant::Bool(_) => ValueKind::Bool,
            Constant::Str(_) => ValueKind::Str,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Real(n) => write!(f, "{:?}", n),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Jump target, unique within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub usize);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Arithmetic operation on the two topmost values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Xor,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Xor => "xor",
        };
        write!(f, "{}", s)
    }
}

/// Operation on the topmost value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

/// Numeric conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    IntToReal,
    RealToInt,
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conversion::IntToReal => write!(f, "int->real"),
            Conversion::RealToInt => write!(f, "real->int"),
        }
    }
}

/// Branch condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Condition::Eq => "eq",
            Condition::Ne => "ne",
            Condition::Lt => "lt",
            Condition::Le => "le",
            Condition::Gt => "gt",
            Condition::Ge => "ge",
        };
        write!(f, "{}", s)
    }
}

/// IR Instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// push constant
    Push(Constant),
    /// push local slot
    Load { slot: usize, kind: ValueKind },
    /// pop into local slot
    Store { slot: usize, kind: ValueKind },
    /// push module global
    GetGlobal { name: String, kind: ValueKind },
    /// pop into module global
    PutGlobal { name: String, kind: ValueKind },
    /// pop two operands, push result
    Binary { op: BinaryOp, kind: ValueKind },
    /// pop one operand, push result
    Unary { op: UnaryOp, kind: ValueKind },
    Convert(Conversion),
    /// pop two operands of `kind`, jump if `left cond right`
    CompareBranch { cond: Condition, kind: ValueKind, target: Label },
    /// pop an integer, jump if `value cond 0`
    BranchZero { cond: Condition, target: Label },
    Jump(Label),
    Label(Label),
    /// pop arguments, push result unless `ret` is void
    Call { name: String, params: Vec<ValueKind>, ret: ValueKind },
    /// return the top value (nothing for void)
    Return(ValueKind),
    /// push a fresh record
    NewRecord(String),
    /// pop record, push field
    GetField { record: String, field: String, kind: ValueKind },
    /// pop value and record, store field
    PutField { record: String, field: String, kind: ValueKind },
    /// pop size, push a fresh array of `element`
    NewArray(ValueKind),
    /// pop index and array, push element
    ArrayLoad(ValueKind),
    /// pop value, index and array, store element
    ArrayStore(ValueKind),
    /// pop and print a value
    Print(ValueKind),
    /// duplicate a single-width top value
    Dup,
    /// discard the top value
    Pop(ValueKind),
}

impl Instruction {
    /// Stack slots consumed and produced
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Instruction::Push(c) => (0, c.kind().width()),
            Instruction::Load { kind, .. } | Instruction::GetGlobal { kind, .. } => (0, kind.width()),
            Instruction::Store { kind, .. } | Instruction::PutGlobal { kind, .. } => (kind.width(), 0),
            Instruction::Binary { kind, .. } => (2 * kind.width(), kind.width()),
            Instruction::Unary { kind, .. } => (kind.width(), kind.width()),
            Instruction::Convert(Conversion::IntToReal) => (1, 2),
            Instruction::Convert(Conversion::RealToInt) => (2, 1),
            Instruction::CompareBranch { kind, .. } => (2 * kind.width(), 0),
            Instruction::BranchZero { .. } => (1, 0),
            Instruction::Jump(_) | Instruction::Label(_) => (0, 0),
            Instruction::Call { params, ret, .. } => {
                (params.iter().map(ValueKind::width).sum(), ret.width())
            }
            Instruction::Return(kind) => (kind.width(), 0),
            Instruction::NewRecord(_) => (0, 1),
            Instruction::GetField { kind, .. } => (1, kind.width()),
            Instruction::PutField { kind, .. } => (1 + kind.width(), 0),
            Instruction::NewArray(_) => (1, 1),
            Instruction::ArrayLoad(kind) => (2, kind.width()),
            Instruction::ArrayStore(kind) => (2 + kind.width(), 0),
            Instruction::Print(kind) | Instruction::Pop(kind) => (kind.width(), 0),
            Instruction::Dup => (1, 2),
        }
    }
}

/// Upper bound on operand stack depth for a linear instruction list.
/// Labels are not merged, so paths that meet at a label may overcount.
pub fn max_stack_depth(instructions: &[Instruction]) -> usize {
    let mut depth: usize = 0;
    let mut max = 0;
    for inst in instructions {
        let (pops, pushes) = inst.stack_effect();
        depth = depth.saturating_sub(pops) + pushes;
        max = max.max(depth);
    }
    max
}

/// A lowered routine
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineCode {
    pub name: String,
    pub params: Vec<ValueKind>,
    pub ret: ValueKind,
    pub instructions: Vec<Instruction>,
    /// Local slots used, parameters included
    pub max_locals: usize,
    pub max_stack: usize,
}

/// Module-level variable
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDef {
    pub name: String,
    pub kind: ValueKind,
}

/// User record type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub fields: Vec<(String, ValueKind)>,
}

/// IR Module - the whole lowered program
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub globals: Vec<GlobalDef>,
    pub types: Vec<TypeDefinition>,
    pub routines: Vec<RoutineCode>,
    /// Global initialization and top-level statements, run once before anything else
    pub initializer: Option<RoutineCode>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            globals: Vec::new(),
            types: Vec::new(),
            routines: Vec::new(),
            initializer: None,
        }
    }

    pub fn routine(&self, name: &str) -> Option<&RoutineCode> {
        self.routines.iter().find(|r| r.name == name)
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|t| t.name == name)
    }
}
