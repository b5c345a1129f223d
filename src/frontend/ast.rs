//! Abstract Syntax Tree definitions for the imperative language
//!
//! The tree is produced by an external front end. It derives serde so the
//! driver can read it from JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Type;

/// A complete program (compilation unit)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// Variable declaration (`var name: ty is init`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: String,
    /// `None` means the type is inferred from the initializer
    pub ty: Option<Type>,
    pub initializer: Option<Expr>,
}

/// Routine parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// Routine declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// `None` for routines without a return type
    pub return_type: Option<Type>,
    pub body: Vec<Stmt>,
}

impl RoutineDecl {
    /// Declared return type, `void` when absent
    pub fn return_type(&self) -> Type {
        self.return_type.clone().unwrap_or(Type::VOID)
    }
}

/// Routine call, used both as a statement and as an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineCall {
    pub name: String,
    pub args: Vec<Expr>,
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssignTarget {
    /// `name := value`
    Variable(String),
    /// `array[index] := value`
    Element { array: String, index: Expr },
    /// `record.field := value`
    Field { record: String, field: String },
}

impl AssignTarget {
    /// The variable the assignment writes through
    pub fn root(&self) -> &str {
        match self {
            Self::Variable(name) => name,
            Self::Element { array, .. } => array,
            Self::Field { record, .. } => record,
        }
    }
}

/// Statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    VarDecl(VarDecl),
    /// `var name: array[size] element`
    ArrayDecl {
        name: String,
        element: Type,
        size: i64,
    },
    Assignment {
        target: AssignTarget,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    /// `for var in start..end [reverse] loop body end`
    For {
        var: String,
        start: Expr,
        end: Expr,
        reverse: bool,
        body: Vec<Stmt>,
    },
    RoutineDecl(RoutineDecl),
    Call(RoutineCall),
    Return(Option<Expr>),
    Print(Expr),
    /// `type name is record ... end`
    RecordTypeDecl {
        name: String,
        fields: Vec<(String, Type)>,
    },
    /// `type name is ty`
    TypeDecl {
        name: String,
        ty: Type,
    },
}

impl Stmt {
    pub fn var(name: &str, ty: Type, initializer: Option<Expr>) -> Self {
        Self::VarDecl(VarDecl {
            name: name.to_string(),
            ty: Some(ty),
            initializer,
        })
    }

    pub fn array(name: &str, element: Type, size: i64) -> Self {
        Self::ArrayDecl {
            name: name.to_string(),
            element,
            size,
        }
    }

    pub fn assign(name: &str, value: Expr) -> Self {
        Self::Assignment {
            target: AssignTarget::Variable(name.to_string()),
            value,
        }
    }

    pub fn assign_element(array: &str, index: Expr, value: Expr) -> Self {
        Self::Assignment {
            target: AssignTarget::Element {
                array: array.to_string(),
                index,
            },
            value,
        }
    }

    pub fn assign_field(record: &str, field: &str, value: Expr) -> Self {
        Self::Assignment {
            target: AssignTarget::Field {
                record: record.to_string(),
                field: field.to_string(),
            },
            value,
        }
    }

    pub fn print(expr: Expr) -> Self {
        Self::Print(expr)
    }

    pub fn ret(expr: Expr) -> Self {
        Self::Return(Some(expr))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::Call(RoutineCall {
            name: name.to_string(),
            args,
        })
    }

    pub fn routine(name: &str, params: Vec<(&str, Type)>, return_type: Option<Type>, body: Vec<Stmt>) -> Self {
        Self::RoutineDecl(RoutineDecl {
            name: name.to_string(),
            params: params
                .into_iter()
                .map(|(name, ty)| Param { name: name.to_string(), ty })
                .collect(),
            return_type,
            body,
        })
    }

    pub fn record(name: &str, fields: Vec<(&str, Type)>) -> Self {
        Self::RecordTypeDecl {
            name: name.to_string(),
            fields: fields.into_iter().map(|(f, ty)| (f.to_string(), ty)).collect(),
        }
    }

    pub fn for_loop(var: &str, start: Expr, end: Expr, reverse: bool, body: Vec<Stmt>) -> Self {
        Self::For {
            var: var.to_string(),
            start,
            end,
            reverse,
            body,
        }
    }
}

/// Whether control cannot fall off the end of `stmts`: the last statement
/// is a `return`, or an `if` whose both branches end that way.
pub fn ends_with_return(stmts: &[Stmt]) -> bool {
    match stmts.last() {
        Some(Stmt::Return(_)) => true,
        Some(Stmt::If { then_branch, else_branch, .. }) => {
            ends_with_return(then_branch) && ends_with_return(else_branch)
        }
        _ => false,
    }
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    IntLit(i64),
    RealLit(f64),
    BoolLit(bool),
    StringLit(String),
    VarRef(String),
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    ArrayAccess {
        array: String,
        index: Box<Expr>,
    },
    FieldAccess {
        record: String,
        field: String,
    },
    RoutineCall(RoutineCall),
    TypeCast {
        expr: Box<Expr>,
        target: Type,
    },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Self::IntLit(value)
    }

    pub fn real(value: f64) -> Self {
        Self::RealLit(value)
    }

    pub fn boolean(value: bool) -> Self {
        Self::BoolLit(value)
    }

    pub fn string(value: &str) -> Self {
        Self::StringLit(value.to_string())
    }

    pub fn var(name: &str) -> Self {
        Self::VarRef(name.to_string())
    }

    pub fn binary(left: Expr, op: BinOp, right: Expr) -> Self {
        Self::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnOp, operand: Expr) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn index(array: &str, index: Expr) -> Self {
        Self::ArrayAccess {
            array: array.to_string(),
            index: Box::new(index),
        }
    }

    pub fn field(record: &str, field: &str) -> Self {
        Self::FieldAccess {
            record: record.to_string(),
            field: field.to_string(),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Self::RoutineCall(RoutineCall {
            name: name.to_string(),
            args,
        })
    }

    pub fn cast(expr: Expr, target: Type) -> Self {
        Self::TypeCast {
            expr: Box::new(expr),
            target,
        }
    }

    /// Check if this is a literal value
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Self::IntLit(_) | Self::RealLit(_) | Self::BoolLit(_) | Self::StringLit(_)
        )
    }

    /// Check if evaluating this expression may call a routine
    pub fn contains_call(&self) -> bool {
        match self {
            Self::RoutineCall(_) => true,
            Self::Binary { left, right, .. } => left.contains_call() || right.contains_call(),
            Self::Unary { operand, .. } => operand.contains_call(),
            Self::ArrayAccess { index, .. } => index.contains_call(),
            Self::TypeCast { expr, .. } => expr.contains_call(),
            Self::IntLit(_)
            | Self::RealLit(_)
            | Self::BoolLit(_)
            | Self::StringLit(_)
            | Self::VarRef(_)
            | Self::FieldAccess { .. } => false,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Comparison
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    // Logical
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "not"),
        }
    }
}
