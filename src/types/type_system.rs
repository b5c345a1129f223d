//! Type System for the imperative language
//!
//! Validity, resolution, compatibility and coercion rules. The analyzer and
//! the code generator both consult this module, so a cast the analyzer
//! accepts is always one the generator knows how to lower.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frontend::ast::{BinOp, UnOp};
use crate::utils::{Error, Result};

/// Alias chains longer than this are treated as cyclic.
const MAX_ALIAS_DEPTH: usize = 64;

/// Primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Integer,
    Real,
    Boolean,
    String,
    Void,
}

impl PrimitiveType {
    /// Built-in type names, as written in source programs
    pub const NAMES: [&'static str; 5] = ["integer", "real", "boolean", "string", "void"];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(Self::Integer),
            "real" => Some(Self::Real),
            "boolean" => Some(Self::Boolean),
            "string" => Some(Self::String),
            "void" => Some(Self::Void),
            _ => None,
        }
    }

    /// Check if this is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Real)
    }
}

/// A type as written in the program or produced by analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Primitive(PrimitiveType),
    Array { element: Box<Type>, size: i64 },
    Record { name: String, fields: Vec<(String, Type)> },
    /// Reference to a user type, resolved through the type environment
    Named(String),
}

impl Type {
    pub const INTEGER: Self = Self::Primitive(PrimitiveType::Integer);
    pub const REAL: Self = Self::Primitive(PrimitiveType::Real);
    pub const BOOLEAN: Self = Self::Primitive(PrimitiveType::Boolean);
    pub const STRING: Self = Self::Primitive(PrimitiveType::String);
    pub const VOID: Self = Self::Primitive(PrimitiveType::Void);

    /// Create an array type
    pub fn array(element: Type, size: i64) -> Self {
        Self::Array { element: Box::new(element), size }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn record(name: impl Into<String>, fields: Vec<(String, Type)>) -> Self {
        Self::Record { name: name.into(), fields }
    }

    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Void))
    }

    pub fn is_numeric(&self) -> bool {
        self.as_primitive().map_or(false, |p| p.is_numeric())
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Boolean))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Integer))
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Self::Primitive(PrimitiveType::Real))
    }

    /// Look up a field type on a record type
    pub fn field(&self, field: &str) -> Option<&Type> {
        match self {
            Self::Record { fields, .. } => {
                fields.iter().find(|(name, _)| name == field).map(|(_, ty)| ty)
            }
            _ => None,
        }
    }

    /// Nominal name of a record type, whether resolved or not
    pub fn record_name(&self) -> Option<&str> {
        match self {
            Self::Record { name, .. } | Self::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{}", p.name()),
            Self::Array { element, size } => write!(f, "array[{}] {}", size, element),
            Self::Record { name, .. } => write!(f, "{}", name),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Display helper for an optional (possibly failed) type
pub fn describe(ty: Option<&Type>) -> String {
    ty.map_or_else(|| "<unknown>".to_string(), |t| t.to_string())
}

// ==================== Type Environment ====================

/// Where named types are looked up. Implemented by the symbol table.
pub trait TypeEnvironment {
    /// Definition of a user-declared type
    fn lookup_type(&self, name: &str) -> Option<&Type>;

    /// Whether `name` is one of the built-in primitive names
    fn is_builtin_type(&self, name: &str) -> bool {
        PrimitiveType::from_name(name).is_some()
    }
}

/// Check whether a type is well-formed in `env`
pub fn is_valid(ty: &Type, env: &dyn TypeEnvironment) -> bool {
    match ty {
        Type::Primitive(_) => true,
        Type::Array { element, size } => *size > 0 && is_valid(element, env),
        Type::Record { fields, .. } => fields.iter().all(|(_, f)| is_valid(f, env)),
        Type::Named(name) => env.is_builtin_type(name) || env.lookup_type(name).is_some(),
    }
}

/// Resolve a `Named` type to its definition, following alias chains.
/// Non-named types are returned unchanged.
pub fn resolve(ty: &Type, env: &dyn TypeEnvironment) -> Result<Type> {
    let mut current = ty.clone();
    for _ in 0..MAX_ALIAS_DEPTH {
        let name = match &current {
            Type::Named(name) => name.clone(),
            _ => return Ok(current),
        };
        if let Some(p) = PrimitiveType::from_name(&name) {
            return Ok(Type::Primitive(p));
        }
        current = env
            .lookup_type(&name)
            .cloned()
            .ok_or(Error::UndefinedType { name })?;
    }
    Err(Error::UndefinedType { name: ty.to_string() })
}

/// Like [`resolve`], but also resolves array element types. Record fields
/// stay as written since records compare by name.
pub fn resolve_deep(ty: &Type, env: &dyn TypeEnvironment) -> Result<Type> {
    match resolve(ty, env)? {
        Type::Array { element, size } => Ok(Type::array(resolve_deep(&element, env)?, size)),
        resolved => Ok(resolved),
    }
}

/// Check if a value of type `actual` may be stored where `expected` is required
pub fn is_compatible(expected: &Type, actual: &Type) -> bool {
    match (expected, actual) {
        (Type::Primitive(e), Type::Primitive(a)) => {
            e == a || (*e == PrimitiveType::Real && *a == PrimitiveType::Integer)
        }
        (
            Type::Array { element: ee, size: es },
            Type::Array { element: ae, size: as_ },
        ) => es == as_ && is_compatible(ee, ae),
        // Records are nominal; a Named reference and its definition agree by name
        (Type::Record { .. } | Type::Named(_), Type::Record { .. } | Type::Named(_)) => {
            expected.record_name() == actual.record_name()
        }
        _ => false,
    }
}

// ==================== Casts and Coercions ====================

/// The conversion needed to turn a value of one type into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Same representation, nothing to emit
    Identity,
    IntToReal,
    RealToInt,
    /// Booleans are already 0/1 integers
    BoolToInt,
    /// Normalize any non-zero integer to 1
    IntToBool,
    /// Truncate to integer, then normalize
    RealToBool,
    /// Boolean 0/1 widened to real
    BoolToReal,
}

/// The coercion an explicit cast from `source` to `target` performs, if legal
pub fn coercion(source: &Type, target: &Type) -> Option<Coercion> {
    use PrimitiveType::*;

    if source == target {
        return Some(Coercion::Identity);
    }
    match (source.as_primitive()?, target.as_primitive()?) {
        (Integer, Real) => Some(Coercion::IntToReal),
        (Real, Integer) => Some(Coercion::RealToInt),
        (Boolean, Integer) => Some(Coercion::BoolToInt),
        (Integer, Boolean) => Some(Coercion::IntToBool),
        (Real, Boolean) => Some(Coercion::RealToBool),
        (Boolean, Real) => Some(Coercion::BoolToReal),
        _ => None,
    }
}

/// Check if an explicit cast is legal
pub fn is_valid_cast(source: &Type, target: &Type) -> bool {
    coercion(source, target).is_some()
}

/// The implicit coercion applied when `actual` is stored into an `expected` slot.
/// Only integer-to-real widening happens implicitly.
pub fn implicit_coercion(expected: &Type, actual: &Type) -> Coercion {
    if expected.is_real() && actual.is_integer() {
        Coercion::IntToReal
    } else {
        Coercion::Identity
    }
}

/// Whether storing `actual` where `expected` is required changes the
/// representation. Integer arrays held in real array slots need a converted
/// copy, element by element.
pub fn needs_widening(expected: &Type, actual: &Type) -> bool {
    match (expected, actual) {
        (Type::Array { element: e, .. }, Type::Array { element: a, .. }) => needs_widening(e, a),
        _ => implicit_coercion(expected, actual) != Coercion::Identity,
    }
}

// ==================== Operator Typing ====================

/// Result type of a binary operator, or `None` when the operands do not fit.
pub fn binary_result(op: BinOp, left: &Type, right: &Type) -> Option<Type> {
    if op.is_comparison() {
        return comparison_operands(left, right).map(|_| Type::BOOLEAN);
    }
    if op.is_logical() {
        return (left.is_boolean() && right.is_boolean()).then_some(Type::BOOLEAN);
    }
    match (left.as_primitive()?, right.as_primitive()?) {
        (PrimitiveType::Integer, PrimitiveType::Integer) => Some(Type::INTEGER),
        (l, r) if l.is_numeric() && r.is_numeric() => Some(Type::REAL),
        _ => None,
    }
}

/// The type both operands of a comparison are brought to before comparing:
/// `Real` when either side is real, `Integer` for two integers, `Boolean` for two booleans.
pub fn comparison_operands(left: &Type, right: &Type) -> Option<Type> {
    if left.is_numeric() && right.is_numeric() {
        if left.is_real() || right.is_real() {
            Some(Type::REAL)
        } else {
            Some(Type::INTEGER)
        }
    } else if left.is_boolean() && right.is_boolean() {
        Some(Type::BOOLEAN)
    } else {
        None
    }
}

/// Result type of a unary operator, or `None` when the operand does not fit.
pub fn unary_result(op: UnOp, operand: &Type) -> Option<Type> {
    match op {
        UnOp::Not => operand.is_boolean().then_some(Type::BOOLEAN),
        UnOp::Neg => operand.is_numeric().then(|| operand.clone()),
    }
}
