//! Type system shared by the analyzer and the code generator

pub mod type_system;

pub use type_system::{Coercion, PrimitiveType, Type, TypeEnvironment};
