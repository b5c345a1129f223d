//! Backend module - Code generation

pub mod codegen;

// Jasmin (JVM assembly) backend
pub mod jasmin;

pub use codegen::{Artifact, CodeGen};
pub use jasmin::JasminCodeGen;
