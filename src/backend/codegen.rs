//! Code Generation trait - Backend abstraction
//!
//! A backend renders a lowered [`Module`] into one or more text artifacts
//! for an external assembler.

use crate::middle::ir::Module;
use crate::utils::Result;

/// One output file produced by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub contents: String,
}

/// Code generation backend trait
pub trait CodeGen {
    /// Render every artifact for a module
    fn generate(&mut self, module: &Module) -> Result<Vec<Artifact>>;

    /// Get the backend name
    fn name(&self) -> &str;
}
