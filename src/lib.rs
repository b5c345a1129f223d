//! implc - semantic analyzer and stack-machine code generator
//!
//! Takes the tree of a small imperative language (typed variables, arrays,
//! records, routines, structured control flow), validates it, and lowers it
//! to structured stack-machine instructions that a backend renders as
//! JVM assembly.

pub mod backend;
pub mod frontend;
pub mod middle;
pub mod types;
pub mod utils;

use log::debug;

use frontend::ast::Program;
use frontend::semantic::{AnalyzerOptions, SemanticAnalyzer};
use middle::ir::Module;
use middle::ir_gen::{CodeGenerator, CodegenOptions};
use utils::{Error, Result};

/// Settings for a whole compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub analyzer: AnalyzerOptions,
    pub codegen: CodegenOptions,
}

/// Analyze `program` and lower it to IR.
///
/// The program is rewritten in place (inferred types, folded constants,
/// removed dead declarations). Any diagnostic aborts the compilation with
/// [`Error::Semantic`].
pub fn compile(program: &mut Program, options: &CompileOptions) -> Result<Module> {
    let mut analyzer = SemanticAnalyzer::with_options(options.analyzer);
    let diagnostics = analyzer.analyze(program);
    if !diagnostics.is_empty() {
        debug!("analysis reported {} diagnostic(s)", diagnostics.len());
        return Err(Error::Semantic(diagnostics));
    }

    let mut generator = CodeGenerator::new(analyzer.symbols(), options.codegen.clone());
    generator.generate(program)
}
