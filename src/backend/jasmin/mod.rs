//! Jasmin Backend - Generate JVM assembly from stack-machine IR
//!
//! Emits one `.j` file for the program class and one per record type,
//! ready for the Jasmin assembler.

mod jasmin_codegen;

pub use jasmin_codegen::JasminCodeGen;
