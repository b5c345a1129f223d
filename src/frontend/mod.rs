//! Frontend module - AST, Symbol Table, Semantic Analysis

pub mod ast;
pub mod optimize;
pub mod semantic;
pub mod symbol_table;
