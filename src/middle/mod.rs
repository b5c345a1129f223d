//! Middle-end module - IR, lowering and printing

pub mod ir;
pub mod ir_gen;
pub mod ir_printer;
