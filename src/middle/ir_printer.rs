//! IR Printer - Pretty print stack-machine IR
//!
//! Outputs human-readable IR for debugging and `--emit-ir`.

use std::fmt::{self, Write};

use crate::middle::ir::*;

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Push(c) => write!(f, "push {}", c),
            Instruction::Load { slot, kind } => write!(f, "load {}: {}", slot, kind),
            Instruction::Store { slot, kind } => write!(f, "store {}: {}", slot, kind),
            Instruction::GetGlobal { name, kind } => write!(f, "getglobal {}: {}", name, kind),
            Instruction::PutGlobal { name, kind } => write!(f, "putglobal {}: {}", name, kind),
            Instruction::Binary { op, kind } => write!(f, "{} {}", op, kind),
            Instruction::Unary { op: UnaryOp::Neg, kind } => write!(f, "neg {}", kind),
            Instruction::Convert(conv) => write!(f, "convert {}", conv),
            Instruction::CompareBranch { cond, kind, target } => {
                write!(f, "ifcmp {} {} {}", cond, kind, target)
            }
            Instruction::BranchZero { cond, target } => write!(f, "ifz {} {}", cond, target),
            Instruction::Jump(target) => write!(f, "goto {}", target),
            Instruction::Label(label) => write!(f, "{}:", label),
            Instruction::Call { name, params, ret } => {
                write!(f, "call {}(", name)?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", param)?;
                }
                write!(f, ") -> {}", ret)
            }
            Instruction::Return(kind) => write!(f, "ret {}", kind),
            Instruction::NewRecord(name) => write!(f, "new {}", name),
            Instruction::GetField { record, field, kind } => {
                write!(f, "getfield {}.{}: {}", record, field, kind)
            }
            Instruction::PutField { record, field, kind } => {
                write!(f, "putfield {}.{}: {}", record, field, kind)
            }
            Instruction::NewArray(element) => write!(f, "newarray {}", element),
            Instruction::ArrayLoad(kind) => write!(f, "arrayload {}", kind),
            Instruction::ArrayStore(kind) => write!(f, "arraystore {}", kind),
            Instruction::Print(kind) => write!(f, "print {}", kind),
            Instruction::Dup => write!(f, "dup"),
            Instruction::Pop(kind) => write!(f, "pop {}", kind),
        }
    }
}

/// Pretty printer for stack-machine IR
pub struct IRPrinter {
    output: String,
}

impl IRPrinter {
    pub fn new() -> Self {
        Self { output: String::new() }
    }

    /// Print an IR module to string
    pub fn print_module(&mut self, module: &Module) -> String {
        self.output.clear();
        // writing into a String does not fail
        let _ = self.write_module(module);
        std::mem::take(&mut self.output)
    }

    fn write_module(&mut self, module: &Module) -> fmt::Result {
        writeln!(self.output, "; Module: {}", module.name)?;
        writeln!(
            self.output,
            "; Globals: {}, Types: {}, Routines: {}",
            module.globals.len(),
            module.types.len(),
            module.routines.len()
        )?;
        writeln!(self.output)?;

        for def in &module.types {
            writeln!(self.output, "type {} {{", def.name)?;
            for (field, kind) in &def.fields {
                writeln!(self.output, "  {}: {}", field, kind)?;
            }
            writeln!(self.output, "}}")?;
            writeln!(self.output)?;
        }

        for global in &module.globals {
            writeln!(self.output, "global {}: {}", global.name, global.kind)?;
        }
        if !module.globals.is_empty() {
            writeln!(self.output)?;
        }

        if let Some(init) = &module.initializer {
            self.write_routine(init)?;
            writeln!(self.output)?;
        }
        for routine in &module.routines {
            self.write_routine(routine)?;
            writeln!(self.output)?;
        }
        Ok(())
    }

    fn write_routine(&mut self, routine: &RoutineCode) -> fmt::Result {
        write!(self.output, "routine {}(", routine.name)?;
        for (i, kind) in routine.params.iter().enumerate() {
            if i > 0 {
                write!(self.output, ", ")?;
            }
            write!(self.output, "{}", kind)?;
        }
        writeln!(
            self.output,
            ") -> {} [locals {}, stack {}] {{",
            routine.ret, routine.max_locals, routine.max_stack
        )?;

        for inst in &routine.instructions {
            match inst {
                Instruction::Label(_) => writeln!(self.output, "  {}", inst)?,
                _ => writeln!(self.output, "    {}", inst)?,
            }
        }

        writeln!(self.output, "}}")
    }
}

impl Default for IRPrinter {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience function to print a module
pub fn print_ir(module: &Module) -> String {
    IRPrinter::new().print_module(module)
}
