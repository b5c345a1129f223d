//! A small interpreter for generated modules.
//!
//! Values are not split into slots here: a real occupies one stack entry,
//! and its local lives at its first slot.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use implc::frontend::ast::Program;
use implc::middle::ir::{
    BinaryOp, Condition, Constant, Conversion, Instruction, Label, Module, RoutineCode, UnaryOp,
    ValueKind,
};
use implc::{compile, CompileOptions};

const STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Record(Rc<RefCell<HashMap<String, Value>>>),
    Null,
}

impl Value {
    fn int(&self) -> i64 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected an integer, found {:?}", other),
        }
    }

    fn real(&self) -> f64 {
        match self {
            Value::Real(v) => *v,
            other => panic!("expected a real, found {:?}", other),
        }
    }

    fn default_for(kind: &ValueKind) -> Value {
        match kind {
            ValueKind::Int | ValueKind::Bool => Value::Int(0),
            ValueKind::Real => Value::Real(0.0),
            ValueKind::Str => Value::Str(String::new()),
            _ => Value::Null,
        }
    }
}

pub struct Machine<'m> {
    module: &'m Module,
    globals: HashMap<String, Value>,
    output: Vec<String>,
    steps: usize,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m Module) -> Self {
        let globals = module
            .globals
            .iter()
            .map(|g| (g.name.clone(), Value::default_for(&g.kind)))
            .collect();
        Self {
            module,
            globals,
            output: Vec::new(),
            steps: 0,
        }
    }

    /// Run the initializer, then `entry` if given. Returns printed lines.
    pub fn run(mut self, entry: Option<&str>) -> Vec<String> {
        let module = self.module;
        if let Some(init) = &module.initializer {
            self.call(init, Vec::new());
        }
        if let Some(name) = entry {
            let routine = module
                .routine(name)
                .unwrap_or_else(|| panic!("no routine {}", name));
            self.call(routine, Vec::new());
        }
        self.output
    }

    fn call(&mut self, routine: &'m RoutineCode, args: Vec<Value>) -> Option<Value> {
        let labels: HashMap<Label, usize> = routine
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(i, inst)| match inst {
                Instruction::Label(l) => Some((*l, i)),
                _ => None,
            })
            .collect();

        let mut locals = vec![Value::Int(0); routine.max_locals.max(1)];
        let mut slot = 0;
        for (arg, kind) in args.into_iter().zip(&routine.params) {
            locals[slot] = arg;
            slot += kind.width();
        }

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        while pc < routine.instructions.len() {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded in {}", routine.name);

            let inst = &routine.instructions[pc];
            pc += 1;
            match inst {
                Instruction::Push(c) => stack.push(match c {
                    Constant::Int(v) => Value::Int(*v),
                    Constant::Real(v) => Value::Real(*v),
                    Constant::Bool(b) => Value::Int(*b as i64),
                    Constant::Str(s) => Value::Str(s.clone()),
                }),
                Instruction::Load { slot, .. } => stack.push(locals[*slot].clone()),
                Instruction::Store { slot, .. } => locals[*slot] = pop(&mut stack),
                Instruction::GetGlobal { name, .. } => stack.push(self.globals[name].clone()),
                Instruction::PutGlobal { name, .. } => {
                    let value = pop(&mut stack);
                    self.globals.insert(name.clone(), value);
                }
                Instruction::Binary { op, kind } => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    stack.push(binary(*op, kind, &left, &right));
                }
                Instruction::Unary { op: UnaryOp::Neg, kind } => {
                    let value = pop(&mut stack);
                    stack.push(match kind {
                        ValueKind::Real => Value::Real(-value.real()),
                        _ => Value::Int(-value.int()),
                    });
                }
                Instruction::Convert(Conversion::IntToReal) => {
                    let value = pop(&mut stack).int();
                    stack.push(Value::Real(value as f64));
                }
                Instruction::Convert(Conversion::RealToInt) => {
                    let value = pop(&mut stack).real();
                    stack.push(Value::Int(value as i64));
                }
                Instruction::CompareBranch { cond, kind, target } => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    let ordering = match kind {
                        ValueKind::Real => left.real().partial_cmp(&right.real()),
                        _ => Some(left.int().cmp(&right.int())),
                    };
                    if ordering.map_or(false, |o| holds(*cond, o)) {
                        pc = labels[target];
                    }
                }
                Instruction::BranchZero { cond, target } => {
                    let value = pop(&mut stack).int();
                    if holds(*cond, value.cmp(&0)) {
                        pc = labels[target];
                    }
                }
                Instruction::Jump(target) => pc = labels[target],
                Instruction::Label(_) => {}
                Instruction::Call { name, params, .. } => {
                    let at = stack.len() - params.len();
                    let args = stack.split_off(at);
                    let module = self.module;
                    let callee = module
                        .routine(name)
                        .unwrap_or_else(|| panic!("no routine {}", name));
                    if let Some(result) = self.call(callee, args) {
                        stack.push(result);
                    }
                }
                Instruction::Return(ValueKind::Void) => return None,
                Instruction::Return(_) => return Some(pop(&mut stack)),
                Instruction::NewRecord(name) => {
                    let def = self
                        .module
                        .type_definition(name)
                        .unwrap_or_else(|| panic!("no record type {}", name));
                    let fields = def
                        .fields
                        .iter()
                        .map(|(field, kind)| (field.clone(), Value::default_for(kind)))
                        .collect();
                    stack.push(Value::Record(Rc::new(RefCell::new(fields))));
                }
                Instruction::GetField { field, .. } => match pop(&mut stack) {
                    Value::Record(fields) => {
                        let value = fields.borrow()[field].clone();
                        stack.push(value);
                    }
                    other => panic!("getfield on {:?}", other),
                },
                Instruction::PutField { field, .. } => {
                    let value = pop(&mut stack);
                    match pop(&mut stack) {
                        Value::Record(fields) => {
                            fields.borrow_mut().insert(field.clone(), value);
                        }
                        other => panic!("putfield on {:?}", other),
                    }
                }
                Instruction::NewArray(element) => {
                    let size = pop(&mut stack).int() as usize;
                    let items = vec![Value::default_for(element); size];
                    stack.push(Value::Array(Rc::new(RefCell::new(items))));
                }
                Instruction::ArrayLoad(_) => {
                    let index = pop(&mut stack).int() as usize;
                    match pop(&mut stack) {
                        Value::Array(items) => {
                            let value = items.borrow()[index].clone();
                            stack.push(value);
                        }
                        other => panic!("array load on {:?}", other),
                    }
                }
                Instruction::ArrayStore(_) => {
                    let value = pop(&mut stack);
                    let index = pop(&mut stack).int() as usize;
                    match pop(&mut stack) {
                        Value::Array(items) => {
                            items.borrow_mut()[index] = value;
                        }
                        other => panic!("array store on {:?}", other),
                    }
                }
                Instruction::Print(kind) => {
                    let value = pop(&mut stack);
                    let line = match (kind, value) {
                        (ValueKind::Bool, v) => (v.int() != 0).to_string(),
                        (_, Value::Int(v)) => v.to_string(),
                        (_, Value::Real(v)) => format!("{:?}", v),
                        (_, Value::Str(s)) => s,
                        (_, other) => panic!("cannot print {:?}", other),
                    };
                    self.output.push(line);
                }
                Instruction::Dup => {
                    let top = stack.last().cloned().expect("dup on empty stack");
                    stack.push(top);
                }
                Instruction::Pop(_) => {
                    pop(&mut stack);
                }
            }
        }
        None
    }
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("operand stack underflow")
}

fn holds(cond: Condition, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match cond {
        Condition::Eq => ordering == Equal,
        Condition::Ne => ordering != Equal,
        Condition::Lt => ordering == Less,
        Condition::Le => ordering != Greater,
        Condition::Gt => ordering == Greater,
        Condition::Ge => ordering != Less,
    }
}

fn binary(op: BinaryOp, kind: &ValueKind, left: &Value, right: &Value) -> Value {
    if let ValueKind::Real = kind {
        let (l, r) = (left.real(), right.real());
        return Value::Real(match op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Rem => l % r,
            BinaryOp::Xor => panic!("xor on reals"),
        });
    }
    let (l, r) = (left.int(), right.int());
    Value::Int(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => l / r,
        BinaryOp::Rem => l % r,
        BinaryOp::Xor => l ^ r,
    })
}

/// Compile with default options and run, starting at `entry`
pub fn run_program(program: Program, entry: Option<&str>) -> Vec<String> {
    let mut program = program;
    let module = compile(&mut program, &CompileOptions::default()).expect("compilation failed");
    Machine::new(&module).run(entry)
}
