//! AST optimizer
//!
//! Passes run on the validated tree after semantic analysis: constant
//! folding and removal of variable declarations nobody reads or writes.

use std::collections::HashSet;

use log::debug;

use crate::frontend::ast::{AssignTarget, BinOp, Expr, Program, Stmt, UnOp};
use crate::types::Type;

/// Optimization pass trait
pub trait OptimizationPass {
    /// Name of the optimization pass
    fn name(&self) -> &'static str;

    /// Run the pass on a whole program
    fn run_on_program(&mut self, program: &mut Program) -> bool {
        self.run_on_block(&mut program.statements)
    }

    /// Run the pass on one statement list, descending into nested blocks
    fn run_on_block(&mut self, stmts: &mut Vec<Stmt>) -> bool;
}

/// The optimizer - runs optimization passes
pub struct Optimizer {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl Optimizer {
    /// An optimizer with no passes registered
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add an optimization pass
    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Run all passes on the program until none of them changes it
    pub fn optimize(&mut self, program: &mut Program) {
        let max_iterations = 10;
        let mut changed = true;
        let mut iteration = 0;

        while changed && iteration < max_iterations {
            changed = false;
            for pass in &mut self.passes {
                if pass.run_on_program(program) {
                    debug!("pass {} changed the program", pass.name());
                    changed = true;
                }
            }
            iteration += 1;
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `f` to every statement list nested directly inside `stmt`
fn for_each_child_block(stmt: &mut Stmt, f: &mut dyn FnMut(&mut Vec<Stmt>) -> bool) -> bool {
    match stmt {
        Stmt::If { then_branch, else_branch, .. } => {
            let then_changed = f(then_branch);
            f(else_branch) | then_changed
        }
        Stmt::While { body, .. } | Stmt::For { body, .. } => f(body),
        Stmt::RoutineDecl(decl) => f(&mut decl.body),
        Stmt::VarDecl(_)
        | Stmt::ArrayDecl { .. }
        | Stmt::Assignment { .. }
        | Stmt::Call(_)
        | Stmt::Return(_)
        | Stmt::Print(_)
        | Stmt::RecordTypeDecl { .. }
        | Stmt::TypeDecl { .. } => false,
    }
}

// ==================== Constant Folding ====================

/// Folds literal-only subexpressions at compile time
pub struct ConstantFolding;

impl ConstantFolding {
    pub fn new() -> Self {
        Self
    }

    fn fold_int(op: BinOp, l: i64, r: i64) -> Option<Expr> {
        let result = match op {
            BinOp::Add => l.checked_add(r)?,
            BinOp::Sub => l.checked_sub(r)?,
            BinOp::Mul => l.checked_mul(r)?,
            BinOp::Div => l.checked_div(r)?,
            BinOp::Mod => l.checked_rem(r)?,
            BinOp::Eq => return Some(Expr::BoolLit(l == r)),
            BinOp::Ne => return Some(Expr::BoolLit(l != r)),
            BinOp::Lt => return Some(Expr::BoolLit(l < r)),
            BinOp::Le => return Some(Expr::BoolLit(l <= r)),
            BinOp::Gt => return Some(Expr::BoolLit(l > r)),
            BinOp::Ge => return Some(Expr::BoolLit(l >= r)),
            BinOp::And | BinOp::Or | BinOp::Xor => return None,
        };
        Self::word(result)
    }

    /// Integer results are only folded while they fit a 32-bit word
    fn word(value: i64) -> Option<Expr> {
        i32::try_from(value).ok().map(|_| Expr::IntLit(value))
    }

    fn fold_real(op: BinOp, l: f64, r: f64) -> Option<Expr> {
        let result = match op {
            BinOp::Add => l + r,
            BinOp::Sub => l - r,
            BinOp::Mul => l * r,
            BinOp::Div | BinOp::Mod if r == 0.0 => return None,
            BinOp::Div => l / r,
            BinOp::Mod => l % r,
            BinOp::Eq => return Some(Expr::BoolLit(l == r)),
            BinOp::Ne => return Some(Expr::BoolLit(l != r)),
            BinOp::Lt => return Some(Expr::BoolLit(l < r)),
            BinOp::Le => return Some(Expr::BoolLit(l <= r)),
            BinOp::Gt => return Some(Expr::BoolLit(l > r)),
            BinOp::Ge => return Some(Expr::BoolLit(l >= r)),
            BinOp::And | BinOp::Or | BinOp::Xor => return None,
        };
        result.is_finite().then_some(Expr::RealLit(result))
    }

    fn fold_bool(op: BinOp, l: bool, r: bool) -> Option<Expr> {
        let result = match op {
            BinOp::And => l && r,
            BinOp::Or => l || r,
            BinOp::Xor => l ^ r,
            BinOp::Eq => l == r,
            BinOp::Ne => l != r,
            _ => return None,
        };
        Some(Expr::BoolLit(result))
    }

    fn as_real(expr: &Expr) -> Option<f64> {
        match expr {
            Expr::RealLit(v) => Some(*v),
            Expr::IntLit(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Evaluate `expr` if its immediate operands are literals
    fn evaluate(expr: &Expr) -> Option<Expr> {
        match expr {
            Expr::Binary { left, op, right } => match (left.as_ref(), right.as_ref()) {
                (Expr::IntLit(l), Expr::IntLit(r)) => Self::fold_int(*op, *l, *r),
                (Expr::BoolLit(l), Expr::BoolLit(r)) => Self::fold_bool(*op, *l, *r),
                (l, r) => Self::fold_real(*op, Self::as_real(l)?, Self::as_real(r)?),
            },
            Expr::Unary { op, operand } => match (op, operand.as_ref()) {
                (UnOp::Neg, Expr::IntLit(v)) => v.checked_neg().and_then(Self::word),
                (UnOp::Neg, Expr::RealLit(v)) => Some(Expr::RealLit(-v)),
                (UnOp::Not, Expr::BoolLit(b)) => Some(Expr::BoolLit(!b)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Fold bottom-up so a parent sees its children already reduced
    fn fold_expr(expr: &mut Expr) -> bool {
        let mut changed = match expr {
            Expr::Binary { left, right, .. } => {
                let left_changed = Self::fold_expr(left);
                Self::fold_expr(right) | left_changed
            }
            Expr::Unary { operand, .. } => Self::fold_expr(operand),
            Expr::ArrayAccess { index, .. } => Self::fold_expr(index),
            Expr::TypeCast { expr: inner, .. } => Self::fold_expr(inner),
            Expr::RoutineCall(call) => call
                .args
                .iter_mut()
                .fold(false, |changed, arg| Self::fold_expr(arg) | changed),
            Expr::IntLit(_)
            | Expr::RealLit(_)
            | Expr::BoolLit(_)
            | Expr::StringLit(_)
            | Expr::VarRef(_)
            | Expr::FieldAccess { .. } => false,
        };

        if let Some(folded) = Self::evaluate(expr) {
            *expr = folded;
            changed = true;
        }
        changed
    }

    fn fold_stmt(&mut self, stmt: &mut Stmt) -> bool {
        let changed = match stmt {
            Stmt::VarDecl(decl) => decl.initializer.as_mut().map_or(false, Self::fold_expr),
            Stmt::Assignment { target, value } => {
                let target_changed = match target {
                    AssignTarget::Element { index, .. } => Self::fold_expr(index),
                    AssignTarget::Variable(_) | AssignTarget::Field { .. } => false,
                };
                Self::fold_expr(value) | target_changed
            }
            Stmt::If { cond, .. } | Stmt::While { cond, .. } => Self::fold_expr(cond),
            Stmt::For { start, end, .. } => {
                let start_changed = Self::fold_expr(start);
                Self::fold_expr(end) | start_changed
            }
            Stmt::Call(call) => call
                .args
                .iter_mut()
                .fold(false, |changed, arg| Self::fold_expr(arg) | changed),
            Stmt::Return(value) => value.as_mut().map_or(false, Self::fold_expr),
            Stmt::Print(expr) => Self::fold_expr(expr),
            Stmt::ArrayDecl { .. }
            | Stmt::RoutineDecl(_)
            | Stmt::RecordTypeDecl { .. }
            | Stmt::TypeDecl { .. } => false,
        };
        for_each_child_block(stmt, &mut |block| self.run_on_block(block)) | changed
    }
}

impl OptimizationPass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run_on_block(&mut self, stmts: &mut Vec<Stmt>) -> bool {
        let mut changed = false;
        for stmt in stmts.iter_mut() {
            if self.fold_stmt(stmt) {
                changed = true;
            }
        }
        changed
    }
}

impl Default for ConstantFolding {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Dead Declaration Elimination ====================

/// Removes scalar `var` declarations whose name is never read, printed or
/// assigned anywhere in the program. Array and record declarations stay.
///
/// The usage set is collected by name during analysis, so a name used in
/// any scope keeps every declaration of it alive.
pub struct DeadDeclElimination {
    used: HashSet<String>,
    /// Named types that resolve to an array or a record
    aggregate_types: HashSet<String>,
}

impl DeadDeclElimination {
    pub fn new(used: HashSet<String>, aggregate_types: HashSet<String>) -> Self {
        Self { used, aggregate_types }
    }

    fn is_aggregate(&self, ty: Option<&Type>) -> bool {
        match ty {
            Some(Type::Array { .. } | Type::Record { .. }) => true,
            Some(Type::Named(name)) => self.aggregate_types.contains(name),
            _ => false,
        }
    }

    fn is_dead(&self, stmt: &Stmt) -> bool {
        match stmt {
            Stmt::VarDecl(decl) => {
                !self.used.contains(&decl.name)
                    && !self.is_aggregate(decl.ty.as_ref())
                    && !decl.initializer.as_ref().map_or(false, Expr::contains_call)
            }
            _ => false,
        }
    }
}

impl OptimizationPass for DeadDeclElimination {
    fn name(&self) -> &'static str {
        "dead-decl-elimination"
    }

    fn run_on_block(&mut self, stmts: &mut Vec<Stmt>) -> bool {
        let before = stmts.len();
        stmts.retain(|stmt| !self.is_dead(stmt));
        let mut changed = stmts.len() != before;

        for stmt in stmts.iter_mut() {
            if for_each_child_block(stmt, &mut |block| self.run_on_block(block)) {
                changed = true;
            }
        }
        changed
    }
}
