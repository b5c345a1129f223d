//! Semantic Analysis for the imperative language
//!
//! Performs:
//! - Scope resolution (variables, routines, named types)
//! - Type checking of statements and expressions
//! - Return-path checking for routines with a result type
//! - Post-analysis rewriting: constant folding and unused-declaration removal
//!
//! Problems are collected as [`Diagnostic`]s; analysis never stops at the
//! first one.

use std::collections::HashSet;

use log::debug;

use crate::frontend::ast::*;
use crate::frontend::optimize::{ConstantFolding, DeadDeclElimination, Optimizer};
use crate::frontend::symbol_table::{RoutineSignature, SymbolTable};
use crate::types::type_system::{self, describe};
use crate::types::{PrimitiveType, Type};
use crate::utils::{Diagnostic, Error};

/// Analyzer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerOptions {
    /// Fold literal-only subexpressions after the walk
    pub fold_constants: bool,
    /// Drop variable declarations that are never read or written
    pub remove_unused: bool,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            fold_constants: true,
            remove_unused: true,
        }
    }
}

// ==================== Semantic Analyzer ====================

/// Semantic analyzer
pub struct SemanticAnalyzer {
    symbols: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    /// Expected return type of each routine being walked, innermost last
    return_types: Vec<Type>,
    /// Names read, printed or assigned anywhere in the program
    used: HashSet<String>,
    options: AnalyzerOptions,
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self::with_options(AnalyzerOptions::default())
    }

    pub fn with_options(options: AnalyzerOptions) -> Self {
        Self {
            symbols: SymbolTable::new(),
            diagnostics: Vec::new(),
            return_types: Vec::new(),
            used: HashSet::new(),
            options,
        }
    }

    /// The symbol table populated by the last analysis
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn into_symbols(self) -> SymbolTable {
        self.symbols
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Analyze a program, rewriting it in place, and return the diagnostics.
    /// An empty list means the program may be handed to code generation.
    pub fn analyze(&mut self, program: &mut Program) -> Vec<Diagnostic> {
        self.symbols.clear();
        self.diagnostics.clear();
        self.return_types.clear();
        self.used.clear();

        // Pass 1: routine signatures
        for stmt in &program.statements {
            if let Stmt::RoutineDecl(decl) = stmt {
                self.declare_routine(decl);
            }
        }
        debug!("pass 1 (routine signatures) done");

        // Pass 2: type declarations
        for stmt in &program.statements {
            match stmt {
                Stmt::RecordTypeDecl { name, fields } => self.declare_record(name, fields),
                Stmt::TypeDecl { name, ty } => self.declare_alias(name, ty),
                _ => {}
            }
        }
        debug!("pass 2 (type declarations) done");

        // Pass 3: global variables
        for stmt in program.statements.iter_mut() {
            if matches!(stmt, Stmt::VarDecl(_) | Stmt::ArrayDecl { .. }) {
                self.check_stmt(stmt);
            }
        }
        debug!("pass 3 (globals) done");

        // Pass 4: routine bodies
        for stmt in program.statements.iter_mut() {
            if let Stmt::RoutineDecl(decl) = stmt {
                self.check_routine_body(decl);
            }
        }
        debug!("pass 4 (routine bodies) done");

        // Pass 5: remaining top-level statements
        for stmt in program.statements.iter_mut() {
            match stmt {
                Stmt::VarDecl(_)
                | Stmt::ArrayDecl { .. }
                | Stmt::RoutineDecl(_)
                | Stmt::RecordTypeDecl { .. }
                | Stmt::TypeDecl { .. } => {}
                _ => self.check_stmt(stmt),
            }
        }
        debug!(
            "pass 5 (top-level statements) done, {} diagnostic(s)",
            self.diagnostics.len()
        );

        self.optimize(program);
        self.diagnostics.clone()
    }

    fn optimize(&mut self, program: &mut Program) {
        let mut optimizer = Optimizer::new();
        if self.options.fold_constants {
            optimizer.add_pass(Box::new(ConstantFolding::new()));
        }
        if self.options.remove_unused {
            let aggregates = self.aggregate_type_names(program);
            optimizer.add_pass(Box::new(DeadDeclElimination::new(self.used.clone(), aggregates)));
        }
        if !optimizer.is_empty() {
            optimizer.optimize(program);
        }
    }

    /// Declared type names that resolve to an array or a record
    fn aggregate_type_names(&self, program: &Program) -> HashSet<String> {
        program
            .statements
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::RecordTypeDecl { name, .. } | Stmt::TypeDecl { name, .. } => Some(name),
                _ => None,
            })
            .filter(|name| {
                matches!(
                    type_system::resolve(&Type::named(name.as_str()), &self.symbols),
                    Ok(Type::Array { .. } | Type::Record { .. })
                )
            })
            .cloned()
            .collect()
    }

    fn error(&mut self, err: Error) {
        self.diagnostics.push(Diagnostic::from(err));
    }

    /// Resolve a written type, reporting it when it names nothing
    fn resolve(&mut self, ty: &Type) -> Option<Type> {
        if !type_system::is_valid(ty, &self.symbols) {
            self.error(Error::UndefinedType { name: ty.to_string() });
            return None;
        }
        match type_system::resolve_deep(ty, &self.symbols) {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                self.error(err);
                None
            }
        }
    }

    /// Resolve a type that was already validated elsewhere
    fn resolve_quiet(&self, ty: &Type) -> Option<Type> {
        type_system::resolve_deep(ty, &self.symbols).ok()
    }

    // ==================== Declarations ====================

    fn declare_routine(&mut self, decl: &RoutineDecl) {
        let signature = RoutineSignature {
            name: decl.name.clone(),
            params: decl.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: decl.return_type(),
        };
        if !self.symbols.declare_routine(&decl.name, signature) {
            self.error(Error::DuplicateRoutine { name: decl.name.clone() });
        }
    }

    fn declare_record(&mut self, name: &str, fields: &[(String, Type)]) {
        for (_, ty) in fields {
            if !type_system::is_valid(ty, &self.symbols) {
                self.error(Error::InvalidFieldType {
                    record: name.to_string(),
                    ty: ty.to_string(),
                });
            }
        }
        if !self.symbols.define_type(name, Type::record(name, fields.to_vec())) {
            self.error(Error::DuplicateType { name: name.to_string() });
        }
    }

    fn declare_alias(&mut self, name: &str, ty: &Type) {
        if !type_system::is_valid(ty, &self.symbols) {
            self.error(Error::UndefinedType { name: ty.to_string() });
            return;
        }
        if !self.symbols.define_type(name, ty.clone()) {
            self.error(Error::DuplicateType { name: name.to_string() });
        }
    }

    fn check_var_decl(&mut self, decl: &mut VarDecl) {
        if self.symbols.is_defined_in_current_scope(&decl.name) {
            self.error(Error::DuplicateVariable { name: decl.name.clone() });
            if let Some(init) = &decl.initializer {
                self.type_of(init);
            }
            return;
        }

        let declared = match &decl.ty {
            Some(ty) => match self.resolve(ty) {
                Some(resolved) => Some(resolved),
                None => return,
            },
            None => None,
        };
        let actual = decl.initializer.as_ref().and_then(|init| self.type_of(init));

        let ty = match (declared, actual) {
            (Some(declared), Some(actual)) => {
                if !type_system::is_compatible(&declared, &actual) {
                    self.error(Error::TypeMismatch {
                        context: format!("declaration of {}", decl.name),
                        expected: declared.to_string(),
                        got: actual.to_string(),
                    });
                }
                declared
            }
            (Some(declared), None) => declared,
            (None, Some(actual)) => {
                decl.ty = Some(actual.clone());
                actual
            }
            (None, None) => {
                if decl.initializer.is_none() {
                    self.error(Error::UntypedDeclaration { name: decl.name.clone() });
                }
                return;
            }
        };
        self.symbols.declare_variable(&decl.name, ty);
    }

    fn check_array_decl(&mut self, name: &str, element: &Type, size: i64) {
        if self.symbols.is_defined_in_current_scope(name) {
            self.error(Error::DuplicateVariable { name: name.to_string() });
            return;
        }
        if size <= 0 {
            self.error(Error::InvalidArraySize { name: name.to_string(), size });
            return;
        }
        if let Some(element) = self.resolve(element) {
            self.symbols.declare_variable(name, Type::array(element, size));
        }
    }

    fn check_routine_body(&mut self, decl: &mut RoutineDecl) {
        self.symbols.enter_scope();

        for param in &decl.params {
            if self.symbols.is_defined_in_current_scope(&param.name) {
                self.error(Error::DuplicateParameter {
                    name: param.name.clone(),
                    routine: decl.name.clone(),
                });
                continue;
            }
            if let Some(ty) = self.resolve(&param.ty) {
                self.symbols.declare_variable(&param.name, ty);
            }
        }

        let return_type = match &decl.return_type {
            Some(ty) => self.resolve(ty).unwrap_or_else(|| ty.clone()),
            None => Type::VOID,
        };
        let must_return = !return_type.is_void();
        self.return_types.push(return_type);

        for stmt in decl.body.iter_mut() {
            self.check_stmt(stmt);
        }

        if must_return && !ends_with_return(&decl.body) {
            self.error(Error::MissingReturn { name: decl.name.clone() });
        }

        self.return_types.pop();
        self.symbols.exit_scope();
    }

    // ==================== Statements ====================

    fn check_block(&mut self, stmts: &mut [Stmt]) {
        self.symbols.enter_scope();
        for stmt in stmts.iter_mut() {
            self.check_stmt(stmt);
        }
        self.symbols.exit_scope();
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => self.check_var_decl(decl),
            Stmt::ArrayDecl { name, element, size } => self.check_array_decl(name, element, *size),
            Stmt::Assignment { target, value } => self.check_assignment(target, value),
            Stmt::If { cond, then_branch, else_branch } => {
                self.check_condition("If", cond);
                self.check_block(then_branch);
                self.check_block(else_branch);
            }
            Stmt::While { cond, body } => {
                self.check_condition("While", cond);
                self.check_block(body);
            }
            Stmt::For { var, start, end, body, .. } => self.check_for(var, start, end, body),
            Stmt::RoutineDecl(decl) => self.error(Error::NestedDeclaration {
                what: "Routine".to_string(),
                name: decl.name.clone(),
            }),
            Stmt::RecordTypeDecl { name, .. } => self.error(Error::NestedDeclaration {
                what: "Record type".to_string(),
                name: name.clone(),
            }),
            Stmt::TypeDecl { name, .. } => self.error(Error::NestedDeclaration {
                what: "Type".to_string(),
                name: name.clone(),
            }),
            Stmt::Call(call) => {
                self.check_call(call);
            }
            Stmt::Return(value) => self.check_return(value.as_ref()),
            Stmt::Print(expr) => self.check_print(expr),
        }
    }

    fn check_assignment(&mut self, target: &AssignTarget, value: &Expr) {
        let slot = match target {
            AssignTarget::Variable(name) => match self.symbols.get_type(name).cloned() {
                Some(ty) => ty,
                None => {
                    self.error(Error::UndefinedVariable { name: name.clone() });
                    return;
                }
            },
            AssignTarget::Element { array, index } => {
                let Some(element) = self.array_element(array) else {
                    return;
                };
                if !self.check_index(index) {
                    return;
                }
                element
            }
            AssignTarget::Field { record, field } => match self.record_field(record, field) {
                Some(ty) => ty,
                None => return,
            },
        };
        self.used.insert(target.root().to_string());

        if let Some(actual) = self.type_of(value) {
            if !type_system::is_compatible(&slot, &actual) {
                self.error(Error::TypeMismatch {
                    context: format!("assignment to {}", target.root()),
                    expected: slot.to_string(),
                    got: actual.to_string(),
                });
            }
        }
    }

    fn check_condition(&mut self, construct: &str, cond: &Expr) {
        if let Some(ty) = self.type_of(cond) {
            if !ty.is_boolean() {
                self.error(Error::NonBooleanCondition {
                    construct: construct.to_string(),
                    got: ty.to_string(),
                });
            }
        }
    }

    fn check_for(&mut self, var: &str, start: &Expr, end: &Expr, body: &mut [Stmt]) {
        for bound in [start, end] {
            if let Some(ty) = self.type_of(bound) {
                if !ty.is_integer() {
                    self.error(Error::TypeMismatch {
                        context: "for loop range".to_string(),
                        expected: Type::INTEGER.to_string(),
                        got: ty.to_string(),
                    });
                }
            }
        }

        match self.symbols.get_type(var).map(|ty| (ty.is_integer(), ty.to_string())) {
            None => self.error(Error::UndefinedLoopVariable { name: var.to_string() }),
            Some((false, got)) => {
                self.error(Error::NonIntegerLoopVariable { name: var.to_string(), got })
            }
            Some((true, _)) => {}
        }

        // The counter itself lives in the loop's own frame
        self.symbols.enter_scope();
        self.symbols.declare_variable(var, Type::INTEGER);
        for stmt in body.iter_mut() {
            self.check_stmt(stmt);
        }
        self.symbols.exit_scope();
    }

    fn check_return(&mut self, value: Option<&Expr>) {
        let Some(expected) = self.return_types.last().cloned() else {
            self.error(Error::ReturnOutsideRoutine);
            return;
        };

        match value {
            Some(_) if expected.is_void() => self.error(Error::UnexpectedReturnValue),
            None if !expected.is_void() => self.error(Error::MissingReturnValue {
                expected: expected.to_string(),
            }),
            None => {}
            Some(expr) => {
                if let Some(actual) = self.type_of(expr) {
                    if !type_system::is_compatible(&expected, &actual) {
                        self.error(Error::TypeMismatch {
                            context: "return".to_string(),
                            expected: expected.to_string(),
                            got: actual.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn check_print(&mut self, expr: &Expr) {
        if let Some(ty) = self.type_of(expr) {
            if ty.as_primitive().map_or(true, |p| p == PrimitiveType::Void) {
                self.error(Error::InvalidPrint { ty: ty.to_string() });
            }
        }
    }

    /// Check a call's target and arguments; returns the callee's result type
    fn check_call(&mut self, call: &RoutineCall) -> Option<Type> {
        let Some(signature) = self.symbols.get_routine(&call.name).cloned() else {
            self.error(Error::UndefinedRoutine { name: call.name.clone() });
            for arg in &call.args {
                self.type_of(arg);
            }
            return None;
        };

        if signature.params.len() != call.args.len() {
            self.error(Error::ArgCountMismatch {
                name: call.name.clone(),
                expected: signature.params.len(),
                got: call.args.len(),
            });
        }

        for (index, arg) in call.args.iter().enumerate() {
            let actual = self.type_of(arg);
            let expected = signature.params.get(index).and_then(|p| self.resolve_quiet(p));
            if let (Some(expected), Some(actual)) = (expected, actual) {
                if !type_system::is_compatible(&expected, &actual) {
                    self.error(Error::ArgTypeMismatch {
                        name: call.name.clone(),
                        index: index + 1,
                        expected: expected.to_string(),
                        got: actual.to_string(),
                    });
                }
            }
        }

        self.resolve_quiet(&signature.return_type)
    }

    // ==================== Expressions ====================

    /// Element type of the array variable `name`
    fn array_element(&mut self, name: &str) -> Option<Type> {
        self.used.insert(name.to_string());
        match self.symbols.get_type(name).cloned() {
            Some(Type::Array { element, .. }) => Some(*element),
            Some(_) => {
                self.error(Error::NotAnArray { name: name.to_string() });
                None
            }
            None => {
                self.error(Error::UndefinedArray { name: name.to_string() });
                None
            }
        }
    }

    /// Whether `index` is an integer expression, reporting when it is not
    fn check_index(&mut self, index: &Expr) -> bool {
        match self.type_of(index) {
            Some(ty) if ty.is_integer() => true,
            Some(ty) => {
                self.error(Error::NonIntegerIndex { got: ty.to_string() });
                false
            }
            None => false,
        }
    }

    /// Resolved type of `record.field`
    fn record_field(&mut self, record: &str, field: &str) -> Option<Type> {
        self.used.insert(record.to_string());
        let Some(ty) = self.symbols.get_type(record).cloned() else {
            self.error(Error::UndefinedRecord { name: record.to_string() });
            return None;
        };
        let resolved = self.resolve_quiet(&ty);
        let Some(record_ty @ Type::Record { .. }) = resolved else {
            self.error(Error::NotARecord { name: record.to_string() });
            return None;
        };
        match record_ty.field(field) {
            Some(field_ty) => self.resolve_quiet(field_ty),
            None => {
                self.error(Error::UnknownField {
                    record: record.to_string(),
                    field: field.to_string(),
                });
                None
            }
        }
    }

    /// Type of an expression, or `None` after reporting why it has none
    pub fn type_of(&mut self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::IntLit(_) => Some(Type::INTEGER),
            Expr::RealLit(_) => Some(Type::REAL),
            Expr::BoolLit(_) => Some(Type::BOOLEAN),
            Expr::StringLit(_) => Some(Type::STRING),

            Expr::VarRef(name) => {
                self.used.insert(name.clone());
                let ty = self.symbols.get_type(name).cloned();
                if ty.is_none() {
                    self.error(Error::UndefinedVariable { name: name.clone() });
                }
                ty
            }

            Expr::Binary { left, op, right } => {
                let left_ty = self.type_of(left);
                let right_ty = self.type_of(right);
                let (left_ty, right_ty) = (left_ty?, right_ty?);
                self.binary_type(*op, left_ty, right_ty)
            }

            Expr::Unary { op, operand } => {
                let operand_ty = self.type_of(operand)?;
                match type_system::unary_result(*op, &operand_ty) {
                    Some(ty) => Some(ty),
                    None => {
                        self.error(Error::InvalidOperand {
                            op: op.to_string(),
                            operand: operand_ty.to_string(),
                        });
                        Some(match op {
                            UnOp::Not => Type::BOOLEAN,
                            UnOp::Neg => operand_ty,
                        })
                    }
                }
            }

            Expr::ArrayAccess { array, index } => {
                let element = self.array_element(array);
                let index_ok = self.check_index(index);
                let element = element?;
                index_ok.then(|| self.resolve_quiet(&element)).flatten()
            }

            Expr::FieldAccess { record, field } => self.record_field(record, field),

            Expr::RoutineCall(call) => {
                let ty = self.check_call(call)?;
                if ty.is_void() {
                    self.error(Error::VoidInExpression { name: call.name.clone() });
                    return None;
                }
                Some(ty)
            }

            Expr::TypeCast { expr: inner, target } => {
                let source = self.type_of(inner);
                let target = self.resolve(target)?;
                let source = source?;
                if !type_system::is_valid_cast(&source, &target) {
                    self.error(Error::InvalidCast {
                        from: source.to_string(),
                        to: target.to_string(),
                    });
                }
                Some(target)
            }
        }
    }

    fn binary_type(&mut self, op: BinOp, left: Type, right: Type) -> Option<Type> {
        if let Some(ty) = type_system::binary_result(op, &left, &right) {
            return Some(ty);
        }

        if op.is_logical() {
            self.error(Error::NonBooleanOperands { op: op.to_string() });
            return Some(Type::BOOLEAN);
        }
        self.error(Error::InvalidOperands {
            op: op.to_string(),
            left: describe(Some(&left)),
            right: describe(Some(&right)),
        });
        if op.is_comparison() {
            Some(Type::BOOLEAN)
        } else {
            // keep analysing with the left operand's type
            Some(left)
        }
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn analyze(program: &mut Program) -> Vec<Diagnostic> {
        SemanticAnalyzer::new().analyze(program)
    }

    fn analyze_stmts(stmts: Vec<Stmt>) -> Vec<Diagnostic> {
        analyze(&mut Program::new(stmts))
    }

    fn messages(diags: &[Diagnostic]) -> Vec<&str> {
        diags.iter().map(|d| d.message.as_str()).collect()
    }

    fn int_var(name: &str, value: i64) -> Stmt {
        Stmt::var(name, Type::INTEGER, Some(Expr::int(value)))
    }

    #[test]
    fn test_same_scope_redeclaration() {
        let diags = analyze_stmts(vec![int_var("x", 1), int_var("x", 2), Stmt::print(Expr::var("x"))]);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("already declared"));
    }

    #[test]
    fn test_redeclaration_still_checks_initializer() {
        let diags = analyze_stmts(vec![
            int_var("x", 1),
            Stmt::var(
                "x",
                Type::INTEGER,
                Some(Expr::binary(Expr::var("ghost"), BinOp::Add, Expr::int(1))),
            ),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Variable x is already declared in this scope",
                "Undefined variable 'ghost'",
            ]
        );

        // names read by the rejected initializer still count as used
        let mut program = Program::new(vec![
            int_var("seed", 3),
            int_var("x", 1),
            Stmt::var("x", Type::INTEGER, Some(Expr::var("seed"))),
            Stmt::print(Expr::var("x")),
        ]);
        assert_eq!(analyze(&mut program).len(), 1);
        assert_eq!(program.statements[0], int_var("seed", 3));
    }

    #[test]
    fn test_nested_scope_shadowing() {
        let diags = analyze_stmts(vec![
            int_var("x", 1),
            Stmt::If {
                cond: Expr::boolean(true),
                then_branch: vec![
                    Stmt::var("x", Type::REAL, Some(Expr::real(2.0))),
                    Stmt::print(Expr::var("x")),
                ],
                else_branch: vec![],
            },
            Stmt::print(Expr::var("x")),
        ]);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_undefined_variable_in_print() {
        let diags = analyze_stmts(vec![Stmt::print(Expr::var("a"))]);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Undefined variable"));
    }

    #[test]
    fn test_missing_return() {
        let diags = analyze_stmts(vec![Stmt::routine(
            "f",
            vec![],
            Some(Type::INTEGER),
            vec![Stmt::print(Expr::int(1))],
        )]);
        assert_eq!(messages(&diags), vec!["Routine 'f' must return a value"]);

        let diags = analyze_stmts(vec![Stmt::routine(
            "f",
            vec![],
            Some(Type::INTEGER),
            vec![Stmt::print(Expr::int(1)), Stmt::ret(Expr::int(0))],
        )]);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_return_through_both_branches() {
        let diags = analyze_stmts(vec![Stmt::routine(
            "sign",
            vec![("n", Type::INTEGER)],
            Some(Type::INTEGER),
            vec![Stmt::If {
                cond: Expr::binary(Expr::var("n"), BinOp::Lt, Expr::int(0)),
                then_branch: vec![Stmt::ret(Expr::int(-1))],
                else_branch: vec![Stmt::ret(Expr::int(1))],
            }],
        )]);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_return_outside_routine() {
        let diags = analyze_stmts(vec![Stmt::ret(Expr::int(1))]);
        assert_eq!(messages(&diags), vec!["Return statement not allowed outside a routine"]);
    }

    #[test]
    fn test_return_value_checks() {
        let diags = analyze_stmts(vec![
            Stmt::routine("p", vec![], None, vec![Stmt::ret(Expr::int(1))]),
            Stmt::routine("q", vec![], Some(Type::BOOLEAN), vec![Stmt::ret(Expr::int(1))]),
        ]);
        assert_eq!(diags.len(), 2);
        assert!(diags[0].message.contains("Unexpected return value"));
        assert!(diags[1].message.contains("Type mismatch in return"));
    }

    #[test]
    fn test_constant_folding_in_declaration() {
        let mut program = Program::new(vec![
            Stmt::var(
                "x",
                Type::INTEGER,
                Some(Expr::binary(Expr::int(2), BinOp::Add, Expr::int(3))),
            ),
            Stmt::print(Expr::var("x")),
        ]);
        assert!(analyze(&mut program).is_empty());
        assert_eq!(program.statements[0], int_var("x", 5));
    }

    #[test]
    fn test_unused_declaration_removed() {
        let mut program = Program::new(vec![
            int_var("unused", 1),
            int_var("shown", 2),
            Stmt::print(Expr::var("shown")),
        ]);
        assert!(analyze(&mut program).is_empty());
        assert_eq!(
            program.statements,
            vec![int_var("shown", 2), Stmt::print(Expr::var("shown"))]
        );
    }

    #[test]
    fn test_unused_aggregates_are_kept() {
        let mut program = Program::new(vec![
            Stmt::record("Point", vec![("x", Type::INTEGER)]),
            Stmt::TypeDecl {
                name: "Row".into(),
                ty: Type::array(Type::REAL, 2),
            },
            Stmt::var("p", Type::named("Point"), None),
            Stmt::var("arr", Type::array(Type::INTEGER, 3), None),
            Stmt::var("row", Type::named("Row"), None),
            int_var("unused", 1),
        ]);
        assert!(analyze(&mut program).is_empty());

        let names: Vec<_> = program
            .statements
            .iter()
            .filter_map(|s| match s {
                Stmt::VarDecl(d) => Some(d.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["p", "arr", "row"]);
    }

    #[test]
    fn test_options_disable_rewrites() {
        let original = Program::new(vec![
            Stmt::var(
                "unused",
                Type::INTEGER,
                Some(Expr::binary(Expr::int(2), BinOp::Mul, Expr::int(3))),
            ),
        ]);
        let mut program = original.clone();
        let options = AnalyzerOptions {
            fold_constants: false,
            remove_unused: false,
        };
        assert!(SemanticAnalyzer::with_options(options).analyze(&mut program).is_empty());
        assert_eq!(program, original);
    }

    #[test]
    fn test_inferred_type_is_recorded() {
        let mut program = Program::new(vec![
            Stmt::VarDecl(VarDecl {
                name: "r".into(),
                ty: None,
                initializer: Some(Expr::binary(Expr::int(1), BinOp::Mul, Expr::real(2.5))),
            }),
            Stmt::print(Expr::var("r")),
        ]);
        let options = AnalyzerOptions {
            fold_constants: false,
            remove_unused: true,
        };
        assert!(SemanticAnalyzer::with_options(options).analyze(&mut program).is_empty());
        match &program.statements[0] {
            Stmt::VarDecl(decl) => assert_eq!(decl.ty, Some(Type::REAL)),
            other => panic!("Expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_untyped_declaration() {
        let diags = analyze_stmts(vec![Stmt::VarDecl(VarDecl {
            name: "x".into(),
            ty: None,
            initializer: None,
        })]);
        assert_eq!(messages(&diags), vec!["Variable x needs a type or an initializer"]);
    }

    #[test]
    fn test_assignment_compatibility() {
        let diags = analyze_stmts(vec![
            Stmt::var("r", Type::REAL, None),
            Stmt::assign("r", Expr::int(3)),
            Stmt::var("i", Type::INTEGER, None),
            Stmt::assign("i", Expr::real(3.0)),
            Stmt::assign("s", Expr::string("x")),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Type mismatch in assignment to i: expected integer, got real",
                "Undefined variable 's'",
            ]
        );
    }

    #[test]
    fn test_conditions_must_be_boolean() {
        let diags = analyze_stmts(vec![
            Stmt::If {
                cond: Expr::int(1),
                then_branch: vec![],
                else_branch: vec![],
            },
            Stmt::While {
                cond: Expr::binary(Expr::int(1), BinOp::Lt, Expr::int(2)),
                body: vec![],
            },
        ]);
        assert_eq!(
            messages(&diags),
            vec!["If condition must be a boolean expression, got integer"]
        );
    }

    #[test]
    fn test_for_loop_variable() {
        let diags = analyze_stmts(vec![
            Stmt::var("i", Type::INTEGER, None),
            Stmt::for_loop("i", Expr::int(1), Expr::int(5), false, vec![Stmt::print(Expr::var("i"))]),
        ]);
        assert!(diags.is_empty(), "{:?}", diags);

        let diags = analyze_stmts(vec![Stmt::for_loop(
            "i",
            Expr::int(5),
            Expr::int(1),
            true,
            vec![Stmt::print(Expr::var("i"))],
        )]);
        assert_eq!(messages(&diags), vec!["Undefined loop variable i"]);

        let diags = analyze_stmts(vec![
            Stmt::var("i", Type::REAL, None),
            Stmt::for_loop("i", Expr::int(1), Expr::real(5.0), false, vec![]),
        ]);
        assert_eq!(diags.len(), 2);
        assert!(diags[0].message.contains("for loop range"));
        assert!(diags[1].message.contains("Loop variable i must be an integer"));
    }

    #[test]
    fn test_loop_body_is_scoped_to_loop() {
        let diags = analyze_stmts(vec![
            Stmt::var("i", Type::INTEGER, None),
            Stmt::for_loop(
                "i",
                Expr::int(1),
                Expr::int(2),
                false,
                vec![int_var("step", 1)],
            ),
            Stmt::print(Expr::var("step")),
        ]);
        assert_eq!(messages(&diags), vec!["Undefined variable 'step'"]);
    }

    #[test]
    fn test_arrays() {
        let diags = analyze_stmts(vec![
            Stmt::array("a", Type::INTEGER, 3),
            Stmt::assign_element("a", Expr::int(0), Expr::int(7)),
            Stmt::assign_element("a", Expr::real(0.0), Expr::int(7)),
            Stmt::print(Expr::index("a", Expr::int(0))),
            Stmt::array("bad", Type::INTEGER, 0),
            Stmt::var("n", Type::INTEGER, Some(Expr::int(1))),
            Stmt::print(Expr::index("n", Expr::int(0))),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Array size must be positive, got 0 for bad",
                "Array index must be an integer, got real",
                "Variable n is not an array",
            ]
        );
    }

    #[test]
    fn test_records() {
        let diags = analyze_stmts(vec![
            Stmt::record("Point", vec![("x", Type::INTEGER), ("y", Type::REAL)]),
            Stmt::var("p", Type::named("Point"), None),
            Stmt::assign_field("p", "x", Expr::int(1)),
            Stmt::assign_field("p", "y", Expr::int(2)),
            Stmt::print(Expr::field("p", "y")),
            Stmt::assign_field("p", "z", Expr::int(3)),
            Stmt::var("q", Type::named("Missing"), None),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Unknown type Missing",
                "Field z does not exist in record p",
            ]
        );
    }

    #[test]
    fn test_type_aliases() {
        let diags = analyze_stmts(vec![
            Stmt::TypeDecl { name: "Count".into(), ty: Type::INTEGER },
            Stmt::TypeDecl { name: "Total".into(), ty: Type::named("Count") },
            Stmt::var("n", Type::named("Total"), Some(Expr::int(4))),
            Stmt::assign("n", Expr::binary(Expr::var("n"), BinOp::Add, Expr::int(1))),
            Stmt::TypeDecl { name: "Count".into(), ty: Type::REAL },
        ]);
        assert_eq!(messages(&diags), vec!["Type Count is already defined"]);
    }

    #[test]
    fn test_routine_calls() {
        let diags = analyze_stmts(vec![
            Stmt::routine(
                "scale",
                vec![("v", Type::REAL), ("k", Type::INTEGER)],
                Some(Type::REAL),
                vec![Stmt::ret(Expr::binary(Expr::var("v"), BinOp::Mul, Expr::var("k")))],
            ),
            Stmt::routine("show", vec![("v", Type::REAL)], None, vec![Stmt::print(Expr::var("v"))]),
            Stmt::print(Expr::call("scale", vec![Expr::int(1), Expr::int(2)])),
            Stmt::print(Expr::call("scale", vec![Expr::int(1)])),
            Stmt::print(Expr::call("scale", vec![Expr::int(1), Expr::real(2.0)])),
            Stmt::call("show", vec![Expr::real(1.0)]),
            Stmt::print(Expr::call("show", vec![Expr::real(1.0)])),
            Stmt::call("missing", vec![]),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Wrong number of arguments in call to scale: expected 2, got 1",
                "Type mismatch in argument 2 of call to scale: expected integer, got real",
                "Routine show does not return a value and cannot be used in an expression",
                "Undefined routine missing",
            ]
        );
    }

    #[test]
    fn test_duplicate_routine_and_parameter() {
        let diags = analyze_stmts(vec![
            Stmt::routine("f", vec![("a", Type::INTEGER), ("a", Type::INTEGER)], None, vec![]),
            Stmt::routine("f", vec![], None, vec![]),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Routine f is already defined",
                "Parameter a is already declared in routine f",
            ]
        );
    }

    #[test]
    fn test_casts() {
        let diags = analyze_stmts(vec![
            Stmt::print(Expr::cast(Expr::int(1), Type::BOOLEAN)),
            Stmt::print(Expr::cast(Expr::real(1.5), Type::BOOLEAN)),
            Stmt::print(Expr::cast(Expr::string("1"), Type::BOOLEAN)),
        ]);
        assert_eq!(messages(&diags), vec!["Invalid type cast from string to boolean"]);
    }

    #[test]
    fn test_invalid_operands_are_reported() {
        let diags = analyze_stmts(vec![
            Stmt::print(Expr::binary(Expr::string("a"), BinOp::Add, Expr::int(1))),
            Stmt::print(Expr::binary(Expr::int(1), BinOp::And, Expr::boolean(true))),
            Stmt::print(Expr::binary(Expr::boolean(true), BinOp::Lt, Expr::int(1))),
            Stmt::print(Expr::unary(UnOp::Not, Expr::int(1))),
        ]);
        assert_eq!(
            messages(&diags),
            vec![
                "Operator '+' cannot be applied to string and integer",
                "Logical operator 'and' requires boolean operands",
                "Operator '<' cannot be applied to boolean and integer",
                "Operator 'not' cannot be applied to integer",
            ]
        );
    }

    #[test]
    fn test_nested_declarations_rejected() {
        let diags = analyze_stmts(vec![Stmt::routine(
            "outer",
            vec![],
            None,
            vec![
                Stmt::routine("inner", vec![], None, vec![]),
                Stmt::record("R", vec![("x", Type::INTEGER)]),
            ],
        )]);
        assert_eq!(
            messages(&diags),
            vec![
                "Routine inner is only allowed at the top level",
                "Record type R is only allowed at the top level",
            ]
        );
    }

    #[test]
    fn test_globals_visible_in_routines() {
        let diags = analyze_stmts(vec![
            Stmt::routine("bump", vec![], None, vec![Stmt::assign(
                "counter",
                Expr::binary(Expr::var("counter"), BinOp::Add, Expr::int(1)),
            )]),
            int_var("counter", 0),
            Stmt::call("bump", vec![]),
        ]);
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn test_print_rejects_aggregates() {
        let diags = analyze_stmts(vec![
            Stmt::array("a", Type::INTEGER, 2),
            Stmt::print(Expr::var("a")),
        ]);
        assert_eq!(messages(&diags), vec!["Cannot print a value of type array[2] integer"]);
    }

    #[test]
    fn test_analyzer_is_reusable() {
        let mut analyzer = SemanticAnalyzer::new();
        let mut bad = Program::new(vec![Stmt::print(Expr::var("a"))]);
        assert_eq!(analyzer.analyze(&mut bad).len(), 1);

        let mut good = Program::new(vec![int_var("a", 1), Stmt::print(Expr::var("a"))]);
        assert!(analyzer.analyze(&mut good).is_empty());
        assert!(analyzer.symbols().global_type("a").is_some());
    }
}
