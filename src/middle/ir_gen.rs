//! IR Generator - AST to stack-machine IR
//!
//! Lowers a validated program into [`Module`] form: one instruction list
//! per routine, a module initializer for globals and top-level statements,
//! and a type definition per record.

use std::collections::HashMap;

use log::{debug, trace};

use crate::frontend::ast::{
    ends_with_return, AssignTarget, BinOp, Expr, Program, RoutineCall, RoutineDecl, Stmt, UnOp,
    VarDecl,
};
use crate::frontend::symbol_table::SymbolTable;
use crate::middle::ir::{
    max_stack_depth, BinaryOp, Condition, Constant, Conversion, GlobalDef, Instruction, Label,
    Module, RoutineCode, TypeDefinition, UnaryOp, ValueKind,
};
use crate::types::type_system::{self, Coercion};
use crate::types::{PrimitiveType, Type};
use crate::utils::{Error, Result};

/// Name given to the module initializer routine
pub const INITIALIZER_NAME: &str = "initializer";

/// Code generation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Name of the generated module (the class name on class-based targets)
    pub class_name: String,
    /// Place two-slot locals on even slot numbers
    pub align_wide_slots: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            class_name: "Main".to_string(),
            align_wide_slots: true,
        }
    }
}

// ==================== Routine State ====================

/// Monotonic local slot allocator. Slots are never reused.
#[derive(Debug)]
struct SlotAllocator {
    next: usize,
    align_wide: bool,
}

impl SlotAllocator {
    fn new(align_wide: bool) -> Self {
        Self { next: 0, align_wide }
    }

    /// Parameters are packed in declaration order
    fn allocate_param(&mut self, width: usize) -> usize {
        let slot = self.next;
        self.next += width;
        slot
    }

    fn allocate(&mut self, width: usize) -> usize {
        if self.align_wide && width == 2 && self.next % 2 == 1 {
            self.next += 1;
        }
        let slot = self.next;
        self.next += width;
        trace!("allocated slot {} (width {})", slot, width);
        slot
    }

    fn high_water(&self) -> usize {
        self.next
    }
}

/// A local variable or parameter
#[derive(Debug, Clone)]
struct Local {
    slot: usize,
    ty: Type,
    kind: ValueKind,
}

/// Where a named variable lives
#[derive(Debug, Clone)]
enum Place {
    Local(Local),
    Global { name: String, ty: Type, kind: ValueKind },
}

impl Place {
    fn ty(&self) -> &Type {
        match self {
            Place::Local(local) => &local.ty,
            Place::Global { ty, .. } => ty,
        }
    }
}

/// Per-routine emission state
struct RoutineEmitter {
    name: String,
    return_type: Type,
    slots: SlotAllocator,
    scopes: Vec<HashMap<String, Local>>,
    code: Vec<Instruction>,
}

impl RoutineEmitter {
    fn new(name: &str, return_type: Type, align_wide: bool) -> Self {
        Self {
            name: name.to_string(),
            return_type,
            slots: SlotAllocator::new(align_wide),
            scopes: vec![HashMap::new()],
            code: Vec::new(),
        }
    }

    fn emit(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    fn enter_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn bind(&mut self, name: &str, local: Local) {
        if let Some(frame) = self.scopes.last_mut() {
            frame.insert(name.to_string(), local);
        }
    }

    fn declare_param(&mut self, name: &str, ty: Type, kind: ValueKind) {
        let slot = self.slots.allocate_param(kind.width());
        self.bind(name, Local { slot, ty, kind });
    }

    fn declare(&mut self, name: &str, ty: Type, kind: ValueKind) -> usize {
        let slot = self.slots.allocate(kind.width());
        self.bind(name, Local { slot, ty, kind });
        slot
    }

    /// A slot no name refers to
    fn temporary(&mut self, kind: &ValueKind) -> usize {
        self.slots.allocate(kind.width())
    }

    fn lookup(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|frame| frame.get(name))
    }

    fn finish(self, params: Vec<ValueKind>, ret: ValueKind) -> RoutineCode {
        RoutineCode {
            max_stack: max_stack_depth(&self.code),
            max_locals: self.slots.high_water(),
            name: self.name,
            params,
            ret,
            instructions: self.code,
        }
    }
}

// ==================== Code Generator ====================

/// Code generator
pub struct CodeGenerator<'a> {
    symbols: &'a SymbolTable,
    options: CodegenOptions,
    /// Shared by every routine so labels are unique module-wide
    label_counter: usize,
    globals: HashMap<String, (Type, ValueKind)>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(symbols: &'a SymbolTable, options: CodegenOptions) -> Self {
        Self {
            symbols,
            options,
            label_counter: 0,
            globals: HashMap::new(),
        }
    }

    /// Generate IR for a validated program
    pub fn generate(&mut self, program: &Program) -> Result<Module> {
        self.label_counter = 0;
        self.globals.clear();
        let mut module = Module::new(&self.options.class_name);

        for stmt in &program.statements {
            if let Stmt::RecordTypeDecl { name, fields } = stmt {
                let fields = fields
                    .iter()
                    .map(|(field, ty)| Ok((field.clone(), self.kind(ty)?)))
                    .collect::<Result<Vec<_>>>()?;
                module.types.push(TypeDefinition { name: name.clone(), fields });
            }
        }

        for stmt in &program.statements {
            let (name, ty) = match stmt {
                Stmt::VarDecl(decl) => (&decl.name, self.declared_type(decl)?),
                Stmt::ArrayDecl { name, element, size } => {
                    (name, self.resolve(&Type::array(element.clone(), *size))?)
                }
                _ => continue,
            };
            let kind = self.kind(&ty)?;
            module.globals.push(GlobalDef { name: name.clone(), kind: kind.clone() });
            self.globals.insert(name.clone(), (ty, kind));
        }

        for stmt in &program.statements {
            if let Stmt::RoutineDecl(decl) = stmt {
                module.routines.push(self.generate_routine(decl)?);
            }
        }

        module.initializer = self.generate_initializer(&program.statements)?;
        debug!(
            "generated module {}: {} routine(s), {} global(s), {} record type(s)",
            module.name,
            module.routines.len(),
            module.globals.len(),
            module.types.len()
        );
        Ok(module)
    }

    fn generate_routine(&mut self, decl: &RoutineDecl) -> Result<RoutineCode> {
        debug!("lowering routine {}", decl.name);
        let return_type = self.resolve(&decl.return_type())?;
        let ret = self.kind(&return_type)?;
        let mut r = RoutineEmitter::new(&decl.name, return_type, self.options.align_wide_slots);

        let mut params = Vec::with_capacity(decl.params.len());
        for param in &decl.params {
            let ty = self.resolve(&param.ty)?;
            let kind = self.kind(&ty)?;
            r.declare_param(&param.name, ty, kind.clone());
            params.push(kind);
        }

        for stmt in &decl.body {
            self.emit_stmt(&mut r, stmt)?;
        }
        if ret == ValueKind::Void && !ends_with_return(&decl.body) {
            r.emit(Instruction::Return(ValueKind::Void));
        }
        Ok(r.finish(params, ret))
    }

    /// Global initialization plus every top-level statement, in source order
    fn generate_initializer(&mut self, stmts: &[Stmt]) -> Result<Option<RoutineCode>> {
        let mut r = RoutineEmitter::new(INITIALIZER_NAME, Type::VOID, self.options.align_wide_slots);

        for stmt in stmts {
            match stmt {
                Stmt::VarDecl(decl) => {
                    let place = self.global(&decl.name)?;
                    self.emit_initial_value(&mut r, place.ty(), decl.initializer.as_ref())?;
                    self.store_place(&mut r, &place);
                }
                Stmt::ArrayDecl { name, .. } => {
                    let place = self.global(name)?;
                    self.emit_new_value(&mut r, place.ty())?;
                    self.store_place(&mut r, &place);
                }
                Stmt::RoutineDecl(_) | Stmt::RecordTypeDecl { .. } | Stmt::TypeDecl { .. } => {}
                other => self.emit_stmt(&mut r, other)?,
            }
        }

        if r.code.is_empty() {
            return Ok(None);
        }
        debug!("lowering module initializer");
        r.emit(Instruction::Return(ValueKind::Void));
        Ok(Some(r.finish(Vec::new(), ValueKind::Void)))
    }

    // ==================== Helpers ====================

    fn resolve(&self, ty: &Type) -> Result<Type> {
        type_system::resolve_deep(ty, self.symbols).map_err(|_| Error::UnresolvedType(ty.to_string()))
    }

    fn kind(&self, ty: &Type) -> Result<ValueKind> {
        ValueKind::of(ty, self.symbols)
    }

    fn declared_type(&self, decl: &VarDecl) -> Result<Type> {
        match &decl.ty {
            Some(ty) => self.resolve(ty),
            None => Err(Error::UnresolvedType(format!("declaration of {}", decl.name))),
        }
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.label_counter);
        self.label_counter += 1;
        trace!("new label {}", label);
        label
    }

    fn global(&self, name: &str) -> Result<Place> {
        let (ty, kind) = self
            .globals
            .get(name)
            .ok_or_else(|| Error::UnknownLocal(name.to_string()))?;
        Ok(Place::Global {
            name: name.to_string(),
            ty: ty.clone(),
            kind: kind.clone(),
        })
    }

    fn place(&self, r: &RoutineEmitter, name: &str) -> Result<Place> {
        match r.lookup(name) {
            Some(local) => Ok(Place::Local(local.clone())),
            None => self.global(name),
        }
    }

    fn load_place(&self, r: &mut RoutineEmitter, place: &Place) {
        r.emit(match place {
            Place::Local(local) => Instruction::Load { slot: local.slot, kind: local.kind.clone() },
            Place::Global { name, kind, .. } => Instruction::GetGlobal {
                name: name.clone(),
                kind: kind.clone(),
            },
        });
    }

    fn store_place(&self, r: &mut RoutineEmitter, place: &Place) {
        r.emit(match place {
            Place::Local(local) => Instruction::Store { slot: local.slot, kind: local.kind.clone() },
            Place::Global { name, kind, .. } => Instruction::PutGlobal {
                name: name.clone(),
                kind: kind.clone(),
            },
        });
    }

    fn element_type(place: &Place) -> Result<Type> {
        match place.ty() {
            Type::Array { element, .. } => Ok(element.as_ref().clone()),
            other => Err(Error::UnsupportedOperation(format!("indexing a value of type {}", other))),
        }
    }

    /// Record name and resolved type of `field` on the record held in `place`
    fn field_type(&self, place: &Place, field: &str) -> Result<(String, Type)> {
        let record = place.ty();
        let name = record
            .record_name()
            .ok_or_else(|| Error::UnsupportedOperation(format!("field access on {}", record)))?;
        let ty = record
            .field(field)
            .ok_or_else(|| Error::Internal(format!("record {} has no field {}", name, field)))?;
        Ok((name.to_string(), self.resolve(ty)?))
    }

    /// Type of an expression without emitting anything
    fn type_of(&self, r: &RoutineEmitter, expr: &Expr) -> Result<Type> {
        match expr {
            Expr::IntLit(_) => Ok(Type::INTEGER),
            Expr::RealLit(_) => Ok(Type::REAL),
            Expr::BoolLit(_) => Ok(Type::BOOLEAN),
            Expr::StringLit(_) => Ok(Type::STRING),
            Expr::VarRef(name) => Ok(self.place(r, name)?.ty().clone()),
            Expr::Binary { left, op, right } => {
                let left = self.type_of(r, left)?;
                let right = self.type_of(r, right)?;
                type_system::binary_result(*op, &left, &right).ok_or_else(|| {
                    Error::UnsupportedOperation(format!("{} on {} and {}", op, left, right))
                })
            }
            Expr::Unary { op, operand } => {
                let operand = self.type_of(r, operand)?;
                type_system::unary_result(*op, &operand)
                    .ok_or_else(|| Error::UnsupportedOperation(format!("{} on {}", op, operand)))
            }
            Expr::ArrayAccess { array, .. } => Self::element_type(&self.place(r, array)?),
            Expr::FieldAccess { record, field } => {
                Ok(self.field_type(&self.place(r, record)?, field)?.1)
            }
            Expr::RoutineCall(call) => {
                let signature = self
                    .symbols
                    .get_routine(&call.name)
                    .ok_or_else(|| Error::UnknownRoutine(call.name.clone()))?;
                self.resolve(&signature.return_type)
            }
            Expr::TypeCast { target, .. } => self.resolve(target),
        }
    }

    // ==================== Statements ====================

    fn emit_block(&mut self, r: &mut RoutineEmitter, stmts: &[Stmt]) -> Result<()> {
        r.enter_scope();
        for stmt in stmts {
            self.emit_stmt(r, stmt)?;
        }
        r.exit_scope();
        Ok(())
    }

    fn emit_stmt(&mut self, r: &mut RoutineEmitter, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::VarDecl(decl) => {
                let ty = self.declared_type(decl)?;
                let kind = self.kind(&ty)?;
                // the initializer sees the enclosing binding of the same name
                self.emit_initial_value(r, &ty, decl.initializer.as_ref())?;
                let slot = r.declare(&decl.name, ty, kind.clone());
                r.emit(Instruction::Store { slot, kind });
            }

            Stmt::ArrayDecl { name, element, size } => {
                let ty = self.resolve(&Type::array(element.clone(), *size))?;
                let kind = self.kind(&ty)?;
                self.emit_new_value(r, &ty)?;
                let slot = r.declare(name, ty, kind.clone());
                r.emit(Instruction::Store { slot, kind });
            }

            Stmt::Assignment { target, value } => self.emit_assignment(r, target, value)?,

            Stmt::If { cond, then_branch, else_branch } => {
                let else_label = self.new_label();
                let end_label = self.new_label();

                self.emit_expr(r, cond)?;
                r.emit(Instruction::BranchZero { cond: Condition::Eq, target: else_label });

                self.emit_block(r, then_branch)?;
                let then_returns = ends_with_return(then_branch);
                if !then_returns {
                    r.emit(Instruction::Jump(end_label));
                }

                r.emit(Instruction::Label(else_label));
                self.emit_block(r, else_branch)?;

                if !then_returns || !ends_with_return(else_branch) {
                    r.emit(Instruction::Label(end_label));
                }
            }

            Stmt::While { cond, body } => {
                let start = self.new_label();
                let end = self.new_label();

                r.emit(Instruction::Label(start));
                self.emit_expr(r, cond)?;
                r.emit(Instruction::BranchZero { cond: Condition::Eq, target: end });
                self.emit_block(r, body)?;
                r.emit(Instruction::Jump(start));
                r.emit(Instruction::Label(end));
            }

            Stmt::For { var, start, end, reverse, body } => {
                self.emit_for(r, var, start, end, *reverse, body)?
            }

            Stmt::Call(call) => {
                let ret = self.emit_call(r, call)?;
                if !ret.is_void() {
                    let kind = self.kind(&ret)?;
                    r.emit(Instruction::Pop(kind));
                }
            }

            Stmt::Return(value) => match value {
                Some(expr) => {
                    let expected = r.return_type.clone();
                    let actual = self.emit_expr(r, expr)?;
                    self.coerce(r, &expected, &actual)?;
                    let kind = self.kind(&expected)?;
                    r.emit(Instruction::Return(kind));
                }
                None => r.emit(Instruction::Return(ValueKind::Void)),
            },

            Stmt::Print(expr) => {
                let ty = self.emit_expr(r, expr)?;
                let kind = self.kind(&ty)?;
                r.emit(Instruction::Print(kind));
            }

            Stmt::RoutineDecl(RoutineDecl { name, .. })
            | Stmt::RecordTypeDecl { name, .. }
            | Stmt::TypeDecl { name, .. } => {
                return Err(Error::UnsupportedOperation(format!(
                    "nested declaration of {} in {}",
                    name, r.name
                )));
            }
        }
        Ok(())
    }

    fn emit_assignment(&mut self, r: &mut RoutineEmitter, target: &AssignTarget, value: &Expr) -> Result<()> {
        match target {
            AssignTarget::Variable(name) => {
                let place = self.place(r, name)?;
                let actual = self.emit_expr(r, value)?;
                self.coerce(r, place.ty(), &actual)?;
                self.store_place(r, &place);
            }
            AssignTarget::Element { array, index } => {
                let place = self.place(r, array)?;
                let element = Self::element_type(&place)?;
                self.load_place(r, &place);
                self.emit_expr(r, index)?;
                let actual = self.emit_expr(r, value)?;
                self.coerce(r, &element, &actual)?;
                let kind = self.kind(&element)?;
                r.emit(Instruction::ArrayStore(kind));
            }
            AssignTarget::Field { record, field } => {
                let place = self.place(r, record)?;
                let (record_name, field_ty) = self.field_type(&place, field)?;
                self.load_place(r, &place);
                let actual = self.emit_expr(r, value)?;
                self.coerce(r, &field_ty, &actual)?;
                let kind = self.kind(&field_ty)?;
                r.emit(Instruction::PutField {
                    record: record_name,
                    field: field.clone(),
                    kind,
                });
            }
        }
        Ok(())
    }

    fn emit_for(
        &mut self,
        r: &mut RoutineEmitter,
        var: &str,
        start: &Expr,
        end: &Expr,
        reverse: bool,
        body: &[Stmt],
    ) -> Result<()> {
        self.emit_expr(r, start)?;

        r.enter_scope();
        let slot = r.declare(var, Type::INTEGER, ValueKind::Int);
        r.emit(Instruction::Store { slot, kind: ValueKind::Int });

        let start_label = self.new_label();
        let end_label = self.new_label();
        let (exit_cond, step) = if reverse {
            (Condition::Lt, BinaryOp::Sub)
        } else {
            (Condition::Gt, BinaryOp::Add)
        };

        r.emit(Instruction::Label(start_label));
        r.emit(Instruction::Load { slot, kind: ValueKind::Int });
        self.emit_expr(r, end)?;
        r.emit(Instruction::CompareBranch {
            cond: exit_cond,
            kind: ValueKind::Int,
            target: end_label,
        });

        for stmt in body {
            self.emit_stmt(r, stmt)?;
        }

        r.emit(Instruction::Load { slot, kind: ValueKind::Int });
        r.emit(Instruction::Push(Constant::Int(1)));
        r.emit(Instruction::Binary { op: step, kind: ValueKind::Int });
        r.emit(Instruction::Store { slot, kind: ValueKind::Int });
        r.emit(Instruction::Jump(start_label));
        r.emit(Instruction::Label(end_label));
        r.exit_scope();
        Ok(())
    }

    /// Push the value a declaration starts with
    fn emit_initial_value(&mut self, r: &mut RoutineEmitter, ty: &Type, init: Option<&Expr>) -> Result<()> {
        match init {
            Some(expr) => {
                let actual = self.emit_expr(r, expr)?;
                self.coerce(r, ty, &actual)?;
                Ok(())
            }
            None => self.emit_new_value(r, ty),
        }
    }

    /// Push a fresh value of `ty`: zero for scalars, a new record or array for
    /// aggregates. Aggregate fields and elements are created recursively.
    fn emit_new_value(&mut self, r: &mut RoutineEmitter, ty: &Type) -> Result<()> {
        match self.resolve(ty)? {
            Type::Primitive(p) => {
                let zero = match p {
                    PrimitiveType::Integer => Constant::Int(0),
                    PrimitiveType::Real => Constant::Real(0.0),
                    PrimitiveType::Boolean => Constant::Bool(false),
                    PrimitiveType::String => Constant::Str(String::new()),
                    PrimitiveType::Void => {
                        return Err(Error::UnsupportedOperation("a value of type void".to_string()))
                    }
                };
                r.emit(Instruction::Push(zero));
            }

            Type::Record { name, fields } => {
                r.emit(Instruction::NewRecord(name.clone()));
                for (field, field_ty) in &fields {
                    let field_ty = self.resolve(field_ty)?;
                    if matches!(field_ty, Type::Array { .. } | Type::Record { .. }) {
                        let kind = self.kind(&field_ty)?;
                        r.emit(Instruction::Dup);
                        self.emit_new_value(r, &field_ty)?;
                        r.emit(Instruction::PutField {
                            record: name.clone(),
                            field: field.clone(),
                            kind,
                        });
                    }
                }
            }

            Type::Array { element, size } => {
                let kind = self.kind(&element)?;
                r.emit(Instruction::Push(Constant::Int(size)));
                r.emit(Instruction::NewArray(kind.clone()));
                if matches!(*element, Type::Array { .. } | Type::Record { .. }) {
                    self.emit_fill(r, &element, size, kind)?;
                }
            }

            Type::Named(name) => return Err(Error::UnresolvedType(name)),
        }
        Ok(())
    }

    /// Store a fresh aggregate into every element of the array on top of the stack
    fn emit_fill(&mut self, r: &mut RoutineEmitter, element: &Type, size: i64, kind: ValueKind) -> Result<()> {
        self.emit_index_loop(r, size, |codegen, r, index| {
            r.emit(Instruction::Dup);
            r.emit(Instruction::Load { slot: index, kind: ValueKind::Int });
            codegen.emit_new_value(r, element)?;
            r.emit(Instruction::ArrayStore(kind));
            Ok(())
        })
    }

    /// Replace the array on top of the stack with a new array of `to`
    /// elements, each converted from the matching `from` element
    fn emit_widened_copy(&mut self, r: &mut RoutineEmitter, to: &Type, from: &Type, size: i64) -> Result<()> {
        let source_kind = self.kind(&Type::array(from.clone(), size))?;
        let from_kind = self.kind(from)?;
        let to_kind = self.kind(to)?;
        trace!("widening array[{}] {} to {}", size, from, to);

        let source = r.temporary(&source_kind);
        r.emit(Instruction::Store { slot: source, kind: source_kind.clone() });
        r.emit(Instruction::Push(Constant::Int(size)));
        r.emit(Instruction::NewArray(to_kind.clone()));
        self.emit_index_loop(r, size, |codegen, r, index| {
            r.emit(Instruction::Dup);
            r.emit(Instruction::Load { slot: index, kind: ValueKind::Int });
            r.emit(Instruction::Load { slot: source, kind: source_kind });
            r.emit(Instruction::Load { slot: index, kind: ValueKind::Int });
            r.emit(Instruction::ArrayLoad(from_kind));
            codegen.coerce(r, to, from)?;
            r.emit(Instruction::ArrayStore(to_kind));
            Ok(())
        })
    }

    /// Run `body` once per index in `0..size`. The index lives in a
    /// temporary slot, which `body` receives.
    fn emit_index_loop<F>(&mut self, r: &mut RoutineEmitter, size: i64, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self, &mut RoutineEmitter, usize) -> Result<()>,
    {
        let index = r.temporary(&ValueKind::Int);
        let start = self.new_label();
        let end = self.new_label();

        r.emit(Instruction::Push(Constant::Int(0)));
        r.emit(Instruction::Store { slot: index, kind: ValueKind::Int });
        r.emit(Instruction::Label(start));
        r.emit(Instruction::Load { slot: index, kind: ValueKind::Int });
        r.emit(Instruction::Push(Constant::Int(size)));
        r.emit(Instruction::CompareBranch { cond: Condition::Ge, kind: ValueKind::Int, target: end });
        body(self, r, index)?;
        r.emit(Instruction::Load { slot: index, kind: ValueKind::Int });
        r.emit(Instruction::Push(Constant::Int(1)));
        r.emit(Instruction::Binary { op: BinaryOp::Add, kind: ValueKind::Int });
        r.emit(Instruction::Store { slot: index, kind: ValueKind::Int });
        r.emit(Instruction::Jump(start));
        r.emit(Instruction::Label(end));
        Ok(())
    }

    // ==================== Expressions ====================

    /// Emit code leaving the value of `expr` on the stack; returns its type
    fn emit_expr(&mut self, r: &mut RoutineEmitter, expr: &Expr) -> Result<Type> {
        match expr {
            Expr::IntLit(v) => {
                r.emit(Instruction::Push(Constant::Int(*v)));
                Ok(Type::INTEGER)
            }
            Expr::RealLit(v) => {
                r.emit(Instruction::Push(Constant::Real(*v)));
                Ok(Type::REAL)
            }
            Expr::BoolLit(b) => {
                r.emit(Instruction::Push(Constant::Bool(*b)));
                Ok(Type::BOOLEAN)
            }
            Expr::StringLit(s) => {
                r.emit(Instruction::Push(Constant::Str(s.clone())));
                Ok(Type::STRING)
            }

            Expr::VarRef(name) => {
                let place = self.place(r, name)?;
                self.load_place(r, &place);
                Ok(place.ty().clone())
            }

            Expr::Binary { left, op, right } => self.emit_binary(r, left, *op, right),

            Expr::Unary { op: UnOp::Not, operand } => {
                self.emit_expr(r, operand)?;
                self.emit_bool_select(r, Condition::Eq);
                Ok(Type::BOOLEAN)
            }
            Expr::Unary { op: UnOp::Neg, operand } => {
                let ty = self.emit_expr(r, operand)?;
                let kind = self.kind(&ty)?;
                r.emit(Instruction::Unary { op: UnaryOp::Neg, kind });
                Ok(ty)
            }

            Expr::ArrayAccess { array, index } => {
                let place = self.place(r, array)?;
                let element = Self::element_type(&place)?;
                self.load_place(r, &place);
                self.emit_expr(r, index)?;
                let kind = self.kind(&element)?;
                r.emit(Instruction::ArrayLoad(kind));
                Ok(element)
            }

            Expr::FieldAccess { record, field } => {
                let place = self.place(r, record)?;
                let (record_name, field_ty) = self.field_type(&place, field)?;
                self.load_place(r, &place);
                let kind = self.kind(&field_ty)?;
                r.emit(Instruction::GetField {
                    record: record_name,
                    field: field.clone(),
                    kind,
                });
                Ok(field_ty)
            }

            Expr::RoutineCall(call) => {
                let ty = self.emit_call(r, call)?;
                if ty.is_void() {
                    return Err(Error::UnsupportedOperation(format!(
                        "void call to {} used as a value",
                        call.name
                    )));
                }
                Ok(ty)
            }

            Expr::TypeCast { expr: inner, target } => {
                let source = self.emit_expr(r, inner)?;
                let target = self.resolve(target)?;
                let coercion = type_system::coercion(&source, &target).ok_or_else(|| {
                    Error::UnsupportedOperation(format!("cast from {} to {}", source, target))
                })?;
                self.apply_coercion(r, coercion);
                Ok(target)
            }
        }
    }

    fn emit_binary(&mut self, r: &mut RoutineEmitter, left: &Expr, op: BinOp, right: &Expr) -> Result<Type> {
        match op {
            BinOp::And | BinOp::Or => {
                // and: any zero operand short-circuits to false; or: any non-zero to true
                let (exit_on, short_value) = match op {
                    BinOp::And => (Condition::Eq, false),
                    _ => (Condition::Ne, true),
                };
                let short = self.new_label();
                let end = self.new_label();

                self.emit_expr(r, left)?;
                r.emit(Instruction::BranchZero { cond: exit_on, target: short });
                self.emit_expr(r, right)?;
                r.emit(Instruction::BranchZero { cond: exit_on, target: short });
                r.emit(Instruction::Push(Constant::Bool(!short_value)));
                r.emit(Instruction::Jump(end));
                r.emit(Instruction::Label(short));
                r.emit(Instruction::Push(Constant::Bool(short_value)));
                r.emit(Instruction::Label(end));
                Ok(Type::BOOLEAN)
            }

            BinOp::Xor => {
                self.emit_expr(r, left)?;
                self.emit_expr(r, right)?;
                r.emit(Instruction::Binary { op: BinaryOp::Xor, kind: ValueKind::Bool });
                Ok(Type::BOOLEAN)
            }

            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                let right_ty = self.type_of(r, right)?;
                let left_ty = self.emit_expr(r, left)?;
                let operand = type_system::comparison_operands(&left_ty, &right_ty).ok_or_else(|| {
                    Error::UnsupportedOperation(format!("{} on {} and {}", op, left_ty, right_ty))
                })?;
                self.coerce(r, &operand, &left_ty)?;
                self.emit_expr(r, right)?;
                self.coerce(r, &operand, &right_ty)?;

                let cond = match op {
                    BinOp::Lt => Condition::Lt,
                    BinOp::Le => Condition::Le,
                    BinOp::Gt => Condition::Gt,
                    BinOp::Ge => Condition::Ge,
                    BinOp::Eq => Condition::Eq,
                    _ => Condition::Ne,
                };
                let is_true = self.new_label();
                let end = self.new_label();
                let kind = self.kind(&operand)?;
                r.emit(Instruction::CompareBranch { cond, kind, target: is_true });
                r.emit(Instruction::Push(Constant::Bool(false)));
                r.emit(Instruction::Jump(end));
                r.emit(Instruction::Label(is_true));
                r.emit(Instruction::Push(Constant::Bool(true)));
                r.emit(Instruction::Label(end));
                Ok(Type::BOOLEAN)
            }

            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let right_ty = self.type_of(r, right)?;
                let left_ty = self.emit_expr(r, left)?;
                let result = type_system::binary_result(op, &left_ty, &right_ty).ok_or_else(|| {
                    Error::UnsupportedOperation(format!("{} on {} and {}", op, left_ty, right_ty))
                })?;
                self.coerce(r, &result, &left_ty)?;
                self.emit_expr(r, right)?;
                self.coerce(r, &result, &right_ty)?;

                let op = match op {
                    BinOp::Add => BinaryOp::Add,
                    BinOp::Sub => BinaryOp::Sub,
                    BinOp::Mul => BinaryOp::Mul,
                    BinOp::Div => BinaryOp::Div,
                    _ => BinaryOp::Rem,
                };
                let kind = self.kind(&result)?;
                r.emit(Instruction::Binary { op, kind });
                Ok(result)
            }
        }
    }

    fn emit_call(&mut self, r: &mut RoutineEmitter, call: &RoutineCall) -> Result<Type> {
        let symbols = self.symbols;
        let signature = symbols
            .get_routine(&call.name)
            .ok_or_else(|| Error::UnknownRoutine(call.name.clone()))?;
        if signature.params.len() != call.args.len() {
            return Err(Error::Internal(format!(
                "call to {} with {} argument(s), expected {}",
                call.name,
                call.args.len(),
                signature.params.len()
            )));
        }

        let mut params = Vec::with_capacity(call.args.len());
        for (arg, param) in call.args.iter().zip(&signature.params) {
            let param = self.resolve(param)?;
            let actual = self.emit_expr(r, arg)?;
            self.coerce(r, &param, &actual)?;
            params.push(self.kind(&param)?);
        }

        let ret_ty = self.resolve(&signature.return_type)?;
        r.emit(Instruction::Call {
            name: call.name.clone(),
            params,
            ret: self.kind(&ret_ty)?,
        });
        Ok(ret_ty)
    }

    // ==================== Coercions ====================

    /// Implicit widening when a value of `actual` lands in an `expected` slot
    fn coerce(&mut self, r: &mut RoutineEmitter, expected: &Type, actual: &Type) -> Result<()> {
        if let (Type::Array { element: to, size }, Type::Array { element: from, .. }) = (expected, actual) {
            if type_system::needs_widening(to, from) {
                return self.emit_widened_copy(r, to, from, *size);
            }
            return Ok(());
        }
        let coercion = type_system::implicit_coercion(expected, actual);
        self.apply_coercion(r, coercion);
        Ok(())
    }

    fn apply_coercion(&mut self, r: &mut RoutineEmitter, coercion: Coercion) {
        match coercion {
            Coercion::Identity | Coercion::BoolToInt => {}
            Coercion::IntToReal | Coercion::BoolToReal => {
                r.emit(Instruction::Convert(Conversion::IntToReal))
            }
            Coercion::RealToInt => r.emit(Instruction::Convert(Conversion::RealToInt)),
            Coercion::IntToBool => self.emit_bool_select(r, Condition::Ne),
            Coercion::RealToBool => {
                r.emit(Instruction::Convert(Conversion::RealToInt));
                self.emit_bool_select(r, Condition::Ne);
            }
        }
    }

    /// Replace the integer on top of the stack with canonical `true` when it
    /// compares to zero with `cond`, `false` otherwise
    fn emit_bool_select(&mut self, r: &mut RoutineEmitter, cond: Condition) {
        let is_true = self.new_label();
        let end = self.new_label();
        r.emit(Instruction::BranchZero { cond, target: is_true });
        r.emit(Instruction::Push(Constant::Bool(false)));
        r.emit(Instruction::Jump(end));
        r.emit(Instruction::Label(is_true));
        r.emit(Instruction::Push(Constant::Bool(true)));
        r.emit(Instruction::Label(end));
    }
}
