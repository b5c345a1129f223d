//! Symbol table: a scope stack for variables plus flat namespaces for
//! routines and named types.

use std::collections::HashMap;

use log::trace;

use crate::types::{PrimitiveType, Type, TypeEnvironment};

/// Signature of a declared routine
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineSignature {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
}

impl RoutineSignature {
    pub fn is_void(&self) -> bool {
        self.return_type.is_void()
    }
}

/// A scope frame containing variables
type Frame = HashMap<String, Type>;

/// Symbol table with nested scopes
#[derive(Debug, Clone)]
pub struct SymbolTable {
    /// Frame 0 is the global frame and is never popped
    scopes: Vec<Frame>,
    routines: HashMap<String, RoutineSignature>,
    types: HashMap<String, Type>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: vec![Frame::new()],
            routines: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Enter a new scope
    pub fn enter_scope(&mut self) {
        self.scopes.push(Frame::new());
        trace!("enter scope (depth {})", self.scopes.len());
    }

    /// Exit the current scope. The global frame stays.
    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
            trace!("exit scope (depth {})", self.scopes.len());
        }
    }

    /// Number of live frames, including the global one
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    fn current_frame(&mut self) -> &mut Frame {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Declare a variable in the current scope, replacing any declaration
    /// of the same name in that scope
    pub fn declare_variable(&mut self, name: &str, ty: Type) {
        self.current_frame().insert(name.to_string(), ty);
    }

    /// Check if a variable is visible from the current scope
    pub fn is_defined(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|frame| frame.contains_key(name))
    }

    /// Check if a variable is declared in the current scope only
    pub fn is_defined_in_current_scope(&self, name: &str) -> bool {
        self.scopes
            .last()
            .map_or(false, |frame| frame.contains_key(name))
    }

    /// Look up a variable's type, innermost declaration first
    pub fn get_type(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Look up a variable in the global frame only
    pub fn global_type(&self, name: &str) -> Option<&Type> {
        self.scopes.first().and_then(|frame| frame.get(name))
    }

    /// Declare a routine. Routines may not be redeclared at any scope.
    pub fn declare_routine(&mut self, name: &str, signature: RoutineSignature) -> bool {
        if self.routines.contains_key(name) {
            return false;
        }
        self.routines.insert(name.to_string(), signature);
        true
    }

    pub fn get_routine(&self, name: &str) -> Option<&RoutineSignature> {
        self.routines.get(name)
    }

    /// Define a named type. Built-in names and existing types are rejected.
    pub fn define_type(&mut self, name: &str, ty: Type) -> bool {
        if self.is_type_defined(name) {
            return false;
        }
        self.types.insert(name.to_string(), ty);
        true
    }

    /// Check if a type name is built-in or user-defined
    pub fn is_type_defined(&self, name: &str) -> bool {
        self.is_builtin_type(name) || self.types.contains_key(name)
    }

    /// Definition of a user type
    pub fn get_type_definition(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    /// Reset to a single empty global frame with only the built-in types
    pub fn clear(&mut self) {
        self.scopes.clear();
        self.scopes.push(Frame::new());
        self.routines.clear();
        self.types.clear();
    }
}

impl TypeEnvironment for SymbolTable {
    fn lookup_type(&self, name: &str) -> Option<&Type> {
        self.types.get(name)
    }

    fn is_builtin_type(&self, name: &str) -> bool {
        PrimitiveType::from_name(name).is_some()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
