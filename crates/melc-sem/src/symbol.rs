//! Name tables: the scoped term table, and the flat type and constructor
//! tables.
//!
//! The term table is a stack of scopes; insert targets the innermost scope,
//! lookup walks outwards. The type and constructor tables are flat for the
//! whole program (type and constructor names are globally unique) and keep
//! insertion order, which is what fixes the runtime tag index of each
//! constructor.

use crate::types::{TypeGraph, TypeRef, T_BOOL, T_CHAR, T_FLOAT, T_INT, T_UNIT};
use indexmap::IndexMap;
use melc_util::ScopeStack;

#[derive(Debug, Clone)]
pub struct SymbolEntry {
    pub name: String,
    pub tg: TypeRef,
}

/// Stack-of-scopes table for term-level names.
#[derive(Debug)]
pub struct SymbolTable {
    table: ScopeStack<SymbolEntry>,
}

impl SymbolTable {
    /// A table with the global scope open (and nothing in it; the standard
    /// library is installed by [`install_stdlib`]).
    pub fn new() -> Self {
        Self {
            table: ScopeStack::new(),
        }
    }

    pub fn open_scope(&mut self) {
        tracing::debug!(target: "melc::tables", "opening a new scope");
        self.table.open_scope();
    }

    pub fn close_scope(&mut self) {
        tracing::debug!(target: "melc::tables", "closing a scope");
        self.table.close_scope();
    }

    /// Insert a name with the given type graph as is.
    pub fn insert_basic(&mut self, name: &str, tg: TypeRef) {
        tracing::debug!(target: "melc::tables", "insert {}", name);
        self.table.insert(
            name,
            SymbolEntry {
                name: name.to_string(),
                tg,
            },
        );
    }

    /// Insert a name bound to a fresh parameterless Function over the given
    /// result type; parameters are added to the returned node afterwards.
    pub fn insert_function(&mut self, types: &mut TypeGraph, name: &str, result: TypeRef) -> TypeRef {
        let func = types.new_function(result);
        self.insert_basic(name, func);
        func
    }

    /// Insert a name bound to an Array of the given dimensions over the
    /// given contained type (already a Ref, or an Unknown that will become
    /// one).
    pub fn insert_array(
        &mut self,
        types: &mut TypeGraph,
        name: &str,
        contained: TypeRef,
        dims: i32,
    ) -> TypeRef {
        let arr = types.new_array(dims, contained);
        self.insert_basic(name, arr);
        arr
    }

    /// Insert a name bound to a Ref of the given type.
    pub fn insert_ref(&mut self, types: &mut TypeGraph, name: &str, pointed: TypeRef) -> TypeRef {
        let r = types.new_ref(pointed);
        self.insert_basic(name, r);
        r
    }

    pub fn lookup(&self, name: &str) -> Option<&SymbolEntry> {
        tracing::debug!(target: "melc::tables", "lookup {}", name);
        self.table.lookup(name)
    }

    pub fn lookup_function<'a>(&'a self, types: &TypeGraph, name: &str) -> Option<&'a SymbolEntry> {
        self.lookup(name).filter(|e| types.is_function(e.tg))
    }

    pub fn lookup_array<'a>(&'a self, types: &TypeGraph, name: &str) -> Option<&'a SymbolEntry> {
        self.lookup(name).filter(|e| types.is_array(e.tg))
    }

    pub fn lookup_ref<'a>(&'a self, types: &TypeGraph, name: &str) -> Option<&'a SymbolEntry> {
        self.lookup(name).filter(|e| types.is_ref(e.tg))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub tg: TypeRef,
    /// Constructor names in declaration order.
    pub constructors: Vec<String>,
}

/// Flat table of type names, pre-populated with the five primitives.
#[derive(Debug)]
pub struct TypeTable {
    table: IndexMap<String, TypeEntry>,
}

impl TypeTable {
    pub fn new() -> Self {
        let mut table = IndexMap::new();
        for (name, tg) in [
            ("unit", T_UNIT),
            ("int", T_INT),
            ("float", T_FLOAT),
            ("char", T_CHAR),
            ("bool", T_BOOL),
        ] {
            table.insert(
                name.to_string(),
                TypeEntry {
                    tg,
                    constructors: Vec::new(),
                },
            );
        }
        Self { table }
    }

    /// Create a new Custom type under `name`. Returns None if the name is
    /// taken (primitives included).
    pub fn insert_type(&mut self, types: &mut TypeGraph, name: &str) -> Option<TypeRef> {
        if self.table.contains_key(name) {
            return None;
        }
        tracing::debug!(target: "melc::tables", "insert type {}", name);
        let tg = types.new_custom(name);
        self.table.insert(
            name.to_string(),
            TypeEntry {
                tg,
                constructors: Vec::new(),
            },
        );
        Some(tg)
    }

    pub fn lookup_type(&self, name: &str) -> Option<&TypeEntry> {
        self.table.get(name)
    }

    pub fn record_constructor(&mut self, type_name: &str, constr_name: &str) {
        if let Some(entry) = self.table.get_mut(type_name) {
            entry.constructors.push(constr_name.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypeEntry)> {
        self.table.iter()
    }
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ConstructorEntry {
    pub tg: TypeRef,
    /// Name of the owning sum type; set when the constructor is attached.
    pub type_name: String,
}

/// Flat table of constructor names; duplicates anywhere in the program are
/// rejected at insertion.
#[derive(Debug, Default)]
pub struct ConstructorTable {
    table: IndexMap<String, ConstructorEntry>,
}

impl ConstructorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_constructor(&mut self, types: &mut TypeGraph, name: &str) -> Option<TypeRef> {
        if self.table.contains_key(name) {
            return None;
        }
        tracing::debug!(target: "melc::tables", "insert constructor {}", name);
        let tg = types.new_constructor(name);
        self.table.insert(
            name.to_string(),
            ConstructorEntry {
                tg,
                type_name: String::new(),
            },
        );
        Some(tg)
    }

    pub fn set_owner(&mut self, constr_name: &str, type_name: &str) {
        if let Some(e) = self.table.get_mut(constr_name) {
            e.type_name = type_name.to_string();
        }
    }

    pub fn lookup_constructor(&self, name: &str) -> Option<&ConstructorEntry> {
        self.table.get(name)
    }
}

/// Install the standard library into the (global) scope of the term table.
pub fn install_stdlib(types: &mut TypeGraph, st: &mut SymbolTable) {
    let char_arr = |types: &mut TypeGraph| {
        let r = types.new_ref(T_CHAR);
        types.new_array(1, r)
    };

    // I/O
    for (name, res) in [
        ("read_int", T_INT),
        ("read_bool", T_BOOL),
        ("read_char", T_CHAR),
        ("read_float", T_FLOAT),
    ] {
        let f = st.insert_function(types, name, res);
        types.add_param(f, T_UNIT, true);
    }
    for (name, param) in [
        ("print_int", T_INT),
        ("print_bool", T_BOOL),
        ("print_char", T_CHAR),
        ("print_float", T_FLOAT),
    ] {
        let f = st.insert_function(types, name, T_UNIT);
        types.add_param(f, param, true);
    }
    for name in ["print_string", "read_string"] {
        let f = st.insert_function(types, name, T_UNIT);
        let arr = char_arr(types);
        types.add_param(f, arr, true);
    }

    // math
    let abs = st.insert_function(types, "abs", T_INT);
    types.add_param(abs, T_INT, true);
    for name in ["fabs", "sqrt", "sin", "cos", "tan", "atan", "exp", "ln"] {
        let f = st.insert_function(types, name, T_FLOAT);
        types.add_param(f, T_FLOAT, true);
    }
    let pi = st.insert_function(types, "pi", T_FLOAT);
    types.add_param(pi, T_UNIT, true);

    // references
    for name in ["incr", "decr"] {
        let f = st.insert_function(types, name, T_UNIT);
        let int_ref = types.new_ref(T_INT);
        types.add_param(f, int_ref, true);
    }

    // conversions
    for (name, param, res) in [
        ("float_of_int", T_INT, T_FLOAT),
        ("int_of_float", T_FLOAT, T_INT),
        ("round", T_FLOAT, T_INT),
        ("int_of_char", T_CHAR, T_INT),
        ("char_of_int", T_INT, T_CHAR),
    ] {
        let f = st.insert_function(types, name, res);
        types.add_param(f, param, true);
    }

    // strings
    let strlen = st.insert_function(types, "strlen", T_INT);
    let arr = char_arr(types);
    types.add_param(strlen, arr, true);
    let strcmp = st.insert_function(types, "strcmp", T_INT);
    for _ in 0..2 {
        let arr = char_arr(types);
        types.add_param(strcmp, arr, true);
    }
    for name in ["strcpy", "strcat"] {
        let f = st.insert_function(types, name, T_UNIT);
        for _ in 0..2 {
            let arr = char_arr(types);
            types.add_param(f, arr, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_scopes_from_the_top() {
        let mut st = SymbolTable::new();
        st.insert_basic("x", T_INT);
        st.open_scope();
        st.insert_basic("x", T_FLOAT);
        assert_eq!(st.lookup("x").unwrap().tg, T_FLOAT);
        st.close_scope();
        assert_eq!(st.lookup("x").unwrap().tg, T_INT);
        assert!(st.lookup("missing").is_none());
    }

    #[test]
    fn insert_wrappers_manufacture_the_right_shapes() {
        let mut types = TypeGraph::new();
        let mut st = SymbolTable::new();
        let f = st.insert_function(&mut types, "f", T_INT);
        types.add_param(f, T_BOOL, true);
        assert!(types.is_function(st.lookup("f").unwrap().tg));
        assert!(st.lookup_function(&types, "f").is_some());
        assert!(st.lookup_array(&types, "f").is_none());

        let r = types.new_ref(T_INT);
        st.insert_array(&mut types, "a", r, 2);
        assert!(st.lookup_array(&types, "a").is_some());

        st.insert_ref(&mut types, "p", T_CHAR);
        assert!(st.lookup_ref(&types, "p").is_some());
    }

    #[test]
    fn type_table_is_seeded_with_primitives() {
        let tt = TypeTable::new();
        assert_eq!(tt.lookup_type("int").unwrap().tg, T_INT);
        assert_eq!(tt.lookup_type("unit").unwrap().tg, T_UNIT);
        assert!(tt.lookup_type("intpair").is_none());
    }

    #[test]
    fn duplicate_types_and_constructors_are_rejected() {
        let mut types = TypeGraph::new();
        let mut tt = TypeTable::new();
        let mut ct = ConstructorTable::new();
        assert!(tt.insert_type(&mut types, "shape").is_some());
        assert!(tt.insert_type(&mut types, "shape").is_none());
        assert!(tt.insert_type(&mut types, "int").is_none());
        assert!(ct.insert_constructor(&mut types, "Circle").is_some());
        assert!(ct.insert_constructor(&mut types, "Circle").is_none());
    }

    #[test]
    fn stdlib_installs_expected_signatures() {
        let mut types = TypeGraph::new();
        let mut st = SymbolTable::new();
        install_stdlib(&mut types, &mut st);

        let print_int = st.lookup("print_int").unwrap().tg;
        assert_eq!(types.params(print_int), &[T_INT]);
        assert_eq!(types.result(print_int), T_UNIT);

        let incr = st.lookup("incr").unwrap().tg;
        let p = types.params(incr)[0];
        assert!(types.is_ref(p));
        assert_eq!(types.inner(p), T_INT);

        let strlen = st.lookup("strlen").unwrap().tg;
        let p = types.params(strlen)[0];
        assert!(types.is_array(p));
        assert_eq!(types.dims(p), 1);
    }
}
