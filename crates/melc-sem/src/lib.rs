//! melc-sem - Semantic Analysis & Type Inference
//!
//! The three core subsystems of the frontend live here:
//!
//! - the type graph ([`types`]): an arena of type nodes with five shared
//!   basic singletons, unification variables carrying validity flags, and
//!   arrays whose open dimensionality is tracked through shared lower-bound
//!   cells;
//! - the tables ([`symbol`]): the scoped term table and the flat type and
//!   constructor tables, pre-seeded with the primitives and the standard
//!   library;
//! - the inferencer ([`infer`]): a work-list of `lhs == rhs` constraints
//!   with path-compressed substitutions, solved after the whole program has
//!   been visited;
//! - the semantic analyzer ([`analysis`]): the AST visitor that populates
//!   the tables, attaches a type to every node, and emits the constraints;
//! - the liveness pass ([`liveness`]): per-function capture sets, used to
//!   reject closures over enclosing-function locals.
//!
//! All passes share one [`Compilation`] context; nothing is process-global.

pub mod analysis;
pub mod error;
pub mod infer;
pub mod liveness;
pub mod symbol;
pub mod types;

pub use analysis::analyze;
pub use error::SemError;
pub use infer::{ErrorCtx, InferError, Inferencer};
pub use liveness::analyze_liveness;
pub use symbol::{install_stdlib, ConstructorTable, SymbolTable, TypeTable};
pub use types::{TypeGraph, TypeNode, TypeRef};

use melc_ast::NodeId;
use rustc_hash::FxHashMap;

/// One user identifier with where and at what type it was introduced.
/// Collected during analysis for the `-idtypes` view.
#[derive(Debug, Clone)]
pub struct IdentInfo {
    pub name: String,
    pub line: u32,
    pub tg: TypeRef,
}

/// An identifier a function uses but does not define, together with the
/// scope depth (0 = program scope) of the binding it refers to.
#[derive(Debug, Clone)]
pub struct External {
    pub name: String,
    pub depth: usize,
}

/// All state of one compilation: the type graph, the inferencer, the three
/// tables, and the per-node results of analysis. Constructed before the
/// first pass and passed explicitly through every pass.
#[derive(Debug)]
pub struct Compilation {
    pub types: TypeGraph,
    pub inf: Inferencer,
    pub symbols: SymbolTable,
    pub type_table: TypeTable,
    pub constructors: ConstructorTable,
    /// Resolved type of every expression/pattern/binding node.
    pub node_types: FxHashMap<NodeId, TypeRef>,
    /// For constructor calls and constructor patterns: the Constructor node
    /// the name resolved to (the lowerer needs its tag and payload shape).
    pub constructor_uses: FxHashMap<NodeId, TypeRef>,
    /// For array accesses and `dim`: the type of the array symbol the name
    /// resolved to.
    pub array_uses: FxHashMap<NodeId, TypeRef>,
    /// User identifiers in order of introduction.
    pub identifiers: Vec<IdentInfo>,
    /// Per-function capture sets from the liveness pass.
    pub externals: FxHashMap<NodeId, Vec<External>>,
}

impl Compilation {
    pub fn new() -> Self {
        let mut types = TypeGraph::new();
        let mut symbols = SymbolTable::new();
        install_stdlib(&mut types, &mut symbols);
        Self {
            types,
            inf: Inferencer::new(),
            symbols,
            type_table: TypeTable::new(),
            constructors: ConstructorTable::new(),
            node_types: FxHashMap::default(),
            constructor_uses: FxHashMap::default(),
            array_uses: FxHashMap::default(),
            identifiers: Vec::new(),
            externals: FxHashMap::default(),
        }
    }

    /// Resolved type of an analyzed node. Only valid after `analyze`.
    pub fn node_tg(&self, id: NodeId) -> TypeRef {
        *self
            .node_types
            .get(&id)
            .expect("node was never visited by semantic analysis")
    }

    /// Render the `-idtypes` table: every user identifier with its (deep
    /// substituted) inferred type.
    pub fn idtypes_table(&mut self) -> String {
        let mut out = String::new();
        let infos = self.identifiers.clone();
        let width = infos.iter().map(|i| i.name.len()).max().unwrap_or(0).max(4);
        for info in infos {
            let t = self.inf.deep_substitute(&mut self.types, info.tg);
            out.push_str(&format!(
                "{:>5}  {:width$}  {}\n",
                info.line,
                info.name,
                self.types.display(t),
                width = width
            ));
        }
        out
    }
}

impl Default for Compilation {
    fn default() -> Self {
        Self::new()
    }
}
