//! Constraint-based type inference.
//!
//! The semantic analyzer records equations `lhs ≡ rhs` against source lines;
//! [`Inferencer::solve_all`] drains them. An Unknown is resolved by writing
//! an entry into the substitution store; [`Inferencer::try_apply`] chases
//! chains of such entries and path-compresses them. Failure is terminal:
//! the first unsatisfiable constraint aborts the compilation with the error
//! context captured where the constraint was created.

use crate::types::{TypeGraph, TypeNode, TypeRef, UNKNOWN_DIMS};
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("line {line}: {msg}")]
    Mismatch { line: u32, msg: String },

    #[error("line {line}: substitution violated a type constraint")]
    InvalidSubstitution { line: u32 },

    #[error("line {line}: constraint implied a recursive unknown type (occurs check)")]
    Occurs { line: u32 },

    #[error("line {line}: non-equal parameter counts")]
    ParamCount { line: u32 },

    #[error("type {0} is ambiguous: it is restricted to int, char or float but never resolved")]
    Ambiguous(String),
}

/// Deferred error message for one constraint: the template is completed with
/// the deep-substituted observed type only if the constraint fails.
#[derive(Debug, Clone)]
pub struct ErrorCtx {
    pub template: String,
    pub observed: Option<TypeRef>,
}

impl ErrorCtx {
    pub fn new(template: impl Into<String>, observed: TypeRef) -> Self {
        Self {
            template: template.into(),
            observed: Some(observed),
        }
    }
}

#[derive(Debug)]
pub struct Constraint {
    pub lhs: TypeRef,
    pub rhs: TypeRef,
    pub line: u32,
    pub err: Option<ErrorCtx>,
}

#[derive(Debug, Default)]
pub struct Inferencer {
    constraints: Vec<Constraint>,
    /// unknown id → resolved node (None until substituted).
    substitutions: FxHashMap<u32, Option<TypeRef>>,
}

impl Inferencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an Unknown node and register it for substitution.
    pub fn fresh_unknown(
        &mut self,
        types: &mut TypeGraph,
        can_be_array: bool,
        can_be_func: bool,
        only_int_char_float: bool,
    ) -> TypeRef {
        let (t, id) = types.alloc_unknown(can_be_array, can_be_func, only_int_char_float);
        self.init_substitution(id);
        t
    }

    pub fn init_substitution(&mut self, id: u32) {
        self.substitutions.insert(id, None);
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Chase the substitution chain from `t` to its current end, then
    /// rewrite every intermediate link straight to the end.
    pub fn try_apply(&mut self, types: &TypeGraph, t: TypeRef) -> TypeRef {
        let mut to_compress: Vec<u32> = Vec::new();
        let mut current = t;
        loop {
            let TypeNode::Unknown { id, .. } = types.node(current) else {
                break;
            };
            match self.substitutions.get(id) {
                Some(Some(next)) => {
                    to_compress.push(*id);
                    current = *next;
                }
                _ => break,
            }
        }
        for id in to_compress {
            self.substitutions.insert(id, Some(current));
        }
        current
    }

    /// Recursively replace every reachable Unknown with its resolution,
    /// mutating compound children in place. Idempotent.
    pub fn deep_substitute(&mut self, types: &mut TypeGraph, t: TypeRef) -> TypeRef {
        let t = self.try_apply(types, t);
        match types.node(t).clone() {
            TypeNode::Ref { inner } | TypeNode::Array { inner, .. } => {
                let new_inner = self.deep_substitute(types, inner);
                types.change_inner(t, new_inner, 0);
                t
            }
            TypeNode::Function { params, result } => {
                for (i, p) in params.iter().enumerate() {
                    let new_p = self.deep_substitute(types, *p);
                    types.change_inner(t, new_p, i);
                }
                let new_r = self.deep_substitute(types, result);
                types.change_inner(t, new_r, params.len());
                t
            }
            _ => t,
        }
    }

    pub fn add_constraint(
        &mut self,
        types: &TypeGraph,
        lhs: TypeRef,
        rhs: TypeRef,
        line: u32,
        err: Option<ErrorCtx>,
    ) {
        let lhs = self.try_apply(types, lhs);
        let rhs = self.try_apply(types, rhs);
        tracing::debug!(
            target: "melc::infer",
            "constraint at line {}: {} == {}",
            line,
            types.display(lhs),
            types.display(rhs)
        );
        self.constraints.push(Constraint {
            lhs,
            rhs,
            line,
            err,
        });
    }

    /// Drain the work-list, earliest constraints first, then verify that
    /// nothing ambiguous is left unresolved (strict mode only).
    pub fn solve_all(&mut self, types: &mut TypeGraph, strict: bool) -> Result<(), InferError> {
        self.constraints.reverse();
        while let Some(c) = self.constraints.pop() {
            self.solve_one(types, c)?;
        }
        self.check_all_substituted(types, strict)
    }

    fn solve_one(&mut self, types: &mut TypeGraph, c: Constraint) -> Result<(), InferError> {
        let lhs = self.try_apply(types, c.lhs);
        let rhs = self.try_apply(types, c.rhs);
        tracing::debug!(
            target: "melc::infer",
            "solving line {}: {} == {}",
            c.line,
            types.display(lhs),
            types.display(rhs)
        );
        if types.equals(lhs, rhs) {
            return Ok(());
        }
        if types.is_unknown(lhs) {
            return self.try_substitute(types, lhs, rhs, c.line);
        }
        if types.is_unknown(rhs) {
            return self.try_substitute(types, rhs, lhs, c.line);
        }
        if types.is_function(lhs) && types.is_function(rhs) {
            let lp = types.params(lhs).to_vec();
            let rp = types.params(rhs).to_vec();
            if lp.len() != rp.len() {
                return Err(InferError::ParamCount { line: c.line });
            }
            for (l, r) in lp.iter().zip(&rp) {
                self.add_constraint(types, *l, *r, c.line, c.err.clone());
            }
            let (lres, rres) = (types.result(lhs), types.result(rhs));
            self.add_constraint(types, lres, rres, c.line, c.err.clone());
            return Ok(());
        }
        if self.compatible_arrays_or_refs(types, lhs, rhs) {
            let (li, ri) = (types.inner(lhs), types.inner(rhs));
            self.add_constraint(types, li, ri, c.line, c.err.clone());
            return Ok(());
        }
        Err(self.fail(types, &c))
    }

    /// Refs always match; arrays match when their dimensionalities are
    /// reconcilable, merging or pinning the shared lower-bound cells as a
    /// side effect.
    fn compatible_arrays_or_refs(&mut self, types: &mut TypeGraph, a: TypeRef, b: TypeRef) -> bool {
        if types.is_ref(a) && types.is_ref(b) {
            return true;
        }
        if !(types.is_array(a) && types.is_array(b)) {
            return false;
        }
        let (da, db) = (types.dims(a), types.dims(b));
        if da != UNKNOWN_DIMS && db != UNKNOWN_DIMS {
            return da == db;
        }
        if da == UNKNOWN_DIMS && db == UNKNOWN_DIMS {
            // keep the stricter (greater) of the two bounds, sharing one cell
            if types.bound(a) >= types.bound(b) {
                let cell = types.bound_cell(a);
                types.share_bound_cell(b, cell);
            } else {
                let cell = types.bound_cell(b);
                types.share_bound_cell(a, cell);
            }
            return true;
        }
        if da == UNKNOWN_DIMS {
            if db < types.bound(a) {
                return false;
            }
            types.set_dimensions(a, db);
            return true;
        }
        if da < types.bound(b) {
            return false;
        }
        types.set_dimensions(b, da);
        true
    }

    fn try_substitute(
        &mut self,
        types: &mut TypeGraph,
        unknown: TypeRef,
        candidate: TypeRef,
        line: u32,
    ) -> Result<(), InferError> {
        tracing::debug!(
            target: "melc::infer",
            "substituting {} := {} (line {})",
            types.display(unknown),
            types.display(candidate),
            line
        );
        if !self.is_valid_substitution(types, unknown, candidate) {
            return Err(InferError::InvalidSubstitution { line });
        }
        if self.occurs(types, unknown, candidate) {
            return Err(InferError::Occurs { line });
        }
        if types.is_unknown(candidate) {
            types.copy_constraint_flags(candidate, unknown);
        }
        let id = types.unknown_id(unknown);
        match self.substitutions.get_mut(&id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(candidate);
                Ok(())
            }
            // registered twice or never: both are internal invariant breaks
            _ => unreachable!("unknown @{} substituted twice or never registered", id),
        }
    }

    fn is_valid_substitution(
        &self,
        types: &TypeGraph,
        unknown: TypeRef,
        candidate: TypeRef,
    ) -> bool {
        let invalid = (!types.can_be_array(unknown) && types.is_array(candidate))
            || (!types.can_be_func(unknown) && types.is_function(candidate))
            || (types.only_int_char_float(unknown)
                && !types.is_unknown(candidate)
                && !types.equals(candidate, crate::types::T_INT)
                && !types.equals(candidate, crate::types::T_CHAR)
                && !types.equals(candidate, crate::types::T_FLOAT));
        !invalid
    }

    fn is_or_occurs(&mut self, types: &TypeGraph, unknown: TypeRef, candidate: TypeRef) -> bool {
        types.equals(unknown, candidate) || self.occurs(types, unknown, candidate)
    }

    fn occurs(&mut self, types: &TypeGraph, unknown: TypeRef, candidate: TypeRef) -> bool {
        match types.node(candidate) {
            TypeNode::Array { inner, .. } | TypeNode::Ref { inner } => {
                let inner = self.try_apply(types, *inner);
                self.is_or_occurs(types, unknown, inner)
            }
            TypeNode::Function { params, result } => {
                let params = params.clone();
                let result = *result;
                for p in params {
                    let p = self.try_apply(types, p);
                    if self.is_or_occurs(types, unknown, p) {
                        return true;
                    }
                }
                let result = self.try_apply(types, result);
                self.is_or_occurs(types, unknown, result)
            }
            _ => false,
        }
    }

    fn fail(&mut self, types: &mut TypeGraph, c: &Constraint) -> InferError {
        let msg = match &c.err {
            Some(ctx) => {
                let mut msg = ctx.template.clone();
                if let Some(observed) = ctx.observed {
                    let seen = self.deep_substitute(types, observed);
                    msg.push_str(&format!(", {} given", types.display(seen)));
                }
                msg
            }
            None => {
                let l = self.deep_substitute(types, c.lhs);
                let r = self.deep_substitute(types, c.rhs);
                format!(
                    "type mismatch between {} and {}",
                    types.display(l),
                    types.display(r)
                )
            }
        };
        InferError::Mismatch { line: c.line, msg }
    }

    /// Residual Unknowns at the end of solving are generalized type
    /// variables (top-level let-polymorphism) and are accepted, except that
    /// strict mode rejects ones carrying the int/char/float restriction:
    /// those came from a comparison that stayed ambiguous.
    pub fn check_all_substituted(
        &mut self,
        types: &TypeGraph,
        strict: bool,
    ) -> Result<(), InferError> {
        if !strict {
            return Ok(());
        }
        let mut ids: Vec<u32> = self.substitutions.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let entry = self.substitutions.get(&id).copied().flatten();
            let resolved = match entry {
                Some(t) => self.try_apply(types, t),
                None => continue, // never constrained: fully general
            };
            if types.is_unknown(resolved) && types.only_int_char_float(resolved) {
                return Err(InferError::Ambiguous(types.display(resolved)));
            }
        }
        // a never-substituted unknown may still carry the restriction
        let mut ids: Vec<u32> = self
            .substitutions
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();
        ids.sort_unstable();
        for id in ids {
            if let Some(node) = self.find_unknown_node(types, id) {
                if types.only_int_char_float(node) {
                    return Err(InferError::Ambiguous(format!("@{}", id)));
                }
            }
        }
        Ok(())
    }

    fn find_unknown_node(&self, types: &TypeGraph, id: u32) -> Option<TypeRef> {
        (0..types.len() as TypeRef)
            .find(|t| matches!(types.node(*t), TypeNode::Unknown { id: nid, .. } if *nid == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn setup() -> (TypeGraph, Inferencer) {
        (TypeGraph::new(), Inferencer::new())
    }

    #[test]
    fn resolves_simple_chain_with_path_compression() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, false);
        let b = inf.fresh_unknown(&mut tg, true, true, false);
        inf.add_constraint(&tg, a, b, 1, None);
        inf.add_constraint(&tg, b, T_INT, 2, None);
        inf.solve_all(&mut tg, true).unwrap();
        assert_eq!(inf.try_apply(&tg, a), T_INT);
        assert_eq!(inf.try_apply(&tg, b), T_INT);
        // try_apply is idempotent
        let once = inf.try_apply(&tg, a);
        assert_eq!(inf.try_apply(&tg, once), once);
    }

    #[test]
    fn function_constraints_decompose() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, false);
        let f1 = tg.new_function_with(vec![T_INT], a);
        let f2 = tg.new_function_with(vec![T_INT], T_BOOL);
        inf.add_constraint(&tg, f1, f2, 3, None);
        inf.solve_all(&mut tg, true).unwrap();
        assert_eq!(inf.try_apply(&tg, a), T_BOOL);
    }

    #[test]
    fn param_count_mismatch_fails() {
        let (mut tg, mut inf) = setup();
        let f1 = tg.new_function_with(vec![T_INT], T_INT);
        let f2 = tg.new_function_with(vec![T_INT, T_INT], T_INT);
        inf.add_constraint(&tg, f1, f2, 9, None);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::ParamCount { line: 9 })
        ));
    }

    #[test]
    fn occurs_check_rejects_recursive_types() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, false);
        let f = tg.new_function_with(vec![a], T_INT);
        inf.add_constraint(&tg, a, f, 4, None);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::Occurs { line: 4 })
        ));
    }

    #[test]
    fn flag_violation_rejects_substitution() {
        let (mut tg, mut inf) = setup();
        // an unknown that cannot be a function
        let a = inf.fresh_unknown(&mut tg, true, false, false);
        let f = tg.new_function_with(vec![T_INT], T_INT);
        inf.add_constraint(&tg, a, f, 5, None);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::InvalidSubstitution { line: 5 })
        ));
    }

    #[test]
    fn only_int_char_float_restriction_is_enforced() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, true);
        inf.add_constraint(&tg, a, T_BOOL, 6, None);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::InvalidSubstitution { line: 6 })
        ));
    }

    #[test]
    fn flags_are_merged_when_two_unknowns_unify() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, true);
        let b = inf.fresh_unknown(&mut tg, true, true, false);
        inf.add_constraint(&tg, a, b, 7, None);
        inf.add_constraint(&tg, b, T_BOOL, 8, None);
        // b inherits the restriction from a, so bool must be rejected
        assert!(inf.solve_all(&mut tg, true).is_err());
    }

    #[test]
    fn arrays_of_equal_known_dims_unify_elementwise() {
        let (mut tg, mut inf) = setup();
        let u = inf.fresh_unknown(&mut tg, false, true, false);
        let r1 = tg.new_ref(T_INT);
        let a1 = tg.new_array(2, r1);
        let r2 = tg.new_ref(u);
        let a2 = tg.new_array(2, r2);
        inf.add_constraint(&tg, a1, a2, 10, None);
        inf.solve_all(&mut tg, true).unwrap();
        assert_eq!(inf.try_apply(&tg, u), T_INT);
    }

    #[test]
    fn arrays_of_different_known_dims_fail() {
        let (mut tg, mut inf) = setup();
        let r1 = tg.new_ref(T_INT);
        let a1 = tg.new_array(2, r1);
        let r2 = tg.new_ref(T_INT);
        let a2 = tg.new_array(3, r2);
        inf.add_constraint(&tg, a1, a2, 11, None);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::Mismatch { line: 11, .. })
        ));
    }

    #[test]
    fn unknown_dim_arrays_merge_to_the_stricter_bound() {
        let (mut tg, mut inf) = setup();
        let r1 = tg.new_ref(T_INT);
        let a1 = tg.new_array_with_bound(r1, 1);
        let r2 = tg.new_ref(T_INT);
        let a2 = tg.new_array_with_bound(r2, 3);
        inf.add_constraint(&tg, a1, a2, 12, None);
        inf.solve_all(&mut tg, true).unwrap();
        assert_eq!(tg.bound(a1), 3);
        assert_eq!(tg.bound(a2), 3);
        // the cells are now one: raising one raises the other
        tg.raise_bound(a1, 4);
        assert_eq!(tg.bound(a2), 4);
    }

    #[test]
    fn known_dims_pin_an_unknown_dim_array() {
        let (mut tg, mut inf) = setup();
        let r1 = tg.new_ref(T_INT);
        let unknown_dims = tg.new_array_with_bound(r1, 2);
        let r2 = tg.new_ref(T_INT);
        let known = tg.new_array(3, r2);
        inf.add_constraint(&tg, unknown_dims, known, 13, None);
        inf.solve_all(&mut tg, true).unwrap();
        assert_eq!(tg.dims(unknown_dims), 3);
    }

    #[test]
    fn too_small_known_dims_conflict_with_the_bound() {
        let (mut tg, mut inf) = setup();
        let r1 = tg.new_ref(T_INT);
        let unknown_dims = tg.new_array_with_bound(r1, 3);
        let r2 = tg.new_ref(T_INT);
        let known = tg.new_array(2, r2);
        inf.add_constraint(&tg, unknown_dims, known, 14, None);
        assert!(inf.solve_all(&mut tg, true).is_err());
    }

    #[test]
    fn deep_substitute_rewrites_nested_unknowns_and_is_idempotent() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, false);
        let r = tg.new_ref(a);
        let f = tg.new_function_with(vec![r], a);
        inf.add_constraint(&tg, a, T_CHAR, 15, None);
        inf.solve_all(&mut tg, true).unwrap();
        let once = inf.deep_substitute(&mut tg, f);
        assert_eq!(tg.display(once), "char ref -> char");
        let twice = inf.deep_substitute(&mut tg, once);
        assert_eq!(once, twice);
        assert!(!tg.contains_unknown(once));
    }

    #[test]
    fn unconstrained_unknowns_generalize_in_strict_mode() {
        let (mut tg, mut inf) = setup();
        let a = inf.fresh_unknown(&mut tg, true, true, false);
        let _identity = tg.new_function_with(vec![a], a);
        // no constraint ever touches `a`
        assert!(inf.solve_all(&mut tg, true).is_ok());
        assert!(tg.is_unknown(inf.try_apply(&tg, a)));
    }

    #[test]
    fn ambiguous_comparison_unknowns_fail_strict_mode() {
        let (mut tg, mut inf) = setup();
        let _a = inf.fresh_unknown(&mut tg, true, true, true);
        assert!(matches!(
            inf.solve_all(&mut tg, true),
            Err(InferError::Ambiguous(_))
        ));
        let (mut tg, mut inf) = setup();
        let _a = inf.fresh_unknown(&mut tg, true, true, true);
        assert!(inf.solve_all(&mut tg, false).is_ok());
    }
}
