//! A stack of lexical scopes mapping names to values.

use rustc_hash::FxHashMap;

/// A stack of name → value maps with lexical lookup.
///
/// Insertion always targets the innermost scope; lookup walks from the
/// innermost scope outwards, so inner bindings shadow outer ones. Closing a
/// scope discards every binding made in it.
#[derive(Debug)]
pub struct ScopeStack<V> {
    scopes: Vec<FxHashMap<String, V>>,
}

impl<V> ScopeStack<V> {
    /// Create a stack with the global scope already open.
    pub fn new() -> Self {
        Self {
            scopes: vec![FxHashMap::default()],
        }
    }

    /// Create a stack with no scope open.
    pub fn without_global_scope() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    /// Close the innermost scope and discard its bindings. Returns false if
    /// there was no scope to close.
    pub fn close_scope(&mut self) -> bool {
        self.scopes.pop().is_some()
    }

    /// Number of scopes currently open.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Insert into the innermost scope, shadowing any same-named binding in
    /// outer scopes and overwriting one in the innermost.
    pub fn insert(&mut self, name: impl Into<String>, value: V) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Insert into the innermost scope unless the name is already bound
    /// there. Returns false (without inserting) on a same-scope duplicate.
    pub fn insert_unique(&mut self, name: impl Into<String>, value: V) -> bool {
        let name = name.into();
        match self.scopes.last_mut() {
            Some(scope) if !scope.contains_key(&name) => {
                scope.insert(name, value);
                true
            }
            _ => false,
        }
    }

    /// Look a name up, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&V> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut V> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
    }

    /// Look a name up together with the 0-based index of the scope that
    /// defines it (0 = global). Used by the liveness pass, which cares about
    /// where a binding lives, not just what it is.
    pub fn lookup_with_depth(&self, name: &str) -> Option<(usize, &V)> {
        for (depth, scope) in self.scopes.iter().enumerate().rev() {
            if let Some(v) = scope.get(name) {
                return Some((depth, v));
            }
        }
        None
    }

    /// Iterate over the bindings of the innermost scope.
    pub fn current_scope(&self) -> impl Iterator<Item = (&String, &V)> {
        self.scopes.last().into_iter().flatten()
    }
}

impl<V> Default for ScopeStack<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_resolves_innermost_first() {
        let mut st: ScopeStack<i32> = ScopeStack::new();
        st.insert("x", 1);
        st.open_scope();
        st.insert("x", 2);
        assert_eq!(st.lookup("x"), Some(&2));
        st.close_scope();
        assert_eq!(st.lookup("x"), Some(&1));
    }

    #[test]
    fn close_scope_discards_bindings() {
        let mut st: ScopeStack<&str> = ScopeStack::new();
        st.open_scope();
        st.insert("y", "inner");
        assert!(st.close_scope());
        assert_eq!(st.lookup("y"), None);
    }

    #[test]
    fn insert_unique_rejects_same_scope_duplicates() {
        let mut st: ScopeStack<i32> = ScopeStack::new();
        assert!(st.insert_unique("c", 1));
        assert!(!st.insert_unique("c", 2));
        assert_eq!(st.lookup("c"), Some(&1));
        // a fresh scope may shadow
        st.open_scope();
        assert!(st.insert_unique("c", 3));
    }

    #[test]
    fn lookup_with_depth_reports_defining_scope() {
        let mut st: ScopeStack<i32> = ScopeStack::new();
        st.insert("g", 0);
        st.open_scope();
        st.open_scope();
        st.insert("l", 7);
        assert_eq!(st.lookup_with_depth("g"), Some((0, &0)));
        assert_eq!(st.lookup_with_depth("l"), Some((2, &7)));
        assert_eq!(st.lookup_with_depth("missing"), None);
    }
}
