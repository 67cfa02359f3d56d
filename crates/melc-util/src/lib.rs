//! melc-util - Shared Compiler Infrastructure
//!
//! The one data structure every phase of this compiler keeps reinventing is a
//! lexically scoped name table: the semantic analyzer resolves identifiers
//! through a stack of scopes, the liveness pass tracks the scope depth at
//! which each binding was introduced, and the code generator keeps the LLVM
//! value bound to each name per scope. [`ScopeStack`] is that table, written
//! once.

mod scope;

pub use scope::ScopeStack;
