//! melc-runtime - C-ABI Runtime Library
//!
//! The symbols the emitted objects link against, beyond libc/libm: line
//! based console I/O, the two math entry points libm spells differently
//! (`ln`, `pi`), and malloc-backed stand-ins for the conservative-GC entry
//! points. Built as a static library and linked next to the object file
//! the compiler emits; a real collector can replace [`gc`] symbol for
//! symbol.

// the exported names are the C ABI of the emitted code
#![allow(non_snake_case)]

mod gc;
mod io;

pub use gc::*;
pub use io::*;
