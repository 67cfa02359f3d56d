//! Allocation entry points.
//!
//! The generated code assumes a conservative collector with the Boehm
//! entry-point names. These stand-ins satisfy the link with plain malloc:
//! atomic allocations are simply never reclaimed, and `GC_free` (backing
//! the language's `delete`) forwards to free, which is exactly the
//! lifetime contract `new`/`delete` promise.

use libc::{c_void, size_t};

#[no_mangle]
pub extern "C" fn GC_malloc_atomic(size: size_t) -> *mut c_void {
    unsafe { libc::malloc(size.max(1)) }
}

#[no_mangle]
pub extern "C" fn GC_malloc_atomic_uncollectable(size: size_t) -> *mut c_void {
    unsafe { libc::malloc(size.max(1)) }
}

#[no_mangle]
pub extern "C" fn GC_free(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe { libc::free(ptr) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_round_trip() {
        let p = GC_malloc_atomic(64);
        assert!(!p.is_null());
        GC_free(p);

        let q = GC_malloc_atomic_uncollectable(16);
        assert!(!q.is_null());
        GC_free(q);
    }

    #[test]
    fn zero_sized_allocations_still_return_memory() {
        let p = GC_malloc_atomic(0);
        assert!(!p.is_null());
        GC_free(p);
    }
}
