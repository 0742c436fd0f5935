use std::cell::Cell;
use std::marker::PhantomData;

use crate::error::{CgError, Result};
use crate::float::Float;

use super::Arena;

thread_local! {
    static ARENA_F32: Cell<*mut Arena<f32>> = const { Cell::new(std::ptr::null_mut()) };
    static ARENA_F64: Cell<*mut Arena<f64>> = const { Cell::new(std::ptr::null_mut()) };
}

/// Trait to select the correct thread-local for a given float type.
///
/// Implemented for `f32` and `f64`, enabling operator overloading on
/// `Cg<F>` for these base types.
pub trait ArenaThreadLocal: Float {
    fn arena_cell() -> &'static std::thread::LocalKey<Cell<*mut Arena<Self>>>;
}

impl ArenaThreadLocal for f32 {
    fn arena_cell() -> &'static std::thread::LocalKey<Cell<*mut Arena<Self>>> {
        &ARENA_F32
    }
}

impl ArenaThreadLocal for f64 {
    fn arena_cell() -> &'static std::thread::LocalKey<Cell<*mut Arena<Self>>> {
        &ARENA_F64
    }
}

/// Access the active arena for the current thread.
///
/// The closure must not record through `Cg` operators itself: those access
/// the same arena.
#[inline]
pub fn with_active_arena<F: ArenaThreadLocal, R>(f: impl FnOnce(&mut Arena<F>) -> R) -> Result<R> {
    F::arena_cell().with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return Err(CgError::NoActiveArena);
        }
        // SAFETY: ArenaGuard guarantees validity for the duration of the
        // recording scope, single-threaded via thread-local.
        let arena = unsafe { &mut *ptr };
        Ok(f(arena))
    })
}

/// Whether an arena is active for `F` on this thread.
pub fn is_arena_active<F: ArenaThreadLocal>() -> bool {
    F::arena_cell().with(|cell| !cell.get().is_null())
}

/// RAII guard that sets an arena as the thread-local active arena.
///
/// The arena stays mutably borrowed while the guard lives, so every access
/// in that scope goes through [`with_active_arena`].
pub struct ArenaGuard<'a, F: ArenaThreadLocal> {
    prev: *mut Arena<F>,
    _arena: PhantomData<&'a mut Arena<F>>,
}

impl<'a, F: ArenaThreadLocal> ArenaGuard<'a, F> {
    /// Activate `arena` as the thread-local arena.
    pub fn new(arena: &'a mut Arena<F>) -> Self {
        let prev = F::arena_cell().with(|cell| {
            let prev = cell.get();
            cell.set(arena as *mut Arena<F>);
            prev
        });
        ArenaGuard {
            prev,
            _arena: PhantomData,
        }
    }
}

impl<F: ArenaThreadLocal> Drop for ArenaGuard<'_, F> {
    fn drop(&mut self) {
        F::arena_cell().with(|cell| {
            cell.set(self.prev);
        });
    }
}
