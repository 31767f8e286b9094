//! Interpreter lock
//!
//! The scripting interpreter is single-threaded. Every inbound trampoline takes
//! this lock before touching scripting state. It is re-entrant so that a
//! native call made from scripting code can call back into scripting code on
//! the same thread without deadlocking.

use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};

static INTERPRETER: ReentrantMutex<()> = const_reentrant_mutex(());

/// Held while the current thread executes scripting code
#[must_use = "the interpreter lock is released when the guard drops"]
pub struct InterpreterGuard {
    _guard: ReentrantMutexGuard<'static, ()>,
}

/// Enter the interpreter, blocking until no other thread is inside it
pub fn enter() -> InterpreterGuard {
    InterpreterGuard {
        _guard: INTERPRETER.lock(),
    }
}

/// Enter the interpreter only if it is free or already ours
pub fn try_enter() -> Option<InterpreterGuard> {
    INTERPRETER
        .try_lock()
        .map(|guard| InterpreterGuard { _guard: guard })
}

/// Whether the calling thread is inside the interpreter
#[inline]
pub fn held_by_current_thread() -> bool {
    INTERPRETER.is_owned_by_current_thread()
}

/// Whether any thread is inside the interpreter
#[inline]
pub fn is_held() -> bool {
    INTERPRETER.is_locked()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_reentrant_on_same_thread() {
        let outer = enter();
        let inner = enter();
        assert!(held_by_current_thread());
        drop(inner);
        assert!(held_by_current_thread());
        drop(outer);
    }

    #[test]
    fn test_other_thread_excluded() {
        let guard = enter();
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            tx.send(try_enter().is_some()).unwrap();
        });
        assert!(!rx.recv().unwrap());
        handle.join().unwrap();
        drop(guard);
    }
}
