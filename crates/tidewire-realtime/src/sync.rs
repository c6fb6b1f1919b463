use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a callback panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
