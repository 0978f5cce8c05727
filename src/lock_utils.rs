//! Lock helpers shared by the in-memory security stores.
//!
//! A panic while a store's lock is held poisons it. The stores only hold
//! plain counters and timestamps, so the guard is recovered and the poisoning
//! is logged instead of taking every later request down with it.

use std::sync::{Mutex, MutexGuard};

/// Acquire a Mutex lock, recovering from poisoning if necessary.
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("Mutex poisoned for '{}' - recovering", context);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_recovers_poisoned_mutex() {
        let m = Arc::new(Mutex::new(5u32));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(m.is_poisoned());
        assert_eq!(*lock_or_recover(&m, "test"), 5);
    }
}
