pub mod fmt;
pub mod rustls;

use std::sync::{Mutex, MutexGuard};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Expands to the full path of the enclosing function, for use as a `tracing` target.
///
/// Requires the function to be annotated with `#[named]`.
#[macro_export]
macro_rules! function_path {
    () => (concat!(
        module_path!(), "::", function_name!()
    ))
}

/// Expands to `module::Type::method`, for use as a `tracing` target.
///
/// Requires the method to be annotated with `#[named]`.
#[macro_export]
macro_rules! method_path {
    ($struct_name: literal) => (concat!(
        module_path!(), "::",
        $struct_name, "::",
        function_name!()
    ))
}

pub use function_name::named;

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn lock_recovers_poisoned_mutex() {
        let m = Arc::new(Mutex::new(1));
        let m2 = Arc::clone(&m);
        let _ = std::thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("holder panicked");
        }).join();

        assert!(m.is_poisoned());
        *lock(&m) += 1;
        assert_eq!(*lock(&m), 2);
    }
}
