#![allow(unused_macros)]

/// Acquires a `Mutex`, treating poisoning as a bug.
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Acquires the read side of an `RwLock`, treating poisoning as a bug.
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Acquires the write side of an `RwLock`, treating poisoning as a bug.
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}

/// Runs a closure with shared access to the value behind an `RwLock`.
macro_rules! with_read {
    ($rwlock:expr, $closure:expr) => {{
        let guard = $rwlock.read().expect("Failed to acquire read lock");
        $closure(&*guard)
    }};
}

/// Runs a closure with exclusive access to the value behind an `RwLock`.
macro_rules! with_write {
    ($rwlock:expr, $closure:expr) => {{
        let mut guard = $rwlock.write().expect("Failed to acquire write lock");
        $closure(&mut *guard)
    }};
}

/// Declares a `u32` newtype used as a stable index into an append-only table.
macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the index as a `usize` for slice access.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl From<usize> for $name {
            #[allow(clippy::cast_possible_truncation)]
            fn from(value: usize) -> Self {
                $name(value as u32)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}
