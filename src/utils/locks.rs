//! Lock acquisition for the shared stores.
//!
//! A worker that panics while holding one of the store locks leaves the protected
//! container in a consistent state (every mutation is a single push, insert or resize),
//! so the stores recover the guard instead of propagating the poison to every other worker.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub fn read_or_recover<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|e| {
        log::error!("A read lock on {name} was poisoned. Recovering.");
        e.into_inner()
    })
}

pub fn write_or_recover<'a, T>(lock: &'a RwLock<T>, name: &str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|e| {
        log::error!("A write lock on {name} was poisoned. Recovering.");
        e.into_inner()
    })
}

pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        log::error!("The mutex on {name} was poisoned. Recovering.");
        e.into_inner()
    })
}
