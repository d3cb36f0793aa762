pub mod rwlock;

pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
