//! Session memory backends for ParkAssist
//!
//! The in-process store is the default; the Redis store behind the
//! `redis-storage` feature gives the same contract across processes.

mod in_memory;

#[cfg(feature = "redis-storage")]
mod redis;

pub use in_memory::InMemorySessionStore;

#[cfg(feature = "redis-storage")]
pub use redis::RedisSessionStore;

pub use parkassist_core::{SessionState, SessionStore, SessionStoreError};
