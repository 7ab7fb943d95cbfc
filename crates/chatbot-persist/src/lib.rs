//! Two-tier thread state storage.
//!
//! A fast cache ([`ThreadCache`]) in front of a durable SQL store
//! ([`ThreadDatastore`]), unified by [`ThreadManager`].

pub mod builder;
pub mod cache;
pub mod config;
pub mod datastore;
pub mod error;
pub mod manager;

pub use builder::ThreadManagerBuilder;
#[cfg(feature = "redis")]
pub use cache::RedisThreadCache;
pub use cache::{LocalThreadCache, ThreadCache};
pub use config::{CacheBackend, CacheConfig, DatastoreConfig};
pub use datastore::{SqlThreadDatastore, ThreadDatastore, ThreadRow};
pub use error::{PersistError, Result};
pub use manager::{IdGenerator, ThreadManager};
