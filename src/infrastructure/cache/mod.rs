//! Cache infrastructure - the in-memory store and its sweeper

mod store;
mod sweeper;

pub use store::{CacheStore, CacheStoreConfig, PreloadSignal, DEFAULT_SWEEP_INTERVAL};
pub use sweeper::SweeperHandle;
