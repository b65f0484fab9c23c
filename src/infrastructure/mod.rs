//! Infrastructure layer - cache store, request coordination and bindings

pub mod cache;
pub mod coordinator;
pub mod logging;
pub mod mutation;
pub mod observability;
pub mod query;
pub mod subscription;
