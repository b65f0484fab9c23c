//! Query layer - client, bindings and their background triggers

mod binding;
mod client;
mod direct;
mod focus;
mod listeners;

pub use binding::{QueryBinding, FOCUS_THROTTLE};
pub use client::QueryClient;
pub use direct::DirectRequest;
pub use focus::FocusManager;
