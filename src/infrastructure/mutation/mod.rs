//! Mutation layer - write actions with state and callbacks

mod binding;

pub use binding::{mutation_fn, MutationBinding, MutationFn, MutationOptions};
