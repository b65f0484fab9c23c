//! Mutation domain - state of one-shot write actions

mod state;

pub use state::MutationState;
