//! The active half of the sync layer: read bindings that pull entities into
//! the cache, and the mutation coordinator that pushes write intents out and
//! reconciles the cache around them.

mod binding;
mod mutation;
#[cfg(test)]
pub mod testing;

pub use binding::{BindingState, ReadBinding, RetryPolicy};
pub use mutation::Mutator;
