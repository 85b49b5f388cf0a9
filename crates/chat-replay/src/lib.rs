//! Chat response producers with precomputed, replayable example outputs.
//!
//! A [`ResponseProducer`] wraps user response logic and normalizes its output to
//! a [`ProducerResult`]. An [`ExampleCache`] invokes it once per example and keeps
//! the full output, so streamed replies can be replayed frame by frame.
//! [`ChatInterface`] and [`ChatSession`] tie both to the usual chat events.

pub mod cache;
pub mod chat;
pub mod data;
pub mod utils;

pub use cache::*;
pub use chat::*;
pub use data::*;
pub use utils::*;

/// Builds an [`ExampleInput`] from a message followed by its extra parameter values.
///
/// ```ignore
/// let example = example_input!["hello", "robot", 100];
/// assert_eq!(example.extras.len(), 2);
/// ```
#[macro_export]
macro_rules! example_input {
    [$message:expr $(, $extra:expr)* $(,)?] => {
        $crate::ExampleInput::new($message)$(.extra($extra))*
    };
}
