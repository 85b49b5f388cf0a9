mod errors;
pub mod interface;
pub mod producer;
mod result;
pub mod session;

pub use errors::ChatError;
pub use interface::*;
pub use producer::*;
pub use result::{ProducerResult, ReplayMode};
pub use session::*;
