pub mod example;
pub mod extras;
pub mod history;

pub use example::*;
pub use extras::*;
pub use history::*;
