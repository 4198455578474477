mod compile;

pub use compile::*;
