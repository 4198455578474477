mod common;
mod config;
mod context;
mod manager;
pub mod passes;

pub use config::Config;
pub use context::{Invalidates, PassContext};
pub use manager::{optimize_fundef, optimize_module, Pass, PassFn, PASSES};
