pub mod cfg;
pub mod dataflow;
pub mod dominators;
pub mod error;
pub mod eval;
pub mod loops;
pub mod program;
pub mod stats;

pub use cfg::{build, build_module, Block, BlockId, EdgeKind, Fundef, Module, Tail};
pub use dominators::Dominators;
pub use error::{ErrorKind, InternalError, Result};
pub use loops::{Loop, Loops};
pub use program::*;
pub use stats::Statistics;
