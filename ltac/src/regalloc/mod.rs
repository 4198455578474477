mod interference;
mod regalloc;
mod spill;

pub use interference::Interference;
pub use regalloc::{allocate, Allocation, Location};
