mod aliases;
mod const_prop;
mod copy_prop;
mod cse;
mod eliminate;
mod empty_functions;
mod licm;
mod merge;
mod parameters;
mod skip_jump;
mod unroll;
mod unswitch;

pub use aliases::resolve_aliases;
pub use const_prop::const_prop;
pub use copy_prop::copy_prop;
pub use cse::cse;
pub use eliminate::dead_code;
pub use empty_functions::remove_empty_functions;
pub use licm::licm;
pub use merge::merge_blocks;
pub use parameters::propagate_parameters;
pub use skip_jump::skip_jumps;
pub use unroll::unroll;
pub use unswitch::unswitch;
