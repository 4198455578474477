pub mod id;

pub use id::Label;

use std::fmt;

pub fn format_vec<T: fmt::Display>(
    f: &mut fmt::Formatter,
    v: &[T],
    left: &str,
    sep: &str,
    right: &str,
) -> fmt::Result {
    write!(f, "{}", left)?;
    if let Some((first, rest)) = v.split_first() {
        write!(f, "{}", first)?;
        for e in rest {
            write!(f, "{}{}", sep, e)?;
        }
    }
    write!(f, "{}", right)
}

pub use fnv::FnvHashMap as Map;
pub use fnv::FnvHashSet as Set;

pub use fnv::FnvBuildHasher as Hasher;
