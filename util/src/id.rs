use std::sync::atomic::{AtomicUsize, Ordering};

pub type Label = String;

// shared by every function compiled in parallel
static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next() -> usize {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub fn gen_uniq() -> Label {
    format!("T{}", next())
}

pub fn gen_uniq_with(s: &str) -> Label {
    format!("{}{}", s, next())
}
