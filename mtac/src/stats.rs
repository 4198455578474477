use std::collections::BTreeMap;
use std::fmt;

/// Pass effectiveness counters. Purely informational.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    counters: BTreeMap<&'static str, usize>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &'static str, n: usize) {
        *self.counters.entry(name).or_default() += n;
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn merge(&mut self, other: &Statistics) {
        for (name, n) in &other.counters {
            self.add(name, *n);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.counters.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let width = self.counters.keys().map(|k| k.len()).max().unwrap_or(0);
        for (name, n) in &self.counters {
            writeln!(f, "{name:width$}  {n}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_counters() {
        let mut a = Statistics::new();
        a.inc("licm.hoisted");
        a.add("regalloc.spills", 2);

        let mut b = Statistics::new();
        b.inc("licm.hoisted");

        b.merge(&a);
        assert_eq!(b.get("licm.hoisted"), 2);
        assert_eq!(b.get("regalloc.spills"), 2);
        assert_eq!(b.get("cse.replaced"), 0);
    }
}
