use dashmap::DashMap;
use util::Label;

/// Float literals of the whole program, shared by functions lowered in
/// parallel. Entries are keyed by bit pattern and never removed.
#[derive(Debug, Default)]
pub struct FloatPool {
    entries: DashMap<u64, Label>,
}

impl FloatPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, x: f64) -> Label {
        self.entries
            .entry(x.to_bits())
            .or_insert_with(|| util::id::gen_uniq_with("__float"))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // sorted by label for a stable listing
    pub fn into_entries(self) -> Vec<(Label, f64)> {
        let mut r: Vec<(Label, f64)> = self
            .entries
            .into_iter()
            .map(|(bits, label)| (label, f64::from_bits(bits)))
            .collect();
        r.sort_by(|a, b| a.0.cmp(&b.0));
        r
    }
}
