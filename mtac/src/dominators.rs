use bit_vec::BitVec;

use crate::cfg::{BlockId, Fundef};
use crate::dataflow::SWEEP_LIMIT;
use crate::error::{ErrorKind, Result};
use util::{Map, Set};

/// Dominator sets, immediate dominators and dominance frontiers of one
/// function. Recomputed from scratch after every structural CFG edit.
#[derive(Debug, Clone)]
pub struct Dominators {
    rpo: Vec<BlockId>,
    index: Map<BlockId, usize>,
    sets: Vec<BitVec>,
    idom: Map<BlockId, BlockId>,
    frontier: Map<BlockId, Set<BlockId>>,
}

impl Dominators {
    pub fn compute(f: &Fundef) -> Result<Self> {
        const PASS: &str = "dominators";

        let rpo = f.reverse_postorder();
        let index: Map<BlockId, usize> = rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        for b in &f.layout {
            if !index.contains_key(b) {
                return Err(f.error(PASS, ErrorKind::Unreachable(f.blocks[*b].label.clone())));
            }
        }

        let n = rpo.len();
        let mut sets = vec![BitVec::from_elem(n, true); n];
        sets[0] = BitVec::from_elem(n, false);
        sets[0].set(0, true);

        let mut sweeps = 0;
        loop {
            let mut changed = false;
            for i in 1..n {
                let mut new = BitVec::from_elem(n, true);
                for p in f.preds(rpo[i]) {
                    match index.get(p) {
                        Some(j) => {
                            new.and(&sets[*j]);
                        }
                        None => {
                            return Err(
                                f.error(PASS, ErrorKind::Unreachable(f.blocks[*p].label.clone()))
                            )
                        }
                    }
                }
                new.set(i, true);
                if new != sets[i] {
                    sets[i] = new;
                    changed = true;
                }
            }

            sweeps += 1;
            if !changed {
                break;
            }
            if sweeps > SWEEP_LIMIT {
                return Err(f.error(PASS, ErrorKind::Diverged(sweeps)));
            }
        }

        // the closest strict dominator has the largest dominator set
        let count = |s: &BitVec| s.iter().filter(|x| *x).count();
        let mut idom = Map::default();
        for i in 1..n {
            let best = (0..n)
                .filter(|j| *j != i && sets[i].get(*j).unwrap_or(false))
                .max_by_key(|j| count(&sets[*j]));
            if let Some(j) = best {
                idom.insert(rpo[i], rpo[j]);
            }
        }

        let mut frontier: Map<BlockId, Set<BlockId>> =
            rpo.iter().map(|b| (*b, Set::default())).collect();
        for b in &rpo {
            let preds = f.preds(*b);
            if preds.len() < 2 {
                continue;
            }
            let stop = idom.get(b).copied();
            for p in preds {
                let mut runner = Some(*p);
                while let Some(r) = runner {
                    if Some(r) == stop {
                        break;
                    }
                    frontier.entry(r).or_default().insert(*b);
                    runner = idom.get(&r).copied();
                }
            }
        }

        Ok(Self {
            rpo,
            index,
            sets,
            idom,
            frontier,
        })
    }

    pub fn entry(&self) -> BlockId {
        self.rpo[0]
    }

    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom.get(&b).copied()
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(i), Some(j)) => self.sets[*j].get(*i).unwrap_or(false),
            _ => false,
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn frontier(&self, b: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.frontier.get(&b).into_iter().flat_map(|s| s.iter().copied())
    }

    // depth in the dominator tree, entry = 0
    pub fn depth(&self, b: BlockId) -> usize {
        let mut d = 0;
        let mut cur = b;
        while let Some(p) = self.idom(cur) {
            d += 1;
            cur = p;
        }
        d
    }
}
