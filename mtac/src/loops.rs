use crate::cfg::{BlockId, Fundef};
use crate::dominators::Dominators;
use util::Set;

#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: Set<BlockId>,
    // sources of the back edges
    pub latches: Vec<BlockId>,
    // 1 for outermost loops
    pub depth: usize,
    pub parent: Option<usize>,
}

impl Loop {
    pub fn contains(&self, b: BlockId) -> bool {
        self.blocks.contains(&b)
    }

    // edges leaving the loop: (inside, outside)
    pub fn exits(&self, f: &Fundef) -> Vec<(BlockId, BlockId)> {
        let mut r = vec![];
        for b in f.layout.iter().filter(|b| self.contains(**b)) {
            for s in f.succs(*b) {
                if !self.contains(s) {
                    r.push((*b, s));
                }
            }
        }
        r
    }

    // the unique outside predecessor of the header, provided it only flows into the header
    pub fn preheader(&self, f: &Fundef) -> Option<BlockId> {
        let outside: Vec<_> = f
            .preds(self.header)
            .iter()
            .copied()
            .filter(|p| !self.contains(*p))
            .collect();
        match outside.as_slice() {
            [p] if f.succs(*p) == vec![self.header] => Some(*p),
            _ => None,
        }
    }

    pub fn blocks_in_layout(&self, f: &Fundef) -> Vec<BlockId> {
        f.layout
            .iter()
            .copied()
            .filter(|b| self.contains(*b))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Loops {
    loops: Vec<Loop>,
}

impl Loops {
    /// Natural loops from back edges `b -> h` where `h` dominates `b`.
    pub fn detect(f: &Fundef, dom: &Dominators) -> Self {
        let mut loops: Vec<Loop> = vec![];
        for b in dom.rpo() {
            for h in f.succs(*b) {
                if !dom.dominates(h, *b) {
                    continue;
                }
                let body = natural_loop(f, h, *b);
                match loops.iter_mut().find(|l| l.header == h) {
                    Some(l) => {
                        l.blocks.extend(body);
                        l.latches.push(*b);
                    }
                    None => loops.push(Loop {
                        header: h,
                        blocks: body,
                        latches: vec![*b],
                        depth: 0,
                        parent: None,
                    }),
                }
            }
        }

        // the innermost enclosing loop is the smallest one containing the header
        for i in 0..loops.len() {
            let parent = (0..loops.len())
                .filter(|j| *j != i)
                .filter(|j| {
                    loops[*j].contains(loops[i].header)
                        && loops[*j].blocks.len() > loops[i].blocks.len()
                })
                .min_by_key(|j| loops[*j].blocks.len());
            loops[i].parent = parent;
        }
        for i in 0..loops.len() {
            let mut d = 1;
            let mut cur = loops[i].parent;
            while let Some(p) = cur {
                d += 1;
                cur = loops[p].parent;
            }
            loops[i].depth = d;
        }

        Self { loops }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loop> {
        self.loops.iter()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn get(&self, i: usize) -> &Loop {
        &self.loops[i]
    }

    pub fn innermost_first(&self) -> Vec<&Loop> {
        let mut r: Vec<&Loop> = self.loops.iter().collect();
        r.sort_by(|a, b| b.depth.cmp(&a.depth));
        r
    }

    // nesting depth of a block, 0 outside every loop
    pub fn depth_of(&self, b: BlockId) -> usize {
        self.loops
            .iter()
            .filter(|l| l.contains(b))
            .map(|l| l.depth)
            .max()
            .unwrap_or(0)
    }
}

fn natural_loop(f: &Fundef, header: BlockId, latch: BlockId) -> Set<BlockId> {
    let mut body = Set::default();
    body.insert(header);
    let mut stack = vec![];
    if body.insert(latch) {
        stack.push(latch);
    }
    while let Some(b) = stack.pop() {
        for p in f.preds(b) {
            if body.insert(*p) {
                stack.push(*p);
            }
        }
    }
    body
}
